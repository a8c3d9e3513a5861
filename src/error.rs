//! Error types for the classifier crate.
//!
//! Errors are propagated to the caller unchanged; nothing in the library
//! retries or recovers locally.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClassifierError {
    /// The model identifier does not name a supported backbone
    #[error("Unknown backbone '{0}' (expected one of: {1})")]
    UnknownBackbone(String, String),

    /// Invalid or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Dataset layout or label problems
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Error decoding an image file
    #[error("Failed to load image at '{0}': {1}")]
    Image(PathBuf, String),

    /// Metric inputs outside the configured class range
    #[error("Metric error: {0}")]
    Metric(String),

    /// Saving or loading a model record failed
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ClassifierError>;
