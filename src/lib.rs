//! # vgg-classifier
//!
//! A pretrained VGG image classifier wrapped in a train / validate / test
//! lifecycle, built on the Burn framework.
//!
//! - `config`: construction options, label normalization, validated hyperparameters
//! - `backbone`: the closed set of supported networks and their factory
//! - `module`: [`ClassifierModule`] with its step hooks and optimizer setup
//! - `metrics`: macro and per-class F1
//! - `scheduler`: per-epoch step decay
//! - `trainer`: the epoch driver and checkpointed test runs
//!
//! ```rust,ignore
//! use vgg_classifier::{ClassifierConfig, ClassifierModule};
//!
//! let config = ClassifierConfig::new("vgg16", 0.001, 3, 5, 0.1, "a,b,c")
//!     .with_pretrained("weights/vgg16-features.mpk");
//! let module = ClassifierModule::<MyBackend>::new(&config, &device)?;
//! let logits = module.forward(images);
//! ```

pub mod backbone;
pub mod checkpoint;
pub mod config;
pub mod data;
pub mod error;
pub mod heads;
pub mod logger;
pub mod logging;
pub mod metrics;
pub mod module;
pub mod scheduler;
pub mod trainer;
pub mod vgg;

pub use backbone::{Backbone, BackboneConfig, BackboneKind};
pub use checkpoint::{CheckpointMetadata, Checkpointer};
pub use config::{ClassLabels, ClassifierConfig, HyperParameters, TrainingConfig};
pub use data::{ImageBatch, ImageBatcher, ImageFolderDataset, ImageItem};
pub use error::{ClassifierError, Result};
pub use metrics::MetricCollection;
pub use module::{ClassifierModule, OptimizerSetup, Stage};
pub use scheduler::StepLr;
pub use trainer::{run_test, Trainer, TrainingSummary};
