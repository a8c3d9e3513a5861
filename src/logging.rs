//! `tracing` subscriber setup for the command-line entry point.

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::error::{ClassifierError, Result};

/// Install a compact fmt subscriber as the global default.
pub fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(verbose)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| ClassifierError::Config(format!("failed to initialize logging: {}", e)))
}
