#![recursion_limit = "256"]

use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::backend::{wgpu::WgpuDevice, Autodiff, Wgpu};
use clap::{Parser, Subcommand};

use vgg_classifier::{logging::init_logging, run_test, ClassifierConfig, Trainer, TrainingConfig};

type TrainingBackend = Autodiff<Wgpu>;

/// Fine-tune a pretrained VGG classifier and evaluate its checkpoints
#[derive(Parser, Debug)]
#[command(name = "vgg-classifier", version, about, long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train on an image folder, validating and checkpointing every epoch
    Train {
        /// Classifier configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Training loop configuration (JSON); defaults apply when omitted
        #[arg(short, long)]
        training: Option<PathBuf>,
    },

    /// Run the test step over an image folder with a saved checkpoint
    Test {
        /// Directory holding checkpoints written by `train`
        #[arg(short, long, default_value = "artifacts")]
        checkpoint_dir: PathBuf,

        /// Epoch to restore; the best recorded epoch when omitted
        #[arg(short, long)]
        epoch: Option<usize>,

        /// Image folder with one subdirectory per class label
        #[arg(short, long)]
        data_dir: PathBuf,

        #[arg(short, long, default_value = "16")]
        batch_size: usize,

        #[arg(long, default_value = "2")]
        num_workers: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let device = WgpuDevice::default();

    match cli.command {
        Commands::Train { config, training } => {
            let classifier = ClassifierConfig::load(&config)
                .with_context(|| format!("reading {}", config.display()))?;
            let training = match training {
                Some(path) => TrainingConfig::load(&path)
                    .with_context(|| format!("reading {}", path.display()))?,
                None => TrainingConfig::default(),
            };

            let summary = Trainer::<TrainingBackend>::new(classifier, training, device).run()?;
            match summary.best_epoch {
                Some(epoch) => tracing::info!(epoch, "best checkpoint"),
                None => tracing::warn!("no validation loss recorded; no best checkpoint"),
            }
        }
        Commands::Test {
            checkpoint_dir,
            epoch,
            data_dir,
            batch_size,
            num_workers,
        } => {
            let results = run_test::<Wgpu>(
                &checkpoint_dir,
                epoch,
                &data_dir,
                batch_size,
                num_workers,
                &device,
            )?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
    }

    Ok(())
}
