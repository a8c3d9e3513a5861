//! Per-epoch checkpoints.
//!
//! Every checkpoint is a `burn` model record (`model-<epoch>.mpk`) plus a JSON
//! file (`checkpoint-<epoch>.json`) carrying the hyperparameters needed to
//! rebuild the module, the scheduler state and the validation summary.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use burn::{module::Module, record::CompactRecorder, tensor::backend::Backend};
use serde::{Deserialize, Serialize};

use crate::{
    backbone::Backbone,
    config::HyperParameters,
    error::{ClassifierError, Result},
    module::ClassifierModule,
    scheduler::StepLr,
};

const BEST_FILE: &str = "best.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    pub hparams: HyperParameters,
    pub epoch: usize,
    pub learning_rate: f64,
    pub scheduler: StepLr,
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct BestCheckpoint {
    epoch: usize,
    val_loss: f64,
}

pub struct Checkpointer {
    dir: PathBuf,
    best: Option<BestCheckpoint>,
}

impl Checkpointer {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, best: None })
    }

    pub fn model_path(dir: &Path, epoch: usize) -> PathBuf {
        dir.join(format!("model-{}", epoch))
    }

    pub fn metadata_path(dir: &Path, epoch: usize) -> PathBuf {
        dir.join(format!("checkpoint-{}.json", epoch))
    }

    pub fn save<B: Backend>(&mut self, model: &Backbone<B>, metadata: &CheckpointMetadata) -> Result<()> {
        let model_path = Self::model_path(&self.dir, metadata.epoch);
        model
            .clone()
            .save_file(model_path.clone(), &CompactRecorder::new())
            .map_err(|e| ClassifierError::Checkpoint(format!("saving {}: {}", model_path.display(), e)))?;

        let json = serde_json::to_string_pretty(metadata)?;
        fs::write(Self::metadata_path(&self.dir, metadata.epoch), json)?;

        tracing::info!(epoch = metadata.epoch, dir = %self.dir.display(), "checkpoint saved");

        if let Some(&val_loss) = metadata.metrics.get("val_loss") {
            let improved = self.best.map_or(true, |best| val_loss < best.val_loss);
            if improved {
                let best = BestCheckpoint {
                    epoch: metadata.epoch,
                    val_loss,
                };
                fs::write(self.dir.join(BEST_FILE), serde_json::to_string_pretty(&best)?)?;
                tracing::info!(epoch = best.epoch, val_loss, "new best checkpoint");
                self.best = Some(best);
            }
        }

        Ok(())
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best.map(|best| best.epoch)
    }

    /// Epoch recorded as best in a checkpoint directory.
    pub fn read_best_epoch(dir: &Path) -> Result<usize> {
        let json = fs::read_to_string(dir.join(BEST_FILE))?;
        let best: BestCheckpoint = serde_json::from_str(&json)?;
        Ok(best.epoch)
    }

    pub fn load_metadata(dir: &Path, epoch: usize) -> Result<CheckpointMetadata> {
        let json = fs::read_to_string(Self::metadata_path(dir, epoch))?;
        Ok(serde_json::from_str(&json)?)
    }
}

impl<B: Backend> ClassifierModule<B> {
    /// Rebuild a module from a saved checkpoint. Pretrained weights are not reloaded.
    pub fn from_checkpoint(
        dir: &Path,
        epoch: usize,
        device: &B::Device,
    ) -> Result<(Self, CheckpointMetadata)> {
        let metadata = Checkpointer::load_metadata(dir, epoch)?;
        let model_path = Checkpointer::model_path(dir, epoch);

        let model = Self::backbone_config(&metadata.hparams)
            .init::<B>(device)
            .load_file(model_path.clone(), &CompactRecorder::new(), device)
            .map_err(|e| ClassifierError::Checkpoint(format!("loading {}: {}", model_path.display(), e)))?;

        tracing::info!(epoch, dir = %dir.display(), "checkpoint restored");

        Ok((Self::with_model(metadata.hparams.clone(), model), metadata))
    }
}
