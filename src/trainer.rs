use crate::{
    checkpoint::{CheckpointMetadata, Checkpointer},
    config::{ClassifierConfig, TrainingConfig},
    data::{ImageBatch, ImageBatcher, ImageFolderDataset, ImageItem},
    module::{ClassifierModule, Stage},
};
use anyhow::{anyhow, Context, Result};
use burn::{
    data::dataloader::{DataLoader, DataLoaderBuilder},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion,
    },
};
use std::{collections::BTreeMap, path::Path, sync::Arc, time::Instant};

#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub epochs: Vec<BTreeMap<String, f64>>,
    pub best_epoch: Option<usize>,
}

/// Drives a [`ClassifierModule`] through its epochs: training steps with an
/// optimizer update after each, a validation pass on the inner backend, one
/// scheduler step and one checkpoint per epoch.
pub struct Trainer<B: AutodiffBackend> {
    classifier: ClassifierConfig,
    training: TrainingConfig,
    device: B::Device,
}

impl<B: AutodiffBackend> Trainer<B> {
    pub fn new(classifier: ClassifierConfig, training: TrainingConfig, device: B::Device) -> Self {
        Self {
            classifier,
            training,
            device,
        }
    }

    pub fn run(&self) -> Result<TrainingSummary> {
        tracing::info!(
            backend = std::any::type_name::<B>(),
            device = ?self.device,
            model = %self.classifier.model_name,
            batch_size = self.training.batch_size,
            epochs = self.training.num_epochs,
            "starting training"
        );

        self.training.validate()?;
        let module = ClassifierModule::<B>::new(&self.classifier, &self.device)
            .context("constructing classifier")?;
        let (train_loader, valid_loader) = self.create_dataloaders(&module)?;

        self.fit(module, train_loader, valid_loader)
    }

    #[allow(clippy::type_complexity)]
    fn create_dataloaders(
        &self,
        module: &ClassifierModule<B>,
    ) -> Result<(
        Arc<dyn DataLoader<B, ImageBatch<B>>>,
        Arc<dyn DataLoader<B::InnerBackend, ImageBatch<B::InnerBackend>>>,
    )> {
        let hparams = module.hparams();
        let dataset = ImageFolderDataset::new(&self.training.data_dir, &hparams.class_labels)?;
        let (train_data, valid_data) = dataset.split(self.training.train_val_split, self.training.seed);

        if train_data.is_empty() {
            return Err(anyhow!("training split is empty"));
        }

        let batcher = ImageBatcher::new(hparams.image_size);

        let train_loader = build_loader::<B>(
            batcher.clone(),
            self.training.batch_size,
            self.training.num_workers,
            Some(self.training.seed),
            train_data,
        );
        let valid_loader = build_loader::<B::InnerBackend>(
            batcher,
            self.training.batch_size,
            self.training.num_workers,
            None,
            valid_data,
        );

        Ok((train_loader, valid_loader))
    }

    fn fit(
        &self,
        module: ClassifierModule<B>,
        train_loader: Arc<dyn DataLoader<B, ImageBatch<B>>>,
        valid_loader: Arc<dyn DataLoader<B::InnerBackend, ImageBatch<B::InnerBackend>>>,
    ) -> Result<TrainingSummary> {
        let mut module = module;
        let mut setup = module.configure_optimizers();
        let mut checkpointer = Checkpointer::new(&self.training.artifact_dir)?;
        let mut epochs = Vec::with_capacity(self.training.num_epochs);
        let start_time = Instant::now();

        for epoch in 0..self.training.num_epochs {
            let lr = setup.lr();
            let mut train_loss = 0.0;
            let mut train_batches = 0usize;

            for (batch_idx, batch) in train_loader.iter().enumerate() {
                if batch.batch_size() == 0 {
                    continue;
                }
                let loss = module.training_step(batch, batch_idx);
                train_loss += loss.clone().into_scalar().elem::<f64>();
                train_batches += 1;

                module = module.optimizer_step(&mut setup.optimizer, lr, loss);
            }

            let mut eval = module.valid();
            for (batch_idx, batch) in valid_loader.iter().enumerate() {
                if batch.batch_size() == 0 {
                    continue;
                }
                eval.validation_step(batch, batch_idx)?;
            }
            let mut summary = eval.finish_epoch(Stage::Validation, epoch);

            let train_loss = train_loss / train_batches.max(1) as f64;
            summary.insert("train_loss".to_string(), train_loss);
            tracing::info!(epoch, lr, train_loss, "epoch finished");

            setup.scheduler.step();

            checkpointer.save(
                module.model(),
                &CheckpointMetadata {
                    hparams: module.hparams().clone(),
                    epoch,
                    learning_rate: lr,
                    scheduler: setup.scheduler.clone(),
                    metrics: summary.clone(),
                },
            )?;
            epochs.push(summary);
        }

        tracing::info!(elapsed = ?start_time.elapsed(), best_epoch = ?checkpointer.best_epoch(), "training finished");

        Ok(TrainingSummary {
            epochs,
            best_epoch: checkpointer.best_epoch(),
        })
    }
}

/// Zero workers loads batches on the iterating thread.
pub fn build_loader<B: Backend>(
    batcher: ImageBatcher,
    batch_size: usize,
    num_workers: usize,
    shuffle_seed: Option<u64>,
    dataset: ImageFolderDataset,
) -> Arc<dyn DataLoader<B, ImageBatch<B>>> {
    let mut builder = DataLoaderBuilder::<B, ImageItem, ImageBatch<B>>::new(batcher).batch_size(batch_size);

    if let Some(seed) = shuffle_seed {
        builder = builder.shuffle(seed);
    }
    if num_workers > 0 {
        builder = builder.num_workers(num_workers);
    }

    builder.build(dataset)
}

/// Run the test step over `data_dir` with a checkpointed module. Without an
/// explicit epoch the best recorded checkpoint is used.
pub fn run_test<B: Backend>(
    checkpoint_dir: &Path,
    epoch: Option<usize>,
    data_dir: &Path,
    batch_size: usize,
    num_workers: usize,
    device: &B::Device,
) -> Result<BTreeMap<String, f64>> {
    let epoch = match epoch {
        Some(epoch) => epoch,
        None => Checkpointer::read_best_epoch(checkpoint_dir)
            .context("no epoch given and no best checkpoint recorded")?,
    };

    let (mut module, _) = ClassifierModule::<B>::from_checkpoint(checkpoint_dir, epoch, device)
        .with_context(|| format!("restoring checkpoint {} from {}", epoch, checkpoint_dir.display()))?;

    let dataset = ImageFolderDataset::new(data_dir, &module.hparams().class_labels)?;
    let batcher = ImageBatcher::new(module.hparams().image_size);
    let loader = build_loader::<B>(batcher, batch_size, num_workers, None, dataset);

    for (batch_idx, batch) in loader.iter().enumerate() {
        if batch.batch_size() == 0 {
            continue;
        }
        module.test_step(batch, batch_idx)?;
    }

    Ok(module.finish_epoch(Stage::Test, epoch))
}
