//! The classifier and its lifecycle hooks.
//!
//! The epoch driver constructs a [`ClassifierModule`] once, asks it for an
//! optimizer and schedule, then calls the step hooks batch by batch.
//! Training steps only compute the loss. Validation and test steps also feed
//! arg-max predictions into the metric collection and log epoch-scoped values.

use std::collections::BTreeMap;

use burn::{
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{AdamConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion,
    },
};

use crate::{
    backbone::{Backbone, BackboneConfig},
    config::{ClassifierConfig, HyperParameters},
    data::ImageBatch,
    error::{ClassifierError, Result},
    logger::EpochLogger,
    metrics::MetricCollection,
    scheduler::StepLr,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Validation,
    Test,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Validation => "val",
            Self::Test => "test",
        }
    }

    pub fn loss_key(&self) -> &'static str {
        match self {
            Self::Validation => "val_loss",
            Self::Test => "test_loss",
        }
    }
}

/// What [`ClassifierModule::configure_optimizers`] hands to the driver.
pub struct OptimizerSetup<O> {
    pub optimizer: O,
    pub scheduler: StepLr,
}

impl<O> OptimizerSetup<O> {
    /// Learning rate the optimizer should use for the current epoch.
    pub fn lr(&self) -> f64 {
        self.scheduler.lr()
    }
}

pub struct ClassifierModule<B: Backend> {
    model: Backbone<B>,
    hparams: HyperParameters,
    metric: MetricCollection,
    logger: EpochLogger,
}

impl<B: Backend> ClassifierModule<B> {
    pub fn new(config: &ClassifierConfig, device: &B::Device) -> Result<Self> {
        Self::from_hparams(config.hparams()?, device)
    }

    pub fn from_hparams(hparams: HyperParameters, device: &B::Device) -> Result<Self> {
        let model = Self::backbone_config(&hparams).init(device);

        let model = match &hparams.pretrained {
            Some(path) => model.load_pretrained(path, device)?,
            None if hparams.random_init => {
                tracing::warn!(backbone = %hparams.backbone, "starting from random weights");
                model
            }
            None => {
                return Err(ClassifierError::Config(format!(
                    "no pretrained weights for {} and random_init is off",
                    hparams.backbone
                )))
            }
        };

        tracing::info!(
            backbone = %hparams.backbone,
            num_classes = hparams.num_classes,
            params = model.num_params(),
            "classifier constructed"
        );

        Ok(Self::with_model(hparams, model))
    }

    pub(crate) fn backbone_config(hparams: &HyperParameters) -> BackboneConfig {
        BackboneConfig::new(hparams.backbone, hparams.num_classes)
            .with_hidden_units(hparams.hidden_units)
            .with_dropout(hparams.dropout)
    }

    pub(crate) fn with_model(hparams: HyperParameters, model: Backbone<B>) -> Self {
        let metric = MetricCollection::new(hparams.class_labels.clone());
        Self {
            model,
            hparams,
            metric,
            logger: EpochLogger::new(),
        }
    }

    pub fn hparams(&self) -> &HyperParameters {
        &self.hparams
    }

    pub fn model(&self) -> &Backbone<B> {
        &self.model
    }

    pub fn metric(&self) -> &MetricCollection {
        &self.metric
    }

    pub fn logger(&self) -> &EpochLogger {
        &self.logger
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.model.forward(images)
    }

    /// Mean cross-entropy over the batch, no class weighting.
    fn loss(&self, logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1> {
        CrossEntropyLossConfig::new()
            .init(&logits.device())
            .forward(logits, targets)
    }

    pub fn training_step(&self, batch: ImageBatch<B>, batch_idx: usize) -> Tensor<B, 1> {
        let logits = self.forward(batch.images);
        let loss = self.loss(logits, batch.targets);

        tracing::trace!(batch_idx, "training step");
        loss
    }

    pub fn validation_step(&mut self, batch: ImageBatch<B>, batch_idx: usize) -> Result<Tensor<B, 1>> {
        self.evaluation_step(Stage::Validation, batch, batch_idx)
    }

    pub fn test_step(&mut self, batch: ImageBatch<B>, batch_idx: usize) -> Result<Tensor<B, 1>> {
        self.evaluation_step(Stage::Test, batch, batch_idx)
    }

    fn evaluation_step(
        &mut self,
        stage: Stage,
        batch: ImageBatch<B>,
        batch_idx: usize,
    ) -> Result<Tensor<B, 1>> {
        let batch_size = batch.batch_size();
        let num_classes = self.model.num_classes();
        let targets = to_indices(batch.targets.clone());
        if let Some(&target) = targets.iter().find(|&&t| t >= num_classes) {
            return Err(ClassifierError::Metric(format!(
                "target {} out of range for {} classes",
                target as i64, num_classes
            )));
        }

        let logits = self.forward(batch.images);
        let loss = self.loss(logits.clone(), batch.targets);

        let predictions = to_indices(logits.argmax(1).flatten::<1>(0, 1));
        self.metric.update(&predictions, &targets)?;

        let loss_value = loss.clone().into_scalar().elem::<f64>();
        self.logger.log(stage.loss_key(), loss_value, batch_size);
        self.logger.log_dict(&self.metric.compute());

        tracing::debug!(stage = stage.name(), batch_idx, loss = loss_value, "evaluation step");
        Ok(loss)
    }

    /// Close an epoch: report what was logged and reset the metric accumulators.
    pub fn finish_epoch(&mut self, stage: Stage, epoch: usize) -> BTreeMap<String, f64> {
        let summary = self.logger.finish(stage.name(), epoch);
        self.metric.reset();
        summary
    }
}

impl<B: AutodiffBackend> ClassifierModule<B> {
    /// One Adam optimizer over every parameter, with a per-epoch step decay.
    pub fn configure_optimizers(&self) -> OptimizerSetup<impl Optimizer<Backbone<B>, B>> {
        let optimizer = AdamConfig::new().init::<B, Backbone<B>>();
        let scheduler = StepLr::new(
            self.hparams.lr,
            self.hparams.lrs_step_size,
            self.hparams.lrs_gamma,
        );

        tracing::info!(
            lr = self.hparams.lr,
            step_size = self.hparams.lrs_step_size,
            gamma = self.hparams.lrs_gamma,
            "optimizer configured"
        );

        OptimizerSetup {
            optimizer,
            scheduler,
        }
    }

    /// Backpropagate `loss` and apply one optimizer update.
    pub fn optimizer_step<O>(self, optimizer: &mut O, lr: f64, loss: Tensor<B, 1>) -> Self
    where
        O: Optimizer<Backbone<B>, B>,
    {
        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &self.model);
        let model = optimizer.step(lr, self.model, grads);

        Self { model, ..self }
    }

    /// Evaluation copy on the inner backend, with fresh metrics and logger.
    pub fn valid(&self) -> ClassifierModule<B::InnerBackend> {
        ClassifierModule::with_model(self.hparams.clone(), self.model.valid())
    }
}

fn to_indices<B: Backend>(tensor: Tensor<B, 1, Int>) -> Vec<usize> {
    tensor
        .into_data()
        .iter::<i64>()
        .map(|v| usize::try_from(v).unwrap_or(usize::MAX))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = NdArray;
    type TestAutodiffBackend = Autodiff<NdArray>;

    fn config() -> ClassifierConfig {
        ClassifierConfig::new("vgg11", 0.001, 3, 5, 0.1, "a, b ,c")
            .with_random_init(true)
            .with_hidden_units(16)
            .with_image_size(32)
    }

    fn batch<B: Backend>(targets: &[i64], device: &B::Device) -> ImageBatch<B> {
        let n = targets.len();
        let images = Tensor::<B, 4>::random(
            [n, 3, 32, 32],
            burn::tensor::Distribution::Normal(0.0, 1.0),
            device,
        );
        let targets = Tensor::<B, 1, Int>::from_data(TensorData::new(targets.to_vec(), [n]), device);
        ImageBatch::new(images, targets)
    }

    fn scalar<B: Backend>(loss: Tensor<B, 1>) -> f64 {
        loss.into_scalar().elem::<f64>()
    }

    #[test]
    fn construct_sizes_output_to_num_classes() {
        let device = Default::default();
        let module = ClassifierModule::<TestBackend>::new(&config(), &device).unwrap();

        assert_eq!(module.model().num_classes(), 3);
        assert_eq!(module.hparams().class_labels, vec!["a", "b", "c"]);

        let logits = module.forward(Tensor::zeros([2, 3, 32, 32], &device));
        assert_eq!(logits.dims(), [2, 3]);
    }

    #[test]
    fn construct_fails_for_unknown_model() {
        let device = Default::default();
        let mut config = config();
        config.model_name = "vit_base".to_string();

        let result = ClassifierModule::<TestBackend>::new(&config, &device);

        assert!(matches!(result, Err(ClassifierError::UnknownBackbone(..))));
    }

    #[test]
    fn construct_requires_a_weights_source() {
        let device = Default::default();
        let mut hparams = config().hparams().unwrap();
        hparams.random_init = false;

        let result = ClassifierModule::<TestBackend>::from_hparams(hparams, &device);

        assert!(matches!(result, Err(ClassifierError::Config(_))));
    }

    #[test]
    fn construct_loads_pretrained_features() {
        let device = Default::default();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features");
        let source = ClassifierModule::<TestBackend>::new(&config(), &device).unwrap();
        source.model().save_features(&path).unwrap();

        let config = config().with_random_init(false).with_pretrained(&path);
        let module = ClassifierModule::<TestBackend>::new(&config, &device).unwrap();

        let input = Tensor::<TestBackend, 4>::ones([1, 3, 32, 32], &device);
        let expected = source.model().features().forward(input.clone());
        let actual = module.model().features().forward(input);
        let scale = expected.clone().abs().max().into_scalar().elem::<f32>() + 1.0;
        let diff = (expected - actual).abs().max().into_scalar().elem::<f32>();
        assert!(diff / scale < 1e-2, "max diff {diff}");
    }

    #[test]
    fn training_step_returns_finite_non_negative_loss() {
        let device = Default::default();
        let module = ClassifierModule::<TestAutodiffBackend>::new(&config(), &device).unwrap();

        let loss = module.training_step(batch(&[0, 2, 1, 1], &device), 0);

        assert_eq!(loss.dims(), [1]);
        let value = scalar(loss);
        assert!(value.is_finite() && value >= 0.0, "loss = {value}");
        assert_eq!(module.metric().num_updates(), 0);
    }

    #[test]
    fn validation_step_updates_metrics_once_per_call() {
        let device = Default::default();
        let mut module = ClassifierModule::<TestBackend>::new(&config(), &device).unwrap();

        let loss = module.validation_step(batch(&[0, 1, 2], &device), 0).unwrap();
        assert!(scalar(loss) >= 0.0);
        assert_eq!(module.metric().num_updates(), 1);
        assert_eq!(module.metric().num_samples(), 3);

        module.validation_step(batch(&[2, 2], &device), 1).unwrap();
        assert_eq!(module.metric().num_updates(), 2);
        assert_eq!(module.metric().num_samples(), 5);

        assert!(module.logger().get("val_loss").is_some());
        assert!(module.logger().get("F1").is_some());
        assert!(module.logger().get("F1_b").is_some());
    }

    #[test]
    fn test_step_logs_under_test_namespace() {
        let device = Default::default();
        let mut module = ClassifierModule::<TestBackend>::new(&config(), &device).unwrap();

        module.test_step(batch(&[1, 0], &device), 0).unwrap();
        assert_eq!(module.metric().num_updates(), 1);
        assert_eq!(module.metric().num_samples(), 2);

        module.test_step(batch(&[2, 2, 0], &device), 1).unwrap();
        assert_eq!(module.metric().num_updates(), 2);
        assert_eq!(module.metric().num_samples(), 5);

        assert!(module.logger().get("test_loss").is_some());
        assert!(module.logger().get("val_loss").is_none());

        let summary = module.finish_epoch(Stage::Test, 0);
        assert!(summary.contains_key("test_loss"));
        assert!(summary.contains_key("F1_a"));
        assert_eq!(module.metric().num_updates(), 0);
        assert!(module.logger().is_empty());
    }

    #[test]
    fn validation_and_test_losses_agree() {
        let device = Default::default();
        let mut module = ClassifierModule::<TestBackend>::new(&config(), &device).unwrap();
        let batch = batch(&[0, 1, 2, 0], &device);

        let val = scalar(module.validation_step(batch.clone(), 0).unwrap());
        let test = scalar(module.test_step(batch, 0).unwrap());

        assert!((val - test).abs() < 1e-6);
    }

    #[test]
    fn out_of_range_target_is_an_error() {
        let device = Default::default();
        let mut module = ClassifierModule::<TestBackend>::new(&config(), &device).unwrap();

        let result = module.validation_step(batch(&[0, 7], &device), 0);
        assert!(matches!(result, Err(ClassifierError::Metric(_))));

        let result = module.test_step(batch(&[3], &device), 0);
        assert!(matches!(result, Err(ClassifierError::Metric(_))));

        assert_eq!(module.metric().num_updates(), 0);
        assert!(module.logger().is_empty());
    }

    #[test]
    fn optimizers_follow_configured_schedule() {
        let device = Default::default();
        let module = ClassifierModule::<TestAutodiffBackend>::new(&config(), &device).unwrap();

        let mut setup = module.configure_optimizers();
        assert_eq!(setup.lr(), 0.001);

        for _ in 0..5 {
            setup.scheduler.step();
        }
        assert!((setup.lr() - 0.001 * 0.1).abs() < 1e-15);
    }

    #[test]
    fn optimizer_step_changes_parameters() {
        let device = Default::default();
        let config = config().with_dropout(0.0);
        let module = ClassifierModule::<TestAutodiffBackend>::new(&config, &device).unwrap();
        let mut setup = module.configure_optimizers();
        let input = Tensor::<TestAutodiffBackend, 4>::ones([1, 3, 32, 32], &device);

        let before = module.forward(input.clone()).into_data();
        let loss = module.training_step(batch(&[0, 1], &device), 0);
        let lr = setup.lr();
        let module = module.optimizer_step(&mut setup.optimizer, lr, loss);
        let after = module.forward(input).into_data();

        assert_ne!(before, after);
    }

    #[test]
    fn valid_copy_has_fresh_metrics() {
        let device = Default::default();
        let module = ClassifierModule::<TestAutodiffBackend>::new(&config(), &device).unwrap();

        let mut eval = module.valid();
        eval.validation_step(batch(&[0, 1], &device), 0).unwrap();

        assert_eq!(eval.metric().num_updates(), 1);
        assert_eq!(eval.hparams(), module.hparams());
    }
}
