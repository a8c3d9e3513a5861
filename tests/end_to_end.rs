use burn::backend::{Autodiff, NdArray};
use burn::tensor::{Distribution, ElementConversion, Int, Tensor, TensorData};
use vgg_classifier::{ClassifierConfig, ClassifierModule, ImageBatch, Stage};

type TestBackend = Autodiff<NdArray>;

fn vgg16_config() -> ClassifierConfig {
    let config: ClassifierConfig = serde_json::from_str(
        r#"{
            "model_name": "vgg16",
            "lr": 0.001,
            "num_classes": 3,
            "lrs_step_size": 5,
            "lrs_gamma": 0.1,
            "class_labels": "a,b,c",
            "random_init": true
        }"#,
    )
    .unwrap();
    config.with_hidden_units(64).with_image_size(32)
}

fn batch(device: &<TestBackend as burn::tensor::backend::Backend>::Device) -> ImageBatch<TestBackend> {
    let images = Tensor::<TestBackend, 4>::random([2, 3, 32, 32], Distribution::Normal(0.0, 1.0), device);
    let targets = Tensor::<TestBackend, 1, Int>::from_data(TensorData::new(vec![0i64, 2], [2]), device);
    ImageBatch::new(images, targets)
}

#[test]
fn vgg16_forward_and_training_step() {
    let device = Default::default();
    let module = ClassifierModule::<TestBackend>::new(&vgg16_config(), &device).unwrap();
    let batch = batch(&device);

    let logits = module.forward(batch.images.clone());
    assert_eq!(logits.dims(), [2, 3]);

    let loss = module.training_step(batch, 0);
    assert_eq!(loss.dims(), [1]);
    let value = loss.into_scalar().elem::<f64>();
    assert!(value.is_finite() && value >= 0.0);
}

#[test]
fn vgg16_full_lifecycle() {
    let device = Default::default();
    let module = ClassifierModule::<TestBackend>::new(&vgg16_config(), &device).unwrap();
    let mut setup = module.configure_optimizers();
    assert_eq!(setup.lr(), 0.001);

    let lr = setup.lr();
    let loss = module.training_step(batch(&device), 0);
    let module = module.optimizer_step(&mut setup.optimizer, lr, loss);

    let mut eval = module.valid();
    let eval_batch = ImageBatch::new(
        Tensor::random([2, 3, 32, 32], Distribution::Normal(0.0, 1.0), &device),
        Tensor::from_data(TensorData::new(vec![1i64, 1], [2]), &device),
    );
    eval.validation_step(eval_batch, 0).unwrap();
    let summary = eval.finish_epoch(Stage::Validation, 0);

    for key in ["val_loss", "F1", "F1_a", "F1_b", "F1_c"] {
        assert!(summary.contains_key(key), "missing {key}");
    }

    for _ in 0..5 {
        setup.scheduler.step();
    }
    assert!((setup.lr() - 0.0001).abs() < 1e-12);
}
