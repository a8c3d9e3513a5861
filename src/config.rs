use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::backbone::BackboneKind;
use crate::error::{ClassifierError, Result};

/// Class label names as supplied by the user: a list, or one comma-separated string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClassLabels {
    List(Vec<String>),
    Csv(String),
}

impl ClassLabels {
    /// Lists pass through unchanged. Strings lose all whitespace and are split on commas.
    pub fn normalize(&self) -> Vec<String> {
        match self {
            Self::List(labels) => labels.clone(),
            Self::Csv(joined) => {
                let compact: String = joined.chars().filter(|c| !c.is_whitespace()).collect();
                compact.split(',').map(str::to_string).collect()
            }
        }
    }
}

impl From<&str> for ClassLabels {
    fn from(joined: &str) -> Self {
        Self::Csv(joined.to_string())
    }
}

impl From<Vec<String>> for ClassLabels {
    fn from(labels: Vec<String>) -> Self {
        Self::List(labels)
    }
}

fn default_image_size() -> usize {
    224
}

fn default_hidden_units() -> usize {
    4096
}

fn default_dropout() -> f64 {
    0.5
}

/// Construction options for a [`crate::ClassifierModule`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub model_name: String,
    pub lr: f64,
    pub num_classes: usize,
    pub lrs_step_size: usize,
    pub lrs_gamma: f64,
    pub class_labels: ClassLabels,
    /// Record file holding pretrained feature-extractor weights
    #[serde(default)]
    pub pretrained: Option<PathBuf>,
    /// Start from random weights when no pretrained record is given
    #[serde(default)]
    pub random_init: bool,
    #[serde(default = "default_image_size")]
    pub image_size: usize,
    #[serde(default = "default_hidden_units")]
    pub hidden_units: usize,
    #[serde(default = "default_dropout")]
    pub dropout: f64,
}

impl ClassifierConfig {
    pub fn new(
        model_name: impl Into<String>,
        lr: f64,
        num_classes: usize,
        lrs_step_size: usize,
        lrs_gamma: f64,
        class_labels: impl Into<ClassLabels>,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            lr,
            num_classes,
            lrs_step_size,
            lrs_gamma,
            class_labels: class_labels.into(),
            pretrained: None,
            random_init: false,
            image_size: default_image_size(),
            hidden_units: default_hidden_units(),
            dropout: default_dropout(),
        }
    }

    pub fn with_pretrained(mut self, path: impl Into<PathBuf>) -> Self {
        self.pretrained = Some(path.into());
        self
    }

    pub fn with_random_init(mut self, random_init: bool) -> Self {
        self.random_init = random_init;
        self
    }

    pub fn with_image_size(mut self, image_size: usize) -> Self {
        self.image_size = image_size;
        self
    }

    pub fn with_hidden_units(mut self, hidden_units: usize) -> Self {
        self.hidden_units = hidden_units;
        self
    }

    pub fn with_dropout(mut self, dropout: f64) -> Self {
        self.dropout = dropout;
        self
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Validate and normalize into the record persisted with every checkpoint.
    pub fn hparams(&self) -> Result<HyperParameters> {
        let backbone: BackboneKind = self.model_name.parse()?;
        let class_labels = self.class_labels.normalize();

        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(ClassifierError::Config(format!("lr must be > 0, got {}", self.lr)));
        }
        if self.num_classes == 0 {
            return Err(ClassifierError::Config("num_classes must be > 0".to_string()));
        }
        if self.lrs_step_size == 0 {
            return Err(ClassifierError::Config("lrs_step_size must be > 0".to_string()));
        }
        if !(self.lrs_gamma.is_finite() && self.lrs_gamma > 0.0) {
            return Err(ClassifierError::Config(format!(
                "lrs_gamma must be > 0, got {}",
                self.lrs_gamma
            )));
        }
        if class_labels.len() != self.num_classes {
            return Err(ClassifierError::Config(format!(
                "{} class labels given for num_classes = {}",
                class_labels.len(),
                self.num_classes
            )));
        }
        if class_labels.iter().any(String::is_empty) {
            return Err(ClassifierError::Config("class labels must not be empty".to_string()));
        }
        let mut seen = std::collections::HashSet::new();
        if let Some(dup) = class_labels.iter().find(|label| !seen.insert(label.as_str())) {
            return Err(ClassifierError::Config(format!("duplicate class label '{}'", dup)));
        }
        if self.image_size < 32 {
            return Err(ClassifierError::Config(format!(
                "image_size must be >= 32, got {}",
                self.image_size
            )));
        }
        if self.hidden_units == 0 {
            return Err(ClassifierError::Config("hidden_units must be > 0".to_string()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ClassifierError::Config("dropout must be in [0, 1)".to_string()));
        }
        if self.pretrained.is_none() && !self.random_init {
            return Err(ClassifierError::Config(
                "no pretrained weights given; set `pretrained` or opt into `random_init`".to_string(),
            ));
        }

        Ok(HyperParameters {
            backbone,
            lr: self.lr,
            num_classes: self.num_classes,
            lrs_step_size: self.lrs_step_size,
            lrs_gamma: self.lrs_gamma,
            class_labels,
            pretrained: self.pretrained.clone(),
            random_init: self.random_init,
            image_size: self.image_size,
            hidden_units: self.hidden_units,
            dropout: self.dropout,
        })
    }
}

/// Validated, normalized configuration of a constructed module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HyperParameters {
    #[serde(rename = "model_name")]
    pub backbone: BackboneKind,
    pub lr: f64,
    pub num_classes: usize,
    pub lrs_step_size: usize,
    pub lrs_gamma: f64,
    pub class_labels: Vec<String>,
    pub pretrained: Option<PathBuf>,
    #[serde(default)]
    pub random_init: bool,
    pub image_size: usize,
    pub hidden_units: usize,
    pub dropout: f64,
}

/// Options for the epoch driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub data_dir: PathBuf,
    pub artifact_dir: PathBuf,
    pub num_epochs: usize,
    pub batch_size: usize,
    pub num_workers: usize,
    pub train_val_split: f64,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            artifact_dir: PathBuf::from("artifacts"),
            num_epochs: 10,
            batch_size: 16,
            num_workers: 2,
            train_val_split: 0.8,
            seed: 42,
        }
    }
}

impl TrainingConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ClassifierError::Config("batch_size must be > 0".to_string()));
        }
        if self.num_epochs == 0 {
            return Err(ClassifierError::Config("num_epochs must be > 0".to_string()));
        }
        if self.train_val_split <= 0.0 || self.train_val_split >= 1.0 {
            return Err(ClassifierError::Config(
                "train_val_split must be between 0 and 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn csv_labels_are_stripped_and_split() {
        let normalized = ClassLabels::from("cat, dog , bird").normalize();
        assert_eq!(normalized, labels(&["cat", "dog", "bird"]));
    }

    #[test]
    fn list_labels_pass_through() {
        let list = labels(&["sea lion", " cat"]);
        assert_eq!(ClassLabels::from(list.clone()).normalize(), list);
    }

    #[test]
    fn labels_deserialize_from_either_form() {
        let csv: ClassifierConfig = serde_json::from_str(
            r#"{"model_name":"vgg16","lr":0.001,"num_classes":3,
                "lrs_step_size":5,"lrs_gamma":0.1,"class_labels":"a, b,c"}"#,
        )
        .unwrap();
        let list: ClassifierConfig = serde_json::from_str(
            r#"{"model_name":"vgg16","lr":0.001,"num_classes":3,
                "lrs_step_size":5,"lrs_gamma":0.1,"class_labels":["a","b","c"]}"#,
        )
        .unwrap();

        assert_eq!(csv.class_labels.normalize(), list.class_labels.normalize());
        assert_eq!(csv.image_size, 224);
        assert!(csv.pretrained.is_none());
        assert!(!csv.random_init);
    }

    #[test]
    fn weights_source_must_be_explicit() {
        let config = ClassifierConfig::new("vgg16", 0.001, 3, 5, 0.1, "a,b,c");
        let err = config.hparams().unwrap_err();
        assert!(matches!(err, ClassifierError::Config(msg) if msg.contains("random_init")));

        let pretrained = config.clone().with_pretrained("weights/vgg16-features").hparams().unwrap();
        assert!(!pretrained.random_init);
        assert!(pretrained.pretrained.is_some());

        assert!(config.with_random_init(true).hparams().unwrap().random_init);
    }

    #[test]
    fn hparams_resolve_backbone() {
        let hparams = ClassifierConfig::new("vgg16", 0.001, 3, 5, 0.1, "a,b,c")
            .with_random_init(true)
            .hparams()
            .unwrap();
        assert_eq!(hparams.backbone, BackboneKind::Vgg16);
        assert_eq!(hparams.class_labels, labels(&["a", "b", "c"]));
    }

    #[test]
    fn label_count_must_match_num_classes() {
        let err = ClassifierConfig::new("vgg16", 0.001, 4, 5, 0.1, "a,b,c")
            .hparams()
            .unwrap_err();
        assert!(matches!(err, ClassifierError::Config(_)));
    }

    #[test]
    fn unknown_model_name_is_rejected() {
        let err = ClassifierConfig::new("resnet50", 0.001, 3, 5, 0.1, "a,b,c")
            .hparams()
            .unwrap_err();
        assert!(matches!(err, ClassifierError::UnknownBackbone(..)));
    }

    #[test]
    fn non_positive_lr_is_rejected() {
        assert!(ClassifierConfig::new("vgg11", 0.0, 2, 1, 0.5, "a,b")
            .hparams()
            .is_err());
    }

    #[test]
    fn duplicate_labels_are_rejected() {
        assert!(ClassifierConfig::new("vgg11", 0.01, 2, 1, 0.5, "a,a")
            .hparams()
            .is_err());
    }

    #[test]
    fn hparams_serialize_model_name() {
        let hparams = ClassifierConfig::new("vgg13_bn", 0.01, 2, 1, 0.5, "a,b")
            .with_random_init(true)
            .hparams()
            .unwrap();
        let json = serde_json::to_value(&hparams).unwrap();
        assert_eq!(json["model_name"], "vgg13_bn");
    }

    #[test]
    fn training_config_rejects_bad_split() {
        let config = TrainingConfig {
            train_val_split: 1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
