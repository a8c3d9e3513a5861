//! Backbone factory.
//!
//! Supported networks form a closed set ([`BackboneKind`]). Each one is a
//! VGG feature extractor, a 7x7 adaptive average pool and a classifier head
//! whose last layer is sized to the class count. Pretrained weights cover the
//! feature extractor only, so the head always starts fresh.

use std::{fmt, path::Path, str::FromStr};

use burn::{
    nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
    prelude::*,
    record::CompactRecorder,
    tensor::backend::Backend,
};
use serde::{Deserialize, Serialize};

use crate::{
    error::{self, ClassifierError},
    heads::ClassifierHead,
    vgg::VggFeatures,
};

const POOLED_SIZE: usize = 7;

const VGG11: &[&[usize]] = &[&[64], &[128], &[256, 256], &[512, 512], &[512, 512]];
const VGG13: &[&[usize]] = &[&[64, 64], &[128, 128], &[256, 256], &[512, 512], &[512, 512]];
const VGG16: &[&[usize]] = &[
    &[64, 64],
    &[128, 128],
    &[256, 256, 256],
    &[512, 512, 512],
    &[512, 512, 512],
];
const VGG19: &[&[usize]] = &[
    &[64, 64],
    &[128, 128],
    &[256, 256, 256, 256],
    &[512, 512, 512, 512],
    &[512, 512, 512, 512],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackboneKind {
    Vgg11,
    Vgg11Bn,
    Vgg13,
    Vgg13Bn,
    Vgg16,
    Vgg16Bn,
    Vgg19,
    Vgg19Bn,
}

impl BackboneKind {
    pub const ALL: [BackboneKind; 8] = [
        Self::Vgg11,
        Self::Vgg11Bn,
        Self::Vgg13,
        Self::Vgg13Bn,
        Self::Vgg16,
        Self::Vgg16Bn,
        Self::Vgg19,
        Self::Vgg19Bn,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Vgg11 => "vgg11",
            Self::Vgg11Bn => "vgg11_bn",
            Self::Vgg13 => "vgg13",
            Self::Vgg13Bn => "vgg13_bn",
            Self::Vgg16 => "vgg16",
            Self::Vgg16Bn => "vgg16_bn",
            Self::Vgg19 => "vgg19",
            Self::Vgg19Bn => "vgg19_bn",
        }
    }

    pub fn batch_norm(&self) -> bool {
        matches!(
            self,
            Self::Vgg11Bn | Self::Vgg13Bn | Self::Vgg16Bn | Self::Vgg19Bn
        )
    }

    /// Output channels of each convolution, grouped by pooling stage.
    pub fn layout(&self) -> &'static [&'static [usize]] {
        match self {
            Self::Vgg11 | Self::Vgg11Bn => VGG11,
            Self::Vgg13 | Self::Vgg13Bn => VGG13,
            Self::Vgg16 | Self::Vgg16Bn => VGG16,
            Self::Vgg19 | Self::Vgg19Bn => VGG19,
        }
    }
}

impl fmt::Display for BackboneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackboneKind {
    type Err = ClassifierError;

    fn from_str(s: &str) -> error::Result<Self> {
        let wanted = s.trim().to_lowercase();

        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == wanted)
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|kind| kind.name()).collect();
                ClassifierError::UnknownBackbone(s.to_string(), known.join(", "))
            })
    }
}

#[derive(Config, Debug)]
pub struct BackboneConfig {
    pub kind: BackboneKind,
    pub num_classes: usize,
    #[config(default = "4096")]
    pub hidden_units: usize,
    #[config(default = "0.5")]
    pub dropout: f64,
}

impl BackboneConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Backbone<B> {
        let features = VggFeatures::new(self.kind.layout(), self.kind.batch_norm(), device);
        let in_features = features.out_channels() * POOLED_SIZE * POOLED_SIZE;

        Backbone {
            features,
            pool: AdaptiveAvgPool2dConfig::new([POOLED_SIZE, POOLED_SIZE]).init(),
            head: ClassifierHead::new(
                in_features,
                self.hidden_units,
                self.num_classes,
                self.dropout,
                device,
            ),
            num_classes: self.num_classes,
        }
    }
}

#[derive(Module, Debug)]
pub struct Backbone<B: Backend> {
    features: VggFeatures<B>,
    pool: AdaptiveAvgPool2d,
    head: ClassifierHead<B>,
    num_classes: usize,
}

impl<B: Backend> Backbone<B> {
    /// `[N, 3, H, W]` images to `[N, num_classes]` logits.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.features.forward(x);
        let x = self.pool.forward(x);
        let x = x.flatten::<2>(1, 3);
        self.head.forward(x)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn features(&self) -> &VggFeatures<B> {
        &self.features
    }

    /// Replace the feature extractor weights with a pretrained record.
    pub fn load_pretrained(self, path: &Path, device: &B::Device) -> error::Result<Self> {
        let features = self
            .features
            .load_file(path.to_path_buf(), &CompactRecorder::new(), device)
            .map_err(|e| {
                ClassifierError::Checkpoint(format!(
                    "loading pretrained weights from {}: {}",
                    path.display(),
                    e
                ))
            })?;

        tracing::info!(path = %path.display(), "loaded pretrained feature weights");

        Ok(Self { features, ..self })
    }

    /// Write the feature extractor alone, in the format [`Backbone::load_pretrained`] reads.
    pub fn save_features(&self, path: &Path) -> error::Result<()> {
        self.features
            .clone()
            .save_file(path.to_path_buf(), &CompactRecorder::new())
            .map_err(|e| ClassifierError::Checkpoint(format!("saving feature weights: {}", e)))
    }
}
