// ============================================
// src/vgg.rs
// ============================================
use burn::{
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    prelude::*,
    tensor::backend::Backend,
};

#[derive(Module, Debug)]
pub struct ConvBnRelu<B: Backend> {
    conv: Conv2d<B>,
    bn: Option<BatchNorm<B, 2>>,
    relu: Relu,
}

impl<B: Backend> ConvBnRelu<B> {
    pub fn new(in_channels: usize, out_channels: usize, batch_norm: bool, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init(device);

        let bn = if batch_norm {
            Some(BatchNormConfig::new(out_channels).init(device))
        } else {
            None
        };

        Self {
            conv,
            bn,
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut y = self.conv.forward(x);

        if let Some(bn) = &self.bn {
            y = bn.forward(y);
        }

        self.relu.forward(y)
    }
}

/// Convolutions at one resolution followed by a 2x2 max-pool.
#[derive(Module, Debug)]
pub struct VggStage<B: Backend> {
    convs: Vec<ConvBnRelu<B>>,
    pool: MaxPool2d,
}

impl<B: Backend> VggStage<B> {
    pub fn new(in_channels: usize, widths: &[usize], batch_norm: bool, device: &B::Device) -> Self {
        let mut convs = Vec::with_capacity(widths.len());
        let mut channels = in_channels;

        for &width in widths {
            convs.push(ConvBnRelu::new(channels, width, batch_norm, device));
            channels = width;
        }

        Self {
            convs,
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = x;

        for conv in &self.convs {
            x = conv.forward(x);
        }

        self.pool.forward(x)
    }
}

/// The convolutional part of a VGG network. This is what pretrained records hold.
#[derive(Module, Debug)]
pub struct VggFeatures<B: Backend> {
    stages: Vec<VggStage<B>>,
    out_channels: usize,
}

impl<B: Backend> VggFeatures<B> {
    pub fn new(layout: &[&[usize]], batch_norm: bool, device: &B::Device) -> Self {
        let mut stages = Vec::with_capacity(layout.len());
        let mut in_channels = 3;

        for widths in layout {
            stages.push(VggStage::new(in_channels, widths, batch_norm, device));
            in_channels = widths.last().copied().unwrap_or(in_channels);
        }

        Self {
            stages,
            out_channels: in_channels,
        }
    }

    /// `[N, 3, H, W]` to `[N, C, H / 32, W / 32]` for the standard five-stage layouts.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = x;

        for stage in &self.stages {
            x = stage.forward(x);
        }

        x
    }

    pub fn out_channels(&self) -> usize {
        self.out_channels
    }
}
