use burn::{
    nn::{Dropout, DropoutConfig, Linear, LinearConfig, Relu},
    prelude::*,
    tensor::backend::Backend,
};

/// VGG classifier: two hidden layers with dropout, then the logits layer.
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    fc1: Linear<B>,
    fc2: Linear<B>,
    fc3: Linear<B>,
    dropout: Dropout,
    relu: Relu,
}

impl<B: Backend> ClassifierHead<B> {
    pub fn new(
        in_features: usize,
        hidden_features: usize,
        num_classes: usize,
        dropout_rate: f64,
        device: &B::Device,
    ) -> Self {
        Self {
            fc1: LinearConfig::new(in_features, hidden_features).init(device),
            fc2: LinearConfig::new(hidden_features, hidden_features).init(device),
            fc3: LinearConfig::new(hidden_features, num_classes).init(device),
            dropout: DropoutConfig::new(dropout_rate).init(),
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let x = self.fc1.forward(x);
        let x = self.relu.forward(x);
        let x = self.dropout.forward(x);
        let x = self.fc2.forward(x);
        let x = self.relu.forward(x);
        let x = self.dropout.forward(x);
        self.fc3.forward(x)
    }
}
