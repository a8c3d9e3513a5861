//! Step-decay learning-rate schedule, stepped once per epoch.

use serde::{Deserialize, Serialize};

/// Multiply the learning rate by `gamma` every `step_size` epochs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepLr {
    initial_lr: f64,
    step_size: usize,
    gamma: f64,
    epoch: usize,
}

impl StepLr {
    pub fn new(initial_lr: f64, step_size: usize, gamma: f64) -> Self {
        Self {
            initial_lr,
            step_size: step_size.max(1),
            gamma,
            epoch: 0,
        }
    }

    /// Learning rate for the current epoch.
    pub fn lr(&self) -> f64 {
        let decays = (self.epoch / self.step_size) as i32;
        self.initial_lr * self.gamma.powi(decays)
    }

    /// Advance one epoch and return the new learning rate.
    pub fn step(&mut self) -> f64 {
        let before = self.lr();
        self.epoch += 1;
        let after = self.lr();

        if after != before {
            tracing::info!(epoch = self.epoch, lr = after, "learning rate decayed");
        }
        after
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn initial_lr(&self) -> f64 {
        self.initial_lr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_initial_lr() {
        let scheduler = StepLr::new(0.001, 5, 0.1);
        assert_eq!(scheduler.lr(), 0.001);
        assert_eq!(scheduler.epoch(), 0);
    }

    #[test]
    fn decays_after_step_size_epochs() {
        let mut scheduler = StepLr::new(0.001, 5, 0.1);

        for _ in 0..4 {
            assert_eq!(scheduler.step(), 0.001);
        }
        let decayed = scheduler.step();

        assert!((decayed - 0.001 * 0.1).abs() < 1e-15);
        assert_eq!(scheduler.epoch(), 5);
    }

    #[test]
    fn decays_compound() {
        let mut scheduler = StepLr::new(1.0, 2, 0.5);
        let lrs: Vec<f64> = (0..6).map(|_| scheduler.step()).collect();
        assert_eq!(lrs, vec![1.0, 0.5, 0.5, 0.25, 0.25, 0.125]);
    }

    #[test]
    fn state_survives_serialization() {
        let mut scheduler = StepLr::new(0.01, 3, 0.1);
        scheduler.step();
        scheduler.step();

        let json = serde_json::to_string(&scheduler).unwrap();
        let restored: StepLr = serde_json::from_str(&json).unwrap();

        assert_eq!(restored, scheduler);
    }
}
