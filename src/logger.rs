//! Epoch-scoped scalar logging.
//!
//! Step hooks record values here; the driver calls [`EpochLogger::finish`]
//! once per epoch to reduce, report and clear them.

use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default)]
struct RunningMean {
    sum: f64,
    weight: usize,
}

impl RunningMean {
    fn push(&mut self, value: f64, weight: usize) {
        self.sum += value * weight as f64;
        self.weight += weight;
    }

    fn mean(&self) -> f64 {
        if self.weight == 0 {
            f64::NAN
        } else {
            self.sum / self.weight as f64
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EpochLogger {
    means: BTreeMap<String, RunningMean>,
    latest: BTreeMap<String, f64>,
}

impl EpochLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a per-batch value; the epoch value is the mean weighted by batch size.
    pub fn log(&mut self, name: &str, value: f64, batch_size: usize) {
        self.means
            .entry(name.to_string())
            .or_default()
            .push(value, batch_size.max(1));
    }

    /// Record already-accumulated values; the epoch value is the last one logged.
    pub fn log_dict(&mut self, values: &BTreeMap<String, f64>) {
        for (name, value) in values {
            self.latest.insert(name.clone(), *value);
        }
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.means
            .get(name)
            .map(RunningMean::mean)
            .or_else(|| self.latest.get(name).copied())
    }

    pub fn is_empty(&self) -> bool {
        self.means.is_empty() && self.latest.is_empty()
    }

    /// Reduce everything logged this epoch, emit it and start over.
    pub fn finish(&mut self, stage: &str, epoch: usize) -> BTreeMap<String, f64> {
        let mut summary: BTreeMap<String, f64> = self
            .means
            .iter()
            .map(|(name, mean)| (name.clone(), mean.mean()))
            .collect();
        summary.extend(self.latest.iter().map(|(name, value)| (name.clone(), *value)));

        for (name, value) in &summary {
            tracing::info!(stage, epoch, metric = %name, value = *value, "epoch metric");
        }

        self.means.clear();
        self.latest.clear();
        summary
    }
}
