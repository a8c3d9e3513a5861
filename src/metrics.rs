//! Classification metrics accumulated across evaluation steps.
//!
//! The collection reports an aggregate macro F1 under `F1` and one F1 per
//! class under `F1_<label>`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{ClassifierError, Result};

/// Confusion matrix, row = actual class, column = predicted class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    num_classes: usize,
    matrix: Vec<usize>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![0; num_classes * num_classes],
        }
    }

    pub fn add(&mut self, actual: usize, predicted: usize) {
        self.matrix[actual * self.num_classes + predicted] += 1;
    }

    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        self.matrix[actual * self.num_classes + predicted]
    }

    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn clear(&mut self) {
        self.matrix.iter_mut().for_each(|count| *count = 0);
    }

    /// `(tp, fp, fn)` for one class.
    pub fn counts(&self, class_idx: usize) -> (usize, usize, usize) {
        let tp = self.get(class_idx, class_idx);
        let predicted: usize = (0..self.num_classes).map(|i| self.get(i, class_idx)).sum();
        let actual: usize = (0..self.num_classes).map(|i| self.get(class_idx, i)).sum();
        (tp, predicted - tp, actual - tp)
    }

    /// F1 for one class; 0 when the class has no true positives.
    pub fn f1(&self, class_idx: usize) -> f64 {
        let (tp, fp, fn_) = self.counts(class_idx);
        let denom = 2 * tp + fp + fn_;
        if denom == 0 {
            0.0
        } else {
            2.0 * tp as f64 / denom as f64
        }
    }

    /// Mean of per-class F1 over classes seen in predictions or targets.
    pub fn macro_f1(&self) -> f64 {
        let seen: Vec<usize> = (0..self.num_classes)
            .filter(|&c| {
                let (tp, fp, fn_) = self.counts(c);
                tp + fp + fn_ > 0
            })
            .collect();

        if seen.is_empty() {
            return 0.0;
        }
        seen.iter().map(|&c| self.f1(c)).sum::<f64>() / seen.len() as f64
    }
}

#[derive(Debug, Clone)]
pub struct MetricCollection {
    labels: Vec<String>,
    confusion: ConfusionMatrix,
    updates: usize,
}

impl MetricCollection {
    pub fn new(labels: Vec<String>) -> Self {
        let confusion = ConfusionMatrix::new(labels.len());
        Self {
            labels,
            confusion,
            updates: 0,
        }
    }

    /// Accumulate one batch of arg-max predictions against targets.
    pub fn update(&mut self, predictions: &[usize], targets: &[usize]) -> Result<()> {
        if predictions.len() != targets.len() {
            return Err(ClassifierError::Metric(format!(
                "{} predictions for {} targets",
                predictions.len(),
                targets.len()
            )));
        }
        let num_classes = self.labels.len();
        if let Some(&bad) = predictions.iter().chain(targets).find(|&&c| c >= num_classes) {
            return Err(ClassifierError::Metric(format!(
                "class index {} out of range for {} classes",
                bad, num_classes
            )));
        }

        for (&predicted, &actual) in predictions.iter().zip(targets) {
            self.confusion.add(actual, predicted);
        }
        self.updates += 1;
        Ok(())
    }

    pub fn compute(&self) -> BTreeMap<String, f64> {
        let mut values = BTreeMap::new();
        values.insert("F1".to_string(), self.confusion.macro_f1());

        for (idx, label) in self.labels.iter().enumerate() {
            values.insert(format!("F1_{}", label), self.confusion.f1(idx));
        }

        values
    }

    pub fn reset(&mut self) {
        self.confusion.clear();
        self.updates = 0;
    }

    /// Number of `update` calls since the last reset.
    pub fn num_updates(&self) -> usize {
        self.updates
    }

    /// Number of samples accumulated since the last reset.
    pub fn num_samples(&self) -> usize {
        self.confusion.total()
    }

    pub fn confusion(&self) -> &ConfusionMatrix {
        &self.confusion
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}
