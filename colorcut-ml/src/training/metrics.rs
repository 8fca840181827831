//! Training metrics tracking and classification scores.

use burn::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Per-epoch history of a training run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub epochs_completed: usize,
    pub loss_history: Vec<f64>,
    pub val_loss_history: Vec<f64>,
    pub custom_metrics: BTreeMap<String, Vec<f64>>,
    /// Epoch index (as logged) of the best objective so far.
    pub best_epoch: Option<usize>,
    pub best_objective: Option<f64>,
    pub total_training_time_secs: f64,
}

impl TrainingMetrics {
    pub fn record_epoch(&mut self, epoch: usize, loss: f64, val_loss: f64, objective: f64) {
        self.loss_history.push(loss);
        self.val_loss_history.push(val_loss);
        self.epochs_completed += 1;

        if self.best_objective.is_none_or(|best| objective > best) {
            self.best_objective = Some(objective);
            self.best_epoch = Some(epoch);
        }
    }

    pub fn add_custom_metric(&mut self, name: &str, value: f64) {
        self.custom_metrics
            .entry(name.to_string())
            .or_default()
            .push(value);
    }
}

/// Loss, accuracy and macro F1 over one pass of a split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub loss: f64,
    pub accuracy: f64,
    pub f1_score: f64,
}

/// Arg-max class of every row of `[N, K]` logits.
pub fn predictions<B: Backend>(logits: Tensor<B, 2>) -> Vec<usize> {
    logits
        .argmax(1)
        .into_data()
        .iter::<i64>()
        .map(|class| class as usize)
        .collect()
}

/// Fraction of predictions equal to their label. Empty input scores 0.
pub fn accuracy(labels: &[usize], predictions: &[usize]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let correct = labels
        .iter()
        .zip(predictions)
        .filter(|(l, p)| l == p)
        .count();
    correct as f64 / labels.len() as f64
}

/// Unweighted mean of per-class F1 over every class seen in either
/// `labels` or `predictions`.
pub fn macro_f1(labels: &[usize], predictions: &[usize]) -> f64 {
    let classes: BTreeSet<usize> = labels.iter().chain(predictions).copied().collect();
    if classes.is_empty() {
        return 0.0;
    }

    let total: f64 = classes
        .iter()
        .map(|&class| {
            let mut tp = 0usize;
            let mut fp = 0usize;
            let mut fn_ = 0usize;
            for (&l, &p) in labels.iter().zip(predictions) {
                match (l == class, p == class) {
                    (true, true) => tp += 1,
                    (false, true) => fp += 1,
                    (true, false) => fn_ += 1,
                    (false, false) => {}
                }
            }
            let precision = if tp + fp == 0 { 0.0 } else { tp as f64 / (tp + fp) as f64 };
            let recall = if tp + fn_ == 0 { 0.0 } else { tp as f64 / (tp + fn_) as f64 };
            if precision + recall == 0.0 {
                0.0
            } else {
                2.0 * precision * recall / (precision + recall)
            }
        })
        .sum();
    total / classes.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_training_metrics_tracks_best_objective() {
        let mut metrics = TrainingMetrics::default();
        metrics.record_epoch(0, 0.9, 1.0, 0.4);
        metrics.record_epoch(1, 0.7, 0.8, 0.6);
        metrics.record_epoch(2, 0.6, 0.9, 0.6);
        assert_eq!(metrics.epochs_completed, 3);
        assert_eq!(metrics.best_epoch, Some(1));
        assert_eq!(metrics.best_objective, Some(0.6));
        metrics.add_custom_metric("val_accuracy", 0.5);
        assert_eq!(metrics.custom_metrics["val_accuracy"], vec![0.5]);
    }

    #[test]
    fn test_predictions_take_row_argmax() {
        let logits = Tensor::<burn::backend::NdArray<f32>, 2>::from_data(
            TensorData::new(vec![0.1f32, 0.9, 0.0, 2.0, -1.0, 1.5], [2, 3]),
            &Default::default(),
        );
        assert_eq!(predictions(logits), vec![1, 0]);
    }

    #[test]
    fn test_accuracy() {
        assert_eq!(accuracy(&[0, 1, 2, 2], &[0, 1, 1, 2]), 0.75);
        assert_eq!(accuracy(&[], &[]), 0.0);
    }

    #[test]
    fn test_macro_f1_perfect() {
        assert_eq!(macro_f1(&[0, 1, 2, 1], &[0, 1, 2, 1]), 1.0);
    }

    #[test]
    fn test_macro_f1_counts_predicted_only_classes() {
        // Class 0 has p = r = 1/2. Classes 1 and 2 score 0.
        let f1 = macro_f1(&[0, 1, 0], &[0, 0, 2]);
        let class0 = 2.0 * 0.5 * 0.5 / (0.5 + 0.5);
        assert!((f1 - class0 / 3.0).abs() < 1e-12);
    }
}
