//! Epoch-end callbacks: early stopping on the validation objective and
//! non-finite loss detection.

use crate::training::metrics::TrainingMetrics;
use serde::{Deserialize, Serialize};

/// Action a callback can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    Stop,
    Checkpoint,
}

/// Trait for training callbacks.
pub trait TrainingCallback: Send + Sync {
    /// Called after validation with the epoch index and the metrics so far.
    fn on_epoch_end(&mut self, epoch: usize, metrics: &TrainingMetrics) -> CallbackAction;
}

/// Tracks the best validation objective (higher is better). A strict
/// improvement requests a checkpoint and resets the counter; `patience`
/// epochs without one stop training.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarlyStoppingCallback {
    pub patience: usize,
    #[serde(skip)]
    counter: usize,
    #[serde(skip)]
    best: Option<f64>,
}

impl EarlyStoppingCallback {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            counter: 0,
            best: None,
        }
    }

    pub fn counter(&self) -> usize {
        self.counter
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }

    pub fn observe(&mut self, epoch: usize, objective: f64) -> CallbackAction {
        if self.best.is_none_or(|best| objective > best) {
            self.best = Some(objective);
            self.counter = 0;
            return CallbackAction::Checkpoint;
        }
        self.counter += 1;
        tracing::info!(
            epoch,
            counter = self.counter,
            patience = self.patience,
            "No improvement in validation objective"
        );
        if self.counter >= self.patience {
            CallbackAction::Stop
        } else {
            CallbackAction::Continue
        }
    }
}

impl TrainingCallback for EarlyStoppingCallback {
    fn on_epoch_end(&mut self, epoch: usize, metrics: &TrainingMetrics) -> CallbackAction {
        let objective = metrics
            .custom_metrics
            .get("objective")
            .and_then(|series| series.last().copied())
            .unwrap_or(f64::NEG_INFINITY);
        self.observe(epoch, objective)
    }
}

/// Stops training once the epoch training loss is NaN or infinite.
#[derive(Debug, Clone, Default)]
pub struct NonFiniteLossCallback;

impl TrainingCallback for NonFiniteLossCallback {
    fn on_epoch_end(&mut self, epoch: usize, metrics: &TrainingMetrics) -> CallbackAction {
        match metrics.loss_history.last() {
            Some(loss) if !loss.is_finite() => {
                tracing::warn!(epoch, loss, "Training loss is not finite, stopping");
                CallbackAction::Stop
            }
            _ => CallbackAction::Continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_early_stopping() {
        let mut cb = EarlyStoppingCallback::new(2);
        assert_eq!(cb.observe(0, 0.5), CallbackAction::Checkpoint);
        assert_eq!(cb.observe(1, 0.6), CallbackAction::Checkpoint);
        assert_eq!(cb.observe(2, 0.6), CallbackAction::Continue); // equal is not an improvement
        assert_eq!(cb.observe(3, 0.7), CallbackAction::Checkpoint);
        assert_eq!(cb.observe(4, 0.1), CallbackAction::Continue);
        assert_eq!(cb.observe(5, 0.1), CallbackAction::Stop);
        assert_eq!(cb.best(), Some(0.7));
    }

    #[test]
    fn test_negated_loss_objective() {
        let mut cb = EarlyStoppingCallback::new(1);
        assert_eq!(cb.observe(0, -0.9), CallbackAction::Checkpoint);
        assert_eq!(cb.observe(1, -0.5), CallbackAction::Checkpoint);
        assert_eq!(cb.observe(2, -0.8), CallbackAction::Stop);
    }

    #[test]
    fn test_reads_objective_from_metrics() {
        let mut metrics = TrainingMetrics::default();
        metrics.add_custom_metric("objective", 0.3);
        let mut cb = EarlyStoppingCallback::new(3);
        assert_eq!(cb.on_epoch_end(0, &metrics), CallbackAction::Checkpoint);
        assert_eq!(cb.counter(), 0);
    }

    #[test]
    fn test_non_finite_loss() {
        let mut cb = NonFiniteLossCallback;
        let mut metrics = TrainingMetrics::default();
        metrics.record_epoch(0, 1.0, 1.0, 0.0);
        assert_eq!(cb.on_epoch_end(0, &metrics), CallbackAction::Continue);
        metrics.record_epoch(1, f64::NAN, 1.0, 0.0);
        assert_eq!(cb.on_epoch_end(1, &metrics), CallbackAction::Stop);
    }
}
