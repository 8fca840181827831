//! Learning-rate schedulers.
//!
//! `StepLR` and both cosine schedules advance once per training iteration,
//! `LambdaLR` once per epoch, and `ReduceLROnPlateau` on the validation loss.

use crate::error::MlError;
use crate::types::SchedulerType;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

const STEP_GAMMA: f64 = 0.1;
const LAMBDA_DECAY: f64 = 0.95;
const PLATEAU_FACTOR: f64 = 0.1;
const PLATEAU_THRESHOLD: f64 = 1e-4;
const ETA_MIN_RATIO: f64 = 0.01;

/// A scheduler and its position, serializable into checkpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LrScheduler {
    Constant,
    Step {
        base_lr: f64,
        step_size: usize,
        iteration: usize,
    },
    Lambda {
        base_lr: f64,
        epoch: usize,
    },
    Cosine {
        base_lr: f64,
        eta_min: f64,
        t_max: usize,
        iteration: usize,
    },
    WarmRestarts {
        base_lr: f64,
        eta_min: f64,
        t_0: usize,
        iteration: usize,
    },
    Plateau {
        patience: usize,
        min_lr: f64,
        best: Option<f64>,
        bad_epochs: usize,
    },
}

impl LrScheduler {
    /// Build the schedule for a run of `num_epochs` epochs of `epoch_size`
    /// iterations each.
    pub fn build(
        kind: SchedulerType,
        base_lr: f64,
        epoch_size: usize,
        num_epochs: usize,
        patience: usize,
    ) -> Result<Self, MlError> {
        let total = epoch_size * num_epochs;
        let eta_min = base_lr * ETA_MIN_RATIO;
        Ok(match kind {
            SchedulerType::None => Self::Constant,
            SchedulerType::StepLr => Self::Step {
                base_lr,
                step_size: (total / 8).max(1),
                iteration: 0,
            },
            SchedulerType::LambdaLr => Self::Lambda { base_lr, epoch: 0 },
            SchedulerType::CosineAnnealingLr => {
                if total == 0 {
                    return Err(MlError::invalid_input(
                        "CosineAnnealingLR needs at least one training iteration",
                    ));
                }
                Self::Cosine {
                    base_lr,
                    eta_min,
                    t_max: total,
                    iteration: 0,
                }
            }
            SchedulerType::CosineAnnealingWarmRestarts => Self::WarmRestarts {
                base_lr,
                eta_min,
                t_0: (total / 8).max(1),
                iteration: 0,
            },
            SchedulerType::ReduceLrOnPlateau => Self::Plateau {
                patience,
                min_lr: eta_min,
                best: None,
                bad_epochs: 0,
            },
        })
    }

    /// Advance after one optimizer step and return the rate for the next.
    pub fn on_iteration(&mut self, lr: f64) -> f64 {
        match self {
            Self::Step {
                base_lr,
                step_size,
                iteration,
            } => {
                *iteration += 1;
                let decays = i32::try_from(*iteration / *step_size).unwrap_or(i32::MAX);
                *base_lr * STEP_GAMMA.powi(decays)
            }
            Self::Cosine {
                base_lr,
                eta_min,
                t_max,
                iteration,
            } => {
                *iteration += 1;
                cosine(*base_lr, *eta_min, *iteration as f64 / *t_max as f64)
            }
            Self::WarmRestarts {
                base_lr,
                eta_min,
                t_0,
                iteration,
            } => {
                *iteration += 1;
                cosine(*base_lr, *eta_min, (*iteration % *t_0) as f64 / *t_0 as f64)
            }
            Self::Constant | Self::Lambda { .. } | Self::Plateau { .. } => lr,
        }
    }

    /// Advance after validation and return the rate for the next epoch.
    pub fn on_epoch_end(&mut self, lr: f64, val_loss: f64) -> f64 {
        match self {
            Self::Lambda { base_lr, epoch } => {
                *epoch += 1;
                let e = i32::try_from(*epoch).unwrap_or(i32::MAX);
                *base_lr * LAMBDA_DECAY.powi(e)
            }
            Self::Plateau {
                patience,
                min_lr,
                best,
                bad_epochs,
            } => {
                let improved = best.is_none_or(|b| val_loss < b * (1.0 - PLATEAU_THRESHOLD));
                if improved {
                    *best = Some(val_loss);
                    *bad_epochs = 0;
                } else {
                    *bad_epochs += 1;
                }
                if *bad_epochs <= *patience {
                    return lr;
                }
                *bad_epochs = 0;
                let reduced = (lr * PLATEAU_FACTOR).max(*min_lr);
                if reduced < lr {
                    tracing::info!(lr = reduced, "Reducing learning rate on plateau");
                    reduced
                } else {
                    lr
                }
            }
            Self::Constant | Self::Step { .. } | Self::Cosine { .. } | Self::WarmRestarts { .. } => lr,
        }
    }
}

fn cosine(base_lr: f64, eta_min: f64, progress: f64) -> f64 {
    eta_min + (base_lr - eta_min) * (1.0 + (PI * progress).cos()) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_lr_decays_every_eighth_of_training() {
        let mut s = LrScheduler::build(SchedulerType::StepLr, 1.0, 4, 4, 0).unwrap();
        // 16 iterations in total, so the step size is 2.
        let lr = s.on_iteration(1.0);
        assert!((lr - 1.0).abs() < 1e-12);
        let lr = s.on_iteration(lr);
        assert!((lr - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_cosine_reaches_eta_min() {
        let mut s = LrScheduler::build(SchedulerType::CosineAnnealingLr, 1.0, 5, 2, 0).unwrap();
        let mut lr = 1.0;
        for _ in 0..5 {
            lr = s.on_iteration(lr);
        }
        assert!((lr - (0.01 + 0.99 * 0.5)).abs() < 1e-9);
        for _ in 0..5 {
            lr = s.on_iteration(lr);
        }
        assert!((lr - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_warm_restarts_cycle() {
        let mut s =
            LrScheduler::build(SchedulerType::CosineAnnealingWarmRestarts, 1.0, 4, 4, 0).unwrap();
        // T_0 = 2: iteration 2 restarts at the base rate.
        let lr = s.on_iteration(1.0);
        assert!(lr < 1.0);
        let lr = s.on_iteration(lr);
        assert!((lr - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_lambda_decays_per_epoch() {
        let mut s = LrScheduler::build(SchedulerType::LambdaLr, 1.0, 10, 3, 0).unwrap();
        let lr = s.on_iteration(1.0);
        assert_eq!(lr, 1.0);
        let lr = s.on_epoch_end(lr, 0.0);
        let lr = s.on_epoch_end(lr, 0.0);
        assert!((lr - 0.95f64.powi(2)).abs() < 1e-12);
    }

    #[test]
    fn test_plateau_reduces_after_patience() {
        let mut s = LrScheduler::build(SchedulerType::ReduceLrOnPlateau, 1.0, 10, 3, 1).unwrap();
        let lr = s.on_epoch_end(1.0, 1.0);
        let lr = s.on_epoch_end(lr, 1.0);
        assert_eq!(lr, 1.0);
        let mut lr = s.on_epoch_end(lr, 1.0);
        assert!((lr - 0.1).abs() < 1e-12);
        for _ in 0..10 {
            lr = s.on_epoch_end(lr, 1.0);
        }
        assert!((lr - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_constant_keeps_rate() {
        let mut s = LrScheduler::build(SchedulerType::None, 0.3, 4, 4, 0).unwrap();
        assert_eq!(s.on_iteration(0.3), 0.3);
        assert_eq!(s.on_epoch_end(0.3, 9.0), 0.3);
    }

    #[test]
    fn test_state_serializes() {
        let s = LrScheduler::build(SchedulerType::CosineAnnealingLr, 0.1, 3, 3, 0).unwrap();
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("\"kind\":\"cosine\""));
        assert_eq!(serde_json::from_str::<LrScheduler>(&json).unwrap(), s);
    }
}
