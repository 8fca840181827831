//! # colorcut-ml
//!
//! Colorful Cutout augmentation and its curriculum schedule, together with
//! the classification pipeline used to evaluate it: preprocessing raw
//! datasets, training with early stopping and checkpoints, testing, and
//! sweeping every (dataset, model, augmentation) combination.

pub mod augment;
pub mod config;
pub mod data;
pub mod device;
pub mod error;
pub mod model;
pub mod naming;
pub mod optim;
pub mod process;
pub mod sweep;
pub mod tensor;
pub mod training;
pub mod types;

pub use config::{MlConfig, RunContext};
pub use error::MlError;
pub use sweep::{SweepPlan, SweepReport, SweepRunner};
pub use types::{AugmentationType, DatasetName, Job, ModelType};

use data::PreprocessSummary;
use serde::Serialize;
use training::{TestResult, TrainingSummary};

/// What a single job produced.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum JobOutcome {
    Preprocessing(PreprocessSummary),
    Training(TrainingSummary),
    Testing(TestResult),
}

/// Run the job named by `ctx`. CPU-bound; callers on an async runtime should
/// move it onto a blocking thread.
pub fn run_job(ctx: &RunContext) -> Result<JobOutcome, MlError> {
    match ctx.job {
        Job::Preprocessing => data::run_preprocessing(ctx).map(JobOutcome::Preprocessing),
        Job::Training | Job::ResumeTraining => training::run_training(ctx).map(JobOutcome::Training),
        Job::Testing => training::run_testing(ctx).map(JobOutcome::Testing),
    }
}
