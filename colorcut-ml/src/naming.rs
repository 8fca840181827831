//! Human-readable experiment names for logs and run trackers.

use crate::config::RunContext;
use crate::types::Job;
use chrono::NaiveDateTime;

/// Timestamp layout embedded in log experiment names, e.g. `2023-Mar-05-14:02:11`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%b-%d-%H:%M:%S";

/// `"<TASK> - <proj> - TRAIN|TEST - MODEL=<M> - DATA=<D> - DESC=<d> - TS=<ts>"`.
///
/// Preprocessing runs carry no job segment.
pub fn log_experiment_name(ctx: &RunContext, timestamp: NaiveDateTime) -> String {
    let mut name = format!(
        "{} - {} - ",
        ctx.task.as_str().to_uppercase(),
        ctx.config.project.proj_name
    );
    let phase = match ctx.job {
        Job::Training | Job::ResumeTraining => Some("TRAIN"),
        Job::Testing => Some("TEST"),
        Job::Preprocessing => None,
    };
    if let Some(phase) = phase {
        name.push_str(&format!(
            "{phase} - MODEL={} - DATA={} - DESC={} - ",
            ctx.model_type.as_str().to_uppercase(),
            ctx.dataset.as_str().to_uppercase(),
            ctx.config.project.description
        ));
    }
    name.push_str(&format!("TS={}", timestamp.format(TIMESTAMP_FORMAT)));
    name
}

/// `"<TASK> - <DATASET> / <MODEL> / <AUGMENTATION>"`, upper-cased.
pub fn run_experiment_name(ctx: &RunContext) -> String {
    format!(
        "{} - {} / {} / {}",
        ctx.task.as_str(),
        ctx.dataset.as_str(),
        ctx.model_type.as_str(),
        ctx.augmentation().as_str()
    )
    .to_uppercase()
}
