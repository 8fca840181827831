//! Experiment sweeps: every (dataset, model) pair is preprocessed once, then
//! trained and tested under each augmentation strategy.

use crate::config::MlConfig;
use crate::error::MlError;
use crate::process::ProgramRunner;
use crate::types::{AugmentationType, DatasetName, Job, ModelType, Task};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// The Cartesian product to sweep plus the hyperparameters shared by every
/// invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepPlan {
    pub datasets: Vec<DatasetName>,
    pub models: Vec<ModelType>,
    pub augmentations: Vec<AugmentationType>,
    pub device: String,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub num_epochs: usize,
}

impl SweepPlan {
    pub fn from_config(config: &MlConfig) -> Self {
        Self {
            datasets: config.sweep.datasets.clone(),
            models: config.sweep.models.clone(),
            augmentations: config.sweep.augmentations.clone(),
            device: config.training.device.clone(),
            batch_size: config.training.batch_size,
            learning_rate: config.training.learning_rate,
            num_epochs: config.training.num_epochs,
        }
    }

    /// `|D| * |M| * (1 + 2|A|)`.
    pub fn len(&self) -> usize {
        self.datasets.len() * self.models.len() * (1 + 2 * self.augmentations.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invocations in execution order.
    pub fn invocations(&self) -> Vec<Invocation> {
        let mut out = Vec::with_capacity(self.len());
        for &dataset in &self.datasets {
            for &model_type in &self.models {
                out.push(self.invocation(Job::Preprocessing, dataset, model_type, None));
                for &augmentation in &self.augmentations {
                    for job in [Job::Training, Job::Testing] {
                        out.push(self.invocation(job, dataset, model_type, Some(augmentation)));
                    }
                }
            }
        }
        out
    }

    fn invocation(
        &self,
        job: Job,
        dataset: DatasetName,
        model_type: ModelType,
        augmentation: Option<AugmentationType>,
    ) -> Invocation {
        Invocation {
            task: Task::Classification,
            job,
            dataset,
            model_type,
            augmentation,
            device: self.device.clone(),
            batch_size: self.batch_size,
            learning_rate: self.learning_rate,
            num_epochs: self.num_epochs,
        }
    }
}

/// One program run of the sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invocation {
    pub task: Task,
    pub job: Job,
    pub dataset: DatasetName,
    pub model_type: ModelType,
    pub augmentation: Option<AugmentationType>,
    pub device: String,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub num_epochs: usize,
}

impl Invocation {
    /// Render to the program's flag contract.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            format!("--task={}", self.task),
            format!("--job={}", self.job),
            format!("--task_dataset={}", self.dataset),
            format!("--model_type={}", self.model_type),
            format!("--device={}", self.device),
            format!("--batch_size={}", self.batch_size),
            format!("--learning_rate={}", self.learning_rate),
            format!("--num_epochs={}", self.num_epochs),
        ];
        if let Some(aug) = self.augmentation {
            args.push(format!("--augmentation_type={aug}"));
        }
        args
    }

    pub fn label(&self) -> String {
        match self.augmentation {
            Some(aug) => format!("{} {}/{}/{aug}", self.job, self.dataset, self.model_type),
            None => format!("{} {}/{}", self.job, self.dataset, self.model_type),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InvocationStatus {
    Succeeded,
    Failed { code: Option<i32> },
    TimedOut,
    /// Not run because an earlier invocation failed.
    Skipped,
    DryRun,
}

impl InvocationStatus {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. } | Self::TimedOut)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRecord {
    pub index: usize,
    pub label: String,
    pub command: String,
    #[serde(flatten)]
    pub status: InvocationStatus,
    pub duration_secs: f64,
}

/// Outcome of every invocation of a sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub id: String,
    pub plan: SweepPlan,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub records: Vec<InvocationRecord>,
}

impl SweepReport {
    pub fn new(plan: SweepPlan) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            plan,
            started_at: Utc::now(),
            finished_at: None,
            records: Vec::new(),
        }
    }

    pub fn succeeded(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.status == InvocationStatus::Succeeded)
            .count()
    }

    pub fn failed(&self) -> usize {
        self.records.iter().filter(|r| r.status.is_failure()).count()
    }

    pub fn skipped(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.status == InvocationStatus::Skipped)
            .count()
    }

    pub fn save(&self, path: &Path) -> Result<(), MlError> {
        colorcut_core::persistence::atomic_write_json(path, self)?;
        Ok(())
    }
}

/// Executes a [`SweepPlan`] strictly sequentially.
#[derive(Debug, Clone)]
pub struct SweepRunner {
    runner: ProgramRunner,
    keep_going: bool,
    dry_run: bool,
}

impl SweepRunner {
    pub fn new(runner: ProgramRunner) -> Self {
        Self {
            runner,
            keep_going: false,
            dry_run: false,
        }
    }

    /// Record failures and continue instead of stopping at the first one.
    pub fn keep_going(mut self, keep_going: bool) -> Self {
        self.keep_going = keep_going;
        self
    }

    /// Log the commands without running them.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Run the plan. The report is written to `report_path` after every
    /// invocation. Without `keep_going` the first failure aborts the sweep
    /// with an error once the remaining invocations are marked skipped.
    pub async fn run(&self, plan: &SweepPlan, report_path: Option<&Path>) -> Result<SweepReport, MlError> {
        let invocations = plan.invocations();
        let total = invocations.len();
        let mut report = SweepReport::new(plan.clone());
        tracing::info!(sweep_id = %report.id, total, dry_run = self.dry_run, "Starting sweep");

        let mut first_error: Option<MlError> = None;
        for (index, invocation) in invocations.iter().enumerate() {
            let args = invocation.args();
            let command = self.runner.command_line(&args);
            let label = invocation.label();

            let (status, duration) = if first_error.is_some() {
                (InvocationStatus::Skipped, Duration::ZERO)
            } else if self.dry_run {
                tracing::info!(index, total, command = %command, "Dry run");
                (InvocationStatus::DryRun, Duration::ZERO)
            } else {
                tracing::info!(index, total, invocation = %label, "Running");
                match self.runner.run(&args).await {
                    Ok(exit) if exit.success => (InvocationStatus::Succeeded, exit.duration),
                    Ok(exit) => {
                        tracing::error!(invocation = %label, code = ?exit.code, "Invocation failed");
                        if !self.keep_going {
                            first_error = Some(MlError::training(format!(
                                "`{command}` exited with {}",
                                exit.code.map_or("a signal".to_string(), |c| format!("status {c}"))
                            )));
                        }
                        (InvocationStatus::Failed { code: exit.code }, exit.duration)
                    }
                    Err(MlError::Timeout(msg)) => {
                        tracing::error!(invocation = %label, "Invocation timed out");
                        if !self.keep_going {
                            first_error = Some(MlError::Timeout(msg));
                        }
                        (InvocationStatus::TimedOut, self.runner.timeout())
                    }
                    Err(e) => {
                        tracing::error!(invocation = %label, error = %e, "Invocation could not start");
                        if !self.keep_going {
                            first_error = Some(e);
                        }
                        (InvocationStatus::Failed { code: None }, Duration::ZERO)
                    }
                }
            };

            report.records.push(InvocationRecord {
                index,
                label,
                command,
                status,
                duration_secs: duration.as_secs_f64(),
            });
            if let Some(path) = report_path {
                report.save(path)?;
            }
        }

        report.finished_at = Some(Utc::now());
        if let Some(path) = report_path {
            report.save(path)?;
        }
        tracing::info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            skipped = report.skipped(),
            "Sweep finished"
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }
}
