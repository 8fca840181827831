//! CLI subcommand handlers.

use crate::ConfigAction;
use crate::JobArgs;
use crate::SweepArgs;
use colorcut_ml::config::{MlConfig, RunContext};
use colorcut_ml::process::ProgramRunner;
use colorcut_ml::{SweepPlan, SweepRunner, run_job};
use std::path::Path;
use std::time::Duration;

const SWEEP_REPORT_FILE: &str = "sweep_report.json";

fn load_config(workspace: &Path, explicit: Option<&Path>, overrides: &JobArgs) -> anyhow::Result<MlConfig> {
    let mut config: MlConfig = colorcut_core::load_config(Some(workspace), explicit)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    overrides.apply(&mut config);
    Ok(config)
}

/// Run the single job selected by the top-level flags.
pub async fn handle_job(
    args: &JobArgs,
    workspace: &Path,
    explicit: Option<&Path>,
    quiet: bool,
) -> anyhow::Result<()> {
    let (Some(dataset), Some(model_type)) = (args.task_dataset, args.model_type) else {
        anyhow::bail!("--task_dataset and --model_type are required to run a job (or use a subcommand, see --help)");
    };
    let config = load_config(workspace, explicit, args)?;
    let mut ctx = RunContext::new(args.job.unwrap_or_default(), dataset, model_type, config);
    if let Some(task) = args.task {
        ctx.task = task;
    }
    tracing::debug!(job = %ctx.job, dataset = %ctx.dataset, model = %ctx.model_type, "Resolved run context");

    let outcome = tokio::task::spawn_blocking(move || run_job(&ctx)).await??;
    if !quiet {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    }
    Ok(())
}

/// Run the full experiment grid as child processes.
pub async fn handle_sweep(
    args: SweepArgs,
    overrides: &JobArgs,
    workspace: &Path,
    explicit: Option<&Path>,
) -> anyhow::Result<()> {
    let mut config = load_config(workspace, explicit, overrides)?;
    if !args.datasets.is_empty() {
        config.sweep.datasets = args.datasets;
    }
    if !args.models.is_empty() {
        config.sweep.models = args.models;
    }
    if !args.augmentations.is_empty() {
        config.sweep.augmentations = args.augmentations;
    }
    let plan = SweepPlan::from_config(&config);
    if plan.is_empty() {
        anyhow::bail!("Nothing to sweep: datasets, models and augmentations must all be non-empty");
    }

    let mut base_args = config.sweep.program_args.clone();
    // Flags the plan renders come from the merged config; the rest of the
    // parent's overrides ride along ahead of them.
    base_args.extend(overrides.forwarded_flags());
    let program = match args.program.or(config.sweep.program) {
        Some(program) => program,
        None => {
            // Children re-read the same explicit config file.
            if let Some(path) = explicit {
                let at = config.sweep.program_args.len();
                base_args.splice(at..at, ["--config".to_string(), path.display().to_string()]);
            }
            std::env::current_exe()?
        }
    };
    let timeout = Duration::from_secs(args.timeout_secs.unwrap_or(config.sweep.timeout_secs));
    let report_path = workspace.join(
        args.report
            .or(config.sweep.report_path)
            .unwrap_or_else(|| config.paths.result_path.join(SWEEP_REPORT_FILE)),
    );

    let runner = SweepRunner::new(
        ProgramRunner::new(program, base_args, timeout).with_workspace(workspace.to_path_buf()),
    )
    .keep_going(args.keep_going || config.sweep.keep_going)
    .dry_run(args.dry_run);

    println!(
        "Sweeping {} invocations ({} datasets x {} models x {} augmentations)",
        plan.len(),
        plan.datasets.len(),
        plan.models.len(),
        plan.augmentations.len()
    );
    let report = runner.run(&plan, Some(&report_path)).await?;
    println!(
        "Sweep {}: {} succeeded, {} failed, {} skipped. Report: {}",
        report.id,
        report.succeeded(),
        report.failed(),
        report.skipped(),
        report_path.display()
    );
    if report.failed() > 0 {
        anyhow::bail!("{} of {} invocations failed", report.failed(), plan.len());
    }
    Ok(())
}

pub fn handle_config(action: ConfigAction, workspace: &Path, explicit: Option<&Path>) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            match colorcut_core::config::write_workspace_config(workspace, &MlConfig::default())? {
                Some(path) => println!("Created default configuration at: {}", path.display()),
                None => println!(
                    "Configuration file already exists at: {}",
                    colorcut_core::config::workspace_config_path(workspace).display()
                ),
            }
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config(workspace, explicit, &JobArgs::default())?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use colorcut_ml::types::{AugmentationType, DatasetName, ModelType};
    use colorcut_ml::{MlError, SweepReport};
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_config_init_creates_valid_toml() {
        let dir = TempDir::new().unwrap();
        handle_config(ConfigAction::Init, dir.path(), None).unwrap();

        let path = colorcut_core::config::workspace_config_path(dir.path());
        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: MlConfig = toml::from_str(&content).unwrap();
        assert_eq!(parsed, MlConfig::default());
    }

    #[test]
    fn test_config_init_idempotent() {
        let dir = TempDir::new().unwrap();
        handle_config(ConfigAction::Init, dir.path(), None).unwrap();
        let path = colorcut_core::config::workspace_config_path(dir.path());
        std::fs::write(&path, "[training]\nbatch_size = 4\n").unwrap();

        handle_config(ConfigAction::Init, dir.path(), None).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("batch_size = 4"));
    }

    #[tokio::test]
    async fn test_job_requires_dataset_and_model() {
        let dir = TempDir::new().unwrap();
        let args = JobArgs {
            task_dataset: Some(DatasetName::Cifar10),
            ..JobArgs::default()
        };
        assert!(handle_job(&args, dir.path(), None, true).await.is_err());
    }

    #[tokio::test]
    async fn test_job_surfaces_missing_raw_data() {
        let dir = TempDir::new().unwrap();
        let args = JobArgs {
            job: Some(colorcut_ml::Job::Preprocessing),
            task_dataset: Some(DatasetName::Cifar10),
            model_type: Some(ModelType::Resnet50),
            data_path: Some(dir.path().join("missing")),
            ..JobArgs::default()
        };
        let err = handle_job(&args, dir.path(), None, true).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<MlError>(), Some(MlError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_sweep_dry_run_writes_report() {
        let dir = TempDir::new().unwrap();
        let args = SweepArgs {
            datasets: vec![DatasetName::Cifar10],
            models: vec![ModelType::Resnet50, ModelType::VitB16],
            augmentations: vec![AugmentationType::Cutout],
            program: Some(PathBuf::from("does-not-exist")),
            dry_run: true,
            ..SweepArgs::default()
        };
        let overrides = JobArgs {
            result_path: Some(PathBuf::from("results")),
            ..JobArgs::default()
        };
        handle_sweep(args, &overrides, dir.path(), None).await.unwrap();

        let report_path = dir.path().join("results").join(SWEEP_REPORT_FILE);
        let report: SweepReport =
            serde_json::from_slice(&std::fs::read(&report_path).unwrap()).unwrap();
        assert_eq!(report.records.len(), 6);
        assert!(report.finished_at.is_some());
        assert!(report.records[0].command.contains("--job=preprocessing"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_sweep_forwards_parent_overrides() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("sweep.toml");
        std::fs::write(
            &config_path,
            r#"
[sweep]
program = "sh"
program_args = ["-c", "echo \"$@\" >> calls.txt", "sh"]
"#,
        )
        .unwrap();
        let args = SweepArgs {
            datasets: vec![DatasetName::Cifar10],
            models: vec![ModelType::Resnet50],
            augmentations: vec![AugmentationType::Cutout],
            ..SweepArgs::default()
        };
        let overrides = JobArgs {
            seed: Some(7),
            data_path: Some(PathBuf::from("raw")),
            optimizer: Some(colorcut_ml::types::OptimizerType::Sgd),
            augmentation_box_size: Some(8),
            batch_size: Some(4),
            result_path: Some(PathBuf::from("results")),
            ..JobArgs::default()
        };
        handle_sweep(args, &overrides, dir.path(), Some(&config_path))
            .await
            .unwrap();

        let calls = std::fs::read_to_string(dir.path().join("calls.txt")).unwrap();
        let lines: Vec<&str> = calls.lines().collect();
        assert_eq!(lines.len(), 3);
        for line in &lines {
            let flags: Vec<&str> = line.split_whitespace().collect();
            for expected in [
                "--seed=7",
                "--optimizer=SGD",
                "--augmentation_box_size=8",
                "--data_path=raw",
                "--result_path=results",
                "--batch_size=4",
            ] {
                assert!(flags.contains(&expected), "{expected} missing from `{line}`");
            }
            assert_eq!(flags.iter().filter(|f| f.starts_with("--batch_size=")).count(), 1);
        }
        assert!(lines[0].contains("--job=preprocessing"));
        assert!(lines[2].contains("--job=testing"));
    }
}
