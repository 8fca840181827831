//! colorcut CLI: preprocessing, training and testing jobs for Colorful
//! Cutout experiments, plus the sweep driver that runs them all.

mod commands;

use clap::Parser;
use colorcut_ml::config::MlConfig;
use colorcut_ml::types::{
    AugmentationType, DatasetName, Job, ModelType, OptimizeObjective, OptimizerType,
    SchedulerType, Task,
};
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Colorful Cutout: curriculum colour-mosaic augmentation experiments
#[derive(Parser, Debug)]
#[command(name = "colorcut", version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    job: JobArgs,

    /// Workspace directory
    #[arg(short, long, default_value = ".", global = true)]
    workspace: PathBuf,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Job selection and configuration overrides. Flag names keep the
/// underscore spelling the sweep driver renders.
#[derive(clap::Args, Debug, Default, Clone)]
struct JobArgs {
    /// Task family
    #[arg(long)]
    task: Option<Task>,

    /// Job to run: preprocessing, training, resume_training, testing
    #[arg(long)]
    job: Option<Job>,

    /// Dataset: cifar10, cifar100, tiny_imagenet
    #[arg(long = "task_dataset")]
    task_dataset: Option<DatasetName>,

    /// Model: resnet50, efficientnet_b0, vit_b_16
    #[arg(long = "model_type")]
    model_type: Option<ModelType>,

    /// Device string, e.g. cuda:0, mps, cpu
    #[arg(long, global = true)]
    device: Option<String>,

    #[arg(long = "batch_size", global = true)]
    batch_size: Option<usize>,

    #[arg(long = "learning_rate", global = true)]
    learning_rate: Option<f64>,

    #[arg(long = "num_epochs", global = true)]
    num_epochs: Option<usize>,

    /// Augmentation: none, cutout, color_cutout_nocur, color_cutout_cur, mixup, cutmix
    #[arg(long = "augmentation_type")]
    augmentation_type: Option<AugmentationType>,

    #[arg(long)]
    seed: Option<u64>,

    /// Optimizer: SGD, Adam, AdamW
    #[arg(long)]
    optimizer: Option<OptimizerType>,

    #[arg(long)]
    scheduler: Option<SchedulerType>,

    #[arg(long = "weight_decay")]
    weight_decay: Option<f64>,

    #[arg(long = "early_stopping_patience")]
    early_stopping_patience: Option<usize>,

    /// Global gradient-norm clip, 0 disables
    #[arg(long = "clip_grad_norm")]
    clip_grad_norm: Option<f64>,

    #[arg(long = "label_smoothing_eps")]
    label_smoothing_eps: Option<f64>,

    /// Validation objective: loss, accuracy, f1
    #[arg(long = "optimize_objective")]
    optimize_objective: Option<OptimizeObjective>,

    #[arg(long = "log_freq")]
    log_freq: Option<usize>,

    #[arg(long = "augmentation_box_size")]
    augmentation_box_size: Option<usize>,

    #[arg(long = "augmentation_mixup_alpha")]
    augmentation_mixup_alpha: Option<f64>,

    #[arg(long = "image_resize_size")]
    image_resize_size: Option<usize>,

    #[arg(long = "image_crop_size")]
    image_crop_size: Option<usize>,

    #[arg(long = "data_path")]
    data_path: Option<PathBuf>,

    #[arg(long = "preprocess_path")]
    preprocess_path: Option<PathBuf>,

    #[arg(long = "checkpoint_path")]
    checkpoint_path: Option<PathBuf>,

    #[arg(long = "model_path")]
    model_path: Option<PathBuf>,

    #[arg(long = "result_path")]
    result_path: Option<PathBuf>,

    #[arg(long = "proj_name")]
    proj_name: Option<String>,

    #[arg(long)]
    description: Option<String>,
}

impl JobArgs {
    /// Layer the flags that were given on top of `config`.
    fn apply(&self, config: &mut MlConfig) {
        macro_rules! set {
            ($flag:expr => $field:expr) => {
                if let Some(value) = &$flag {
                    $field = value.clone();
                }
            };
        }
        set!(self.device => config.training.device);
        set!(self.batch_size => config.training.batch_size);
        set!(self.learning_rate => config.training.learning_rate);
        set!(self.num_epochs => config.training.num_epochs);
        set!(self.seed => config.training.seed);
        set!(self.optimizer => config.training.optimizer);
        set!(self.scheduler => config.training.scheduler);
        set!(self.weight_decay => config.training.weight_decay);
        set!(self.early_stopping_patience => config.training.early_stopping_patience);
        set!(self.clip_grad_norm => config.training.clip_grad_norm);
        set!(self.label_smoothing_eps => config.training.label_smoothing_eps);
        set!(self.optimize_objective => config.training.optimize_objective);
        set!(self.log_freq => config.training.log_freq);
        set!(self.augmentation_type => config.augmentation.augmentation_type);
        set!(self.augmentation_box_size => config.augmentation.box_size);
        set!(self.augmentation_mixup_alpha => config.augmentation.mixup_alpha);
        set!(self.image_resize_size => config.data.image_resize_size);
        set!(self.image_crop_size => config.data.image_crop_size);
        set!(self.data_path => config.paths.data_path);
        set!(self.preprocess_path => config.paths.preprocess_path);
        set!(self.checkpoint_path => config.paths.checkpoint_path);
        set!(self.model_path => config.paths.model_path);
        set!(self.result_path => config.paths.result_path);
        set!(self.proj_name => config.project.proj_name);
        set!(self.description => config.project.description);
    }

    /// Overrides a sweep child needs that the sweep's own flag contract does
    /// not carry, rendered back to `--flag=value`.
    fn forwarded_flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        macro_rules! forward {
            ($flag:expr, $name:literal) => {
                if let Some(value) = &$flag {
                    flags.push(format!(concat!("--", $name, "={}"), value));
                }
            };
            ($flag:expr, $name:literal, path) => {
                if let Some(value) = &$flag {
                    flags.push(format!(concat!("--", $name, "={}"), value.display()));
                }
            };
        }
        forward!(self.seed, "seed");
        forward!(self.optimizer, "optimizer");
        forward!(self.scheduler, "scheduler");
        forward!(self.weight_decay, "weight_decay");
        forward!(self.early_stopping_patience, "early_stopping_patience");
        forward!(self.clip_grad_norm, "clip_grad_norm");
        forward!(self.label_smoothing_eps, "label_smoothing_eps");
        forward!(self.optimize_objective, "optimize_objective");
        forward!(self.log_freq, "log_freq");
        forward!(self.augmentation_box_size, "augmentation_box_size");
        forward!(self.augmentation_mixup_alpha, "augmentation_mixup_alpha");
        forward!(self.image_resize_size, "image_resize_size");
        forward!(self.image_crop_size, "image_crop_size");
        forward!(self.data_path, "data_path", path);
        forward!(self.preprocess_path, "preprocess_path", path);
        forward!(self.checkpoint_path, "checkpoint_path", path);
        forward!(self.model_path, "model_path", path);
        forward!(self.result_path, "result_path", path);
        forward!(self.proj_name, "proj_name");
        forward!(self.description, "description");
        flags
    }
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run every (dataset, model, augmentation) combination as child jobs
    Sweep(SweepArgs),
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug, Default)]
struct SweepArgs {
    /// Datasets to sweep (comma separated); defaults to the configured list
    #[arg(long, value_delimiter = ',')]
    datasets: Vec<DatasetName>,

    /// Models to sweep (comma separated)
    #[arg(long, value_delimiter = ',')]
    models: Vec<ModelType>,

    /// Augmentations to sweep (comma separated)
    #[arg(long, value_delimiter = ',')]
    augmentations: Vec<AugmentationType>,

    /// Program to invoke per job; defaults to this executable
    #[arg(long)]
    program: Option<PathBuf>,

    /// Print the commands without running them
    #[arg(long)]
    dry_run: bool,

    /// Continue after a failed job instead of stopping
    #[arg(long)]
    keep_going: bool,

    /// Where to write the sweep report JSON
    #[arg(long)]
    report: Option<PathBuf>,

    /// Per-job timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create default configuration file
    Init,
    /// Show current configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    // Human-readable layer for stderr (always active)
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = colorcut_core::config::log_dir();
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "colorcut.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    match cli.command {
        Some(Commands::Config { action }) => {
            commands::handle_config(action, &workspace, cli.config.as_deref())
        }
        Some(Commands::Sweep(args)) => {
            commands::handle_sweep(args, &cli.job, &workspace, cli.config.as_deref()).await
        }
        None => commands::handle_job(&cli.job, &workspace, cli.config.as_deref(), cli.quiet).await,
    }
}
