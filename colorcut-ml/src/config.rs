//! Configuration types for the colorcut-ml crate.
//!
//! `MlConfig` is the document loaded through `colorcut_core::config::load_config`;
//! CLI flags are layered on top by the binary. `RunContext` pins one
//! invocation's task/job/dataset/model on top of that configuration.

use crate::types::{
    AugmentationType, DatasetName, Job, ModelType, OptimizeObjective, OptimizerType,
    SchedulerType, Task,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level ML configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MlConfig {
    /// Artifact locations.
    #[serde(default)]
    pub paths: PathsConfig,
    /// Experiment labels used in log names.
    #[serde(default)]
    pub project: ProjectConfig,
    /// Image preprocessing and transforms.
    #[serde(default)]
    pub data: DataConfig,
    /// Optimisation hyperparameters.
    #[serde(default)]
    pub training: TrainingConfig,
    /// Augmentation strategy and its parameters.
    #[serde(default)]
    pub augmentation: AugmentationConfig,
    /// Experiment sweep.
    #[serde(default)]
    pub sweep: SweepConfig,
}

/// Artifact locations. Every job nests below `<root>/<task>/<dataset>/<model>/`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Raw dataset files read by the preprocessing job.
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,
    #[serde(default = "default_preprocess_path")]
    pub preprocess_path: PathBuf,
    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: PathBuf,
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,
    #[serde(default = "default_result_path")]
    pub result_path: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_path: default_data_path(),
            preprocess_path: default_preprocess_path(),
            checkpoint_path: default_checkpoint_path(),
            model_path: default_model_path(),
            result_path: default_result_path(),
        }
    }
}

fn default_data_path() -> PathBuf {
    PathBuf::from("dataset")
}

fn default_preprocess_path() -> PathBuf {
    PathBuf::from("preprocessed")
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("checkpoints")
}

fn default_model_path() -> PathBuf {
    PathBuf::from("models")
}

fn default_result_path() -> PathBuf {
    PathBuf::from("results")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default = "default_proj_name")]
    pub proj_name: String,
    #[serde(default)]
    pub description: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            proj_name: default_proj_name(),
            description: String::new(),
        }
    }
}

fn default_proj_name() -> String {
    "ColorfulCutout".to_string()
}

/// Image preprocessing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    /// Side length images are resized to before cropping.
    #[serde(default = "default_resize")]
    pub image_resize_size: usize,
    /// Side length of the crop fed to the model.
    #[serde(default = "default_crop")]
    pub image_crop_size: usize,
    /// Fraction of the raw training set held out for validation.
    #[serde(default = "default_valid_ratio")]
    pub valid_ratio: f64,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            image_resize_size: default_resize(),
            image_crop_size: default_crop(),
            valid_ratio: default_valid_ratio(),
        }
    }
}

fn default_resize() -> usize {
    36
}

fn default_crop() -> usize {
    32
}

fn default_valid_ratio() -> f64 {
    0.1
}

/// Optimisation hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_num_epochs")]
    pub num_epochs: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default)]
    pub weight_decay: f64,
    #[serde(default)]
    pub optimizer: OptimizerType,
    #[serde(default)]
    pub scheduler: SchedulerType,
    #[serde(default = "default_patience")]
    pub early_stopping_patience: usize,
    /// Global gradient-norm clip; 0 disables clipping.
    #[serde(default)]
    pub clip_grad_norm: f64,
    #[serde(default = "default_label_smoothing")]
    pub label_smoothing_eps: f64,
    #[serde(default)]
    pub optimize_objective: OptimizeObjective,
    /// Log every `log_freq` iterations (and always on the last one).
    #[serde(default = "default_log_freq")]
    pub log_freq: usize,
    /// Requested device string, e.g. `cuda:0`, `mps`, `cpu`.
    #[serde(default = "default_device")]
    pub device: String,
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            num_epochs: default_num_epochs(),
            learning_rate: default_learning_rate(),
            weight_decay: 0.0,
            optimizer: OptimizerType::default(),
            scheduler: SchedulerType::default(),
            early_stopping_patience: default_patience(),
            clip_grad_norm: 0.0,
            label_smoothing_eps: default_label_smoothing(),
            optimize_objective: OptimizeObjective::default(),
            log_freq: default_log_freq(),
            device: default_device(),
            seed: default_seed(),
        }
    }
}

fn default_batch_size() -> usize {
    32
}

fn default_num_epochs() -> usize {
    10
}

fn default_learning_rate() -> f64 {
    1e-3
}

fn default_patience() -> usize {
    5
}

fn default_label_smoothing() -> f64 {
    0.05
}

fn default_log_freq() -> usize {
    500
}

fn default_device() -> String {
    "cuda".to_string()
}

fn default_seed() -> u64 {
    2023
}

/// Augmentation configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugmentationConfig {
    #[serde(default)]
    pub augmentation_type: AugmentationType,
    /// Side length of the cutout box, in pixels of the cropped image.
    #[serde(default = "default_box_size")]
    pub box_size: usize,
    /// Beta(alpha, alpha) parameter for mixup.
    #[serde(default = "default_mixup_alpha")]
    pub mixup_alpha: f64,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            augmentation_type: AugmentationType::default(),
            box_size: default_box_size(),
            mixup_alpha: default_mixup_alpha(),
        }
    }
}

fn default_box_size() -> usize {
    16
}

fn default_mixup_alpha() -> f64 {
    1.0
}

/// Sweep configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Program invoked for every job; defaults to the running executable.
    #[serde(default)]
    pub program: Option<PathBuf>,
    /// Arguments placed before the job flags (e.g. a script path).
    #[serde(default)]
    pub program_args: Vec<String>,
    #[serde(default = "default_sweep_datasets")]
    pub datasets: Vec<DatasetName>,
    #[serde(default = "default_sweep_models")]
    pub models: Vec<ModelType>,
    #[serde(default = "default_sweep_augmentations")]
    pub augmentations: Vec<AugmentationType>,
    /// Per-invocation timeout in seconds.
    #[serde(default = "default_sweep_timeout")]
    pub timeout_secs: u64,
    /// Continue with the next invocation after a failure.
    #[serde(default)]
    pub keep_going: bool,
    /// Where the sweep report is written; defaults under `result_path`.
    #[serde(default)]
    pub report_path: Option<PathBuf>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            program: None,
            program_args: Vec::new(),
            datasets: default_sweep_datasets(),
            models: default_sweep_models(),
            augmentations: default_sweep_augmentations(),
            timeout_secs: default_sweep_timeout(),
            keep_going: false,
            report_path: None,
        }
    }
}

fn default_sweep_datasets() -> Vec<DatasetName> {
    DatasetName::ALL.to_vec()
}

fn default_sweep_models() -> Vec<ModelType> {
    ModelType::ALL.to_vec()
}

fn default_sweep_augmentations() -> Vec<AugmentationType> {
    AugmentationType::ALL.to_vec()
}

fn default_sweep_timeout() -> u64 {
    7 * 24 * 3600
}

/// One invocation's identity plus the resolved configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub task: Task,
    pub job: Job,
    pub dataset: DatasetName,
    pub model_type: ModelType,
    pub config: MlConfig,
}

impl RunContext {
    pub fn new(job: Job, dataset: DatasetName, model_type: ModelType, config: MlConfig) -> Self {
        Self {
            task: Task::Classification,
            job,
            dataset,
            model_type,
            config,
        }
    }

    pub fn augmentation(&self) -> AugmentationType {
        self.config.augmentation.augmentation_type
    }

    fn nested(&self, root: &std::path::Path) -> PathBuf {
        root.join(self.task.as_str())
            .join(self.dataset.as_str())
            .join(self.model_type.as_str())
    }

    /// Directory holding the processed splits.
    pub fn preprocess_dir(&self) -> PathBuf {
        self.nested(&self.config.paths.preprocess_path)
    }

    /// Directory holding the rolling best checkpoint.
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.nested(&self.config.paths.checkpoint_path)
    }

    /// Directory holding the final models, one per augmentation type.
    pub fn model_dir(&self) -> PathBuf {
        self.nested(&self.config.paths.model_path)
    }

    pub fn result_dir(&self) -> PathBuf {
        self.nested(&self.config.paths.result_path)
    }

    /// Raw dataset directory read by preprocessing.
    pub fn raw_data_dir(&self) -> PathBuf {
        self.config.paths.data_path.join(self.dataset.as_str())
    }

    pub fn final_model_path(&self) -> PathBuf {
        self.model_dir()
            .join(format!("final_model_{}.json", self.augmentation()))
    }

    pub fn test_result_path(&self) -> PathBuf {
        self.result_dir()
            .join(format!("test_result_{}.json", self.augmentation()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ml_config() {
        let config = MlConfig::default();
        assert_eq!(config.training.batch_size, 32);
        assert_eq!(config.training.device, "cuda");
        assert_eq!(config.augmentation.box_size, 16);
        assert_eq!(config.sweep.datasets.len(), 3);
        assert_eq!(config.sweep.augmentations.len(), 6);
        assert!(!config.sweep.keep_going);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let parsed: MlConfig = serde_json::from_str(
            r#"{"training": {"batch_size": 8, "optimizer": "SGD"}, "augmentation": {"augmentation_type": "cutmix"}}"#,
        )
        .unwrap();
        assert_eq!(parsed.training.batch_size, 8);
        assert_eq!(parsed.training.optimizer, OptimizerType::Sgd);
        assert_eq!(parsed.training.num_epochs, 10);
        assert_eq!(
            parsed.augmentation.augmentation_type,
            AugmentationType::Cutmix
        );
        assert_eq!(parsed.paths, PathsConfig::default());
    }

    #[test]
    fn test_run_context_paths() {
        let mut config = MlConfig::default();
        config.paths.model_path = PathBuf::from("/tmp/models");
        config.augmentation.augmentation_type = AugmentationType::ColorCutoutCurriculum;
        let ctx = RunContext::new(
            Job::Training,
            DatasetName::Cifar100,
            ModelType::VitB16,
            config,
        );
        assert_eq!(
            ctx.final_model_path(),
            PathBuf::from("/tmp/models/classification/cifar100/vit_b_16/final_model_color_cutout_cur.json")
        );
        assert_eq!(
            ctx.preprocess_dir(),
            PathBuf::from("preprocessed/classification/cifar100/vit_b_16")
        );
        assert_eq!(ctx.raw_data_dir(), PathBuf::from("dataset/cifar100"));
    }
}
