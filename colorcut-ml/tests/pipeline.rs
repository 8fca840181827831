//! End-to-end runs of the preprocessing, training, testing and resume jobs
//! over a tiny synthetic CIFAR-10 distribution.

use colorcut_ml::data::{ProcessedSplit, SplitKind};
use colorcut_ml::training::{TestResult, TrainingSummary};
use colorcut_ml::{
    AugmentationType, DatasetName, Job, JobOutcome, MlConfig, MlError, ModelType, RunContext,
    run_job,
};
use pretty_assertions::assert_eq;
use std::path::Path;
use tempfile::TempDir;

const RECORD_PIXELS: usize = 3 * 32 * 32;

/// One CIFAR-10 record whose colour depends on its class.
fn record(label: u8) -> Vec<u8> {
    let mut rec = Vec::with_capacity(1 + RECORD_PIXELS);
    rec.push(label);
    for channel in 0..3u8 {
        let value = label.wrapping_mul(25).wrapping_add(channel * 60);
        rec.extend(std::iter::repeat_n(value, 32 * 32));
    }
    rec
}

fn write_raw_cifar10(dir: &Path) {
    std::fs::create_dir_all(dir).unwrap();
    for batch in 1..=5u8 {
        let bytes: Vec<u8> = (0..4u8).flat_map(|i| record((batch + i) % 3)).collect();
        std::fs::write(dir.join(format!("data_batch_{batch}.bin")), bytes).unwrap();
    }
    let test: Vec<u8> = (0..4u8).flat_map(|i| record(i % 3)).collect();
    std::fs::write(dir.join("test_batch.bin"), test).unwrap();
}

fn config(root: &Path) -> MlConfig {
    let mut config = MlConfig::default();
    config.paths.data_path = root.join("dataset");
    config.paths.preprocess_path = root.join("preprocessed");
    config.paths.checkpoint_path = root.join("checkpoints");
    config.paths.model_path = root.join("models");
    config.paths.result_path = root.join("results");
    config.training.batch_size = 4;
    config.training.num_epochs = 2;
    config.training.device = "cpu".to_string();
    config.training.log_freq = 1;
    config.augmentation.augmentation_type = AugmentationType::ColorCutoutCurriculum;
    config.augmentation.box_size = 16;
    config
}

fn context(job: Job, config: &MlConfig) -> RunContext {
    RunContext::new(job, DatasetName::Cifar10, ModelType::Resnet50, config.clone())
}

fn setup() -> (TempDir, MlConfig) {
    let tmp = TempDir::new().unwrap();
    let config = config(tmp.path());
    write_raw_cifar10(&config.paths.data_path.join("cifar10"));
    (tmp, config)
}

fn train(ctx: &RunContext) -> TrainingSummary {
    match run_job(ctx).unwrap() {
        JobOutcome::Training(summary) => summary,
        other => panic!("expected a training outcome, got {other:?}"),
    }
}

#[test]
fn test_full_pipeline() {
    let (_tmp, mut config) = setup();

    let JobOutcome::Preprocessing(pre) = run_job(&context(Job::Preprocessing, &config)).unwrap()
    else {
        panic!("expected a preprocessing outcome");
    };
    assert_eq!((pre.train, pre.valid, pre.test), (18, 2, 4));
    assert!(pre.output_dir.join("train_processed.bin").exists());

    let ctx = context(Job::Training, &config);
    let summary = train(&ctx);
    assert_eq!(summary.start_epoch, 0);
    assert!(summary.epochs_run >= 1 && summary.epochs_run <= 2);
    assert!(summary.best_epoch.is_some());
    assert!(summary.checkpoint_path.exists());
    assert_eq!(summary.final_model_path, ctx.final_model_path());
    assert!(ctx.final_model_path().exists());

    let test_ctx = context(Job::Testing, &config);
    let JobOutcome::Testing(result) = run_job(&test_ctx).unwrap() else {
        panic!("expected a testing outcome");
    };
    assert_eq!(result.num_images, 4);
    assert!((0.0..=1.0).contains(&result.metrics.accuracy));
    assert!(result.metrics.loss.is_finite());
    let saved: TestResult =
        serde_json::from_slice(&std::fs::read(test_ctx.test_result_path()).unwrap()).unwrap();
    assert_eq!(saved.augmentation, AugmentationType::ColorCutoutCurriculum);

    config.training.num_epochs = 4;
    let resumed = train(&context(Job::ResumeTraining, &config));
    assert_eq!(Some(resumed.start_epoch), summary.best_epoch);
    assert!(resumed.epochs_run >= 1);
}

#[test]
fn test_every_augmentation_trains_one_epoch() {
    let (_tmp, mut config) = setup();
    run_job(&context(Job::Preprocessing, &config)).unwrap();
    config.training.num_epochs = 1;
    for aug in AugmentationType::ALL {
        config.augmentation.augmentation_type = *aug;
        let ctx = context(Job::Training, &config);
        let summary = train(&ctx);
        assert_eq!(summary.epochs_run, 1, "{aug}");
        assert!(ctx.final_model_path().exists(), "{aug}");
    }
}

#[test]
fn test_zero_epochs_is_a_training_error() {
    let (_tmp, mut config) = setup();
    run_job(&context(Job::Preprocessing, &config)).unwrap();
    config.training.num_epochs = 0;
    let err = run_job(&context(Job::Training, &config)).unwrap_err();
    assert!(matches!(err, MlError::Training(_)), "{err}");
}

#[test]
fn test_empty_validation_split_fails_before_training() {
    let (_tmp, config) = setup();
    run_job(&context(Job::Preprocessing, &config)).unwrap();
    let ctx = context(Job::Training, &config);
    let valid_path = ctx.preprocess_dir().join(SplitKind::Valid.file_name());
    let mut valid = ProcessedSplit::read(&valid_path).unwrap();
    valid.labels.clear();
    valid.pixels.clear();
    valid.header.count = 0;
    valid.write(&valid_path).unwrap();

    let err = run_job(&ctx).unwrap_err();
    assert!(matches!(err, MlError::Training(_)), "{err}");
    assert!(err.to_string().contains("validation split"), "{err}");
    assert!(!ctx.checkpoint_dir().exists());
}

#[test]
fn test_training_without_preprocessing_is_not_found() {
    let (_tmp, config) = setup();
    let err = run_job(&context(Job::Training, &config)).unwrap_err();
    assert!(matches!(err, MlError::NotFound(_)), "{err}");
}

#[test]
fn test_testing_without_final_model_is_not_found() {
    let (_tmp, config) = setup();
    run_job(&context(Job::Preprocessing, &config)).unwrap();
    let err = run_job(&context(Job::Testing, &config)).unwrap_err();
    assert!(matches!(err, MlError::NotFound(_)), "{err}");
}

#[test]
fn test_resume_without_checkpoint_is_not_found() {
    let (_tmp, config) = setup();
    run_job(&context(Job::Preprocessing, &config)).unwrap();
    let err = run_job(&context(Job::ResumeTraining, &config)).unwrap_err();
    assert!(matches!(err, MlError::NotFound(_)), "{err}");
}

#[test]
fn test_oversized_box_is_rejected_before_training() {
    let (_tmp, mut config) = setup();
    run_job(&context(Job::Preprocessing, &config)).unwrap();
    config.augmentation.augmentation_type = AugmentationType::Cutout;
    config.augmentation.box_size = 64;
    let err = run_job(&context(Job::Training, &config)).unwrap_err();
    assert!(matches!(err, MlError::Augmentation(_)), "{err}");
}
