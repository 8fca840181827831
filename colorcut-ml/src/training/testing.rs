//! Evaluation passes and the testing job.

use crate::config::RunContext;
use crate::data::{DataLoader, ImageDataset, SplitKind};
use crate::error::MlError;
use crate::device::{InnerBackend, resolve_device};
use crate::model::ClassificationModel;
use crate::naming::{log_experiment_name, run_experiment_name};
use crate::training::checkpoint::Checkpoint;
use crate::training::loss::ClassificationLoss;
use crate::training::metrics::{ClassificationMetrics, accuracy, macro_f1, predictions};
use crate::training::reproducibility::{EnvironmentSnapshot, SeedManager};
use crate::types::{AugmentationType, DatasetName, ModelType};
use burn::prelude::*;
use chrono::{DateTime, Local, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Outcome of the testing job, persisted next to the other results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub experiment: String,
    pub dataset: DatasetName,
    pub model_type: ModelType,
    pub augmentation: AugmentationType,
    pub metrics: ClassificationMetrics,
    pub num_images: usize,
    pub model_path: PathBuf,
    pub trained_epoch: usize,
    pub created_at: DateTime<Utc>,
    pub environment: EnvironmentSnapshot,
}

/// One pass over `loader` without augmentation. Each metric is the mean of
/// its per-batch values.
pub fn evaluate<B, R>(
    model: &ClassificationModel<B>,
    loader: &DataLoader<'_>,
    loss: &ClassificationLoss<B>,
    device: &B::Device,
    log_freq: usize,
    rng: &mut R,
) -> Result<ClassificationMetrics, MlError>
where
    B: Backend,
    R: Rng + ?Sized,
{
    let batches = loader.epoch_order(rng);
    if batches.is_empty() {
        return Err(MlError::Evaluation("split has no batches".to_string()));
    }
    let total = batches.len();
    let (mut sum_loss, mut sum_acc, mut sum_f1) = (0.0, 0.0, 0.0);
    for (iter, indices) in batches.iter().enumerate() {
        let batch = loader.collate::<B, _>(indices, device, rng)?;
        model.check_input(batch.images.dims())?;
        let logits = model.forward(batch.images);
        let batch_loss = loss
            .forward(logits.clone(), &batch.labels)?
            .into_scalar()
            .elem::<f64>();
        let preds = predictions(logits);
        let batch_acc = accuracy(&batch.labels, &preds);
        let batch_f1 = macro_f1(&batch.labels, &preds);
        sum_loss += batch_loss;
        sum_acc += batch_acc;
        sum_f1 += batch_f1;
        if iter % log_freq.max(1) == 0 || iter == total - 1 {
            tracing::debug!(
                iter,
                total,
                loss = batch_loss,
                acc = batch_acc,
                f1 = batch_f1,
                "Evaluation batch"
            );
        }
    }
    let n = total as f64;
    Ok(ClassificationMetrics {
        loss: sum_loss / n,
        accuracy: sum_acc / n,
        f1_score: sum_f1 / n,
    })
}

pub fn run_testing(ctx: &RunContext) -> Result<TestResult, MlError> {
    let experiment = log_experiment_name(ctx, Local::now().naive_local());
    tracing::info!(experiment = %experiment, run = %run_experiment_name(ctx), "Starting testing");
    let device = resolve_device(&ctx.config.training.device);

    let model_path = ctx.final_model_path();
    let checkpoint = Checkpoint::load(&model_path)?;
    let model_config = &checkpoint.info.model;
    if model_config.model_type != ctx.model_type {
        return Err(MlError::model(format!(
            "{} holds a {} model, expected {}",
            model_path.display(),
            model_config.model_type,
            ctx.model_type
        )));
    }

    let test_ds = ImageDataset::open(&ctx.preprocess_dir(), SplitKind::Test, &ctx.config.data)?;
    if test_ds.num_classes() != model_config.num_classes {
        return Err(MlError::dataset(format!(
            "test split has {} classes, model predicts {}",
            test_ds.num_classes(),
            model_config.num_classes
        )));
    }
    let model = checkpoint.load_model::<InnerBackend>(&model_path, &device)?;
    let loader = DataLoader::for_dataset(&test_ds, ctx.config.training.batch_size)?;
    let loss = ClassificationLoss::new(ctx.config.training.label_smoothing_eps, &device)?;
    let mut rng = SeedManager::new(ctx.config.training.seed).rng("testing");
    let metrics = evaluate(
        &model,
        &loader,
        &loss,
        &device,
        ctx.config.training.log_freq,
        &mut rng,
    )?;

    tracing::info!(
        loss = metrics.loss,
        acc = metrics.accuracy,
        f1 = metrics.f1_score,
        "TEST - Done"
    );

    let result = TestResult {
        experiment,
        dataset: ctx.dataset,
        model_type: ctx.model_type,
        augmentation: ctx.augmentation(),
        metrics,
        num_images: test_ds.len(),
        model_path,
        trained_epoch: checkpoint.info.epoch,
        created_at: Utc::now(),
        environment: EnvironmentSnapshot::capture(),
    };
    let result_path = ctx.test_result_path();
    colorcut_core::persistence::atomic_write_json(&result_path, &result)?;
    tracing::info!(path = %result_path.display(), "Wrote test result");
    Ok(result)
}
