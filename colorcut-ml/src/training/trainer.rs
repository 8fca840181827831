//! The training and resume-training jobs.

use crate::augment::Augmenter;
use crate::config::RunContext;
use crate::data::{DataLoader, ImageBatch, ImageDataset, SplitKind};
use crate::device::{InnerBackend, TrainBackend, resolve_device};
use crate::error::MlError;
use crate::model::ModelConfig;
use crate::naming::{log_experiment_name, run_experiment_name};
use crate::optim::{LrScheduler, ModelOptimizer};
use crate::training::callbacks::{
    CallbackAction, EarlyStoppingCallback, NonFiniteLossCallback, TrainingCallback,
};
use crate::training::checkpoint::{CHECKPOINT_FILE, Checkpoint, CheckpointInfo, model_bytes};
use crate::training::loss::ClassificationLoss;
use crate::training::metrics::{TrainingMetrics, accuracy, macro_f1, predictions};
use crate::training::reproducibility::SeedManager;
use crate::training::testing::evaluate;
use crate::types::{Job, OptimizeObjective};
use burn::module::AutodiffModule;
use burn::optim::GradientsParams;
use burn::prelude::*;
use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub experiment: String,
    pub start_epoch: usize,
    pub epochs_run: usize,
    pub best_epoch: Option<usize>,
    pub best_objective: Option<f64>,
    pub stopped_early: bool,
    pub checkpoint_path: PathBuf,
    pub final_model_path: PathBuf,
    pub metrics: TrainingMetrics,
}

/// Mean per-batch training metrics of one epoch.
struct EpochTotals {
    loss: f64,
    accuracy: f64,
    f1: f64,
}

pub fn run_training(ctx: &RunContext) -> Result<TrainingSummary, MlError> {
    let cfg = &ctx.config.training;
    if !(cfg.learning_rate > 0.0 && cfg.learning_rate.is_finite()) {
        return Err(MlError::invalid_input(format!(
            "learning_rate must be positive, got {}",
            cfg.learning_rate
        )));
    }
    let experiment = log_experiment_name(ctx, Local::now().naive_local());
    tracing::info!(experiment = %experiment, run = %run_experiment_name(ctx), "Starting training");
    let device = resolve_device(&cfg.device);

    let preprocess_dir = ctx.preprocess_dir();
    let train_ds = ImageDataset::open(&preprocess_dir, SplitKind::Train, &ctx.config.data)?;
    let valid_ds = ImageDataset::open(&preprocess_dir, SplitKind::Valid, &ctx.config.data)?;
    let train_loader = DataLoader::for_dataset(&train_ds, cfg.batch_size)?;
    let valid_loader = DataLoader::for_dataset(&valid_ds, cfg.batch_size)?;
    if train_loader.is_empty() {
        return Err(MlError::training(format!(
            "{} training images cannot fill one batch of {}",
            train_ds.len(),
            cfg.batch_size
        )));
    }
    if valid_loader.is_empty() {
        return Err(MlError::training(format!(
            "validation split in {} is empty, rerun preprocessing with a positive valid_ratio",
            preprocess_dir.display()
        )));
    }

    let augmenter = Augmenter::from_config(&ctx.config.augmentation);
    augmenter.validate(ctx.config.data.image_crop_size)?;

    let mut seeds = SeedManager::new(cfg.seed);
    let (channels, image_size, _) = train_ds.sample_shape();
    let model_config = ModelConfig::new(ctx.model_type, train_ds.num_classes(), channels, image_size);
    TrainBackend::seed(&device, seeds.get_seed("model_init"));
    let mut model = model_config.init::<TrainBackend>(&device)?;
    let mut optimizer =
        ModelOptimizer::<TrainBackend>::new(cfg.optimizer, cfg.weight_decay, cfg.clip_grad_norm)?;
    let mut scheduler = LrScheduler::build(
        cfg.scheduler,
        cfg.learning_rate,
        train_loader.len(),
        cfg.num_epochs,
        cfg.early_stopping_patience,
    )?;
    let mut lr = cfg.learning_rate;
    let loss_fn = ClassificationLoss::<TrainBackend>::new(cfg.label_smoothing_eps, &device)?;
    let valid_loss_fn = ClassificationLoss::<InnerBackend>::new(cfg.label_smoothing_eps, &device)?;
    tracing::info!(
        model = %ctx.model_type,
        optimizer = %cfg.optimizer,
        scheduler = %cfg.scheduler,
        augmentation = %augmenter.kind(),
        params = model.num_params(),
        "Built model, optimizer and scheduler"
    );

    let checkpoint_path = ctx.checkpoint_dir().join(CHECKPOINT_FILE);
    let mut start_epoch = 0;
    if ctx.job == Job::ResumeTraining {
        let checkpoint = Checkpoint::load(&checkpoint_path)?;
        if checkpoint.info.model != model_config {
            return Err(MlError::checkpoint(format!(
                "{} holds {:?}, this run builds {:?}",
                checkpoint_path.display(),
                checkpoint.info.model,
                model_config
            )));
        }
        if checkpoint.info.optimizer != cfg.optimizer {
            return Err(MlError::checkpoint(format!(
                "{} was trained with {}, this run uses {}",
                checkpoint_path.display(),
                checkpoint.info.optimizer,
                cfg.optimizer
            )));
        }
        model = checkpoint.load_model(&checkpoint_path, &device)?;
        if let Some(state) = checkpoint.optimizer_bytes(&checkpoint_path)? {
            optimizer = optimizer.load_bytes(state, &device)?;
        }
        scheduler = checkpoint.info.scheduler;
        lr = checkpoint.info.learning_rate;
        start_epoch = checkpoint.info.epoch;
        tracing::info!(path = %checkpoint_path.display(), epoch = start_epoch, "Resumed from checkpoint");
    }
    if start_epoch >= cfg.num_epochs {
        return Err(MlError::training(format!(
            "nothing to train: start epoch {start_epoch} is not below num_epochs {}",
            cfg.num_epochs
        )));
    }

    let mut callbacks: Vec<Box<dyn TrainingCallback>> = vec![
        Box::new(EarlyStoppingCallback::new(cfg.early_stopping_patience)),
        Box::new(NonFiniteLossCallback),
    ];
    let mut metrics = TrainingMetrics::default();
    let mut stopped_early = false;
    let started = Instant::now();

    for epoch in start_epoch..cfg.num_epochs {
        let mut rng = seeds.rng(&format!("epoch_{epoch}"));

        let batches = train_loader.epoch_order(&mut rng);
        let total = batches.len();
        let mut sums = EpochTotals {
            loss: 0.0,
            accuracy: 0.0,
            f1: 0.0,
        };
        for (iter, indices) in batches.iter().enumerate() {
            let batch: ImageBatch<TrainBackend> = train_loader.collate(indices, &device, &mut rng)?;
            let augmented = augmenter.apply(batch.images, &batch.labels, epoch, &mut rng)?;
            model.check_input(augmented.images.dims())?;

            let logits = model.forward(augmented.images);
            let loss = loss_fn.forward_mixed(logits.clone(), &augmented.targets)?;
            let batch_loss = loss.clone().into_scalar().elem::<f64>();
            let preds = predictions(logits);
            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optimizer.step(lr, model, grads);
            if cfg.scheduler.steps_per_iteration() {
                lr = scheduler.on_iteration(lr);
            }

            let batch_acc = accuracy(&batch.labels, &preds);
            let batch_f1 = macro_f1(&batch.labels, &preds);
            sums.loss += batch_loss;
            sums.accuracy += batch_acc;
            sums.f1 += batch_f1;

            if iter % cfg.log_freq.max(1) == 0 || iter == total - 1 {
                tracing::info!(
                    epoch,
                    num_epochs = cfg.num_epochs,
                    iter,
                    total,
                    loss = batch_loss,
                    acc = batch_acc,
                    f1 = batch_f1,
                    lr,
                    "TRAIN"
                );
            }
        }
        let n = total as f64;
        let train = EpochTotals {
            loss: sums.loss / n,
            accuracy: sums.accuracy / n,
            f1: sums.f1 / n,
        };

        let valid = evaluate(
            &model.valid(),
            &valid_loader,
            &valid_loss_fn,
            &device,
            cfg.log_freq,
            &mut rng,
        )?;
        lr = scheduler.on_epoch_end(lr, valid.loss);

        let objective = match cfg.optimize_objective {
            OptimizeObjective::Loss => -valid.loss,
            OptimizeObjective::Accuracy => valid.accuracy,
            OptimizeObjective::F1 => valid.f1_score,
        };
        metrics.record_epoch(epoch, train.loss, valid.loss, objective);
        metrics.add_custom_metric("train_accuracy", train.accuracy);
        metrics.add_custom_metric("train_f1", train.f1);
        metrics.add_custom_metric("valid_accuracy", valid.accuracy);
        metrics.add_custom_metric("valid_f1", valid.f1_score);
        metrics.add_custom_metric("learning_rate", lr);
        metrics.add_custom_metric("objective", objective);
        tracing::info!(
            epoch,
            loss = valid.loss,
            acc = valid.accuracy,
            f1 = valid.f1_score,
            objective,
            "VALID"
        );

        let actions: Vec<CallbackAction> = callbacks
            .iter_mut()
            .map(|cb| cb.on_epoch_end(epoch, &metrics))
            .collect();

        if actions.contains(&CallbackAction::Checkpoint) {
            let info = CheckpointInfo {
                epoch,
                model: model_config.clone(),
                optimizer: optimizer.kind(),
                learning_rate: lr,
                scheduler: scheduler.clone(),
                optimize_objective: cfg.optimize_objective,
                objective,
                augmentation: augmenter.kind(),
                created_at: Utc::now(),
            };
            let weights = model_bytes(model.clone())?;
            let state = optimizer.to_bytes()?;
            Checkpoint::save(info, &weights, Some(&state), &checkpoint_path)?;
            tracing::info!(
                epoch,
                objective = %cfg.optimize_objective,
                value = objective.abs(),
                "VALID - Best valid so far"
            );
        }
        if actions.contains(&CallbackAction::Stop) {
            tracing::info!(epoch, "Early stopping");
            stopped_early = true;
            break;
        }
    }
    metrics.total_training_time_secs = started.elapsed().as_secs_f64();

    if metrics.best_epoch.is_none() || !checkpoint_path.exists() {
        return Err(MlError::training(
            "training finished without a checkpoint to promote",
        ));
    }
    let final_model_path = ctx.final_model_path();
    Checkpoint::promote(&checkpoint_path, &final_model_path)?;
    tracing::info!(
        best_epoch = ?metrics.best_epoch,
        objective = %cfg.optimize_objective,
        path = %final_model_path.display(),
        "Done! Saved final model"
    );

    Ok(TrainingSummary {
        experiment,
        start_epoch,
        epochs_run: metrics.epochs_completed,
        best_epoch: metrics.best_epoch,
        best_objective: metrics.best_objective,
        stopped_early,
        checkpoint_path,
        final_model_path,
        metrics,
    })
}
