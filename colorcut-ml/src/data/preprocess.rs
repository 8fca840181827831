//! The preprocessing job: read the raw distribution, carve a validation
//! split out of the training images and write the three processed splits.

use crate::config::RunContext;
use crate::data::processed::{ProcessedSplit, SplitKind};
use crate::data::raw::{RawSplit, load_raw_split};
use crate::error::MlError;
use crate::training::reproducibility::SeedManager;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessSummary {
    pub output_dir: PathBuf,
    pub train: usize,
    pub valid: usize,
    pub test: usize,
}

/// Number of validation images taken from `total` training images. At
/// least one image goes to each side of the split.
pub fn valid_count(total: usize, ratio: f64) -> Result<usize, MlError> {
    if !(ratio > 0.0 && ratio < 1.0) {
        return Err(MlError::invalid_input(format!(
            "valid_ratio must be in (0, 1), got {ratio}"
        )));
    }
    if total < 2 {
        return Err(MlError::dataset(format!(
            "need at least 2 training images to split, found {total}"
        )));
    }
    let n = ((total as f64) * ratio).round() as usize;
    Ok(n.clamp(1, total - 1))
}

pub fn run_preprocessing(ctx: &RunContext) -> Result<PreprocessSummary, MlError> {
    let raw_dir = ctx.raw_data_dir();
    let dataset = ctx.dataset;
    tracing::info!(dataset = %dataset, dir = %raw_dir.display(), "Preprocessing raw dataset");

    let train_raw = load_raw_split(&raw_dir, dataset, RawSplit::Train)?;
    let test_raw = load_raw_split(&raw_dir, dataset, RawSplit::Test)?;

    let n_valid = valid_count(train_raw.len(), ctx.config.data.valid_ratio)?;
    let mut order: Vec<usize> = (0..train_raw.len()).collect();
    let mut seeds = SeedManager::new(ctx.config.training.seed);
    order.shuffle(&mut seeds.rng("valid_split"));
    let (valid_idx, train_idx) = order.split_at(n_valid);

    let num_classes = dataset.num_classes();
    let test_idx: Vec<usize> = (0..test_raw.len()).collect();
    let splits = [
        (SplitKind::Train, ProcessedSplit::from_raw(&train_raw, train_idx, num_classes)),
        (SplitKind::Valid, ProcessedSplit::from_raw(&train_raw, valid_idx, num_classes)),
        (SplitKind::Test, ProcessedSplit::from_raw(&test_raw, &test_idx, num_classes)),
    ];

    let output_dir = ctx.preprocess_dir();
    for (kind, split) in &splits {
        let path = output_dir.join(kind.file_name());
        split.write(&path)?;
        tracing::info!(split = kind.as_str(), images = split.len(), path = %path.display(), "Wrote processed split");
    }

    Ok(PreprocessSummary {
        output_dir,
        train: train_idx.len(),
        valid: valid_idx.len(),
        test: test_idx.len(),
    })
}
