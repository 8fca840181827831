//! Best-epoch checkpoints and final models.
//!
//! A checkpoint is a JSON metadata file plus binary `burn` records stored
//! next to it: `checkpoint.json` refers to `checkpoint.model.bin` and, while
//! training, `checkpoint.optim.bin`. Each record's SHA-256 is kept in the
//! metadata and checked before the record is decoded.

use crate::error::MlError;
use crate::model::{ClassificationModel, ModelConfig};
use crate::optim::LrScheduler;
use crate::types::{AugmentationType, OptimizeObjective, OptimizerType};
use burn::prelude::*;
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

pub const CHECKPOINT_FILE: &str = "checkpoint.json";

type WeightsRecorder = BinBytesRecorder<FullPrecisionSettings>;

/// Training state recorded alongside the weights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointInfo {
    pub epoch: usize,
    pub model: ModelConfig,
    pub optimizer: OptimizerType,
    /// Learning rate in effect after `epoch`.
    pub learning_rate: f64,
    pub scheduler: LrScheduler,
    pub optimize_objective: OptimizeObjective,
    pub objective: f64,
    pub augmentation: AugmentationType,
    pub created_at: DateTime<Utc>,
}

/// A binary record stored next to the metadata file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub file: String,
    pub hash: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(flatten)]
    pub info: CheckpointInfo,
    pub weights: StoredRecord,
    #[serde(default)]
    pub optimizer_state: Option<StoredRecord>,
}

/// Where a checkpoint's metadata landed and what its bytes hash to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub path: PathBuf,
    pub hash: String,
    pub size_bytes: u64,
}

/// Encode a model's parameters and buffers.
pub fn model_bytes<B: Backend>(model: ClassificationModel<B>) -> Result<Vec<u8>, MlError> {
    <WeightsRecorder as Recorder<B>>::record(&WeightsRecorder::default(), model.into_record(), ())
        .map_err(|e| MlError::checkpoint(format!("cannot encode model weights: {e}")))
}

impl Checkpoint {
    /// Write the records, then the metadata that points at them, to `path`.
    pub fn save(
        info: CheckpointInfo,
        weights: &[u8],
        optimizer_state: Option<&[u8]>,
        path: &Path,
    ) -> Result<CheckpointRecord, MlError> {
        let weights = store_record(path, "model", weights)?;
        let optimizer_state = match optimizer_state {
            Some(bytes) => Some(store_record(path, "optim", bytes)?),
            None => None,
        };
        let checkpoint = Self {
            info,
            weights,
            optimizer_state,
        };
        let bytes = serde_json::to_vec(&checkpoint)?;
        colorcut_core::persistence::atomic_write(path, &bytes)?;
        let record = CheckpointRecord {
            path: path.to_path_buf(),
            hash: content_hash(&bytes),
            size_bytes: bytes.len() as u64,
        };
        tracing::info!(
            epoch = checkpoint.info.epoch,
            objective = checkpoint.info.objective,
            path = %path.display(),
            hash = %record.hash,
            "Saved checkpoint"
        );
        Ok(record)
    }

    /// Read the metadata at `path`. Records are loaded on demand.
    pub fn load(path: &Path) -> Result<Self, MlError> {
        if !path.exists() {
            return Err(MlError::not_found(format!("checkpoint {}", path.display())));
        }
        let bytes = std::fs::read(path)?;
        serde_json::from_slice(&bytes).map_err(|e| {
            MlError::checkpoint(format!("cannot decode {}: {e}", path.display()))
        })
    }

    /// Rebuild the model described by the metadata and load its weights.
    pub fn load_model<B: Backend>(
        &self,
        path: &Path,
        device: &B::Device,
    ) -> Result<ClassificationModel<B>, MlError> {
        let bytes = read_record(path, &self.weights)?;
        let model = self.info.model.init::<B>(device)?;
        let record = <WeightsRecorder as Recorder<B>>::load(&WeightsRecorder::default(), bytes, device)
            .map_err(|e| MlError::checkpoint(format!("cannot decode model weights: {e}")))?;
        Ok(model.load_record(record))
    }

    /// Verified optimizer state bytes, if the checkpoint carries any.
    pub fn optimizer_bytes(&self, path: &Path) -> Result<Option<Vec<u8>>, MlError> {
        self.optimizer_state
            .as_ref()
            .map(|stored| read_record(path, stored))
            .transpose()
    }

    /// Copy the checkpoint at `from` to `to` as a final model: metadata and
    /// weights only.
    pub fn promote(from: &Path, to: &Path) -> Result<CheckpointRecord, MlError> {
        let checkpoint = Self::load(from)?;
        let weights = read_record(from, &checkpoint.weights)?;
        Self::save(checkpoint.info, &weights, None, to)
    }
}

/// `checkpoint.json` + `model` -> `checkpoint.model.bin`
fn record_path(path: &Path, kind: &str) -> PathBuf {
    path.with_extension(format!("{kind}.bin"))
}

fn store_record(path: &Path, kind: &str, bytes: &[u8]) -> Result<StoredRecord, MlError> {
    let target = record_path(path, kind);
    colorcut_core::persistence::atomic_write(&target, bytes)?;
    let file = target
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| MlError::checkpoint(format!("no file name in {}", target.display())))?;
    Ok(StoredRecord {
        file,
        hash: content_hash(bytes),
        size_bytes: bytes.len() as u64,
    })
}

fn read_record(path: &Path, stored: &StoredRecord) -> Result<Vec<u8>, MlError> {
    let target = path.with_file_name(&stored.file);
    if !target.exists() {
        return Err(MlError::not_found(format!("checkpoint record {}", target.display())));
    }
    let bytes = std::fs::read(&target)?;
    let hash = content_hash(&bytes);
    if hash != stored.hash {
        return Err(MlError::checkpoint(format!(
            "{} hashes to {hash}, metadata expects {}",
            target.display(),
            stored.hash
        )));
    }
    Ok(bytes)
}

/// Hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::InnerBackend;
    use crate::types::ModelType;
    use tempfile::TempDir;

    fn config() -> ModelConfig {
        ModelConfig::new(ModelType::EfficientnetB0, 2, 3, 8).with_width(4)
    }

    fn info() -> CheckpointInfo {
        CheckpointInfo {
            epoch: 3,
            model: config(),
            optimizer: OptimizerType::Sgd,
            learning_rate: 0.1,
            scheduler: LrScheduler::Constant,
            optimize_objective: OptimizeObjective::Accuracy,
            objective: 0.75,
            augmentation: AugmentationType::ColorCutoutCurriculum,
            created_at: Utc::now(),
        }
    }

    fn model() -> ClassificationModel<InnerBackend> {
        let _seeded = crate::device::SEED_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        config().init(&Default::default()).unwrap()
    }

    fn restore(checkpoint: &Checkpoint, path: &Path) -> Result<ClassificationModel<InnerBackend>, MlError> {
        let _seeded = crate::device::SEED_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        checkpoint.load_model::<InnerBackend>(path, &Default::default())
    }

    fn logits(model: &ClassificationModel<InnerBackend>) -> Vec<f32> {
        let images = Tensor::<InnerBackend, 4>::ones([1, 3, 8, 8], &Default::default());
        model.forward(images).into_data().iter::<f32>().collect()
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join(CHECKPOINT_FILE);
        let model = model();
        let expected = logits(&model);
        let weights = model_bytes(model).unwrap();

        let record = Checkpoint::save(info(), &weights, Some(b"state"), &path).unwrap();
        assert_eq!(record.hash, content_hash(&std::fs::read(&path).unwrap()));
        assert_eq!(record.size_bytes, std::fs::metadata(&path).unwrap().len());
        assert!(dir.path().join("nested").join("checkpoint.model.bin").exists());

        let loaded = Checkpoint::load(&path).unwrap();
        assert_eq!(loaded.info, info_without_time(&loaded.info));
        assert_eq!(loaded.optimizer_bytes(&path).unwrap(), Some(b"state".to_vec()));
        let restored = restore(&loaded, &path).unwrap();
        assert_eq!(logits(&restored), expected);
    }

    fn info_without_time(loaded: &CheckpointInfo) -> CheckpointInfo {
        CheckpointInfo {
            created_at: loaded.created_at,
            ..info()
        }
    }

    #[test]
    fn test_tampered_weights_are_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CHECKPOINT_FILE);
        Checkpoint::save(info(), &model_bytes(model()).unwrap(), None, &path).unwrap();
        std::fs::write(dir.path().join("checkpoint.model.bin"), b"garbage").unwrap();

        let loaded = Checkpoint::load(&path).unwrap();
        let err = restore(&loaded, &path).unwrap_err();
        assert!(matches!(err, MlError::Checkpoint(_)));
        assert_eq!(loaded.optimizer_bytes(&path).unwrap(), None);
    }

    #[test]
    fn test_promote_drops_optimizer_state() {
        let dir = TempDir::new().unwrap();
        let from = dir.path().join("ckpt").join(CHECKPOINT_FILE);
        let to = dir.path().join("models").join("final_model_cutout.json");
        let model = model();
        let expected = logits(&model);
        Checkpoint::save(info(), &model_bytes(model).unwrap(), Some(b"state"), &from).unwrap();

        Checkpoint::promote(&from, &to).unwrap();
        assert!(dir.path().join("models").join("final_model_cutout.model.bin").exists());
        let final_model = Checkpoint::load(&to).unwrap();
        assert_eq!(final_model.info.epoch, 3);
        assert!(final_model.optimizer_state.is_none());
        let restored = restore(&final_model, &to).unwrap();
        assert_eq!(logits(&restored), expected);
    }

    #[test]
    fn test_load_missing_and_corrupt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CHECKPOINT_FILE);
        assert!(matches!(Checkpoint::load(&path).unwrap_err(), MlError::NotFound(_)));
        std::fs::write(&path, b"{not json").unwrap();
        assert!(matches!(Checkpoint::load(&path).unwrap_err(), MlError::Checkpoint(_)));
    }
}
