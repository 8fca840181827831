//! Readers for the raw binary dataset distributions.
//!
//! - CIFAR-10: `<1 label byte><3072 pixel bytes>` per record,
//!   `data_batch_{1..5}.bin` / `test_batch.bin`.
//! - CIFAR-100: `<1 coarse byte><1 fine byte><3072 pixel bytes>`,
//!   `train.bin` / `test.bin`; the fine label is kept.
//! - Tiny-ImageNet export: `<u16 LE label><12288 pixel bytes>`,
//!   `train.bin` / `val.bin`.
//!
//! Pixels are channel-planar RGB in every format.

use crate::error::MlError;
use crate::types::DatasetName;
use std::path::Path;

/// Which half of the raw distribution to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawSplit {
    Train,
    Test,
}

/// Decoded raw images, all sharing one shape.
#[derive(Debug, Clone, PartialEq)]
pub struct RawImageSet {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub labels: Vec<u16>,
    pub pixels: Vec<u8>,
}

impl RawImageSet {
    pub fn empty(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
            labels: Vec::new(),
            pixels: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn image_len(&self) -> usize {
        self.channels * self.height * self.width
    }

    pub fn image(&self, i: usize) -> &[u8] {
        let len = self.image_len();
        &self.pixels[i * len..(i + 1) * len]
    }

    fn append(&mut self, other: RawImageSet) {
        self.labels.extend(other.labels);
        self.pixels.extend(other.pixels);
    }
}

struct RecordLayout {
    header_len: usize,
    label_offset: usize,
    wide_label: bool,
}

fn layout(dataset: DatasetName) -> RecordLayout {
    match dataset {
        DatasetName::Cifar10 => RecordLayout {
            header_len: 1,
            label_offset: 0,
            wide_label: false,
        },
        DatasetName::Cifar100 => RecordLayout {
            header_len: 2,
            label_offset: 1,
            wide_label: false,
        },
        DatasetName::TinyImagenet => RecordLayout {
            header_len: 2,
            label_offset: 0,
            wide_label: true,
        },
    }
}

/// File names making up one split, in read order.
pub fn raw_files(dataset: DatasetName, split: RawSplit) -> Vec<String> {
    match (dataset, split) {
        (DatasetName::Cifar10, RawSplit::Train) => {
            (1..=5).map(|i| format!("data_batch_{i}.bin")).collect()
        }
        (DatasetName::Cifar10, RawSplit::Test) => vec!["test_batch.bin".to_string()],
        (DatasetName::Cifar100 | DatasetName::TinyImagenet, RawSplit::Train) => {
            vec!["train.bin".to_string()]
        }
        (DatasetName::Cifar100, RawSplit::Test) => vec!["test.bin".to_string()],
        (DatasetName::TinyImagenet, RawSplit::Test) => vec!["val.bin".to_string()],
    }
}

/// Decode a whole file's worth of records.
pub fn parse_records(bytes: &[u8], dataset: DatasetName) -> Result<RawImageSet, MlError> {
    let side = dataset.image_size();
    let channels = dataset.channels();
    let layout = layout(dataset);
    let pixel_len = channels * side * side;
    let record_len = layout.header_len + pixel_len;

    if bytes.len() % record_len != 0 {
        return Err(MlError::dataset(format!(
            "{dataset}: {} bytes is not a whole number of {record_len}-byte records",
            bytes.len()
        )));
    }

    let count = bytes.len() / record_len;
    let mut set = RawImageSet::empty(channels, side, side);
    set.labels.reserve(count);
    set.pixels.reserve(count * pixel_len);

    for (i, record) in bytes.chunks_exact(record_len).enumerate() {
        let label = if layout.wide_label {
            u16::from_le_bytes([record[0], record[1]])
        } else {
            u16::from(record[layout.label_offset])
        };
        if usize::from(label) >= dataset.num_classes() {
            return Err(MlError::dataset(format!(
                "{dataset}: record {i} has label {label}, dataset has {} classes",
                dataset.num_classes()
            )));
        }
        set.labels.push(label);
        set.pixels.extend_from_slice(&record[layout.header_len..]);
    }
    Ok(set)
}

/// Read every file of a split from `dir`.
pub fn load_raw_split(dir: &Path, dataset: DatasetName, split: RawSplit) -> Result<RawImageSet, MlError> {
    let side = dataset.image_size();
    let mut set = RawImageSet::empty(dataset.channels(), side, side);
    for name in raw_files(dataset, split) {
        let path = dir.join(&name);
        if !path.exists() {
            return Err(MlError::not_found(format!(
                "raw {dataset} file {}",
                path.display()
            )));
        }
        let bytes = std::fs::read(&path)?;
        let part = parse_records(&bytes, dataset)?;
        tracing::debug!(file = %path.display(), records = part.len(), "Read raw records");
        set.append(part);
    }
    Ok(set)
}
