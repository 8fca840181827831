//! On-disk format of the processed splits written by the preprocessing job.
//!
//! Layout: `b"CCPS"`, `u32 LE` header length, JSON [`SplitHeader`],
//! `count` little-endian `u16` labels, then `count * C * H * W` pixel bytes.

use crate::data::raw::RawImageSet;
use crate::error::MlError;
use serde::{Deserialize, Serialize};
use std::path::Path;

const MAGIC: &[u8; 4] = b"CCPS";
const FORMAT_VERSION: u32 = 1;

/// Which processed split a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitKind {
    Train,
    Valid,
    Test,
}

impl SplitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SplitKind::Train => "train",
            SplitKind::Valid => "valid",
            SplitKind::Test => "test",
        }
    }

    /// Training splits get random augmentation transforms, shuffling and
    /// drop-last batching.
    pub fn is_train(&self) -> bool {
        matches!(self, SplitKind::Train)
    }

    pub fn file_name(&self) -> String {
        format!("{}_processed.bin", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitHeader {
    pub version: u32,
    pub num_classes: usize,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub count: usize,
}

/// A processed split held in memory as raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedSplit {
    pub header: SplitHeader,
    pub labels: Vec<u16>,
    pub pixels: Vec<u8>,
}

impl ProcessedSplit {
    /// Select `indices` of `raw` (in that order) into a split.
    pub fn from_raw(raw: &RawImageSet, indices: &[usize], num_classes: usize) -> Self {
        let mut labels = Vec::with_capacity(indices.len());
        let mut pixels = Vec::with_capacity(indices.len() * raw.image_len());
        for &i in indices {
            labels.push(raw.labels[i]);
            pixels.extend_from_slice(raw.image(i));
        }
        Self {
            header: SplitHeader {
                version: FORMAT_VERSION,
                num_classes,
                channels: raw.channels,
                height: raw.height,
                width: raw.width,
                count: indices.len(),
            },
            labels,
            pixels,
        }
    }

    pub fn len(&self) -> usize {
        self.header.count
    }

    pub fn is_empty(&self) -> bool {
        self.header.count == 0
    }

    pub fn image_len(&self) -> usize {
        self.header.channels * self.header.height * self.header.width
    }

    pub fn image(&self, i: usize) -> &[u8] {
        let len = self.image_len();
        &self.pixels[i * len..(i + 1) * len]
    }

    pub fn label(&self, i: usize) -> usize {
        usize::from(self.labels[i])
    }

    pub fn encode(&self) -> Result<Vec<u8>, MlError> {
        let header = serde_json::to_vec(&self.header)?;
        let header_len = u32::try_from(header.len())
            .map_err(|_| MlError::dataset("split header too large"))?;
        let mut out =
            Vec::with_capacity(8 + header.len() + self.labels.len() * 2 + self.pixels.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&header_len.to_le_bytes());
        out.extend_from_slice(&header);
        for label in &self.labels {
            out.extend_from_slice(&label.to_le_bytes());
        }
        out.extend_from_slice(&self.pixels);
        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, MlError> {
        if bytes.len() < 8 || &bytes[..4] != MAGIC {
            return Err(MlError::dataset("not a processed split file"));
        }
        let header_len = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        let body = &bytes[8..];
        if body.len() < header_len {
            return Err(MlError::dataset("processed split header is truncated"));
        }
        let header: SplitHeader = serde_json::from_slice(&body[..header_len])?;
        if header.version != FORMAT_VERSION {
            return Err(MlError::dataset(format!(
                "unsupported processed split version {}",
                header.version
            )));
        }

        let payload = &body[header_len..];
        let labels_len = header.count * 2;
        let pixels_len = header.count * header.channels * header.height * header.width;
        if payload.len() != labels_len + pixels_len {
            return Err(MlError::dataset(format!(
                "processed split payload is {} bytes, header implies {}",
                payload.len(),
                labels_len + pixels_len
            )));
        }

        let labels = payload[..labels_len]
            .chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect::<Vec<_>>();
        if let Some(bad) = labels
            .iter()
            .find(|&&l| usize::from(l) >= header.num_classes)
        {
            return Err(MlError::dataset(format!(
                "label {bad} out of range for {} classes",
                header.num_classes
            )));
        }
        let pixels = payload[labels_len..].to_vec();
        Ok(Self {
            header,
            labels,
            pixels,
        })
    }

    pub fn write(&self, path: &Path) -> Result<(), MlError> {
        let bytes = self.encode()?;
        colorcut_core::persistence::atomic_write(path, &bytes)?;
        Ok(())
    }

    pub fn read(path: &Path) -> Result<Self, MlError> {
        if !path.exists() {
            return Err(MlError::not_found(format!(
                "processed split {} (run the preprocessing job first)",
                path.display()
            )));
        }
        let bytes = std::fs::read(path)?;
        Self::decode(&bytes)
    }
}
