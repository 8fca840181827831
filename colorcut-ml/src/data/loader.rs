//! Dataset over a processed split, and the batching loader on top of it.

use crate::config::DataConfig;
use crate::data::batcher::{ImageBatch, ImageBatcher, ImageItem};
use crate::data::processed::{ProcessedSplit, SplitKind};
use crate::data::transform::ImageTransform;
use crate::error::MlError;
use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;
use rand::Rng;
use rand::seq::SliceRandom;
use std::path::Path;

/// A processed split plus the transform its samples go through.
#[derive(Debug, Clone)]
pub struct ImageDataset {
    kind: SplitKind,
    split: ProcessedSplit,
    transform: ImageTransform,
}

impl ImageDataset {
    pub fn open(dir: &Path, kind: SplitKind, config: &DataConfig) -> Result<Self, MlError> {
        let split = ProcessedSplit::read(&dir.join(kind.file_name()))?;
        let transform = ImageTransform::for_split(kind, config)?;
        tracing::info!(split = kind.as_str(), images = split.len(), "Loaded dataset split");
        Ok(Self::from_split(split, kind, transform))
    }

    pub fn from_split(split: ProcessedSplit, kind: SplitKind, transform: ImageTransform) -> Self {
        Self {
            kind,
            split,
            transform,
        }
    }

    pub fn kind(&self) -> SplitKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.split.len()
    }

    pub fn is_empty(&self) -> bool {
        self.split.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.split.header.num_classes
    }

    /// `(channels, height, width)` of a transformed sample.
    pub fn sample_shape(&self) -> (usize, usize, usize) {
        let side = self.transform.crop_size();
        (self.split.header.channels, side, side)
    }

    pub fn get<R: Rng + ?Sized>(&self, index: usize, rng: &mut R) -> Result<ImageItem, MlError> {
        if index >= self.len() {
            return Err(MlError::dataset(format!(
                "index {index} out of range for {} images",
                self.len()
            )));
        }
        let h = &self.split.header;
        let image = self
            .transform
            .apply(self.split.image(index), h.channels, h.height, h.width, rng)?;
        Ok(ImageItem {
            image,
            label: self.split.label(index),
            index,
        })
    }
}

/// Groups dataset indices into batches. Training loaders shuffle every epoch
/// and drop the trailing partial batch; evaluation loaders keep order and
/// every sample.
///
/// Ordering and per-sample transforms draw from the caller's seeded RNG so a
/// run is reproducible from its seed alone.
#[derive(Debug)]
pub struct DataLoader<'a> {
    dataset: &'a ImageDataset,
    batcher: ImageBatcher,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
}

impl<'a> DataLoader<'a> {
    pub fn new(
        dataset: &'a ImageDataset,
        batch_size: usize,
        shuffle: bool,
        drop_last: bool,
    ) -> Result<Self, MlError> {
        if batch_size == 0 {
            return Err(MlError::invalid_input("batch_size must be at least 1"));
        }
        let (c, h, w) = dataset.sample_shape();
        Ok(Self {
            dataset,
            batcher: ImageBatcher::new(c, h, w),
            batch_size,
            shuffle,
            drop_last,
        })
    }

    /// Loader with the batching policy of the dataset's split.
    pub fn for_dataset(dataset: &'a ImageDataset, batch_size: usize) -> Result<Self, MlError> {
        let train = dataset.kind().is_train();
        Self::new(dataset, batch_size, train, train)
    }

    /// Number of batches per epoch.
    pub fn len(&self) -> usize {
        let n = self.dataset.len();
        if self.drop_last {
            n / self.batch_size
        } else {
            n.div_ceil(self.batch_size)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Index groups for one epoch.
    pub fn epoch_order<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.shuffle {
            order.shuffle(rng);
        }
        order
            .chunks(self.batch_size)
            .filter(|chunk| !self.drop_last || chunk.len() == self.batch_size)
            .map(<[usize]>::to_vec)
            .collect()
    }

    /// Transform the samples at `indices` and stack them on `device`.
    pub fn collate<B: Backend, R: Rng + ?Sized>(
        &self,
        indices: &[usize],
        device: &B::Device,
        rng: &mut R,
    ) -> Result<ImageBatch<B>, MlError> {
        let expected = self.batcher.sample_len();
        let mut items = Vec::with_capacity(indices.len());
        for &i in indices {
            let item = self.dataset.get(i, rng)?;
            if item.image.len() != expected {
                return Err(MlError::dataset(format!(
                    "sample {i} has {} values after transform, expected {expected}",
                    item.image.len()
                )));
            }
            items.push(item);
        }
        Ok(self.batcher.batch(items, device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::raw::RawImageSet;
    use burn::backend::NdArray;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn dataset(n: usize, kind: SplitKind) -> ImageDataset {
        let raw = RawImageSet {
            channels: 3,
            height: 4,
            width: 4,
            labels: (0..n).map(|i| (i % 3) as u16).collect(),
            pixels: (0..n * 48).map(|v| (v % 256) as u8).collect(),
        };
        let indices: Vec<usize> = (0..n).collect();
        let split = ProcessedSplit::from_raw(&raw, &indices, 3);
        let transform = if kind.is_train() {
            ImageTransform::train(4, 4)
        } else {
            ImageTransform::eval(4, 4)
        };
        ImageDataset::from_split(split, kind, transform)
    }

    #[test]
    fn test_train_loader_drops_partial_batch() {
        let ds = dataset(10, SplitKind::Train);
        let loader = DataLoader::for_dataset(&ds, 4).unwrap();
        assert_eq!(loader.len(), 2);
        let order = loader.epoch_order(&mut StdRng::seed_from_u64(1));
        assert_eq!(order.len(), 2);
        assert!(order.iter().all(|b| b.len() == 4));
    }

    #[test]
    fn test_eval_loader_keeps_order_and_remainder() {
        let ds = dataset(10, SplitKind::Test);
        let loader = DataLoader::for_dataset(&ds, 4).unwrap();
        assert_eq!(loader.len(), 3);
        let order = loader.epoch_order(&mut StdRng::seed_from_u64(1));
        assert_eq!(order.concat(), (0..10).collect::<Vec<_>>());
        assert_eq!(order[2], vec![8, 9]);
    }

    #[test]
    fn test_collate_shapes_and_labels() {
        let ds = dataset(5, SplitKind::Valid);
        let loader = DataLoader::for_dataset(&ds, 2).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let batch: ImageBatch<NdArray<f32>> =
            loader.collate(&[3, 4], &Default::default(), &mut rng).unwrap();
        assert_eq!(batch.images.dims(), [2, 3, 4, 4]);
        assert_eq!(batch.labels, vec![0, 1]);
        assert_eq!(batch.indices, vec![3, 4]);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let ds = dataset(2, SplitKind::Test);
        assert!(DataLoader::new(&ds, 0, false, false).is_err());
    }

    #[test]
    fn test_get_out_of_range() {
        let ds = dataset(2, SplitKind::Test);
        assert!(ds.get(2, &mut StdRng::seed_from_u64(0)).is_err());
    }
}
