//! Stacks transformed samples into backend tensors.

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;

/// One transformed sample: `[C, H, W]` values, its label and its position in
/// the split.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageItem {
    pub image: Vec<f32>,
    pub label: usize,
    pub index: usize,
}

/// A batch ready for the model.
#[derive(Debug, Clone)]
pub struct ImageBatch<B: Backend> {
    /// `[N, C, H, W]`
    pub images: Tensor<B, 4>,
    /// `[N]` class indices
    pub targets: Tensor<B, 1, Int>,
    /// Host copy of `targets`, for augmentation and metrics.
    pub labels: Vec<usize>,
    pub indices: Vec<usize>,
}

impl<B: Backend> ImageBatch<B> {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Batcher for fixed-shape `[C, H, W]` samples.
#[derive(Debug, Clone)]
pub struct ImageBatcher {
    channels: usize,
    height: usize,
    width: usize,
}

impl ImageBatcher {
    pub fn new(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
        }
    }

    /// Values per sample.
    pub fn sample_len(&self) -> usize {
        self.channels * self.height * self.width
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    /// Callers guarantee every item holds exactly [`ImageBatcher::sample_len`] values.
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let n = items.len();
        let mut pixels = Vec::with_capacity(n * self.sample_len());
        let mut labels = Vec::with_capacity(n);
        let mut indices = Vec::with_capacity(n);
        for item in items {
            pixels.extend_from_slice(&item.image);
            labels.push(item.label);
            indices.push(item.index);
        }

        let images = Tensor::<B, 4>::from_data(
            TensorData::new(pixels, [n, self.channels, self.height, self.width]),
            device,
        );
        let targets = crate::tensor::index_tensor::<B>(&labels, device);

        ImageBatch {
            images,
            targets,
            labels,
            indices,
        }
    }
}
