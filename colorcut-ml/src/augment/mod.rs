//! Batch augmentations: Cutout, Colorful Cutout (flat and curriculum),
//! Mixup and CutMix.
//!
//! An [`Augmenter`] turns a clean batch into the images the model sees plus
//! the (possibly mixed) targets the loss is computed against. One cutout box
//! is sampled per batch and shared by all of its images.

pub mod beta;
pub mod cutout;
pub mod mixing;

pub use cutout::{CutoutBox, curriculum_region_size, sample_cutout_box};

use crate::config::AugmentationConfig;
use crate::error::MlError;
use crate::types::AugmentationType;
use burn::prelude::*;
use rand::Rng;

/// Labels of the permuted partner batch and the weight of their loss term.
#[derive(Debug, Clone, PartialEq)]
pub struct SecondaryTargets {
    pub labels: Vec<usize>,
    pub weight: f64,
}

/// Targets for one batch. Without a secondary term the loss is plain
/// cross-entropy against `primary`.
#[derive(Debug, Clone, PartialEq)]
pub struct MixedTargets {
    pub primary: Vec<usize>,
    pub secondary: Option<SecondaryTargets>,
}

impl MixedTargets {
    pub fn plain(labels: Vec<usize>) -> Self {
        Self {
            primary: labels,
            secondary: None,
        }
    }

    pub fn mixed(primary: Vec<usize>, secondary: Vec<usize>, primary_weight: f64) -> Self {
        Self {
            primary,
            secondary: Some(SecondaryTargets {
                labels: secondary,
                weight: 1.0 - primary_weight,
            }),
        }
    }

    pub fn primary_weight(&self) -> f64 {
        1.0 - self.secondary.as_ref().map_or(0.0, |s| s.weight)
    }
}

/// Result of augmenting one batch.
#[derive(Debug, Clone)]
pub struct AugmentedBatch<B: Backend> {
    pub images: Tensor<B, 4>,
    pub targets: MixedTargets,
    pub cutout_box: Option<CutoutBox>,
}

/// Applies one [`AugmentationType`] to training batches.
#[derive(Debug, Clone)]
pub struct Augmenter {
    kind: AugmentationType,
    box_size: usize,
    mixup_alpha: f64,
}

impl Augmenter {
    pub fn new(kind: AugmentationType, box_size: usize, mixup_alpha: f64) -> Self {
        Self {
            kind,
            box_size,
            mixup_alpha,
        }
    }

    pub fn from_config(config: &AugmentationConfig) -> Self {
        Self::new(
            config.augmentation_type,
            config.box_size,
            config.mixup_alpha,
        )
    }

    pub fn kind(&self) -> AugmentationType {
        self.kind
    }

    /// Reject configurations whose box cannot fit the cropped image.
    pub fn validate(&self, image_size: usize) -> Result<(), MlError> {
        if self.kind.uses_box() && self.box_size > image_size {
            return Err(MlError::augmentation(format!(
                "{} box of {}px exceeds image size {image_size}",
                self.kind, self.box_size
            )));
        }
        Ok(())
    }

    /// Augment `images` (with `labels`) for training epoch `epoch` (0-based).
    pub fn apply<B: Backend, R: Rng + ?Sized>(
        &self,
        images: Tensor<B, 4>,
        labels: &[usize],
        epoch: usize,
        rng: &mut R,
    ) -> Result<AugmentedBatch<B>, MlError> {
        let [n, _, height, width] = images.dims();
        if labels.len() != n {
            return Err(MlError::augmentation(format!(
                "{} labels for a batch of {n} images",
                labels.len()
            )));
        }

        match self.kind {
            AugmentationType::None => Ok(AugmentedBatch {
                images,
                targets: MixedTargets::plain(labels.to_vec()),
                cutout_box: None,
            }),
            AugmentationType::Cutout => {
                let b = sample_cutout_box(height, width, self.box_size, rng)?;
                Ok(boxed(cutout::apply_cutout(images, &b), labels, b))
            }
            AugmentationType::ColorCutoutNoCurriculum => {
                let b = sample_cutout_box(height, width, self.box_size, rng)?;
                let masked = cutout::apply_color_cutout(images, &b, rng)?;
                Ok(boxed(masked, labels, b))
            }
            AugmentationType::ColorCutoutCurriculum => {
                let b = sample_cutout_box(height, width, self.box_size, rng)?;
                let masked = cutout::apply_curriculum_color_cutout(images, &b, epoch, rng)?;
                Ok(boxed(masked, labels, b))
            }
            AugmentationType::Mixup => {
                let ratio = mixing::mixup_ratio(self.mixup_alpha, rng);
                let perm = mixing::random_permutation(n, rng);
                let mixed = mixing::apply_mixup(images, ratio, &perm)?;
                Ok(AugmentedBatch {
                    images: mixed,
                    targets: MixedTargets::mixed(labels.to_vec(), permute(labels, &perm), ratio),
                    cutout_box: None,
                })
            }
            AugmentationType::Cutmix => {
                let perm = mixing::random_permutation(n, rng);
                let b = sample_cutout_box(height, width, self.box_size, rng)?;
                let (mixed, lambda) = mixing::apply_cutmix(images, &b, &perm)?;
                Ok(AugmentedBatch {
                    images: mixed,
                    targets: MixedTargets::mixed(labels.to_vec(), permute(labels, &perm), lambda),
                    cutout_box: Some(b),
                })
            }
        }
    }
}

fn boxed<B: Backend>(images: Tensor<B, 4>, labels: &[usize], b: CutoutBox) -> AugmentedBatch<B> {
    AugmentedBatch {
        images,
        targets: MixedTargets::plain(labels.to_vec()),
        cutout_box: Some(b),
    }
}

fn permute(labels: &[usize], perm: &[usize]) -> Vec<usize> {
    perm.iter().map(|&i| labels[i]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor;
    use burn::backend::NdArray;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    type TestBackend = NdArray<f32>;

    /// Sample `i` is filled with `i + 2`, so every original pixel is >= 2.
    fn batch(n: usize, side: usize) -> Tensor<TestBackend, 4> {
        let data = (0..n).flat_map(|i| vec![i as f32 + 2.0; 3 * side * side]).collect();
        tensor::images_from_vec(data, [n, 3, side, side], &Default::default()).unwrap()
    }

    #[test]
    fn test_none_is_identity() {
        let mut rng = StdRng::seed_from_u64(0);
        let images = batch(4, 8);
        let out = Augmenter::new(AugmentationType::None, 4, 1.0)
            .apply(images.clone(), &[0, 1, 2, 3], 0, &mut rng)
            .unwrap();
        assert_eq!(tensor::to_vec(out.images), tensor::to_vec(images));
        assert_eq!(out.targets, MixedTargets::plain(vec![0, 1, 2, 3]));
        assert!(out.cutout_box.is_none());
    }

    #[test]
    fn test_box_strategies_change_only_the_box() {
        let side = 8;
        for kind in [
            AugmentationType::Cutout,
            AugmentationType::ColorCutoutNoCurriculum,
            AugmentationType::ColorCutoutCurriculum,
        ] {
            let mut rng = StdRng::seed_from_u64(42);
            let out = Augmenter::new(kind, 4, 1.0)
                .apply(batch(3, side), &[0, 1, 2], 1, &mut rng)
                .unwrap();
            let b = out.cutout_box.unwrap();
            assert_eq!(out.targets.primary_weight(), 1.0);
            let values = tensor::to_vec(out.images);
            for n in 0..3 {
                for row in 0..side {
                    for col in 0..side {
                        let inside = b.rows().contains(&row) && b.cols().contains(&col);
                        let v = values[(n * 3 * side + row) * side + col];
                        if inside {
                            assert!(v < 1.0, "{kind}: box pixel not masked");
                        } else {
                            assert_eq!(v, n as f32 + 2.0);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_mixup_targets_follow_permutation() {
        let mut rng = StdRng::seed_from_u64(3);
        let labels = [10, 11, 12, 13, 14];
        let out = Augmenter::new(AugmentationType::Mixup, 0, 1.0)
            .apply(batch(5, 4), &labels, 0, &mut rng)
            .unwrap();
        let secondary = out.targets.secondary.clone().unwrap();
        assert!(secondary.weight <= 0.5 + 1e-12);
        let mut sorted = secondary.labels.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, labels.to_vec());
        assert!((out.targets.primary_weight() + secondary.weight - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_cutmix_weight_matches_box_area() {
        let mut rng = StdRng::seed_from_u64(3);
        let out = Augmenter::new(AugmentationType::Cutmix, 4, 1.0)
            .apply(batch(4, 8), &[0, 1, 2, 3], 0, &mut rng)
            .unwrap();
        assert!((out.targets.primary_weight() - 0.75).abs() < 1e-12);
        assert!(out.cutout_box.is_some());
    }

    #[test]
    fn test_label_count_mismatch() {
        let mut rng = StdRng::seed_from_u64(3);
        let err = Augmenter::new(AugmentationType::Cutout, 2, 1.0)
            .apply(batch(2, 4), &[0], 0, &mut rng)
            .unwrap_err();
        assert!(matches!(err, MlError::Augmentation(_)));
    }

    #[test]
    fn test_validate_box_size() {
        assert!(Augmenter::new(AugmentationType::Cutout, 40, 1.0).validate(32).is_err());
        assert!(Augmenter::new(AugmentationType::Mixup, 40, 1.0).validate(32).is_ok());
        assert!(Augmenter::new(AugmentationType::Cutmix, 32, 1.0).validate(32).is_ok());
    }
}
