//! Label-mixing augmentations: Mixup and CutMix.

use crate::augment::beta::sample_beta;
use crate::augment::cutout::CutoutBox;
use crate::error::MlError;
use crate::tensor;
use burn::prelude::*;
use rand::Rng;
use rand::seq::SliceRandom;

/// Uniformly random permutation of `0..n`.
pub fn random_permutation<R: Rng + ?Sized>(n: usize, rng: &mut R) -> Vec<usize> {
    let mut perm: Vec<usize> = (0..n).collect();
    perm.shuffle(rng);
    perm
}

/// Mixup ratio `max(r, 1 - r)` with `r ~ Beta(alpha, alpha)`, so the
/// original image always dominates. `alpha <= 0` disables mixing.
pub fn mixup_ratio<R: Rng + ?Sized>(alpha: f64, rng: &mut R) -> f64 {
    if alpha <= 0.0 {
        return 1.0;
    }
    let r = sample_beta(alpha, alpha, rng);
    r.max(1.0 - r)
}

/// `ratio * x + (1 - ratio) * x[perm]`.
pub fn apply_mixup<B: Backend>(
    images: Tensor<B, 4>,
    ratio: f64,
    perm: &[usize],
) -> Result<Tensor<B, 4>, MlError> {
    let partner = tensor::gather(images.clone(), perm)?;
    tensor::lerp(images, partner, ratio as f32)
}

/// Fraction of the image left untouched by the pasted box.
pub fn cutmix_lambda(cutout: &CutoutBox, height: usize, width: usize) -> f64 {
    1.0 - cutout.area() as f64 / (height * width) as f64
}

/// Paste the box region of `x[perm[i]]` into `x[i]`; returns the batch and
/// the weight of the original labels.
pub fn apply_cutmix<B: Backend>(
    images: Tensor<B, 4>,
    cutout: &CutoutBox,
    perm: &[usize],
) -> Result<(Tensor<B, 4>, f64), MlError> {
    let [_, _, height, width] = images.dims();
    let partner = tensor::gather(images.clone(), perm)?;
    let mixed = tensor::paste_region(images, partner, cutout.rows(), cutout.cols())?;
    Ok((mixed, cutmix_lambda(cutout, height, width)))
}
