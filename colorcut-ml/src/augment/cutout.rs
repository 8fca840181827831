//! Cutout and Colorful Cutout, with and without the curriculum schedule.

use crate::error::MlError;
use crate::tensor;
use burn::prelude::*;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// A square box `rows x1..x2`, `cols y1..y2`, shared by the whole batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CutoutBox {
    pub x1: usize,
    pub x2: usize,
    pub y1: usize,
    pub y2: usize,
}

impl CutoutBox {
    pub fn rows(&self) -> Range<usize> {
        self.x1..self.x2
    }

    pub fn cols(&self) -> Range<usize> {
        self.y1..self.y2
    }

    pub fn side(&self) -> usize {
        self.x2 - self.x1
    }

    pub fn area(&self) -> usize {
        (self.x2 - self.x1) * (self.y2 - self.y1)
    }
}

/// Sample the top-left corner uniformly from `[0, size - box_size)` on each
/// axis. When the box is exactly as large as the image it sits at the origin.
pub fn sample_cutout_box<R: Rng + ?Sized>(
    height: usize,
    width: usize,
    box_size: usize,
    rng: &mut R,
) -> Result<CutoutBox, MlError> {
    if box_size > height || box_size > width {
        return Err(MlError::augmentation(format!(
            "cutout box of {box_size}px does not fit a {height}x{width} image"
        )));
    }
    let x1 = if height > box_size {
        rng.gen_range(0..height - box_size)
    } else {
        0
    };
    let y1 = if width > box_size {
        rng.gen_range(0..width - box_size)
    } else {
        0
    };
    Ok(CutoutBox {
        x1,
        x2: x1 + box_size,
        y1,
        y2: y1 + box_size,
    })
}

/// Zero the box in every channel of every image.
pub fn apply_cutout<B: Backend>(images: Tensor<B, 4>, cutout: &CutoutBox) -> Tensor<B, 4> {
    tensor::fill_region(images, cutout.rows(), cutout.cols(), 0.0)
}

/// Fill the box with one random colour per image and channel, drawn from `[0, 1)`.
pub fn apply_color_cutout<B: Backend, R: Rng + ?Sized>(
    images: Tensor<B, 4>,
    cutout: &CutoutBox,
    rng: &mut R,
) -> Result<Tensor<B, 4>, MlError> {
    let [n, c, _, _] = images.dims();
    let colors = random_colors(n * c, rng);
    tensor::fill_region_colors(images, cutout.rows(), cutout.cols(), colors)
}

/// Cell side for the curriculum at `epoch`: `box_size / 2^epoch`, never below 1.
pub fn curriculum_region_size(box_size: usize, epoch: usize) -> usize {
    let divisor = u32::try_from(epoch)
        .ok()
        .and_then(|e| 1usize.checked_shl(e))
        .unwrap_or(usize::MAX);
    (box_size / divisor).max(1)
}

/// Split the box into a grid of `region_size` cells and give every cell its
/// own random colour per image and channel. The grid gets finer each epoch.
///
/// When `box_size` is not a multiple of the cell side, the trailing strip of
/// the box keeps its original pixels.
pub fn apply_curriculum_color_cutout<B: Backend, R: Rng + ?Sized>(
    images: Tensor<B, 4>,
    cutout: &CutoutBox,
    epoch: usize,
    rng: &mut R,
) -> Result<Tensor<B, 4>, MlError> {
    let [n, c, _, _] = images.dims();
    let box_size = cutout.side();
    let region_size = curriculum_region_size(box_size, epoch);
    let region_amount = box_size / region_size;
    let covered = region_amount * region_size;

    // Cell-major draws, one colour per image and channel per cell.
    let cells: Vec<Vec<f32>> = (0..region_amount * region_amount)
        .map(|_| random_colors(n * c, rng))
        .collect();

    let mut mosaic = vec![0.0f32; n * c * covered * covered];
    for (plane, chunk) in mosaic.chunks_mut(covered * covered).enumerate() {
        for row in 0..covered {
            for col in 0..covered {
                let cell = (row / region_size) * region_amount + col / region_size;
                chunk[row * covered + col] = cells[cell][plane];
            }
        }
    }
    tensor::assign_region(
        images,
        cutout.x1..cutout.x1 + covered,
        cutout.y1..cutout.y1 + covered,
        mosaic,
    )
}

fn random_colors<R: Rng + ?Sized>(count: usize, rng: &mut R) -> Vec<f32> {
    (0..count).map(|_| rng.r#gen::<f32>()).collect()
}
