//! Region operations on `[N, C, H, W]` image tensors.
//!
//! Rows index the first spatial axis and columns the second, so a cutout box
//! `(x1..x2, y1..y2)` covers rows `x1..x2` and columns `y1..y2` of every
//! channel plane. Ranges past the image edge are clipped.

use crate::error::MlError;
use burn::prelude::*;
use std::ops::Range;

/// Build a `[N, C, H, W]` tensor from sample-major, channel-planar values.
pub fn images_from_vec<B: Backend>(
    data: Vec<f32>,
    shape: [usize; 4],
    device: &B::Device,
) -> Result<Tensor<B, 4>, MlError> {
    let expected: usize = shape.iter().product();
    if data.len() != expected {
        return Err(MlError::invalid_input(format!(
            "image buffer has {} values, shape {shape:?} needs {expected}",
            data.len()
        )));
    }
    Ok(Tensor::from_data(TensorData::new(data, shape), device))
}

/// Copy a tensor back to the host in row-major order.
pub fn to_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Vec<f32> {
    tensor.into_data().iter::<f32>().collect()
}

/// Integer index tensor for `select` and targets.
pub fn index_tensor<B: Backend>(indices: &[usize], device: &B::Device) -> Tensor<B, 1, Int> {
    let values: Vec<i64> = indices.iter().map(|&i| i as i64).collect();
    Tensor::from_data(TensorData::new(values, [indices.len()]), device)
}

/// Slice covering `rows x cols` of every sample and channel, or `None` when
/// the clipped region is empty.
fn region(dims: [usize; 4], rows: Range<usize>, cols: Range<usize>) -> Option<[Range<usize>; 4]> {
    let [n, c, h, w] = dims;
    let rows = rows.start.min(h)..rows.end.min(h);
    let cols = cols.start.min(w)..cols.end.min(w);
    if rows.is_empty() || cols.is_empty() || n == 0 {
        return None;
    }
    Some([0..n, 0..c, rows, cols])
}

/// Set a rectangle of every sample and channel to `value`.
pub fn fill_region<B: Backend>(
    images: Tensor<B, 4>,
    rows: Range<usize>,
    cols: Range<usize>,
    value: f32,
) -> Tensor<B, 4> {
    match region(images.dims(), rows, cols) {
        Some(slice) => images.slice_fill(slice, value),
        None => images,
    }
}

/// Paint a rectangle with one colour per sample and channel. `colors` is
/// `[N * C]`, sample-major.
pub fn fill_region_colors<B: Backend>(
    images: Tensor<B, 4>,
    rows: Range<usize>,
    cols: Range<usize>,
    colors: Vec<f32>,
) -> Result<Tensor<B, 4>, MlError> {
    let [n, c, _, _] = images.dims();
    if colors.len() != n * c {
        return Err(MlError::invalid_input(format!(
            "{} colours for {n} images of {c} channels",
            colors.len()
        )));
    }
    let Some(slice) = region(images.dims(), rows, cols) else {
        return Ok(images);
    };
    let (rh, rw) = (slice[2].len(), slice[3].len());
    let colors: Tensor<B, 4> = images_from_vec(colors, [n, c, 1, 1], &images.device())?;
    Ok(images.slice_assign(slice, colors.expand([n, c, rh, rw])))
}

/// Overwrite a rectangle with explicit `[N, C, rows, cols]` values.
pub fn assign_region<B: Backend>(
    images: Tensor<B, 4>,
    rows: Range<usize>,
    cols: Range<usize>,
    values: Vec<f32>,
) -> Result<Tensor<B, 4>, MlError> {
    let [n, c, _, _] = images.dims();
    let Some(slice) = region(images.dims(), rows, cols) else {
        return Ok(images);
    };
    let shape = [n, c, slice[2].len(), slice[3].len()];
    let values = images_from_vec(values, shape, &images.device())?;
    Ok(images.slice_assign(slice, values))
}

/// Replace a rectangle of every sample with the same rectangle of the
/// `source` sample at the same batch position.
pub fn paste_region<B: Backend>(
    images: Tensor<B, 4>,
    source: Tensor<B, 4>,
    rows: Range<usize>,
    cols: Range<usize>,
) -> Result<Tensor<B, 4>, MlError> {
    if source.dims() != images.dims() {
        return Err(MlError::invalid_input(format!(
            "cannot paste from shape {:?} into {:?}",
            source.dims(),
            images.dims()
        )));
    }
    match region(images.dims(), rows, cols) {
        Some(slice) => Ok(images.slice_assign(slice.clone(), source.slice(slice))),
        None => Ok(images),
    }
}

/// New batch whose sample `i` is sample `indices[i]` of `images`.
pub fn gather<B: Backend>(images: Tensor<B, 4>, indices: &[usize]) -> Result<Tensor<B, 4>, MlError> {
    let n = images.dims()[0];
    if let Some(&bad) = indices.iter().find(|&&i| i >= n) {
        return Err(MlError::invalid_input(format!(
            "gather index {bad} out of range for batch of {n}"
        )));
    }
    let device = images.device();
    Ok(images.select(0, index_tensor::<B>(indices, &device)))
}

/// `weight * images + (1 - weight) * other`, elementwise.
pub fn lerp<B: Backend>(
    images: Tensor<B, 4>,
    other: Tensor<B, 4>,
    weight: f32,
) -> Result<Tensor<B, 4>, MlError> {
    if other.dims() != images.dims() {
        return Err(MlError::invalid_input(format!(
            "cannot mix shape {:?} with {:?}",
            images.dims(),
            other.dims()
        )));
    }
    Ok(images.mul_scalar(weight) + other.mul_scalar(1.0 - weight))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn ramp(shape: [usize; 4]) -> Tensor<TestBackend, 4> {
        let data = (0..shape.iter().product::<usize>()).map(|v| v as f32).collect();
        images_from_vec(data, shape, &Default::default()).unwrap()
    }

    fn at(values: &[f32], dims: [usize; 4], n: usize, c: usize, row: usize, col: usize) -> f32 {
        values[((n * dims[1] + c) * dims[2] + row) * dims[3] + col]
    }

    #[test]
    fn test_from_vec_rejects_wrong_length() {
        let device = Default::default();
        assert!(images_from_vec::<TestBackend>(vec![0.0; 5], [1, 1, 2, 2], &device).is_err());
    }

    #[test]
    fn test_layout_is_row_major() {
        let dims = [2, 3, 4, 5];
        let values = to_vec(ramp(dims));
        assert_eq!(at(&values, dims, 0, 0, 0, 1), 1.0);
        assert_eq!(at(&values, dims, 0, 0, 1, 0), 5.0);
        assert_eq!(at(&values, dims, 0, 1, 0, 0), 20.0);
        assert_eq!(at(&values, dims, 1, 0, 0, 0), 60.0);
    }

    #[test]
    fn test_fill_region_touches_only_the_box() {
        let dims = [1, 2, 4, 4];
        let images = Tensor::<TestBackend, 4>::zeros(dims, &Default::default());
        let values = to_vec(fill_region(images, 1..3, 2..4, 7.0));
        for c in 0..2 {
            for row in 0..4 {
                for col in 0..4 {
                    let inside = (1..3).contains(&row) && (2..4).contains(&col);
                    assert_eq!(at(&values, dims, 0, c, row, col), if inside { 7.0 } else { 0.0 });
                }
            }
        }
    }

    #[test]
    fn test_fill_region_clips_to_image() {
        let images = Tensor::<TestBackend, 4>::zeros([1, 1, 3, 3], &Default::default());
        assert_eq!(to_vec(fill_region(images.clone(), 2..10, 2..10, 1.0)).iter().sum::<f32>(), 1.0);
        assert_eq!(to_vec(fill_region(images, 5..10, 0..3, 1.0)).iter().sum::<f32>(), 0.0);
    }

    #[test]
    fn test_fill_region_colors_per_sample_and_channel() {
        let dims = [2, 2, 3, 3];
        let images = Tensor::<TestBackend, 4>::zeros(dims, &Default::default());
        let values = to_vec(fill_region_colors(images.clone(), 0..2, 1..3, vec![0.1, 0.2, 0.3, 0.4]).unwrap());
        assert_eq!(at(&values, dims, 0, 1, 1, 2), 0.2);
        assert_eq!(at(&values, dims, 1, 0, 0, 1), 0.3);
        assert_eq!(at(&values, dims, 1, 1, 2, 2), 0.0);
        assert!(fill_region_colors(images, 0..2, 0..2, vec![0.5]).is_err());
    }

    #[test]
    fn test_gather_and_paste() {
        let dims = [2, 1, 2, 2];
        let images = ramp(dims);
        let swapped = gather(images.clone(), &[1, 0]).unwrap();
        let original = to_vec(images.clone());
        assert_eq!(to_vec(swapped.clone())[..4], original[4..]);

        let pasted = to_vec(paste_region(images.clone(), swapped, 0..1, 0..2).unwrap());
        assert_eq!(at(&pasted, dims, 0, 0, 0, 0), at(&original, dims, 1, 0, 0, 0));
        assert_eq!(at(&pasted, dims, 0, 0, 1, 1), at(&original, dims, 0, 0, 1, 1));
        assert!(gather(images, &[2]).is_err());
    }

    #[test]
    fn test_lerp() {
        let device = Default::default();
        let a = images_from_vec::<TestBackend>(vec![1.0, 1.0], [1, 1, 1, 2], &device).unwrap();
        let b = images_from_vec::<TestBackend>(vec![0.0, 2.0], [1, 1, 1, 2], &device).unwrap();
        assert_eq!(to_vec(lerp(a, b, 0.75).unwrap()), vec![0.75, 1.25]);
    }
}
