//! Per-image transforms applied when a sample is loaded.
//!
//! Train: resize, random crop, random horizontal flip, scale, normalize.
//! Eval: resize, center crop, scale, normalize.

use crate::config::DataConfig;
use crate::data::processed::SplitKind;
use crate::error::MlError;
use rand::Rng;

/// ImageNet channel statistics used for normalization.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageTransform {
    resize: usize,
    crop: usize,
    random: bool,
}

impl ImageTransform {
    pub fn train(resize: usize, crop: usize) -> Self {
        Self {
            resize,
            crop,
            random: true,
        }
    }

    pub fn eval(resize: usize, crop: usize) -> Self {
        Self {
            resize,
            crop,
            random: false,
        }
    }

    pub fn for_split(kind: SplitKind, config: &DataConfig) -> Result<Self, MlError> {
        if config.image_crop_size == 0 || config.image_crop_size > config.image_resize_size {
            return Err(MlError::invalid_input(format!(
                "crop size {} must be in 1..={}",
                config.image_crop_size, config.image_resize_size
            )));
        }
        Ok(if kind.is_train() {
            Self::train(config.image_resize_size, config.image_crop_size)
        } else {
            Self::eval(config.image_resize_size, config.image_crop_size)
        })
    }

    pub fn crop_size(&self) -> usize {
        self.crop
    }

    /// Transform one channel-planar `u8` image into normalized `f32`s of
    /// shape `channels x crop x crop`.
    pub fn apply<R: Rng + ?Sized>(
        &self,
        pixels: &[u8],
        channels: usize,
        height: usize,
        width: usize,
        rng: &mut R,
    ) -> Result<Vec<f32>, MlError> {
        if channels != IMAGENET_MEAN.len() {
            return Err(MlError::dataset(format!(
                "expected RGB images, got {channels} channels"
            )));
        }
        if pixels.len() != channels * height * width {
            return Err(MlError::dataset(format!(
                "image has {} bytes, expected {}",
                pixels.len(),
                channels * height * width
            )));
        }

        let scaled: Vec<f32> = pixels.iter().map(|&p| f32::from(p) / 255.0).collect();
        let resized = resize_bilinear(&scaled, channels, height, width, self.resize, self.resize);

        let slack = self.resize - self.crop;
        let (top, left) = if self.random {
            (rng.gen_range(0..=slack), rng.gen_range(0..=slack))
        } else {
            let center = (slack as f64 / 2.0).round() as usize;
            (center, center)
        };
        let mut out = crop(&resized, channels, self.resize, self.resize, top, left, self.crop);

        if self.random && rng.gen_bool(0.5) {
            hflip(&mut out, channels, self.crop, self.crop);
        }
        normalize(&mut out, channels, self.crop * self.crop);
        Ok(out)
    }
}

/// Bilinear resize with half-pixel centers.
pub fn resize_bilinear(
    src: &[f32],
    channels: usize,
    height: usize,
    width: usize,
    out_h: usize,
    out_w: usize,
) -> Vec<f32> {
    if height == out_h && width == out_w {
        return src.to_vec();
    }
    let scale_y = height as f32 / out_h as f32;
    let scale_x = width as f32 / out_w as f32;
    let mut out = vec![0.0f32; channels * out_h * out_w];

    let axis = |o: usize, scale: f32, size: usize| -> (usize, usize, f32) {
        let pos = ((o as f32 + 0.5) * scale - 0.5).max(0.0);
        let lo = (pos.floor() as usize).min(size - 1);
        let hi = (lo + 1).min(size - 1);
        (lo, hi, pos - lo as f32)
    };

    for c in 0..channels {
        let plane = &src[c * height * width..(c + 1) * height * width];
        for oy in 0..out_h {
            let (y0, y1, fy) = axis(oy, scale_y, height);
            for ox in 0..out_w {
                let (x0, x1, fx) = axis(ox, scale_x, width);
                let top = plane[y0 * width + x0] * (1.0 - fx) + plane[y0 * width + x1] * fx;
                let bottom = plane[y1 * width + x0] * (1.0 - fx) + plane[y1 * width + x1] * fx;
                out[c * out_h * out_w + oy * out_w + ox] = top * (1.0 - fy) + bottom * fy;
            }
        }
    }
    out
}

fn crop(
    src: &[f32],
    channels: usize,
    height: usize,
    width: usize,
    top: usize,
    left: usize,
    size: usize,
) -> Vec<f32> {
    let mut out = Vec::with_capacity(channels * size * size);
    for c in 0..channels {
        for row in top..top + size {
            let start = c * height * width + row * width + left;
            out.extend_from_slice(&src[start..start + size]);
        }
    }
    out
}

fn hflip(buf: &mut [f32], channels: usize, height: usize, width: usize) {
    for c in 0..channels {
        for row in 0..height {
            let start = c * height * width + row * width;
            buf[start..start + width].reverse();
        }
    }
}

fn normalize(buf: &mut [f32], channels: usize, plane: usize) {
    for c in 0..channels {
        let (mean, std) = (IMAGENET_MEAN[c], IMAGENET_STD[c]);
        for v in &mut buf[c * plane..(c + 1) * plane] {
            *v = (*v - mean) / std;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_resize_constant_image_stays_constant() {
        let src = vec![0.5f32; 3 * 4 * 4];
        let out = resize_bilinear(&src, 3, 4, 4, 6, 6);
        assert_eq!(out.len(), 3 * 36);
        assert!(out.iter().all(|v| (v - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_resize_identity() {
        let src: Vec<f32> = (0..12).map(|v| v as f32).collect();
        assert_eq!(resize_bilinear(&src, 3, 2, 2, 2, 2), src);
    }

    #[test]
    fn test_eval_output_shape_and_normalization() {
        let mut rng = StdRng::seed_from_u64(0);
        let pixels = vec![255u8; 3 * 8 * 8];
        let out = ImageTransform::eval(10, 8)
            .apply(&pixels, 3, 8, 8, &mut rng)
            .unwrap();
        assert_eq!(out.len(), 3 * 64);
        let expected = (1.0 - IMAGENET_MEAN[1]) / IMAGENET_STD[1];
        assert!((out[64] - expected).abs() < 1e-5);
    }

    #[test]
    fn test_eval_is_deterministic() {
        let pixels: Vec<u8> = (0..3 * 8 * 8).map(|v| (v % 251) as u8).collect();
        let t = ImageTransform::eval(10, 8);
        let a = t.apply(&pixels, 3, 8, 8, &mut StdRng::seed_from_u64(1)).unwrap();
        let b = t.apply(&pixels, 3, 8, 8, &mut StdRng::seed_from_u64(2)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_hflip_reverses_rows() {
        let mut buf = vec![1.0, 2.0, 3.0, 4.0];
        hflip(&mut buf, 1, 2, 2);
        assert_eq!(buf, vec![2.0, 1.0, 4.0, 3.0]);
    }

    #[test]
    fn test_crop_window() {
        let src: Vec<f32> = (0..16).map(|v| v as f32).collect();
        assert_eq!(crop(&src, 1, 4, 4, 1, 2, 2), vec![6.0, 7.0, 10.0, 11.0]);
    }

    #[test]
    fn test_rejects_wrong_length_and_channels() {
        let mut rng = StdRng::seed_from_u64(0);
        let t = ImageTransform::train(4, 4);
        assert!(t.apply(&[0u8; 10], 3, 2, 2, &mut rng).is_err());
        assert!(t.apply(&[0u8; 4], 1, 2, 2, &mut rng).is_err());
    }

    #[test]
    fn test_for_split_rejects_oversized_crop() {
        let config = DataConfig {
            image_resize_size: 32,
            image_crop_size: 36,
            ..DataConfig::default()
        };
        assert!(ImageTransform::for_split(SplitKind::Train, &config).is_err());
    }
}
