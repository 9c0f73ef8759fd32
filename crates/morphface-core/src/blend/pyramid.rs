//! Laplacian-pyramid (multi-resolution) blending on `ndarray` planes.
//!
//! Images are held as `(height, width, channels)` float arrays. Downsampling
//! and upsampling use the separable 5-tap binomial kernel `[1, 4, 6, 4, 1] / 16`
//! with reflect-101 borders; a Laplacian level is a Gaussian level minus the
//! upsampled next-coarser level, so reconstruction is the exact inverse.

use super::{check_dimensions, BlendError, Blender};
use image::{GrayImage, RgbImage};
use ndarray::{Array3, Zip};

const KERNEL: [f32; 5] = [1.0 / 16.0, 4.0 / 16.0, 6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0];

/// Gaussian pyramid depth used when none is configured.
pub const DEFAULT_LEVELS: usize = 6;

pub(crate) fn rgb_to_array(image: &RgbImage) -> Array3<f32> {
    let (w, h) = image.dimensions();
    Array3::from_shape_fn((h as usize, w as usize, 3), |(y, x, c)| image.get_pixel(x as u32, y as u32)[c] as f32)
}

pub(crate) fn mask_to_array(mask: &GrayImage) -> Array3<f32> {
    let (w, h) = mask.dimensions();
    Array3::from_shape_fn((h as usize, w as usize, 1), |(y, x, _)| mask.get_pixel(x as u32, y as u32)[0] as f32 / 255.0)
}

pub(crate) fn array_to_rgb(array: &Array3<f32>) -> RgbImage {
    let (h, w, _) = array.dim();
    RgbImage::from_fn(w as u32, h as u32, |x, y| {
        let px = |c: usize| array[[y as usize, x as usize, c]].round().clamp(0.0, 255.0) as u8;
        image::Rgb([px(0), px(1), px(2)])
    })
}

/// Reflect-101 border index: `-1 -> 1`, `n -> n - 2`.
fn reflect(i: isize, n: usize) -> usize {
    if n == 1 {
        return 0;
    }
    let last = n as isize - 1;
    let mut i = i;
    loop {
        if i < 0 {
            i = -i;
        } else if i > last {
            i = 2 * last - i;
        } else {
            return i as usize;
        }
    }
}

/// Separable 5-tap blur, each pass scaled by `gain`.
fn blur(src: &Array3<f32>, gain: f32) -> Array3<f32> {
    let (h, w, ch) = src.dim();
    let mut rows = Array3::<f32>::zeros((h, w, ch));
    for y in 0..h {
        for x in 0..w {
            for c in 0..ch {
                let mut acc = 0.0;
                for (k, weight) in KERNEL.iter().enumerate() {
                    let xi = reflect(x as isize + k as isize - 2, w);
                    acc += weight * src[[y, xi, c]];
                }
                rows[[y, x, c]] = acc * gain;
            }
        }
    }

    let mut out = Array3::<f32>::zeros((h, w, ch));
    for y in 0..h {
        for x in 0..w {
            for c in 0..ch {
                let mut acc = 0.0;
                for (k, weight) in KERNEL.iter().enumerate() {
                    let yi = reflect(y as isize + k as isize - 2, h);
                    acc += weight * rows[[yi, x, c]];
                }
                out[[y, x, c]] = acc * gain;
            }
        }
    }
    out
}

/// Blur then keep every other row and column: `(h, w) -> ((h+1)/2, (w+1)/2)`.
pub fn pyr_down(src: &Array3<f32>) -> Array3<f32> {
    let (h, w, ch) = src.dim();
    let blurred = blur(src, 1.0);
    Array3::from_shape_fn(((h + 1) / 2, (w + 1) / 2, ch), |(y, x, c)| blurred[[2 * y, 2 * x, c]])
}

/// Zero-insert to `(dst_h, dst_w)` then blur with gain 2 per axis.
pub fn pyr_up(src: &Array3<f32>, dst_h: usize, dst_w: usize) -> Array3<f32> {
    let (h, w, ch) = src.dim();
    let mut expanded = Array3::<f32>::zeros((dst_h, dst_w, ch));
    for y in 0..h.min(dst_h.div_ceil(2)) {
        for x in 0..w.min(dst_w.div_ceil(2)) {
            for c in 0..ch {
                expanded[[2 * y, 2 * x, c]] = src[[y, x, c]];
            }
        }
    }
    blur(&expanded, 2.0)
}

/// Number of Gaussian levels actually built for an image of this size.
pub fn effective_levels(height: usize, width: usize, requested: usize) -> usize {
    let mut levels = 1;
    let (mut h, mut w) = (height, width);
    while levels < requested.max(1) && h > 1 && w > 1 {
        h = h.div_ceil(2);
        w = w.div_ceil(2);
        levels += 1;
    }
    levels
}

pub fn gaussian_pyramid(base: Array3<f32>, levels: usize) -> Vec<Array3<f32>> {
    let mut pyramid = Vec::with_capacity(levels);
    pyramid.push(base);
    while pyramid.len() < levels {
        let Some(last) = pyramid.last() else { break };
        let next = pyr_down(last);
        pyramid.push(next);
    }
    pyramid
}

/// Band-pass levels plus the coarsest Gaussian level as the last entry.
pub fn laplacian_pyramid(gaussian: &[Array3<f32>]) -> Vec<Array3<f32>> {
    let mut laplacian = Vec::with_capacity(gaussian.len());
    for pair in gaussian.windows(2) {
        let (fine, coarse) = (&pair[0], &pair[1]);
        let (h, w, _) = fine.dim();
        laplacian.push(fine - &pyr_up(coarse, h, w));
    }
    if let Some(coarsest) = gaussian.last() {
        laplacian.push(coarsest.clone());
    }
    laplacian
}

/// Collapse a Laplacian pyramid back into a full-resolution plane.
pub fn reconstruct(laplacian: &[Array3<f32>]) -> Option<Array3<f32>> {
    let (coarsest, finer) = laplacian.split_last()?;
    let mut current = coarsest.clone();
    for level in finer.iter().rev() {
        let (h, w, _) = level.dim();
        current = pyr_up(&current, h, w) + level;
    }
    Some(current)
}

/// Blend the band-pass levels of `modified` and `original` with the
/// Gaussian pyramid of `mask`, then collapse.
pub fn multi_res_blend(
    modified: &RgbImage,
    original: &RgbImage,
    mask: &GrayImage,
    levels: usize,
) -> Result<RgbImage, BlendError> {
    check_dimensions(modified, original, mask)?;
    let (w, h) = original.dimensions();
    if w == 0 || h == 0 {
        return Ok(original.clone());
    }

    let levels = effective_levels(h as usize, w as usize, levels);
    let lap_mod = laplacian_pyramid(&gaussian_pyramid(rgb_to_array(modified), levels));
    let lap_orig = laplacian_pyramid(&gaussian_pyramid(rgb_to_array(original), levels));
    let mask_pyr = gaussian_pyramid(mask_to_array(mask), levels);

    tracing::debug!(levels, width = w, height = h, "multi-resolution blend");

    let mut blended = Vec::with_capacity(levels);
    for ((l_mod, l_orig), m) in lap_mod.iter().zip(&lap_orig).zip(&mask_pyr) {
        let weights = m.broadcast(l_mod.dim()).ok_or(BlendError::DimensionMismatch {
            what: "mask pyramid level",
            expected: (l_mod.dim().1 as u32, l_mod.dim().0 as u32),
            actual: (m.dim().1 as u32, m.dim().0 as u32),
        })?;
        let mut level = l_orig.clone();
        Zip::from(&mut level).and(l_mod).and(&weights).for_each(|o, &a, &wt| {
            *o = a * wt + *o * (1.0 - wt);
        });
        blended.push(level);
    }

    let collapsed = reconstruct(&blended).ok_or(BlendError::DimensionMismatch {
        what: "pyramid",
        expected: (w, h),
        actual: (0, 0),
    })?;
    Ok(array_to_rgb(&collapsed))
}

pub struct PyramidBlender {
    levels: usize,
}

impl PyramidBlender {
    pub fn new(levels: usize) -> Self {
        Self { levels: levels.max(1) }
    }
}

impl Default for PyramidBlender {
    fn default() -> Self {
        Self::new(DEFAULT_LEVELS)
    }
}

impl Blender for PyramidBlender {
    fn name(&self) -> &'static str {
        "multi_res"
    }

    fn blend(&self, modified: &RgbImage, original: &RgbImage, mask: &GrayImage) -> Result<RgbImage, BlendError> {
        multi_res_blend(modified, original, mask, self.levels)
    }
}
