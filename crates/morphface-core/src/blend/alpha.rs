//! Per-pixel linear interpolation through a mask.

use super::{check_dimensions, BlendError, Blender};
use image::{GrayImage, RgbImage};

/// `modified * m + original * (1 - m)` with `m = mask / 255`, per channel.
pub fn alpha_blend(modified: &RgbImage, original: &RgbImage, mask: &GrayImage) -> Result<RgbImage, BlendError> {
    check_dimensions(modified, original, mask)?;

    let mut out = original.clone();
    for ((dst, src), weight) in out.pixels_mut().zip(modified.pixels()).zip(mask.pixels()) {
        let m = weight[0] as f32 / 255.0;
        for c in 0..3 {
            let val = src[c] as f32 * m + dst[c] as f32 * (1.0 - m);
            dst[c] = val.round().clamp(0.0, 255.0) as u8;
        }
    }
    Ok(out)
}

pub struct AlphaBlender;

impl Blender for AlphaBlender {
    fn name(&self) -> &'static str {
        "alpha"
    }

    fn blend(&self, modified: &RgbImage, original: &RgbImage, mask: &GrayImage) -> Result<RgbImage, BlendError> {
        alpha_blend(modified, original, mask)
    }
}
