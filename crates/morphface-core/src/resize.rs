//! Feature resizing: crop a landmark region, scale it, and paste it back
//! centred on the original box.

use crate::geometry::{margin_box, GeometryError};
use crate::types::Point;
use image::{imageops, Rgb, RgbImage};
use thiserror::Error;

/// Largest accepted feature scale factor.
pub const MAX_SCALE_FACTOR: f32 = 3.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResizeError {
    #[error("invalid scale factor {0}: must lie in (0, 3] and keep the region non-empty")]
    InvalidScale(f32),
    #[error("feature region is empty")]
    EmptyRegion,
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// Whether `scale` is a usable feature scale factor.
pub fn is_valid_scale(scale: f32) -> bool {
    scale.is_finite() && scale > 0.0 && scale <= MAX_SCALE_FACTOR
}

/// Resize an RGB image with bilinear interpolation on pixel centres.
///
/// Resizing to the same dimensions reproduces the input exactly.
pub fn resize_bilinear(src: &RgbImage, new_w: u32, new_h: u32) -> RgbImage {
    let (width, height) = (src.width() as usize, src.height() as usize);
    let (new_w, new_h) = (new_w as usize, new_h as usize);
    if width == 0 || height == 0 || new_w == 0 || new_h == 0 {
        return RgbImage::new(new_w as u32, new_h as u32);
    }

    let inv_scale_x = width as f32 / new_w as f32;
    let inv_scale_y = height as f32 / new_h as f32;
    let frame = src.as_raw();
    let mut resized = vec![0u8; new_w * new_h * 3];

    for y in 0..new_h {
        let src_y = (y as f32 + 0.5) * inv_scale_y - 0.5;
        let y0 = (src_y.floor() as i32).clamp(0, height as i32 - 1) as usize;
        let y1 = (y0 + 1).min(height - 1);
        let fy = (src_y - src_y.floor()).clamp(0.0, 1.0);

        for x in 0..new_w {
            let src_x = (x as f32 + 0.5) * inv_scale_x - 0.5;
            let x0 = (src_x.floor() as i32).clamp(0, width as i32 - 1) as usize;
            let x1 = (x0 + 1).min(width - 1);
            let fx = (src_x - src_x.floor()).clamp(0.0, 1.0);

            for c in 0..3 {
                let tl = frame[(y0 * width + x0) * 3 + c] as f32;
                let tr = frame[(y0 * width + x1) * 3 + c] as f32;
                let bl = frame[(y1 * width + x0) * 3 + c] as f32;
                let br = frame[(y1 * width + x1) * 3 + c] as f32;

                let val = tl * (1.0 - fx) * (1.0 - fy)
                    + tr * fx * (1.0 - fy)
                    + bl * (1.0 - fx) * fy
                    + br * fx * fy;

                resized[(y * new_w + x) * 3 + c] = val.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    RgbImage::from_raw(new_w as u32, new_h as u32, resized)
        .unwrap_or_else(|| RgbImage::new(new_w as u32, new_h as u32))
}

/// Scale the margin box around `region_points` by `scale_factor` and paste
/// the result back, centred on the original box.
///
/// The paste offset is `box_origin + (box_size - scaled_size) / 2` with
/// floor division; anything falling outside the image is clipped.
pub fn resize_and_overlay(
    image: &RgbImage,
    region_points: &[Point],
    scale_factor: f32,
    width_margin_factor: f32,
    height_margin_factor: f32,
) -> Result<RgbImage, ResizeError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(ResizeError::EmptyRegion);
    }
    if !is_valid_scale(scale_factor) {
        return Err(ResizeError::InvalidScale(scale_factor));
    }

    let region = margin_box(
        region_points,
        width_margin_factor,
        height_margin_factor,
        image.width(),
        image.height(),
    )?;

    let crop = imageops::crop_imm(image, region.x_min, region.y_min, region.width(), region.height()).to_image();
    if crop.width() == 0 || crop.height() == 0 {
        return Err(ResizeError::EmptyRegion);
    }

    let scaled_w = (crop.width() as f32 * scale_factor).floor() as i64;
    let scaled_h = (crop.height() as f32 * scale_factor).floor() as i64;
    if scaled_w <= 0 || scaled_h <= 0 {
        return Err(ResizeError::InvalidScale(scale_factor));
    }

    let scaled = resize_bilinear(&crop, scaled_w as u32, scaled_h as u32);
    let (offset_x, offset_y) = centred_offset(region.x_min, region.width(), scaled_w, region.y_min, region.height(), scaled_h);

    tracing::trace!(
        ?region,
        scaled_w,
        scaled_h,
        offset_x,
        offset_y,
        "feature resized"
    );

    let mut out = image.clone();
    imageops::replace(&mut out, &scaled, offset_x, offset_y);
    Ok(out)
}

fn centred_offset(x_min: u32, width: u32, scaled_w: i64, y_min: u32, height: u32, scaled_h: i64) -> (i64, i64) {
    (
        x_min as i64 + (width as i64 - scaled_w).div_euclid(2),
        y_min as i64 + (height as i64 - scaled_h).div_euclid(2),
    )
}

/// Pad `image` with black side borders and fit the result back to the
/// original size, squeezing the content horizontally.
pub fn pad_and_fit(image: &RgbImage, left: u32, right: u32) -> RgbImage {
    if left == 0 && right == 0 {
        return image.clone();
    }
    let (w, h) = image.dimensions();
    let mut padded = RgbImage::from_pixel(w + left + right, h, Rgb([0, 0, 0]));
    imageops::replace(&mut padded, image, left as i64, 0);
    resize_bilinear(&padded, w, h)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::textured_image;

    fn pts(coords: &[(f32, f32)]) -> Vec<Point> {
        coords.iter().map(|&(x, y)| Point::new(x, y)).collect()
    }

    #[test]
    fn test_resize_bilinear_identity() {
        let img = textured_image(37, 23);
        assert_eq!(resize_bilinear(&img, 37, 23), img);
    }

    #[test]
    fn test_resize_bilinear_uniform_stays_uniform() {
        let img = RgbImage::from_pixel(100, 100, Rgb([128, 64, 32]));
        let out = resize_bilinear(&img, 173, 61);
        assert_eq!(out.dimensions(), (173, 61));
        assert!(out.pixels().all(|p| *p == Rgb([128, 64, 32])));
    }

    #[test]
    fn test_scale_one_is_identity() {
        let img = textured_image(120, 90);
        let region = pts(&[(20.0, 15.0), (70.0, 60.0), (45.0, 30.0)]);
        for &(wm, hm) in &[(0.0, 0.0), (0.25, 0.4), (1.0, 1.0)] {
            let out = resize_and_overlay(&img, &region, 1.0, wm, hm).unwrap();
            assert_eq!(out, img, "margins ({wm}, {hm})");
        }
    }

    #[test]
    fn test_nose_scenario_offsets_and_content() {
        let img = textured_image(500, 500);
        let nose = pts(&[(100.0, 100.0), (150.0, 130.0), (200.0, 160.0)]);
        let out = resize_and_overlay(&img, &nose, 1.25, 0.0, 0.0).unwrap();

        let crop = imageops::crop_imm(&img, 100, 100, 100, 60).to_image();
        let expected = resize_bilinear(&crop, 125, 75);
        assert_eq!(expected.dimensions(), (125, 75));
        // 100 + floor(-25 / 2) = 87, 100 + floor(-15 / 2) = 92
        assert_eq!(centred_offset(100, 100, 125, 100, 60, 75), (87, 92));

        for y in 0..75 {
            for x in 0..125 {
                assert_eq!(out.get_pixel(87 + x, 92 + y), expected.get_pixel(x, y));
            }
        }
        // outside the pasted block the photo is untouched
        assert_eq!(out.get_pixel(10, 10), img.get_pixel(10, 10));
        assert_eq!(out.get_pixel(86, 120), img.get_pixel(86, 120));
    }

    #[test]
    fn test_shrink_leaves_original_around_block() {
        let img = textured_image(100, 100);
        let out = resize_and_overlay(&img, &pts(&[(20.0, 20.0), (60.0, 60.0)]), 0.5, 0.0, 0.0).unwrap();
        // 40x40 box -> 20x20 block at (30, 30); the ring around it keeps the original
        assert_eq!(out.get_pixel(25, 25), img.get_pixel(25, 25));
        assert_ne!(out, img);
    }

    #[test]
    fn test_overlay_clipped_at_image_border() {
        let img = textured_image(50, 50);
        let out = resize_and_overlay(&img, &pts(&[(0.0, 0.0), (40.0, 40.0)]), 2.0, 0.0, 0.0).unwrap();
        assert_eq!(out.dimensions(), (50, 50));
    }

    #[test]
    fn test_invalid_scale() {
        let img = textured_image(100, 100);
        let region = pts(&[(30.0, 30.0), (70.0, 70.0)]);
        for scale in [0.0, -1.0, 3.5, f32::NAN] {
            assert!(matches!(
                resize_and_overlay(&img, &region, scale, 0.3, 0.4),
                Err(ResizeError::InvalidScale(_))
            ));
        }
        // valid factor that collapses a 2-pixel box to nothing
        assert!(matches!(
            resize_and_overlay(&img, &pts(&[(10.0, 10.0), (12.0, 12.0)]), 0.1, 0.0, 0.0),
            Err(ResizeError::InvalidScale(_))
        ));
    }

    #[test]
    fn test_invalid_region_propagates() {
        let img = textured_image(100, 100);
        let err = resize_and_overlay(&img, &pts(&[(200.0, 200.0), (300.0, 300.0)]), 1.25, 0.3, 0.4).unwrap_err();
        assert!(matches!(err, ResizeError::Geometry(GeometryError::InvalidRegion { .. })));
        let err = resize_and_overlay(&img, &[], 1.25, 0.3, 0.4).unwrap_err();
        assert!(matches!(err, ResizeError::Geometry(GeometryError::NoPoints)));
        assert!(resize_and_overlay(&RgbImage::new(0, 0), &pts(&[(1.0, 1.0)]), 1.0, 0.0, 0.0).is_err());
    }

    #[test]
    fn test_pad_and_fit_keeps_size_and_darkens_padding() {
        let img = RgbImage::from_pixel(40, 20, Rgb([200, 200, 200]));
        let out = pad_and_fit(&img, 10, 10);
        assert_eq!(out.dimensions(), (40, 20));
        assert!(out.get_pixel(0, 10)[0] < 50);
        assert_eq!(out.get_pixel(20, 10)[0], 200);
        assert_eq!(pad_and_fit(&img, 0, 0), img);
    }
}
