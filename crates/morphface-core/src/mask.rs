//! Blend masks: rectangles around a landmark box, filled convex polygons
//! smoothed by a morphological close, and Gaussian-feathered variants.
//!
//! Every mask is a single-channel image with the dimensions of the photo
//! it belongs to; blending broadcasts it across colour channels.

use crate::geometry::{margin_box, GeometryError};
use crate::types::Point;
use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::point::Point as PixelPoint;

/// Weight of a fully selected mask pixel.
pub const MASK_MAX: u8 = 255;

/// Default closing radius: a 41x41 square structuring element.
pub const DEFAULT_CLOSE_RADIUS: u8 = 20;

/// Largest Gaussian sigma applied to a mask. Blur cost grows linearly with
/// sigma, and beyond this a face-sized mask is already flat.
pub const MAX_FEATHER_SIGMA: f32 = 128.0;

/// Margin box of `points`, filled with [`MASK_MAX`] on a zero mask.
pub fn rectangular_mask(
    points: &[Point],
    width_margin_factor: f32,
    height_margin_factor: f32,
    width: u32,
    height: u32,
) -> Result<GrayImage, GeometryError> {
    let region = margin_box(points, width_margin_factor, height_margin_factor, width, height)?;
    let mut mask = GrayImage::new(width, height);
    for y in region.y_min..region.y_max {
        for x in region.x_min..region.x_max {
            mask.put_pixel(x, y, Luma([MASK_MAX]));
        }
    }
    Ok(mask)
}

/// Fill the convex hull of each polygon, then close the result with a
/// square element of side `2 * close_radius + 1`.
///
/// Polygons whose hull has fewer than three vertices enclose no area and
/// are skipped. Vertices are clamped to `[-w, 2w] x [-h, 2h]` so the hull
/// arithmetic stays within `i32`.
pub fn polygon_mask(width: u32, height: u32, polygons: &[&[Point]], close_radius: u8) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    if width == 0 || height == 0 {
        return mask;
    }
    let (w, h) = (width as f32, height as f32);
    let to_pixel = |v: f32, extent: f32| {
        let v = if v.is_nan() { 0.0 } else { v };
        v.clamp(-extent, 2.0 * extent).round() as i32
    };

    for polygon in polygons {
        let vertices: Vec<PixelPoint<i32>> = polygon
            .iter()
            .map(|p| PixelPoint::new(to_pixel(p.x, w), to_pixel(p.y, h)))
            .collect();
        if vertices.len() < 3 {
            tracing::debug!(vertices = vertices.len(), "skipping polygon without area");
            continue;
        }
        let hull = imageproc::geometry::convex_hull(vertices);
        if hull.len() < 3 {
            tracing::debug!(vertices = hull.len(), "skipping polygon without area");
            continue;
        }
        imageproc::drawing::draw_polygon_mut(&mut mask, &hull, Luma([MASK_MAX]));
    }

    if close_radius == 0 {
        return mask;
    }
    imageproc::morphology::close(&mask, Norm::LInf, close_radius)
}

/// Gaussian-feathered copy of `mask`; a non-positive sigma returns it unchanged.
///
/// Sigma is capped at [`MAX_FEATHER_SIGMA`].
pub fn feather(mask: &GrayImage, sigma: f32) -> GrayImage {
    if sigma.is_nan() || sigma <= 0.0 || mask.width() == 0 || mask.height() == 0 {
        return mask.clone();
    }
    imageproc::filter::gaussian_blur_f32(mask, sigma.min(MAX_FEATHER_SIGMA))
}

/// Share of pixels with non-zero weight.
pub fn coverage(mask: &GrayImage) -> f32 {
    let total = mask.as_raw().len();
    if total == 0 {
        return 0.0;
    }
    mask.as_raw().iter().filter(|&&v| v > 0).count() as f32 / total as f32
}
