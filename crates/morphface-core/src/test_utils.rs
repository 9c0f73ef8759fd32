//! Shared synthetic fixtures for unit tests.

use crate::types::{Feature, LandmarkRecord, Point};
use image::{Rgb, RgbImage};

/// Vertical symmetry axis of [`synthetic_face`] at scale 1.0.
pub(crate) const FACE_AXIS: f32 = 250.0;

/// Nominal image side the synthetic face is laid out for at scale 1.0.
pub(crate) const FACE_CANVAS: u32 = 500;

/// Landmark index mirrored across the face's vertical axis.
fn mirror_index(i: u32) -> u32 {
    match i {
        0..=16 => 16 - i,
        17..=26 => 43 - i,
        27..=30 => i,
        31..=35 => 66 - i,
        36..=39 | 42..=45 => 81 - i,
        40..=41 | 46..=47 => 87 - i,
        48..=54 => 102 - i,
        55..=59 => 114 - i,
        60..=64 => 124 - i,
        _ => 132 - i,
    }
}

/// A frontal 68-point face, exactly symmetric about `x = FACE_AXIS * scale`.
pub(crate) fn synthetic_face(image_id: u32, scale: f32) -> Vec<LandmarkRecord> {
    let mut pts: [Option<Point>; 68] = [None; 68];

    for i in 0..=8u32 {
        let t = i as f32 / 16.0;
        pts[i as usize] = Some(Point::new(130.0 + 240.0 * t, 250.0 + 140.0 * (std::f32::consts::PI * t).sin()));
    }
    // exact axis point for the chin
    pts[8] = Some(Point::new(FACE_AXIS, 390.0));

    let base: &[(usize, f32, f32)] = &[
        (17, 160.0, 190.0),
        (18, 175.0, 182.0),
        (19, 190.0, 180.0),
        (20, 205.0, 182.0),
        (21, 220.0, 188.0),
        (27, 250.0, 200.0),
        (28, 250.0, 220.0),
        (29, 250.0, 240.0),
        (30, 250.0, 260.0),
        (31, 230.0, 275.0),
        (32, 240.0, 278.0),
        (33, 250.0, 280.0),
        (36, 170.0, 220.0),
        (37, 182.0, 212.0),
        (38, 198.0, 212.0),
        (39, 210.0, 220.0),
        (40, 198.0, 227.0),
        (41, 182.0, 227.0),
        (48, 215.0, 330.0),
        (49, 228.0, 322.0),
        (50, 240.0, 318.0),
        (51, 250.0, 320.0),
        (57, 250.0, 350.0),
        (58, 238.0, 348.0),
        (59, 225.0, 342.0),
        (60, 222.0, 331.0),
        (61, 238.0, 327.0),
        (62, 250.0, 328.0),
        (66, 250.0, 336.0),
        (67, 238.0, 335.0),
    ];
    for &(i, x, y) in base {
        pts[i] = Some(Point::new(x, y));
    }

    for i in 0..68u32 {
        if pts[i as usize].is_none() {
            let twin = pts[mirror_index(i) as usize].map(|p| p.mirrored(FACE_AXIS));
            pts[i as usize] = twin;
        }
    }

    pts.iter()
        .enumerate()
        .filter_map(|(i, p)| {
            let p = (*p)?;
            let index = i as u32;
            Some(LandmarkRecord {
                image_id,
                feature: Feature::from_landmark_index(index)?,
                landmark_index: index,
                x: p.x * scale,
                y: p.y * scale,
            })
        })
        .collect()
}

/// Smooth colour gradient with some texture, so resizes are observable.
pub(crate) fn textured_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([
            (x * 255 / width.max(1)) as u8,
            (y * 255 / height.max(1)) as u8,
            (((x / 4 + y / 4) % 2) * 120 + 60) as u8,
        ])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_face_is_complete() {
        let face = synthetic_face(7, 1.0);
        assert_eq!(face.len(), 68);
        assert!(face.iter().all(|r| r.image_id == 7));
        assert!(face.iter().all(|r| r.x > 0.0 && r.x < FACE_CANVAS as f32));
    }

    #[test]
    fn test_mirror_index_is_involution() {
        for i in 0..68 {
            assert_eq!(mirror_index(mirror_index(i)), i);
        }
    }
}
