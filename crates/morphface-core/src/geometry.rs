//! Region geometry: margin boxes and the expanded eye polygons.
//!
//! Eye expansion works on named contour points instead of raw landmark
//! offsets. Each eye's upper contour (outer corner, two upper-lid points,
//! inner corner) is paired with its eyebrow; the eye-to-brow vectors give
//! the vertical room above the eye, the jaw and nose bridge give the
//! horizontal room on the outer and inner side.

use crate::types::{BoundingBox, Feature, Point};
use serde::Serialize;
use thiserror::Error;

const EYE_POINTS: usize = 6;
const BROW_POINTS: usize = 5;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("degenerate region ({x_min}, {y_min})-({x_max}, {y_max}) after margins and clipping")]
    InvalidRegion { x_min: i64, y_min: i64, x_max: i64, y_max: i64 },
    #[error("region has no points")]
    NoPoints,
    #[error("margin factors must lie in [0, 1], got width={width} height={height}")]
    InvalidMargin { width: f32, height: f32 },
    #[error("{feature} contour needs {expected} points, found {found}")]
    IncompleteContour { feature: Feature, expected: usize, found: usize },
    #[error("missing {0} anchor point")]
    MissingAnchor(Feature),
    #[error("region point ({x}, {y}) lies too far outside the {width}x{height} image")]
    OutOfFrame { x: f32, y: f32, width: u32, height: u32 },
}

/// Bounding box of `points`, padded by a fraction of its own size and
/// clipped to the image.
///
/// Coordinates are truncated to whole pixels before padding; the padded box
/// keeps `x_max`/`y_max` exclusive.
pub fn margin_box(
    points: &[Point],
    width_margin_factor: f32,
    height_margin_factor: f32,
    image_width: u32,
    image_height: u32,
) -> Result<BoundingBox, GeometryError> {
    let valid = |f: f32| f.is_finite() && (0.0..=1.0).contains(&f);
    if !valid(width_margin_factor) || !valid(height_margin_factor) {
        return Err(GeometryError::InvalidMargin {
            width: width_margin_factor,
            height: height_margin_factor,
        });
    }
    let first = points.first().ok_or(GeometryError::NoPoints)?;

    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in &points[1..] {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }

    let (x_min, y_min) = (min_x.floor() as i64, min_y.floor() as i64);
    let (x_max, y_max) = (max_x.floor() as i64, max_y.floor() as i64);
    if x_min >= x_max || y_min >= y_max {
        return Err(GeometryError::InvalidRegion { x_min, y_min, x_max, y_max });
    }

    let width_margin = ((x_max - x_min) as f32 * width_margin_factor).floor() as i64;
    let height_margin = ((y_max - y_min) as f32 * height_margin_factor).floor() as i64;

    let x_min = (x_min - width_margin).max(0);
    let y_min = (y_min - height_margin).max(0);
    let x_max = (x_max + width_margin).min(image_width as i64);
    let y_max = (y_max + height_margin).min(image_height as i64);

    if x_max - x_min <= 0 || y_max - y_min <= 0 {
        return Err(GeometryError::InvalidRegion { x_min, y_min, x_max, y_max });
    }

    Ok(BoundingBox {
        x_min: x_min as u32,
        y_min: y_min as u32,
        x_max: x_max as u32,
        y_max: y_max as u32,
    })
}

/// Which eye, from the subject's point of view. The subject's right eye
/// appears on the image's left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EyeSide {
    Right,
    Left,
}

impl EyeSide {
    /// Sign of the image x-axis pointing away from the nose.
    pub fn outward(self) -> f32 {
        match self {
            EyeSide::Right => -1.0,
            EyeSide::Left => 1.0,
        }
    }

    pub fn eye_feature(self) -> Feature {
        match self {
            EyeSide::Right => Feature::RightEye,
            EyeSide::Left => Feature::LeftEye,
        }
    }

    pub fn brow_feature(self) -> Feature {
        match self {
            EyeSide::Right => Feature::RightEyebrow,
            EyeSide::Left => Feature::LeftEyebrow,
        }
    }
}

/// Six-point eye outline with anatomical names.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeContour {
    pub outer_corner: Point,
    /// Upper lid, outer side first.
    pub upper_lid: [Point; 2],
    pub inner_corner: Point,
    /// Lower lid, inner side first.
    pub lower_lid: [Point; 2],
}

impl EyeContour {
    /// Build from the six landmarks of one eye in ascending index order.
    pub fn from_points(side: EyeSide, points: &[Point]) -> Result<Self, GeometryError> {
        let p: &[Point; EYE_POINTS] = points.try_into().map_err(|_| GeometryError::IncompleteContour {
            feature: side.eye_feature(),
            expected: EYE_POINTS,
            found: points.len(),
        })?;

        Ok(match side {
            // 36 outer, 37-38 upper, 39 inner, 40-41 lower (inner to outer)
            EyeSide::Right => Self {
                outer_corner: p[0],
                upper_lid: [p[1], p[2]],
                inner_corner: p[3],
                lower_lid: [p[4], p[5]],
            },
            // 42 inner, 43-44 upper, 45 outer, 46-47 lower (outer to inner)
            EyeSide::Left => Self {
                outer_corner: p[3],
                upper_lid: [p[2], p[1]],
                inner_corner: p[0],
                lower_lid: [p[5], p[4]],
            },
        })
    }

    /// Closed outline: outer corner, upper lid, inner corner, lower lid.
    pub fn outline(&self) -> [Point; EYE_POINTS] {
        [
            self.outer_corner,
            self.upper_lid[0],
            self.upper_lid[1],
            self.inner_corner,
            self.lower_lid[0],
            self.lower_lid[1],
        ]
    }
}

/// Five eyebrow points ordered from the temple towards the nose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrowArc {
    pub points: [Point; BROW_POINTS],
}

impl BrowArc {
    pub fn from_points(side: EyeSide, points: &[Point]) -> Result<Self, GeometryError> {
        let p: [Point; BROW_POINTS] = points.try_into().map_err(|_| GeometryError::IncompleteContour {
            feature: side.brow_feature(),
            expected: BROW_POINTS,
            found: points.len(),
        })?;

        let points = match side {
            EyeSide::Right => p,
            EyeSide::Left => [p[4], p[3], p[2], p[1], p[0]],
        };
        Ok(Self { points })
    }

    /// Brow points facing the eye's upper contour, outer corner first.
    /// The brow point next to the inner end has no eye counterpart.
    fn over_upper_contour(&self) -> [Point; 4] {
        [self.points[0], self.points[1], self.points[2], self.points[4]]
    }
}

/// Derived mask polygons for one eye.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EyeRegion {
    pub side: EyeSide,
    /// Eye outline pushed part-way towards the brow, jaw, and nose.
    pub reduced: [Point; EYE_POINTS],
    /// `reduced` with the outer corner and lower-outer point moved further
    /// towards the jaw, covering the surrounding skin.
    pub widened: [Point; EYE_POINTS],
    /// Horizontal shift applied to the outer corner of `reduced`.
    pub outer_shift: f32,
}

/// Expand one eye outline into its reduced and widened polygons.
///
/// `jaw_anchor` is the jaw point on the same side of the face,
/// `nose_bridge` the top of the nose.
pub fn expand_eye(
    side: EyeSide,
    eye: &EyeContour,
    brow: &BrowArc,
    jaw_anchor: Point,
    nose_bridge: Point,
) -> EyeRegion {
    let out = side.outward();
    let upper = [eye.outer_corner, eye.upper_lid[0], eye.upper_lid[1], eye.inner_corner];
    let over = brow.over_upper_contour();

    let mut shift: [Point; 4] = std::array::from_fn(|i| upper[i] - over[i]);

    // Horizontal room comes from the face, not the brow width.
    let jaw_gap = (jaw_anchor.x - eye.outer_corner.x).abs();
    let nose_gap = (eye.inner_corner.x - nose_bridge.x).abs();
    shift[0].x = -out * jaw_gap / 2.0;
    shift[3].x = out * nose_gap / 2.0;

    let lower_drop = shift.iter().map(|s| s.y).fold(f32::NEG_INFINITY, f32::max);
    let shift = shift.map(|s| s * 0.5);

    let lower_inner_shift = Point::new(-shift[0].x, -lower_drop);
    let lower_outer_shift = Point::new(-out * jaw_gap / 2.0, -lower_drop / 2.0);

    let reduced = [
        upper[0] - shift[0],
        upper[1] - shift[1],
        upper[2] - shift[2],
        upper[3] - shift[3],
        eye.lower_lid[0] - lower_inner_shift,
        eye.lower_lid[1] - lower_outer_shift,
    ];

    let mut widened = reduced;
    let outer_gap = (jaw_anchor.x - widened[0].x).abs();
    widened[0].x += out * outer_gap / 2.0;
    let remaining_gap = (jaw_anchor.x - widened[0].x).abs();
    widened[5].x += out * remaining_gap;

    EyeRegion {
        side,
        reduced,
        widened,
        outer_shift: shift[0].x.abs(),
    }
}

/// Both eye regions of a face.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EyePair {
    pub right: EyeRegion,
    pub left: EyeRegion,
}

impl EyePair {
    pub fn reduced(&self) -> [&[Point]; 2] {
        [&self.right.reduced, &self.left.reduced]
    }

    pub fn widened(&self) -> [&[Point]; 2] {
        [&self.right.widened, &self.left.widened]
    }

    /// Reject regions with a vertex outside `[-w, 2w] x [-h, 2h]`.
    ///
    /// Such vertices only arise from broken landmarks and would turn the
    /// polygon masks into near-empty or image-filling shapes.
    pub fn check_frame(&self, width: u32, height: u32) -> Result<(), GeometryError> {
        let (w, h) = (width as f32, height as f32);
        let inside = |p: &Point| (-w..=2.0 * w).contains(&p.x) && (-h..=2.0 * h).contains(&p.y);
        for region in [&self.right, &self.left] {
            if let Some(p) = region.reduced.iter().chain(&region.widened).find(|p| !inside(p)) {
                return Err(GeometryError::OutOfFrame { x: p.x, y: p.y, width, height });
            }
        }
        Ok(())
    }
}

/// Derive both eye regions from the landmark point sequences of a face.
pub fn eye_regions(
    right_eye: &[Point],
    left_eye: &[Point],
    right_brow: &[Point],
    left_brow: &[Point],
    jaw: &[Point],
    nose: &[Point],
) -> Result<EyePair, GeometryError> {
    let jaw_right = *jaw.first().ok_or(GeometryError::MissingAnchor(Feature::Jaw))?;
    let jaw_left = *jaw.last().ok_or(GeometryError::MissingAnchor(Feature::Jaw))?;
    let nose_bridge = *nose.first().ok_or(GeometryError::MissingAnchor(Feature::Nose))?;

    let right = expand_eye(
        EyeSide::Right,
        &EyeContour::from_points(EyeSide::Right, right_eye)?,
        &BrowArc::from_points(EyeSide::Right, right_brow)?,
        jaw_right,
        nose_bridge,
    );
    let left = expand_eye(
        EyeSide::Left,
        &EyeContour::from_points(EyeSide::Left, left_eye)?,
        &BrowArc::from_points(EyeSide::Left, left_brow)?,
        jaw_left,
        nose_bridge,
    );

    tracing::debug!(
        right_outer_shift = right.outer_shift,
        left_outer_shift = left.outer_shift,
        "eye regions derived"
    );
    Ok(EyePair { right, left })
}
