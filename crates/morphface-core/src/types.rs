use crate::landmarks::LandmarkError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

/// A 2D point in image coordinates (x right, y down).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Reflect about the vertical line `x = axis`.
    pub fn mirrored(&self, axis: f32) -> Self {
        Self::new(2.0 * axis - self.x, self.y)
    }
}

impl std::ops::Add for Point {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub for Point {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::Mul<f32> for Point {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self::Output {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

/// Named anatomical region of the 68-point landmark convention.
///
/// Each feature owns a fixed, contiguous range of landmark indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "&'static str")]
pub enum Feature {
    Jaw,
    RightEyebrow,
    LeftEyebrow,
    Nose,
    RightEye,
    LeftEye,
    OuterLip,
    InnerLip,
}

impl Feature {
    pub const ALL: [Feature; 8] = [
        Feature::Jaw,
        Feature::RightEyebrow,
        Feature::LeftEyebrow,
        Feature::Nose,
        Feature::RightEye,
        Feature::LeftEye,
        Feature::OuterLip,
        Feature::InnerLip,
    ];

    /// Landmark indices owned by this feature (inclusive).
    pub const fn index_range(self) -> RangeInclusive<u32> {
        match self {
            Feature::Jaw => 0..=16,
            Feature::RightEyebrow => 17..=21,
            Feature::LeftEyebrow => 22..=26,
            Feature::Nose => 27..=35,
            Feature::RightEye => 36..=41,
            Feature::LeftEye => 42..=47,
            Feature::OuterLip => 48..=59,
            Feature::InnerLip => 60..=67,
        }
    }

    pub fn point_count(self) -> usize {
        let range = self.index_range();
        (range.end() - range.start() + 1) as usize
    }

    /// The feature a landmark index belongs to, if any.
    pub fn from_landmark_index(index: u32) -> Option<Feature> {
        Self::ALL
            .into_iter()
            .find(|f| f.index_range().contains(&index))
    }

    pub fn ordinal(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            Feature::Jaw => "Jaw",
            Feature::RightEyebrow => "Right_Eyebrow",
            Feature::LeftEyebrow => "Left_Eyebrow",
            Feature::Nose => "Nose",
            Feature::RightEye => "Right_Eye",
            Feature::LeftEye => "Left_Eye",
            Feature::OuterLip => "Outer_Lip",
            Feature::InnerLip => "Inner_Lip",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Feature {
    type Err = LandmarkError;

    /// Accepts the canonical name in any case, with or without separators,
    /// a few common aliases, or the enumeration ordinal.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, '_' | ' ' | '-'))
            .map(|c| c.to_ascii_lowercase())
            .collect();

        if let Ok(ordinal) = key.parse::<usize>() {
            return Self::ALL
                .get(ordinal)
                .copied()
                .ok_or_else(|| LandmarkError::InvalidFeature(s.to_string()));
        }

        match key.as_str() {
            "jaw" | "jawline" => Ok(Feature::Jaw),
            "righteyebrow" => Ok(Feature::RightEyebrow),
            "lefteyebrow" => Ok(Feature::LeftEyebrow),
            "nose" => Ok(Feature::Nose),
            "righteye" => Ok(Feature::RightEye),
            "lefteye" => Ok(Feature::LeftEye),
            "outerlip" | "lips" | "mouth" => Ok(Feature::OuterLip),
            "innerlip" => Ok(Feature::InnerLip),
            _ => Err(LandmarkError::InvalidFeature(s.to_string())),
        }
    }
}

impl TryFrom<String> for Feature {
    type Error = LandmarkError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Feature> for &'static str {
    fn from(value: Feature) -> Self {
        value.name()
    }
}

/// One detector output row: a single landmark of one feature in one image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LandmarkRecord {
    pub image_id: u32,
    pub feature: Feature,
    pub landmark_index: u32,
    pub x: f32,
    pub y: f32,
}

impl LandmarkRecord {
    pub fn point(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// Axis-aligned pixel box. `x_min`/`y_min` are inclusive, `x_max`/`y_max`
/// exclusive, so `width() = x_max - x_min`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: u32,
    pub y_min: u32,
    pub x_max: u32,
    pub y_max: u32,
}

impl BoundingBox {
    pub fn width(&self) -> u32 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> u32 {
        self.y_max - self.y_min
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x_min && x < self.x_max && y >= self.y_min && y < self.y_max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_ranges_cover_68_points() {
        let total: usize = Feature::ALL.iter().map(|f| f.point_count()).sum();
        assert_eq!(total, 68);
        for index in 0..68 {
            assert!(Feature::from_landmark_index(index).is_some(), "index {index} unmapped");
        }
        assert!(Feature::from_landmark_index(68).is_none());
    }

    #[test]
    fn test_feature_parse_names_and_aliases() {
        assert_eq!("Right_Eye".parse::<Feature>().unwrap(), Feature::RightEye);
        assert_eq!("left eyebrow".parse::<Feature>().unwrap(), Feature::LeftEyebrow);
        assert_eq!("NOSE".parse::<Feature>().unwrap(), Feature::Nose);
        assert_eq!("jawline".parse::<Feature>().unwrap(), Feature::Jaw);
        assert_eq!("mouth".parse::<Feature>().unwrap(), Feature::OuterLip);
        assert_eq!("3".parse::<Feature>().unwrap(), Feature::Nose);
    }

    #[test]
    fn test_feature_parse_unknown() {
        assert!(matches!(
            "forehead".parse::<Feature>(),
            Err(LandmarkError::InvalidFeature(name)) if name == "forehead"
        ));
        assert!("8".parse::<Feature>().is_err());
    }

    #[test]
    fn test_feature_serde_roundtrip_uses_canonical_name() {
        let json = serde_json::to_string(&Feature::LeftEye).unwrap();
        assert_eq!(json, "\"Left_Eye\"");
        let parsed: Feature = serde_json::from_str("\"left_eye\"").unwrap();
        assert_eq!(parsed, Feature::LeftEye);
    }

    #[test]
    fn test_point_mirror() {
        let p = Point::new(10.0, 5.0).mirrored(50.0);
        assert_eq!(p, Point::new(90.0, 5.0));
    }
}
