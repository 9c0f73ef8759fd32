//! Landmark records, the per-feature accessor, and the detector seam.
//!
//! The detector itself is an external collaborator. Its output is a flat
//! table of `(image_id, feature, landmark_index, x, y)` rows, loaded here
//! from CSV or JSON, or produced by any [`LandmarkDetector`] implementation.

use crate::types::{Feature, LandmarkRecord, Point};
use image::RgbImage;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

const CSV_HEADER_PREFIX: &str = "image";

#[derive(Error, Debug)]
pub enum LandmarkError {
    #[error("no {feature} landmarks for image {image_id}")]
    NotFound { image_id: u32, feature: Feature },
    #[error("no landmarks at all for image {0}")]
    NoImageLandmarks(u32),
    #[error("unknown facial feature: {0:?}")]
    InvalidFeature(String),
    #[error("malformed landmark record on line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Source of landmark records for an image.
///
/// Injected into the pipeline at construction time; a detector is shared
/// read-only across batch workers.
pub trait LandmarkDetector: Send + Sync {
    fn detect(&self, image_id: u32, image: &RgbImage) -> Result<Vec<LandmarkRecord>, LandmarkError>;
}

/// Points of `feature` in `image_id`, ordered by ascending landmark index.
pub fn get_points(
    records: &[LandmarkRecord],
    image_id: u32,
    feature: Feature,
) -> Result<Vec<Point>, LandmarkError> {
    let range = feature.index_range();
    let mut matching: Vec<&LandmarkRecord> = records
        .iter()
        .filter(|r| r.image_id == image_id && range.contains(&r.landmark_index))
        .collect();

    if matching.is_empty() {
        return Err(LandmarkError::NotFound { image_id, feature });
    }

    matching.sort_by_key(|r| r.landmark_index);
    Ok(matching.into_iter().map(LandmarkRecord::point).collect())
}

/// Same as [`get_points`], with the feature given by name.
pub fn get_points_by_name(
    records: &[LandmarkRecord],
    image_id: u32,
    feature: &str,
) -> Result<Vec<Point>, LandmarkError> {
    get_points(records, image_id, feature.parse()?)
}

/// All landmarks of one image, with typed per-feature access.
#[derive(Debug, Clone)]
pub struct FaceLandmarks {
    image_id: u32,
    records: Vec<LandmarkRecord>,
}

impl FaceLandmarks {
    /// Fails with [`LandmarkError::NoImageLandmarks`] if no record belongs to `image_id`.
    pub fn new(image_id: u32, records: Vec<LandmarkRecord>) -> Result<Self, LandmarkError> {
        let records: Vec<_> = records.into_iter().filter(|r| r.image_id == image_id).collect();
        if records.is_empty() {
            return Err(LandmarkError::NoImageLandmarks(image_id));
        }
        Ok(Self { image_id, records })
    }

    pub fn image_id(&self) -> u32 {
        self.image_id
    }

    pub fn points(&self, feature: Feature) -> Result<Vec<Point>, LandmarkError> {
        get_points(&self.records, self.image_id, feature)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// The detector's exported table, held in memory and shared read-only.
#[derive(Debug, Clone, Default)]
pub struct LandmarkTable {
    by_image: BTreeMap<u32, Vec<LandmarkRecord>>,
}

impl LandmarkTable {
    pub fn from_records(records: impl IntoIterator<Item = LandmarkRecord>) -> Self {
        let mut by_image: BTreeMap<u32, Vec<LandmarkRecord>> = BTreeMap::new();
        for record in records {
            by_image.entry(record.image_id).or_default().push(record);
        }
        Self { by_image }
    }

    /// Load a table from `.json` or `.csv` (decided by extension, CSV otherwise).
    pub fn load(path: &Path) -> Result<Self, LandmarkError> {
        let text = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));

        let table = if is_json {
            Self::from_json(&text)?
        } else {
            Self::from_csv(&text)?
        };

        tracing::info!(
            path = %path.display(),
            images = table.image_count(),
            records = table.record_count(),
            "loaded landmark table"
        );
        Ok(table)
    }

    pub fn from_json(text: &str) -> Result<Self, LandmarkError> {
        let records: Vec<LandmarkRecord> = serde_json::from_str(text)?;
        for (i, record) in records.iter().enumerate() {
            check_index(record, i + 1)?;
        }
        Ok(Self::from_records(records))
    }

    /// Parse `Image ID,Feature,Landmark Index,X,Y` rows. The header line is
    /// optional; blank lines are ignored.
    pub fn from_csv(text: &str) -> Result<Self, LandmarkError> {
        let mut records = Vec::new();

        for (i, raw) in text.lines().enumerate() {
            let line_no = i + 1;
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            if i == 0 && line.to_ascii_lowercase().starts_with(CSV_HEADER_PREFIX) {
                continue;
            }

            let fields: Vec<&str> = line.split(',').map(str::trim).collect();
            if fields.len() != 5 {
                return Err(LandmarkError::MalformedRecord {
                    line: line_no,
                    reason: format!("expected 5 fields, got {}", fields.len()),
                });
            }

            let record = LandmarkRecord {
                image_id: parse_field(fields[0], "image id", line_no)?,
                feature: fields[1].parse().map_err(|e: LandmarkError| {
                    LandmarkError::MalformedRecord { line: line_no, reason: e.to_string() }
                })?,
                landmark_index: parse_field(fields[2], "landmark index", line_no)?,
                x: parse_field(fields[3], "x", line_no)?,
                y: parse_field(fields[4], "y", line_no)?,
            };
            check_index(&record, line_no)?;
            records.push(record);
        }

        Ok(Self::from_records(records))
    }

    pub fn records_for(&self, image_id: u32) -> &[LandmarkRecord] {
        self.by_image.get(&image_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn image_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.by_image.keys().copied()
    }

    pub fn image_count(&self) -> usize {
        self.by_image.len()
    }

    pub fn record_count(&self) -> usize {
        self.by_image.values().map(Vec::len).sum()
    }
}

impl LandmarkDetector for LandmarkTable {
    fn detect(&self, image_id: u32, _image: &RgbImage) -> Result<Vec<LandmarkRecord>, LandmarkError> {
        let records = self.records_for(image_id);
        if records.is_empty() {
            return Err(LandmarkError::NoImageLandmarks(image_id));
        }
        Ok(records.to_vec())
    }
}

fn parse_field<T: std::str::FromStr>(raw: &str, what: &str, line: usize) -> Result<T, LandmarkError> {
    // Numeric exports sometimes write integer columns as floats ("12.0").
    raw.parse::<T>()
        .or_else(|_| {
            raw.parse::<f64>()
                .ok()
                .filter(|v| v.fract() == 0.0)
                .and_then(|v| format!("{}", v as i64).parse::<T>().ok())
                .ok_or(())
        })
        .map_err(|_| LandmarkError::MalformedRecord {
            line,
            reason: format!("invalid {what}: {raw:?}"),
        })
}

fn check_index(record: &LandmarkRecord, line: usize) -> Result<(), LandmarkError> {
    if record.feature.index_range().contains(&record.landmark_index) {
        Ok(())
    } else {
        Err(LandmarkError::MalformedRecord {
            line,
            reason: format!(
                "landmark index {} outside {} range {:?}",
                record.landmark_index,
                record.feature,
                record.feature.index_range()
            ),
        })
    }
}
