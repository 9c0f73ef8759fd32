//! morphface-core: landmark-driven face region geometry and compositing.
//!
//! Resizes the nose, mouth, and eyes of a face photo around their 68-point
//! landmarks and blends the altered regions back with alpha, Laplacian
//! pyramid, or Poisson blending.

pub mod blend;
pub mod config;
pub mod geometry;
pub mod landmarks;
pub mod mask;
pub mod pipeline;
pub mod resize;
pub mod tone;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use blend::{BlendError, BlendStrategy, Blender, MaskKind};
pub use config::{AugmentConfig, ConfigError, ScaleProvider, ScaleTable};
pub use geometry::{eye_regions, margin_box, EyePair, EyeRegion, GeometryError};
pub use landmarks::{get_points, FaceLandmarks, LandmarkDetector, LandmarkError, LandmarkTable};
pub use pipeline::{AugmentOutcome, AugmentReport, Augmenter, BatchReport, ImageJob, PipelineError, StageKind};
pub use resize::{resize_and_overlay, ResizeError};
pub use types::{BoundingBox, Feature, LandmarkRecord, Point};
