//! Per-image augmentation pipeline and the parallel batch runner.
//!
//! Stages run in a fixed order on a progressively composited image:
//! nose, mouth, eyes, then tone adjustment. A failing stage is logged and
//! skipped; an image without landmarks is skipped by the batch runner.

use crate::blend::{BlendError, Blender, MaskKind};
use crate::config::{AugmentConfig, FeatureConfig, ScaleProvider};
use crate::geometry::{eye_regions, GeometryError};
use crate::landmarks::{FaceLandmarks, LandmarkDetector, LandmarkError};
use crate::mask::{feather, polygon_mask, rectangular_mask, MAX_FEATHER_SIGMA};
use crate::resize::{pad_and_fit, resize_and_overlay, ResizeError};
use crate::tone::{equalize_luma, normalize_range};
use crate::types::{Feature, Point};
use image::{GrayImage, RgbImage};
use rayon::prelude::*;
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Output file names are the input names with this prefix.
pub const OUTPUT_PREFIX: &str = "augmented_";

/// A feature stage of the pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Nose,
    Mouth,
    Eyes,
}

impl StageKind {
    pub const ALL: [StageKind; 3] = [StageKind::Nose, StageKind::Mouth, StageKind::Eyes];

    pub fn name(self) -> &'static str {
        match self {
            StageKind::Nose => "nose",
            StageKind::Mouth => "mouth",
            StageKind::Eyes => "eyes",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a single feature stage could not be applied.
#[derive(Error, Debug)]
pub enum StageError {
    #[error(transparent)]
    Landmarks(#[from] LandmarkError),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error(transparent)]
    Resize(#[from] ResizeError),
    #[error(transparent)]
    Blend(#[from] BlendError),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no landmarks for image {image_id}: {source}")]
    NoLandmarks { image_id: u32, source: LandmarkError },
    #[error("all {attempted} feature stages failed for image {image_id}")]
    AllStagesFailed { image_id: u32, attempted: usize },
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageFailure {
    pub stage: StageKind,
    pub reason: String,
}

/// What happened to one image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AugmentReport {
    pub image_id: u32,
    pub applied: Vec<StageKind>,
    pub failed: Vec<StageFailure>,
}

impl AugmentReport {
    fn new(image_id: u32) -> Self {
        Self {
            image_id,
            applied: Vec::new(),
            failed: Vec::new(),
        }
    }

    /// e.g. "2 of 3 features applied".
    pub fn summary(&self) -> String {
        format!(
            "{} of {} features applied",
            self.applied.len(),
            self.applied.len() + self.failed.len()
        )
    }
}

pub struct AugmentOutcome {
    pub image: RgbImage,
    pub report: AugmentReport,
}

/// One image of a batch. `image_id` is the key into the landmark table.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageJob {
    pub image_id: u32,
    pub path: PathBuf,
}

impl ImageJob {
    pub fn new(image_id: u32, path: impl Into<PathBuf>) -> Self {
        Self {
            image_id,
            path: path.into(),
        }
    }

    /// `augmented_<file name>`, or a name derived from the id.
    pub fn output_name(&self) -> String {
        match self.path.file_name() {
            Some(name) => format!("{OUTPUT_PREFIX}{}", name.to_string_lossy()),
            None => format!("{OUTPUT_PREFIX}{}.png", self.image_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedImage {
    pub image_id: u32,
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub processed: Vec<AugmentReport>,
    pub skipped: Vec<SkippedImage>,
}

impl BatchReport {
    pub fn summary(&self) -> String {
        format!(
            "{} of {} images augmented, {} skipped",
            self.processed.len(),
            self.processed.len() + self.skipped.len(),
            self.skipped.len()
        )
    }
}

/// Runs the feature stages for images whose landmarks come from `D`.
///
/// The augmenter is shared read-only across batch workers.
pub struct Augmenter<D> {
    config: AugmentConfig,
    detector: D,
    blender: Box<dyn Blender>,
    scales: Option<Box<dyn ScaleProvider>>,
}

impl<D: LandmarkDetector> Augmenter<D> {
    pub fn new(config: AugmentConfig, detector: D) -> Self {
        let blender = config.blend_strategy.build(&config.pyramid, &config.poisson);
        Self {
            config,
            detector,
            blender,
            scales: None,
        }
    }

    /// Take per-image scale factors from `scales`, falling back to the config.
    pub fn with_scales(mut self, scales: impl ScaleProvider + 'static) -> Self {
        self.scales = Some(Box::new(scales));
        self
    }

    pub fn config(&self) -> &AugmentConfig {
        &self.config
    }

    pub fn blender_name(&self) -> &'static str {
        self.blender.name()
    }

    pub(crate) fn scale(&self, image_id: u32, stage: StageKind) -> f32 {
        self.scales
            .as_ref()
            .and_then(|s| s.scale_for(image_id, stage))
            .unwrap_or_else(|| self.config.scale_for(stage))
    }

    /// Augment one image.
    pub fn process(&self, image_id: u32, image: &RgbImage) -> Result<AugmentOutcome, PipelineError> {
        let records = self
            .detector
            .detect(image_id, image)
            .map_err(|source| PipelineError::NoLandmarks { image_id, source })?;
        let face =
            FaceLandmarks::new(image_id, records).map_err(|source| PipelineError::NoLandmarks { image_id, source })?;

        let mut report = AugmentReport::new(image_id);
        let mut composite = image.clone();

        for stage in StageKind::ALL {
            match self.run_stage(stage, &face, &composite) {
                Ok(next) => {
                    composite = next;
                    report.applied.push(stage);
                }
                Err(e) => {
                    tracing::warn!(image_id, %stage, error = %e, "stage failed, skipping");
                    report.failed.push(StageFailure {
                        stage,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if report.applied.is_empty() {
            return Err(PipelineError::AllStagesFailed {
                image_id,
                attempted: report.failed.len(),
            });
        }

        if self.config.equalize_luma {
            composite = equalize_luma(&composite, self.config.clahe_tiles, self.config.clahe_clip_limit);
        }
        if self.config.normalize {
            composite = normalize_range(&composite);
        }

        tracing::info!(image_id, blend = self.blender.name(), summary = %report.summary(), "image augmented");
        Ok(AugmentOutcome {
            image: composite,
            report,
        })
    }

    fn run_stage(&self, stage: StageKind, face: &FaceLandmarks, composite: &RgbImage) -> Result<RgbImage, StageError> {
        let scale = self.scale(face.image_id(), stage);
        match stage {
            StageKind::Nose => self.feature_stage(face.points(Feature::Nose)?, &self.config.nose, scale, composite),
            StageKind::Mouth => {
                self.feature_stage(face.points(Feature::OuterLip)?, &self.config.mouth, scale, composite)
            }
            StageKind::Eyes => self.eye_stage(face, scale, composite),
        }
    }

    /// Resize a rectangular feature and blend it back through its box mask.
    fn feature_stage(
        &self,
        points: Vec<Point>,
        cfg: &FeatureConfig,
        scale: f32,
        composite: &RgbImage,
    ) -> Result<RgbImage, StageError> {
        let (w, h) = composite.dimensions();
        let modified = resize_and_overlay(
            composite,
            &points,
            scale,
            cfg.width_margin_factor,
            cfg.height_margin_factor,
        )?;
        let mask = rectangular_mask(
            &points,
            cfg.mask_width_margin_factor,
            cfg.mask_height_margin_factor,
            w,
            h,
        )?;
        let mask = self.soften(mask, cfg.feather_sigma);
        Ok(self.blender.blend(&modified, composite, &mask)?)
    }

    /// Blend a blurred, squeezed surrounding layer through the widened eye
    /// polygons, then the resized eyes through the reduced polygons.
    fn eye_stage(&self, face: &FaceLandmarks, scale: f32, composite: &RgbImage) -> Result<RgbImage, StageError> {
        let cfg = &self.config.eyes;
        let right_eye = face.points(Feature::RightEye)?;
        let left_eye = face.points(Feature::LeftEye)?;
        let jaw = face.points(Feature::Jaw)?;
        let regions = eye_regions(
            &right_eye,
            &left_eye,
            &face.points(Feature::RightEyebrow)?,
            &face.points(Feature::LeftEyebrow)?,
            &jaw,
            &face.points(Feature::Nose)?,
        )?;
        let (w, h) = composite.dimensions();
        regions.check_frame(w, h)?;

        let face_width = match (jaw.first(), jaw.last()) {
            (Some(first), Some(last)) => (last.x - first.x).abs().min(w as f32),
            _ => 0.0,
        };
        let side_pad = (cfg.background_side_pad * face_width).round().max(0.0) as u32;
        let mut surrounding = pad_and_fit(composite, side_pad, side_pad);
        if cfg.background_sigma > 0.0 {
            surrounding = imageproc::filter::gaussian_blur_f32(&surrounding, cfg.background_sigma);
        }
        let widened = polygon_mask(w, h, &regions.widened(), cfg.close_radius);
        let widened = self.soften(widened, cfg.background_feather_sigma);
        let with_background = self.blender.blend(&surrounding, composite, &widened)?;

        let eyes = resize_and_overlay(
            &with_background,
            &right_eye,
            scale,
            cfg.width_margin_factor,
            cfg.height_margin_factor,
        )?;
        let eyes = resize_and_overlay(&eyes, &left_eye, scale, cfg.width_margin_factor, cfg.height_margin_factor)?;

        let reduced = polygon_mask(w, h, &regions.reduced(), cfg.close_radius);
        let mean_shift = (regions.right.outer_shift + regions.left.outer_shift) / 2.0;
        let sigma = (cfg.reduced_feather_factor * mean_shift).clamp(1.0, MAX_FEATHER_SIGMA);
        let reduced = self.soften(reduced, sigma);

        tracing::debug!(
            image_id = face.image_id(),
            side_pad,
            outer_shift = mean_shift,
            sigma,
            "eye layers built"
        );
        Ok(self.blender.blend(&eyes, &with_background, &reduced)?)
    }

    /// Feather `mask` unless the blender wants hard masks.
    fn soften(&self, mask: GrayImage, sigma: f32) -> GrayImage {
        match self.blender.mask_kind() {
            MaskKind::Feathered => feather(&mask, sigma),
            MaskKind::Hard => mask,
        }
    }

    /// Load, augment, and save every job on the rayon pool.
    ///
    /// Images that fail are recorded as skipped; the batch always completes.
    pub fn run_batch(&self, jobs: &[ImageJob], out_dir: &Path) -> Result<BatchReport, PipelineError> {
        std::fs::create_dir_all(out_dir)?;

        let results: Vec<(&ImageJob, Result<AugmentReport, PipelineError>)> = jobs
            .par_iter()
            .map(|job| (job, self.run_job(job, out_dir)))
            .collect();

        let mut report = BatchReport::default();
        for (job, result) in results {
            match result {
                Ok(r) => report.processed.push(r),
                Err(e) => {
                    tracing::warn!(image_id = job.image_id, path = %job.path.display(), error = %e, "image skipped");
                    report.skipped.push(SkippedImage {
                        image_id: job.image_id,
                        path: job.path.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(summary = %report.summary(), out_dir = %out_dir.display(), "batch complete");
        Ok(report)
    }

    fn run_job(&self, job: &ImageJob, out_dir: &Path) -> Result<AugmentReport, PipelineError> {
        let image = image::open(&job.path)?.to_rgb8();
        let outcome = self.process(job.image_id, &image)?;
        let target = out_dir.join(job.output_name());
        outcome.image.save(&target)?;
        tracing::debug!(image_id = job.image_id, path = %target.display(), "saved");
        Ok(outcome.report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blend::BlendStrategy;
    use crate::config::{FeatureScales, ScaleTable};
    use crate::landmarks::LandmarkTable;
    use crate::test_utils::{synthetic_face, textured_image, FACE_CANVAS};
    use crate::types::LandmarkRecord;

    fn plain_config() -> AugmentConfig {
        AugmentConfig {
            normalize: false,
            ..AugmentConfig::default()
        }
    }

    fn table_without(feature: Option<Feature>, scale: f32) -> LandmarkTable {
        LandmarkTable::from_records(
            synthetic_face(0, scale)
                .into_iter()
                .filter(|r: &LandmarkRecord| Some(r.feature) != feature),
        )
    }

    #[test]
    fn test_stage_order_and_names() {
        assert_eq!(StageKind::ALL, [StageKind::Nose, StageKind::Mouth, StageKind::Eyes]);
        assert_eq!(StageKind::Mouth.to_string(), "mouth");
    }

    #[test]
    fn test_all_stages_applied() {
        let image = textured_image(FACE_CANVAS, FACE_CANVAS);
        let augmenter = Augmenter::new(plain_config(), table_without(None, 1.0));
        let outcome = augmenter.process(0, &image).unwrap();

        assert_eq!(outcome.report.applied, StageKind::ALL.to_vec());
        assert!(outcome.report.failed.is_empty());
        assert_eq!(outcome.report.summary(), "3 of 3 features applied");
        assert_eq!(outcome.image.dimensions(), image.dimensions());
        assert_ne!(outcome.image, image);
        // far from every mask the photo is untouched
        assert_eq!(outcome.image.get_pixel(5, 5), image.get_pixel(5, 5));
        assert_eq!(outcome.image.get_pixel(495, 495), image.get_pixel(495, 495));
    }

    #[test]
    fn test_nose_region_changes() {
        let image = textured_image(FACE_CANVAS, FACE_CANVAS);
        let augmenter = Augmenter::new(plain_config(), table_without(None, 1.0));
        let outcome = augmenter.process(0, &image).unwrap();
        let changed = (235..265)
            .flat_map(|y| (230..270).map(move |x| (x, y)))
            .filter(|&(x, y)| outcome.image.get_pixel(x, y) != image.get_pixel(x, y))
            .count();
        assert!(changed > 100, "only {changed} nose pixels changed");
    }

    #[test]
    fn test_missing_feature_skips_stage() {
        let image = textured_image(FACE_CANVAS, FACE_CANVAS);
        let augmenter = Augmenter::new(plain_config(), table_without(Some(Feature::Nose), 1.0));
        let outcome = augmenter.process(0, &image).unwrap();

        // the eye stage anchors on the nose bridge as well
        assert_eq!(outcome.report.applied, vec![StageKind::Mouth]);
        assert_eq!(outcome.report.failed.len(), 2);
        assert_eq!(outcome.report.failed[0].stage, StageKind::Nose);
        assert_eq!(outcome.report.summary(), "1 of 3 features applied");
    }

    #[test]
    fn test_far_out_jaw_landmark_fails_eye_stage_fast() {
        let records = synthetic_face(0, 1.0).into_iter().map(|mut r: LandmarkRecord| {
            if r.landmark_index == 16 {
                r.x = 2.0e6;
            }
            r
        });
        let augmenter = Augmenter::new(plain_config(), LandmarkTable::from_records(records));
        let started = std::time::Instant::now();
        let outcome = augmenter.process(0, &textured_image(FACE_CANVAS, FACE_CANVAS)).unwrap();

        assert!(started.elapsed() < std::time::Duration::from_secs(60));
        assert_eq!(outcome.report.applied, vec![StageKind::Nose, StageKind::Mouth]);
        assert_eq!(outcome.report.failed.len(), 1);
        assert_eq!(outcome.report.failed[0].stage, StageKind::Eyes);
        assert!(outcome.report.failed[0].reason.contains("outside"), "{}", outcome.report.failed[0].reason);
    }

    #[test]
    fn test_image_without_landmarks() {
        let augmenter = Augmenter::new(plain_config(), table_without(None, 1.0));
        let err = augmenter.process(42, &textured_image(64, 64)).err().unwrap();
        assert!(matches!(err, PipelineError::NoLandmarks { image_id: 42, .. }));
    }

    #[test]
    fn test_all_stages_failed() {
        // landmarks far outside a tiny image: every box is invalid
        let augmenter = Augmenter::new(plain_config(), table_without(None, 1.0));
        let err = augmenter.process(0, &textured_image(40, 40)).err().unwrap();
        assert!(matches!(err, PipelineError::AllStagesFailed { attempted: 3, .. }));
    }

    #[test]
    fn test_scale_override() {
        let mut scales = ScaleTable::default();
        scales.insert(
            0,
            FeatureScales {
                nose: Some(1.5),
                ..FeatureScales::default()
            },
        );
        let augmenter = Augmenter::new(plain_config(), table_without(None, 1.0)).with_scales(scales);
        assert_eq!(augmenter.scale(0, StageKind::Nose), 1.5);
        assert_eq!(augmenter.scale(0, StageKind::Mouth), 1.25);
        assert_eq!(augmenter.scale(1, StageKind::Nose), 1.25);
        assert_eq!(augmenter.scale(0, StageKind::Eyes), 0.9);
    }

    #[test]
    fn test_normalize_and_equalize_keep_dimensions() {
        let image = textured_image(FACE_CANVAS, FACE_CANVAS);
        let config = AugmentConfig {
            equalize_luma: true,
            ..AugmentConfig::default()
        };
        let outcome = Augmenter::new(config, table_without(None, 1.0)).process(0, &image).unwrap();
        assert_eq!(outcome.image.dimensions(), image.dimensions());
        assert_eq!(*outcome.image.as_raw().iter().max().unwrap(), 255);
        assert_eq!(*outcome.image.as_raw().iter().min().unwrap(), 0);
    }

    #[test]
    fn test_other_strategies_run_end_to_end() {
        let size = (FACE_CANVAS as f32 * 0.4) as u32;
        let image = textured_image(size, size);
        for strategy in [BlendStrategy::MultiRes, BlendStrategy::Poisson] {
            let mut config = plain_config();
            config.blend_strategy = strategy;
            config.eyes.close_radius = 8;
            let augmenter = Augmenter::new(config, table_without(None, 0.4));
            assert_eq!(augmenter.blender_name(), strategy.as_str());
            let outcome = augmenter.process(0, &image).unwrap();
            assert_eq!(outcome.report.applied.len(), 3, "{strategy}: {:?}", outcome.report.failed);
            assert_ne!(outcome.image, image);
        }
    }

    #[test]
    fn test_output_name() {
        assert_eq!(ImageJob::new(3, "/data/in/face.jpg").output_name(), "augmented_face.jpg");
        assert_eq!(ImageJob::new(3, "").output_name(), "augmented_3.png");
    }

    #[test]
    fn test_batch_report_summary() {
        let report = BatchReport {
            processed: vec![AugmentReport::new(0)],
            skipped: vec![SkippedImage {
                image_id: 1,
                path: PathBuf::from("b.png"),
                reason: "no landmarks".into(),
            }],
        };
        assert_eq!(report.summary(), "1 of 2 images augmented, 1 skipped");
    }
}
