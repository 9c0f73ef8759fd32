//! Augmentation settings, loaded from TOML, and per-image scale overrides.

use crate::blend::BlendStrategy;
use crate::mask::MAX_FEATHER_SIGMA;
use crate::pipeline::StageKind;
use crate::resize::is_valid_scale;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to parse scale table: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Resize and mask parameters of a rectangular feature (nose, mouth).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub scale_factor: f32,
    /// Margins of the box that gets resized.
    pub width_margin_factor: f32,
    pub height_margin_factor: f32,
    /// Margins of the rectangular blend mask.
    pub mask_width_margin_factor: f32,
    pub mask_height_margin_factor: f32,
    pub feather_sigma: f32,
}

impl FeatureConfig {
    pub fn nose() -> Self {
        Self {
            scale_factor: 1.25,
            width_margin_factor: 0.6,
            height_margin_factor: 0.7,
            mask_width_margin_factor: 0.4,
            mask_height_margin_factor: 0.1,
            feather_sigma: 21.0,
        }
    }

    pub fn mouth() -> Self {
        Self {
            scale_factor: 1.25,
            width_margin_factor: 0.2,
            height_margin_factor: 0.3,
            mask_width_margin_factor: 0.1,
            mask_height_margin_factor: 0.1,
            feather_sigma: 21.0,
        }
    }

    fn validate(&self, section: &str) -> Result<(), ConfigError> {
        check_scale(section, self.scale_factor)?;
        for (name, value) in [
            ("width_margin_factor", self.width_margin_factor),
            ("height_margin_factor", self.height_margin_factor),
            ("mask_width_margin_factor", self.mask_width_margin_factor),
            ("mask_height_margin_factor", self.mask_height_margin_factor),
        ] {
            check_margin(section, name, value)?;
        }
        check_sigma(section, "feather_sigma", self.feather_sigma)
    }
}

/// Eye stage parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EyeConfig {
    pub scale_factor: f32,
    pub width_margin_factor: f32,
    pub height_margin_factor: f32,
    /// Gaussian sigma of the blurred surrounding layer.
    pub background_sigma: f32,
    /// Horizontal squeeze of the surrounding layer, as a fraction of face width per side.
    pub background_side_pad: f32,
    pub background_feather_sigma: f32,
    /// Feather sigma of the reduced eye mask per pixel of outer-corner shift.
    pub reduced_feather_factor: f32,
    /// Closing radius of the eye polygon masks.
    pub close_radius: u8,
}

impl Default for EyeConfig {
    fn default() -> Self {
        Self {
            scale_factor: 0.9,
            width_margin_factor: 0.25,
            height_margin_factor: 0.4,
            background_sigma: 8.0,
            background_side_pad: 0.02,
            background_feather_sigma: 32.0,
            reduced_feather_factor: 0.87,
            close_radius: crate::mask::DEFAULT_CLOSE_RADIUS,
        }
    }
}

impl EyeConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        check_scale("eyes", self.scale_factor)?;
        check_margin("eyes", "width_margin_factor", self.width_margin_factor)?;
        check_margin("eyes", "height_margin_factor", self.height_margin_factor)?;
        check_margin("eyes", "background_side_pad", self.background_side_pad)?;
        check_sigma("eyes", "background_sigma", self.background_sigma)?;
        check_sigma("eyes", "background_feather_sigma", self.background_feather_sigma)?;
        check_positive("eyes", "reduced_feather_factor", self.reduced_feather_factor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PyramidConfig {
    pub levels: usize,
}

impl Default for PyramidConfig {
    fn default() -> Self {
        Self {
            levels: crate::blend::pyramid::DEFAULT_LEVELS,
        }
    }
}

/// Caps on the Poisson solve so one image cannot stall a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoissonConfig {
    pub max_iterations: usize,
    /// Relative residual at which the solve stops.
    pub tolerance: f64,
    pub max_unknowns: usize,
}

impl Default for PoissonConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            tolerance: 1e-5,
            max_unknowns: 1_000_000,
        }
    }
}

/// Complete augmentation configuration.
///
/// Every section is optional in the TOML file; the `[nose]` and `[mouth]`
/// sections must be complete when present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AugmentConfig {
    pub blend_strategy: BlendStrategy,
    /// Min-max stretch the composite once all stages ran.
    pub normalize: bool,
    /// CLAHE on the luma channel of the composite.
    pub equalize_luma: bool,
    pub clahe_tiles: u32,
    /// Histogram clip in multiples of the mean bin height.
    pub clahe_clip_limit: f32,
    #[serde(default = "FeatureConfig::nose")]
    pub nose: FeatureConfig,
    #[serde(default = "FeatureConfig::mouth")]
    pub mouth: FeatureConfig,
    pub eyes: EyeConfig,
    pub pyramid: PyramidConfig,
    pub poisson: PoissonConfig,
}

impl Default for AugmentConfig {
    fn default() -> Self {
        Self {
            blend_strategy: BlendStrategy::default(),
            normalize: true,
            equalize_luma: false,
            clahe_tiles: 8,
            clahe_clip_limit: 2.0,
            nose: FeatureConfig::nose(),
            mouth: FeatureConfig::mouth(),
            eyes: EyeConfig::default(),
            pyramid: PyramidConfig::default(),
            poisson: PoissonConfig::default(),
        }
    }
}

impl AugmentConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let config = Self::from_toml_str(&std::fs::read_to_string(path)?)?;
        tracing::info!(path = %path.display(), strategy = %config.blend_strategy, "loaded config");
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.nose.validate("nose")?;
        self.mouth.validate("mouth")?;
        self.eyes.validate()?;
        if self.pyramid.levels == 0 {
            return Err(ConfigError::Invalid("pyramid.levels must be at least 1".into()));
        }
        if self.poisson.max_iterations == 0 || self.poisson.max_unknowns == 0 {
            return Err(ConfigError::Invalid(
                "poisson.max_iterations and poisson.max_unknowns must be at least 1".into(),
            ));
        }
        if !(self.poisson.tolerance.is_finite() && self.poisson.tolerance > 0.0) {
            return Err(ConfigError::Invalid("poisson.tolerance must be positive".into()));
        }
        if self.clahe_tiles == 0 {
            return Err(ConfigError::Invalid("clahe_tiles must be at least 1".into()));
        }
        check_positive("", "clahe_clip_limit", self.clahe_clip_limit)
    }

    /// Configured scale factor of a stage.
    pub fn scale_for(&self, stage: StageKind) -> f32 {
        match stage {
            StageKind::Nose => self.nose.scale_factor,
            StageKind::Mouth => self.mouth.scale_factor,
            StageKind::Eyes => self.eyes.scale_factor,
        }
    }
}

fn key(section: &str, name: &str) -> String {
    if section.is_empty() {
        name.to_string()
    } else {
        format!("{section}.{name}")
    }
}

fn check_scale(section: &str, value: f32) -> Result<(), ConfigError> {
    if is_valid_scale(value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{} = {value} is outside (0, 3]", key(section, "scale_factor"))))
    }
}

fn check_margin(section: &str, name: &str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{} = {value} is outside [0, 1]", key(section, name))))
    }
}

fn check_positive(section: &str, name: &str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{} = {value} must be positive", key(section, name))))
    }
}

fn check_sigma(section: &str, name: &str, value: f32) -> Result<(), ConfigError> {
    check_positive(section, name, value)?;
    if value <= MAX_FEATHER_SIGMA {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{} = {value} exceeds the maximum sigma {MAX_FEATHER_SIGMA}",
            key(section, name)
        )))
    }
}

/// Source of per-image scale factors, overriding the configured ones.
pub trait ScaleProvider: Send + Sync {
    fn scale_for(&self, image_id: u32, stage: StageKind) -> Option<f32>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureScales {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nose: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mouth: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eyes: Option<f32>,
}

impl FeatureScales {
    fn get(&self, stage: StageKind) -> Option<f32> {
        match stage {
            StageKind::Nose => self.nose,
            StageKind::Mouth => self.mouth,
            StageKind::Eyes => self.eyes,
        }
    }
}

/// Per-image scale factors keyed by image id, read from JSON:
/// `{ "3": { "nose": 1.1, "eyes": 0.95 } }`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScaleTable {
    scales: HashMap<u32, FeatureScales>,
}

impl ScaleTable {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let raw: HashMap<String, FeatureScales> = serde_json::from_str(text)?;
        let mut scales = HashMap::with_capacity(raw.len());
        for (id, entry) in raw {
            let image_id: u32 = id
                .trim()
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("scale table key {id:?} is not an image id")))?;
            for stage in StageKind::ALL {
                if let Some(scale) = entry.get(stage) {
                    if !is_valid_scale(scale) {
                        return Err(ConfigError::Invalid(format!(
                            "image {image_id}: {stage} scale {scale} is outside (0, 3]"
                        )));
                    }
                }
            }
            scales.insert(image_id, entry);
        }
        Ok(Self { scales })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let table = Self::from_json(&std::fs::read_to_string(path)?)?;
        tracing::info!(path = %path.display(), images = table.len(), "loaded scale table");
        Ok(table)
    }

    pub fn insert(&mut self, image_id: u32, scales: FeatureScales) {
        self.scales.insert(image_id, scales);
    }

    pub fn len(&self) -> usize {
        self.scales.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scales.is_empty()
    }
}

impl ScaleProvider for ScaleTable {
    fn scale_for(&self, image_id: u32, stage: StageKind) -> Option<f32> {
        self.scales.get(&image_id)?.get(stage)
    }
}
