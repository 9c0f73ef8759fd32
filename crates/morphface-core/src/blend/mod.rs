//! Blending engine: composite a modified photo over the original through a
//! mask, using one of three interchangeable strategies.

pub mod alpha;
pub mod poisson;
pub mod pyramid;
pub mod sparse;

pub use alpha::{alpha_blend, AlphaBlender};
pub use poisson::{poisson_blend, PoissonBlender};
pub use pyramid::{multi_res_blend, PyramidBlender};

use crate::config::{PoissonConfig, PyramidConfig};
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BlendError {
    #[error("{what} is {actual:?}, expected {expected:?}")]
    DimensionMismatch {
        what: &'static str,
        expected: (u32, u32),
        actual: (u32, u32),
    },
    #[error("poisson system did not converge on channel {channel}: residual {residual:.3e} after {iterations} iterations")]
    SingularSystem {
        channel: usize,
        iterations: usize,
        residual: f64,
    },
    #[error("masked region has {unknowns} unknowns, limit is {limit}")]
    SystemTooLarge { unknowns: usize, limit: usize },
    #[error("unknown blend strategy: {0}")]
    UnknownStrategy(String),
}

/// Which mask a blender wants from the mask generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskKind {
    /// Binary 0/255 mask.
    Hard,
    /// Gaussian-feathered weight field.
    Feathered,
}

/// Strategy for compositing `modified` over `original`.
///
/// All three images share the same dimensions; mask value 255 selects
/// `modified`, 0 selects `original`.
pub trait Blender: Send + Sync {
    fn name(&self) -> &'static str;

    fn mask_kind(&self) -> MaskKind {
        MaskKind::Feathered
    }

    fn blend(&self, modified: &RgbImage, original: &RgbImage, mask: &GrayImage) -> Result<RgbImage, BlendError>;
}

/// Configured blend strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlendStrategy {
    #[default]
    Alpha,
    MultiRes,
    Poisson,
}

impl BlendStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            BlendStrategy::Alpha => "alpha",
            BlendStrategy::MultiRes => "multi_res",
            BlendStrategy::Poisson => "poisson",
        }
    }

    /// Instantiate the blender for this strategy.
    pub fn build(self, pyramid: &PyramidConfig, poisson: &PoissonConfig) -> Box<dyn Blender> {
        match self {
            BlendStrategy::Alpha => Box::new(AlphaBlender),
            BlendStrategy::MultiRes => Box::new(PyramidBlender::new(pyramid.levels)),
            BlendStrategy::Poisson => Box::new(PoissonBlender::new(poisson.clone())),
        }
    }
}

impl fmt::Display for BlendStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlendStrategy {
    type Err = BlendError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "alpha" => Ok(BlendStrategy::Alpha),
            "multi_res" | "multires" | "pyramid" | "laplacian" => Ok(BlendStrategy::MultiRes),
            "poisson" | "seamless" => Ok(BlendStrategy::Poisson),
            _ => Err(BlendError::UnknownStrategy(s.to_string())),
        }
    }
}

pub(crate) fn check_dimensions(modified: &RgbImage, original: &RgbImage, mask: &GrayImage) -> Result<(), BlendError> {
    let expected = original.dimensions();
    if modified.dimensions() != expected {
        return Err(BlendError::DimensionMismatch {
            what: "modified image",
            expected,
            actual: modified.dimensions(),
        });
    }
    if mask.dimensions() != expected {
        return Err(BlendError::DimensionMismatch {
            what: "mask",
            expected,
            actual: mask.dimensions(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::textured_image;
    use image::{Luma, Rgb};

    #[test]
    fn test_strategy_from_str() {
        assert_eq!("alpha".parse::<BlendStrategy>().unwrap(), BlendStrategy::Alpha);
        assert_eq!("Multi-Res".parse::<BlendStrategy>().unwrap(), BlendStrategy::MultiRes);
        assert_eq!("pyramid".parse::<BlendStrategy>().unwrap(), BlendStrategy::MultiRes);
        assert_eq!(" poisson ".parse::<BlendStrategy>().unwrap(), BlendStrategy::Poisson);
        assert!(matches!("median".parse::<BlendStrategy>(), Err(BlendError::UnknownStrategy(_))));
    }

    #[test]
    fn test_strategy_serde_names() {
        assert_eq!(serde_json::to_string(&BlendStrategy::MultiRes).unwrap(), "\"multi_res\"");
        let s: BlendStrategy = serde_json::from_str("\"poisson\"").unwrap();
        assert_eq!(s, BlendStrategy::Poisson);
        assert_eq!(BlendStrategy::default(), BlendStrategy::Alpha);
    }

    #[test]
    fn test_build_selects_blender() {
        let (pyr, poi) = (PyramidConfig::default(), PoissonConfig::default());
        assert_eq!(BlendStrategy::Alpha.build(&pyr, &poi).name(), "alpha");
        assert_eq!(BlendStrategy::MultiRes.build(&pyr, &poi).name(), "multi_res");
        let poisson = BlendStrategy::Poisson.build(&pyr, &poi);
        assert_eq!(poisson.name(), "poisson");
        assert_eq!(poisson.mask_kind(), MaskKind::Hard);
    }

    #[test]
    fn test_every_strategy_rejects_mismatched_inputs() {
        let (pyr, poi) = (PyramidConfig::default(), PoissonConfig::default());
        let a = textured_image(32, 32);
        let b = RgbImage::from_pixel(32, 30, Rgb([0, 0, 0]));
        let mask = GrayImage::from_pixel(32, 32, Luma([255]));
        for strategy in [BlendStrategy::Alpha, BlendStrategy::MultiRes, BlendStrategy::Poisson] {
            let blender = strategy.build(&pyr, &poi);
            let err = blender.blend(&a, &b, &mask).unwrap_err();
            assert!(matches!(err, BlendError::DimensionMismatch { .. }), "{strategy}");
            let err = blender.blend(&a, &a, &GrayImage::new(8, 8)).unwrap_err();
            assert!(matches!(err, BlendError::DimensionMismatch { what: "mask", .. }), "{strategy}");
        }
    }
}
