use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use morphface_core::{
    eye_regions, margin_box, AugmentConfig, Augmenter, BlendStrategy, Feature, FaceLandmarks, ImageJob,
    LandmarkDetector, LandmarkTable, ScaleTable,
};
use std::path::{Path, PathBuf};

mod env;

const IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Parser)]
#[command(name = "morphface", about = "Landmark-driven face feature augmentation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Augment every image in a directory
    Run {
        /// Directory of input photos (.png, .jpg, .jpeg)
        #[arg(long)]
        images: PathBuf,
        /// Landmark table exported by the detector (.csv or .json)
        #[arg(long)]
        landmarks: PathBuf,
        /// Output directory
        #[arg(long)]
        output: PathBuf,
        /// TOML configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Blend strategy: alpha, multi_res or poisson
        #[arg(long)]
        strategy: Option<BlendStrategy>,
        /// Per-image scale factors (JSON)
        #[arg(long)]
        scales: Option<PathBuf>,
        /// Worker threads (default: one per core)
        #[arg(long)]
        threads: Option<usize>,
    },
    /// Print the derived regions of one image as JSON
    Inspect {
        #[arg(long)]
        landmarks: PathBuf,
        #[arg(long)]
        image_id: u32,
        /// Image width used to clip the boxes
        #[arg(long)]
        width: u32,
        /// Image height used to clip the boxes
        #[arg(long)]
        height: u32,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print the default configuration as TOML
    Config,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            images,
            landmarks,
            output,
            config,
            strategy,
            scales,
            threads,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(strategy) = strategy {
                config.blend_strategy = strategy;
            }
            config.validate()?;

            let threads = threads.unwrap_or_else(env::threads);
            if threads > 0 {
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build_global()
                    .context("failed to size worker pool")?;
            }

            let table = LandmarkTable::load(&landmarks)?;
            let jobs = list_images(&images)?;
            if jobs.is_empty() {
                bail!("no images found in {}", images.display());
            }

            let mut augmenter = Augmenter::new(config, table);
            if let Some(path) = scales {
                augmenter = augmenter.with_scales(ScaleTable::load(&path)?);
            }

            tracing::info!(
                images = jobs.len(),
                blend = augmenter.blender_name(),
                threads = rayon::current_num_threads(),
                "starting batch"
            );
            let report = augmenter.run_batch(&jobs, &output)?;

            for skipped in &report.skipped {
                eprintln!("skipped {}: {}", skipped.path.display(), skipped.reason);
            }
            println!("{}", report.summary());
        }
        Commands::Inspect {
            landmarks,
            image_id,
            width,
            height,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            let table = LandmarkTable::load(&landmarks)?;
            let blank = image::RgbImage::new(width, height);
            let face = FaceLandmarks::new(image_id, table.detect(image_id, &blank)?)?;
            println!("{}", serde_json::to_string_pretty(&inspect(&face, &config, width, height)?)?);
        }
        Commands::Config => {
            print!("{}", AugmentConfig::default().to_toml_string()?);
        }
    }

    Ok(())
}

/// Config file (or defaults) with environment overrides applied.
fn load_config(path: Option<&Path>) -> Result<AugmentConfig> {
    let mut config = match path {
        Some(path) => AugmentConfig::load(path)?,
        None => AugmentConfig::default(),
    };
    env::apply_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

/// Image files of `dir` in name order; the position is the image id.
fn list_images(dir: &Path) -> Result<Vec<ImageJob>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_image(p))
        .collect();
    paths.sort();
    Ok(paths
        .into_iter()
        .enumerate()
        .map(|(i, path)| ImageJob::new(i as u32, path))
        .collect())
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.iter().any(|ext| e.eq_ignore_ascii_case(ext)))
}

fn inspect(face: &FaceLandmarks, config: &AugmentConfig, width: u32, height: u32) -> Result<serde_json::Value> {
    let nose = face.points(Feature::Nose)?;
    let mouth = face.points(Feature::OuterLip)?;
    let eyes = eye_regions(
        &face.points(Feature::RightEye)?,
        &face.points(Feature::LeftEye)?,
        &face.points(Feature::RightEyebrow)?,
        &face.points(Feature::LeftEyebrow)?,
        &face.points(Feature::Jaw)?,
        &nose,
    )?;

    let n = &config.nose;
    let m = &config.mouth;
    Ok(serde_json::json!({
        "image_id": face.image_id(),
        "nose": {
            "resize_box": margin_box(&nose, n.width_margin_factor, n.height_margin_factor, width, height)?,
            "mask_box": margin_box(&nose, n.mask_width_margin_factor, n.mask_height_margin_factor, width, height)?,
        },
        "mouth": {
            "resize_box": margin_box(&mouth, m.width_margin_factor, m.height_margin_factor, width, height)?,
            "mask_box": margin_box(&mouth, m.mask_width_margin_factor, m.mask_height_margin_factor, width, height)?,
        },
        "eyes": eyes,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_image() {
        assert!(is_image(Path::new("a/face.PNG")));
        assert!(is_image(Path::new("face.jpeg")));
        assert!(!is_image(Path::new("landmarks.csv")));
        assert!(!is_image(Path::new("README")));
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::try_parse_from([
            "morphface",
            "run",
            "--images",
            "in",
            "--landmarks",
            "lm.csv",
            "--output",
            "out",
            "--strategy",
            "poisson",
            "--threads",
            "2",
        ])
        .unwrap();
        match cli.command {
            Commands::Run { strategy, threads, .. } => {
                assert_eq!(strategy, Some(BlendStrategy::Poisson));
                assert_eq!(threads, Some(2));
            }
            _ => panic!("expected run"),
        }
    }
}
