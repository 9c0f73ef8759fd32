use morphface_core::{AugmentConfig, BlendStrategy};

/// Apply `MORPHFACE_*` environment overrides on top of a loaded config.
///
/// Unparseable values are ignored with a warning.
pub fn apply_overrides(config: &mut AugmentConfig) {
    if let Ok(raw) = std::env::var("MORPHFACE_BLEND_STRATEGY") {
        match raw.parse::<BlendStrategy>() {
            Ok(strategy) => config.blend_strategy = strategy,
            Err(e) => tracing::warn!(error = %e, "ignoring MORPHFACE_BLEND_STRATEGY"),
        }
    }
    config.pyramid.levels = env_usize("MORPHFACE_PYRAMID_LEVELS", config.pyramid.levels);
    config.poisson.max_iterations = env_usize("MORPHFACE_POISSON_MAX_ITERATIONS", config.poisson.max_iterations);
}

/// Worker count from `MORPHFACE_THREADS`; 0 lets rayon decide.
pub fn threads() -> usize {
    env_usize("MORPHFACE_THREADS", 0)
}

fn env_usize(key: &str, default: usize) -> usize {
    parse_or(std::env::var(key).ok(), key, default)
}

fn parse_or<T: std::str::FromStr + Copy>(raw: Option<String>, key: &str, default: T) -> T {
    match raw {
        None => default,
        Some(v) => v.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "ignoring unparseable override");
            default
        }),
    }
}
