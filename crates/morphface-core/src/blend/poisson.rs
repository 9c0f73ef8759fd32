//! Gradient-domain (Poisson) blending.
//!
//! For every masked pixel `p` placed at target position `q`, the unknown
//! `f_p` satisfies
//!
//! ```text
//! |N_q| f_p - sum(f_n, n in N_q masked) = sum(s_p - s_n, n in N_q) + sum(t_n, n in N_q unmasked)
//! ```
//!
//! where `N_q` are the in-image 4-neighbours of `q`, `s` the source and `t`
//! the target. Each channel is solved with preconditioned conjugate
//! gradients; unmasked pixels keep the target value.

use super::sparse::{conjugate_gradient, CsrMatrix};
use super::{check_dimensions, BlendError, Blender, MaskKind};
use crate::config::PoissonConfig;
use image::{GrayImage, RgbImage};
use rayon::prelude::*;

const NEIGHBOURS: [(i64, i64); 4] = [(0, -1), (-1, 0), (1, 0), (0, 1)];

/// The sparse system shared by all channels.
struct PoissonSystem {
    matrix: CsrMatrix,
    /// Source coordinates of each unknown.
    source_px: Vec<(u32, u32)>,
    /// Target coordinates of each unknown.
    target_px: Vec<(u32, u32)>,
    /// Per unknown: in-image neighbours as (source coords if inside the source, target coords, unknown index).
    neighbours: Vec<Vec<(Option<(u32, u32)>, (u32, u32), Option<usize>)>>,
}

fn assemble(
    source_dims: (u32, u32),
    target_dims: (u32, u32),
    mask: &GrayImage,
    offset: (i64, i64),
    max_unknowns: usize,
) -> Result<PoissonSystem, BlendError> {
    let (sw, sh) = source_dims;
    let (tw, th) = target_dims;
    let in_target = |x: i64, y: i64| x >= 0 && y >= 0 && x < tw as i64 && y < th as i64;

    // index of each unknown in target space
    let mut index = vec![None; (tw as usize) * (th as usize)];
    let mut source_px = Vec::new();
    let mut target_px = Vec::new();
    for (x, y, weight) in mask.enumerate_pixels() {
        let (tx, ty) = (x as i64 + offset.0, y as i64 + offset.1);
        if weight[0] == 0 || !in_target(tx, ty) {
            continue;
        }
        index[ty as usize * tw as usize + tx as usize] = Some(source_px.len());
        source_px.push((x, y));
        target_px.push((tx as u32, ty as u32));
    }

    let unknowns = source_px.len();
    if unknowns > max_unknowns {
        return Err(BlendError::SystemTooLarge {
            unknowns,
            limit: max_unknowns,
        });
    }

    let mut matrix = CsrMatrix::with_capacity(unknowns, unknowns * 5);
    let mut neighbours = Vec::with_capacity(unknowns);
    let mut row = Vec::with_capacity(5);
    for (i, &(tx, ty)) in target_px.iter().enumerate() {
        let (sx, sy) = source_px[i];
        row.clear();
        let mut adjacent = Vec::with_capacity(4);
        for (dx, dy) in NEIGHBOURS {
            let (nx, ny) = (tx as i64 + dx, ty as i64 + dy);
            if !in_target(nx, ny) {
                continue;
            }
            let n_idx = index[ny as usize * tw as usize + nx as usize];
            if let Some(j) = n_idx {
                row.push((j, -1.0));
            }
            let (nsx, nsy) = (sx as i64 + dx, sy as i64 + dy);
            let n_src = (nsx >= 0 && nsy >= 0 && nsx < sw as i64 && nsy < sh as i64).then_some((nsx as u32, nsy as u32));
            adjacent.push((n_src, (nx as u32, ny as u32), n_idx));
        }
        row.push((i, adjacent.len() as f64));
        row.sort_by_key(|&(col, _)| col);
        matrix.push_row(&row);
        neighbours.push(adjacent);
    }

    Ok(PoissonSystem {
        matrix,
        source_px,
        target_px,
        neighbours,
    })
}

/// Blend `source` into `target` at `offset` over the non-zero pixels of `mask`.
///
/// `mask` has the dimensions of `source`. Mask pixels that land outside the
/// target are ignored.
pub fn poisson_blend(
    source: &RgbImage,
    target: &RgbImage,
    mask: &GrayImage,
    offset: (i64, i64),
    config: &PoissonConfig,
) -> Result<RgbImage, BlendError> {
    if mask.dimensions() != source.dimensions() {
        return Err(BlendError::DimensionMismatch {
            what: "mask",
            expected: source.dimensions(),
            actual: mask.dimensions(),
        });
    }

    let system = assemble(source.dimensions(), target.dimensions(), mask, offset, config.max_unknowns)?;
    let unknowns = system.source_px.len();
    if unknowns == 0 {
        return Ok(target.clone());
    }

    tracing::debug!(unknowns, nnz = system.matrix.nnz(), "solving poisson system");

    let channels: Vec<Vec<f64>> = (0..3usize)
        .into_par_iter()
        .map(|c| solve_channel(&system, source, target, c, config))
        .collect::<Result<_, _>>()?;

    let mut out = target.clone();
    for (i, &(tx, ty)) in system.target_px.iter().enumerate() {
        let px = out.get_pixel_mut(tx, ty);
        for (c, solution) in channels.iter().enumerate() {
            px[c] = solution[i].round().clamp(0.0, 255.0) as u8;
        }
    }
    Ok(out)
}

fn solve_channel(
    system: &PoissonSystem,
    source: &RgbImage,
    target: &RgbImage,
    channel: usize,
    config: &PoissonConfig,
) -> Result<Vec<f64>, BlendError> {
    let s = |(x, y): (u32, u32)| source.get_pixel(x, y)[channel] as f64;
    let t = |(x, y): (u32, u32)| target.get_pixel(x, y)[channel] as f64;

    let b: Vec<f64> = system
        .source_px
        .iter()
        .zip(&system.neighbours)
        .map(|(&p, adjacent)| {
            let s_p = s(p);
            adjacent
                .iter()
                .map(|&(n_src, n_tgt, n_idx)| {
                    // a neighbour beyond the source edge contributes no gradient
                    let gradient = n_src.map_or(0.0, |n| s_p - s(n));
                    let boundary = if n_idx.is_none() { t(n_tgt) } else { 0.0 };
                    gradient + boundary
                })
                .sum()
        })
        .collect();

    let x0: Vec<f64> = system.target_px.iter().map(|&q| t(q)).collect();
    let outcome = conjugate_gradient(&system.matrix, &b, x0, config.max_iterations, config.tolerance);
    if !outcome.converged {
        tracing::warn!(
            channel,
            iterations = outcome.iterations,
            residual = outcome.relative_residual,
            "poisson solve did not converge"
        );
        return Err(BlendError::SingularSystem {
            channel,
            iterations: outcome.iterations,
            residual: outcome.relative_residual,
        });
    }
    tracing::trace!(channel, iterations = outcome.iterations, "poisson channel solved");
    Ok(outcome.solution)
}

/// Poisson blending of same-sized images at zero offset.
pub struct PoissonBlender {
    config: PoissonConfig,
}

impl PoissonBlender {
    pub fn new(config: PoissonConfig) -> Self {
        Self { config }
    }
}

impl Blender for PoissonBlender {
    fn name(&self) -> &'static str {
        "poisson"
    }

    fn mask_kind(&self) -> MaskKind {
        MaskKind::Hard
    }

    fn blend(&self, modified: &RgbImage, original: &RgbImage, mask: &GrayImage) -> Result<RgbImage, BlendError> {
        check_dimensions(modified, original, mask)?;
        poisson_blend(modified, original, mask, (0, 0), &self.config)
    }
}
