//! Tone utilities applied to the finished composite: min-max range
//! normalisation and CLAHE on the luma channel.

use image::{Rgb, RgbImage};

/// Stretch all channels jointly so the darkest value maps to 0 and the
/// brightest to 255. A flat image is returned unchanged.
pub fn normalize_range(image: &RgbImage) -> RgbImage {
    let raw = image.as_raw();
    let (Some(&lo), Some(&hi)) = (raw.iter().min(), raw.iter().max()) else {
        return image.clone();
    };
    if lo == hi || (lo == 0 && hi == 255) {
        return image.clone();
    }

    let scale = 255.0 / (hi - lo) as f32;
    let mut lut = [0u8; 256];
    for (v, slot) in lut.iter_mut().enumerate().skip(lo as usize).take((hi - lo) as usize + 1) {
        *slot = ((v as f32 - lo as f32) * scale).round().clamp(0.0, 255.0) as u8;
    }

    let mut out = image.clone();
    for v in out.iter_mut() {
        *v = lut[*v as usize];
    }
    out
}

/// Full-range BT.601 luma and chroma of one pixel.
pub fn rgb_to_ycbcr(px: Rgb<u8>) -> [f32; 3] {
    let [r, g, b] = px.0.map(f32::from);
    [
        0.299 * r + 0.587 * g + 0.114 * b,
        128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b,
        128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b,
    ]
}

pub fn ycbcr_to_rgb([y, cb, cr]: [f32; 3]) -> Rgb<u8> {
    let (cb, cr) = (cb - 128.0, cr - 128.0);
    let clip = |v: f32| v.round().clamp(0.0, 255.0) as u8;
    Rgb([
        clip(y + 1.402 * cr),
        clip(y - 0.344_136 * cb - 0.714_136 * cr),
        clip(y + 1.772 * cb),
    ])
}

/// Contrast-limited adaptive histogram equalisation of an 8-bit plane, in place.
///
/// The plane is split into a `tiles x tiles` grid. Each tile histogram is
/// clipped at `clip_limit` times the mean bin height, the excess spread
/// evenly, and pixels are mapped by bilinear interpolation between the
/// four nearest tile CDFs.
pub fn clahe(plane: &mut [u8], width: u32, height: u32, tiles: u32, clip_limit: f32) {
    let (w, h) = (width as usize, height as usize);
    let t = tiles.max(1) as usize;
    if w == 0 || h == 0 || plane.len() < w * h {
        return;
    }
    let (tile_w, tile_h) = (w / t, h / t);
    if tile_w == 0 || tile_h == 0 {
        return;
    }
    let tile_pixels = tile_w * tile_h;
    let clip = ((clip_limit * tile_pixels as f32 / 256.0).ceil() as u32).max(1);

    let mut luts: Vec<[f32; 256]> = Vec::with_capacity(t * t);
    for row in 0..t {
        for col in 0..t {
            let mut hist = [0u32; 256];
            for y in row * tile_h..(row + 1) * tile_h {
                for &v in &plane[y * w + col * tile_w..y * w + (col + 1) * tile_w] {
                    hist[v as usize] += 1;
                }
            }

            let mut excess = 0u32;
            for bin in hist.iter_mut() {
                if *bin > clip {
                    excess += *bin - clip;
                    *bin = clip;
                }
            }
            let (spread, leftover) = (excess / 256, (excess % 256) as usize);
            for (i, bin) in hist.iter_mut().enumerate() {
                *bin += spread + u32::from(i < leftover);
            }

            let mut lut = [0f32; 256];
            let mut running = 0u32;
            for (slot, &count) in lut.iter_mut().zip(hist.iter()) {
                running += count;
                *slot = running as f32 * 255.0 / tile_pixels as f32;
            }
            luts.push(lut);
        }
    }

    for y in 0..h {
        let fy = (y as f32 / tile_h as f32 - 0.5).clamp(0.0, (t - 1) as f32);
        let r0 = fy as usize;
        let r1 = (r0 + 1).min(t - 1);
        let dy = fy - r0 as f32;
        for x in 0..w {
            let fx = (x as f32 / tile_w as f32 - 0.5).clamp(0.0, (t - 1) as f32);
            let c0 = fx as usize;
            let c1 = (c0 + 1).min(t - 1);
            let dx = fx - c0 as f32;

            let v = plane[y * w + x] as usize;
            let top = luts[r0 * t + c0][v] * (1.0 - dx) + luts[r0 * t + c1][v] * dx;
            let bottom = luts[r1 * t + c0][v] * (1.0 - dx) + luts[r1 * t + c1][v] * dx;
            plane[y * w + x] = (top * (1.0 - dy) + bottom * dy).round().clamp(0.0, 255.0) as u8;
        }
    }
}

/// CLAHE on the luma channel only, keeping chroma.
pub fn equalize_luma(image: &RgbImage, tiles: u32, clip_limit: f32) -> RgbImage {
    let (w, h) = image.dimensions();
    let ycbcr: Vec<[f32; 3]> = image.pixels().map(|p| rgb_to_ycbcr(*p)).collect();
    let mut luma: Vec<u8> = ycbcr.iter().map(|p| p[0].round().clamp(0.0, 255.0) as u8).collect();
    clahe(&mut luma, w, h, tiles, clip_limit);

    let mut out = image.clone();
    for ((dst, &[_, cb, cr]), &y) in out.pixels_mut().zip(&ycbcr).zip(&luma) {
        *dst = ycbcr_to_rgb([y as f32, cb, cr]);
    }
    out
}
