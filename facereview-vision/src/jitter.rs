//! Randomized re-sampling of aligned face crops.
//!
//! Each jittered copy is a small random similarity transform (scale, rotation,
//! shift) of the crop, optionally mirrored. Averaging the embeddings of several
//! copies trades speed for a steadier encoding.

use image::{Rgb, RgbImage};
use rand::Rng;

use crate::face::sample_bilinear;

const MAX_SCALE_DELTA: f32 = 0.05;
const MAX_ROTATION: f32 = 3.0 * std::f32::consts::PI / 180.0;
const MAX_SHIFT: f32 = 2.0;

/// One random perturbation of `crop`, same dimensions.
pub fn jitter_image<R: Rng + ?Sized>(crop: &RgbImage, rng: &mut R) -> RgbImage {
    let scale = 1.0 + rng.gen_range(-MAX_SCALE_DELTA..=MAX_SCALE_DELTA);
    let angle = rng.gen_range(-MAX_ROTATION..=MAX_ROTATION);
    let shift = (
        rng.gen_range(-MAX_SHIFT..=MAX_SHIFT),
        rng.gen_range(-MAX_SHIFT..=MAX_SHIFT),
    );
    let mirror = rng.gen_bool(0.5);
    transform(crop, scale, angle, shift, mirror)
}

/// Similarity transform around the crop center.
pub fn transform(
    crop: &RgbImage,
    scale: f32,
    angle: f32,
    shift: (f32, f32),
    mirror: bool,
) -> RgbImage {
    let (w, h) = crop.dimensions();
    let cx = (w as f32 - 1.0) / 2.0;
    let cy = (h as f32 - 1.0) / 2.0;
    let (sin, cos) = angle.sin_cos();

    RgbImage::from_fn(w, h, |ox, oy| {
        let mut px = ox as f32 - cx - shift.0;
        let py = oy as f32 - cy - shift.1;
        if mirror {
            px = -px;
        }
        let sx = (cos * px + sin * py) / scale + cx;
        let sy = (-sin * px + cos * py) / scale + cy;
        sample_bilinear(crop, sx, sy).unwrap_or(Rgb([0, 0, 0]))
    })
}
