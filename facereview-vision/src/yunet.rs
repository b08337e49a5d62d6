//! YuNet output decoding.
//!
//! The 2023mar YuNet graph is anchor-free. For each stride (8, 16, 32) it emits
//! four heads over a `(input / stride)^2` grid:
//! - cls: `[1, N, 1]` class probability
//! - obj: `[1, N, 1]` objectness probability
//! - bbox: `[1, N, 4]` center offsets and size, in stride units
//! - kps: `[1, N, 10]` five landmark offsets, in stride units
//!
//! Heads are emitted grouped by kind: all cls, then all obj, bbox, kps.

use anyhow::{bail, Result};
use ndarray::Array2;

pub const STRIDES: [usize; 3] = [8, 16, 32];

/// Detection in canvas-normalized coordinates (`[0, 1]`).
#[derive(Debug, Clone)]
pub struct RawDetection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10],
}

/// All heads of a single stride.
#[derive(Debug, Clone)]
pub struct StrideHead {
    pub stride: usize,
    /// Combined `sqrt(cls * obj)` score per grid cell, `[N, 1]`.
    pub scores: Array2<f32>,
    pub boxes: Array2<f32>,
    pub landmarks: Array2<f32>,
}

fn combine_score(cls: f32, obj: f32) -> f32 {
    (cls.clamp(0.0, 1.0) * obj.clamp(0.0, 1.0)).sqrt()
}

fn head(
    outputs: &[(&[i64], &[f32])],
    index: usize,
    cells: usize,
    width: usize,
    kind: &str,
) -> Result<Array2<f32>> {
    let Some((shape, data)) = outputs.get(index) else {
        bail!("missing {kind} output at index {index}");
    };
    if shape.len() != 3 || shape[0] != 1 || shape[1] as usize != cells || shape[2] as usize != width
    {
        bail!("unexpected {kind} shape at index {index}: {shape:?}, expected [1, {cells}, {width}]");
    }
    Ok(Array2::from_shape_vec((cells, width), data.to_vec())?)
}

/// Split the twelve raw YuNet outputs into per-stride heads.
pub fn parse_outputs(outputs: &[(&[i64], &[f32])], input_size: usize) -> Result<Vec<StrideHead>> {
    let n = STRIDES.len();
    STRIDES
        .iter()
        .enumerate()
        .map(|(i, &stride)| {
            let side = input_size / stride;
            let cells = side * side;
            let cls = head(outputs, i, cells, 1, "cls")?;
            let obj = head(outputs, n + i, cells, 1, "obj")?;
            let scores = ndarray::Zip::from(&cls)
                .and(&obj)
                .map_collect(|&c, &o| combine_score(c, o));
            Ok(StrideHead {
                stride,
                scores,
                boxes: head(outputs, 2 * n + i, cells, 4, "bbox")?,
                landmarks: head(outputs, 3 * n + i, cells, 10, "kps")?,
            })
        })
        .collect()
}

/// Decode every grid cell scoring at least `score_threshold`.
pub fn decode(heads: &[StrideHead], score_threshold: f32, input_size: usize) -> Vec<RawDetection> {
    let size = input_size as f32;
    let mut out = Vec::new();

    for h in heads {
        let side = input_size / h.stride;
        let stride = h.stride as f32;
        for row in 0..side {
            for col in 0..side {
                let cell = row * side + col;
                let score = h.scores[[cell, 0]];
                if score < score_threshold {
                    continue;
                }

                let cx = (col as f32 + h.boxes[[cell, 0]]) * stride / size;
                let cy = (row as f32 + h.boxes[[cell, 1]]) * stride / size;
                let w = h.boxes[[cell, 2]] * stride / size;
                let hgt = h.boxes[[cell, 3]] * stride / size;

                let mut landmarks = [0.0f32; 10];
                for k in 0..5 {
                    landmarks[2 * k] = (col as f32 + h.landmarks[[cell, 2 * k]]) * stride / size;
                    landmarks[2 * k + 1] =
                        (row as f32 + h.landmarks[[cell, 2 * k + 1]]) * stride / size;
                }

                out.push(RawDetection {
                    bbox: [cx - w / 2.0, cy - hgt / 2.0, w, hgt],
                    score,
                    landmarks,
                });
            }
        }
    }

    out
}
