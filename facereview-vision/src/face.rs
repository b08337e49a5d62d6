use crate::yunet;
use anyhow::{Context, Result};
use image::{imageops::FilterType, Rgb, RgbImage};
use ndarray::{Array2, Array4};
use ort::{session::Session, value::Value};

/// YuNet 2023mar takes a fixed `[1, 3, 640, 640]` input.
pub const DETECTOR_INPUT: u32 = 640;

/// SFace takes a `[1, 3, 112, 112]` aligned crop.
pub const ENCODER_INPUT: u32 = 112;

/// Face found by the detector, in source image pixels.
#[derive(Debug, Clone)]
pub struct Detection {
    pub bbox: [f32; 4], // x, y, w, h
    pub score: f32,
    pub landmarks: [f32; 10], // 5 points: x1,y1,x2,y2,...,x5,y5
}

/// L2-normalized face embedding (SFace output).
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Array2<f32>,
}

impl Embedding {
    /// Wrap a raw vector as a `[1, D]` embedding, without normalizing it.
    pub fn from_vec(values: Vec<f32>) -> Self {
        let dim = values.len();
        let vector = Array2::from_shape_vec((1, dim), values)
            .unwrap_or_else(|_| Array2::zeros((1, dim)));
        Self { vector }
    }

    pub fn dim(&self) -> usize {
        self.vector.len()
    }

    pub fn to_vec(&self) -> Vec<f32> {
        self.vector.iter().copied().collect()
    }

    /// Euclidean distance between two embeddings.
    ///
    /// Embeddings of different dimensions are infinitely far apart.
    pub fn distance(&self, other: &Embedding) -> f32 {
        if self.dim() != other.dim() {
            return f32::INFINITY;
        }
        self.vector
            .iter()
            .zip(other.vector.iter())
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
    }
}

/// Detector knobs.
#[derive(Debug, Clone, Copy)]
pub struct DetectOptions {
    pub score_threshold: f32,
    pub nms_threshold: f32,
    /// Number of times the input is doubled before detection.
    pub upsample: u32,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            score_threshold: 0.6,
            nms_threshold: 0.3,
            upsample: 1,
        }
    }
}

/// Scale applied to an image before it is pasted onto the detector canvas.
///
/// Images are enlarged by `2^upsample` but never beyond what fits the canvas,
/// and images larger than the canvas are always shrunk to fit.
pub fn canvas_scale(width: u32, height: u32, upsample: u32, target: u32) -> f32 {
    let max_dim = width.max(height).max(1) as f32;
    let fit = target as f32 / max_dim;
    let wanted = 2f32.powi(upsample.min(16) as i32);
    fit.min(wanted)
}

fn to_bgr_planes(img: &RgbImage) -> Vec<f32> {
    let pixel_count = (img.width() * img.height()) as usize;
    let mut planes = vec![0.0f32; 3 * pixel_count];
    let (b, rest) = planes.split_at_mut(pixel_count);
    let (g, r) = rest.split_at_mut(pixel_count);
    for (i, px) in img.pixels().enumerate() {
        r[i] = px[0] as f32;
        g[i] = px[1] as f32;
        b[i] = px[2] as f32;
    }
    planes
}

/// Detect faces in an RGB image using YuNet.
pub fn detect_faces(
    session: &mut Session,
    img: &RgbImage,
    opts: &DetectOptions,
) -> Result<Vec<Detection>> {
    let target = DETECTOR_INPUT;
    let (orig_width, orig_height) = img.dimensions();
    if orig_width == 0 || orig_height == 0 {
        return Ok(vec![]);
    }

    let scale = canvas_scale(orig_width, orig_height, opts.upsample, target);
    let new_width = ((orig_width as f32 * scale) as u32).clamp(1, target);
    let new_height = ((orig_height as f32 * scale) as u32).clamp(1, target);
    let resized = image::imageops::resize(img, new_width, new_height, FilterType::Triangle);

    let mut canvas = RgbImage::new(target, target);
    let offset_x = (target - new_width) / 2;
    let offset_y = (target - new_height) / 2;
    image::imageops::overlay(&mut canvas, &resized, offset_x as i64, offset_y as i64);

    let input = Array4::from_shape_vec(
        (1, 3, target as usize, target as usize),
        to_bgr_planes(&canvas),
    )?;
    let outputs = session.run(ort::inputs![Value::from_array(input)?])?;

    let mut raw_outputs: Vec<(Vec<i64>, Vec<f32>)> = Vec::new();
    for (_name, output) in outputs.iter() {
        let (shape, data) = output.try_extract_tensor::<f32>()?;
        raw_outputs.push((shape.iter().copied().collect(), data.to_vec()));
    }
    let refs: Vec<(&[i64], &[f32])> = raw_outputs
        .iter()
        .map(|(s, d)| (s.as_slice(), d.as_slice()))
        .collect();

    let heads = yunet::parse_outputs(&refs, target as usize).context("parsing YuNet outputs")?;
    let raw = yunet::decode(&heads, opts.score_threshold, target as usize);

    // canvas-normalized -> canvas pixels -> source pixels
    let unmap_x = |v: f32| (v * target as f32 - offset_x as f32) / scale;
    let unmap_y = |v: f32| (v * target as f32 - offset_y as f32) / scale;
    let detections: Vec<Detection> = raw
        .into_iter()
        .map(|d| {
            let mut landmarks = [0.0f32; 10];
            for k in 0..5 {
                landmarks[2 * k] = unmap_x(d.landmarks[2 * k]);
                landmarks[2 * k + 1] = unmap_y(d.landmarks[2 * k + 1]);
            }
            Detection {
                bbox: [
                    unmap_x(d.bbox[0]),
                    unmap_y(d.bbox[1]),
                    d.bbox[2] * target as f32 / scale,
                    d.bbox[3] * target as f32 / scale,
                ],
                score: d.score,
                landmarks,
            }
        })
        .collect();

    if opts.nms_threshold < 1.0 {
        Ok(nms(&detections, opts.nms_threshold))
    } else {
        Ok(detections)
    }
}

/// Greedy non-maximum suppression, highest score first.
pub fn nms(detections: &[Detection], iou_threshold: f32) -> Vec<Detection> {
    let mut sorted = detections.to_vec();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));

    let mut keep: Vec<Detection> = Vec::new();
    for candidate in sorted {
        if keep
            .iter()
            .all(|k| compute_iou(&k.bbox, &candidate.bbox) <= iou_threshold)
        {
            keep.push(candidate);
        }
    }
    keep
}

fn compute_iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let x1 = a[0].max(b[0]);
    let y1 = a[1].max(b[1]);
    let x2 = (a[0] + a[2]).min(b[0] + b[2]);
    let y2 = (a[1] + a[3]).min(b[1] + b[3]);

    if x2 <= x1 || y2 <= y1 {
        return 0.0;
    }

    let inter = (x2 - x1) * (y2 - y1);
    inter / (a[2] * a[3] + b[2] * b[3] - inter)
}

/// Bilinear sample at a fractional source position, `None` outside the image.
pub(crate) fn sample_bilinear(img: &RgbImage, x: f32, y: f32) -> Option<Rgb<u8>> {
    let (w, h) = img.dimensions();
    if !(x >= 0.0 && x < w as f32 && y >= 0.0 && y < h as f32) {
        return None;
    }
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let p00 = img.get_pixel(x0, y0);
    let p10 = img.get_pixel(x1, y0);
    let p01 = img.get_pixel(x0, y1);
    let p11 = img.get_pixel(x1, y1);

    let mut out = [0u8; 3];
    for (c, v) in out.iter_mut().enumerate() {
        let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
        let bottom = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
        *v = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Some(Rgb(out))
}

/// Rotate, scale and crop the face so the eyes land on the ArcFace template.
pub fn align_face(img: &RgbImage, detection: &Detection, size: u32) -> RgbImage {
    // eye positions in the 112x112 template
    let ref_left = (38.3_f32, 51.7_f32);
    let ref_right = (73.5_f32, 51.5_f32);
    let unit = size as f32 / ENCODER_INPUT as f32;

    let left = (detection.landmarks[0], detection.landmarks[1]);
    let right = (detection.landmarks[2], detection.landmarks[3]);
    let (dx, dy) = (right.0 - left.0, right.1 - left.1);
    let eye_dist = (dx * dx + dy * dy).sqrt().max(1e-3);
    let ref_dist = ((ref_right.0 - ref_left.0).powi(2) + (ref_right.1 - ref_left.1).powi(2)).sqrt();

    let scale = unit * ref_dist / eye_dist;
    let angle = dy.atan2(dx);
    let (sin, cos) = angle.sin_cos();

    let center = ((left.0 + right.0) / 2.0, (left.1 + right.1) / 2.0);
    let ref_center = (
        (ref_left.0 + ref_right.0) / 2.0 * unit,
        (ref_left.1 + ref_right.1) / 2.0 * unit,
    );

    // output = M * input + t, with M = scale * [cos sin; -sin cos]
    let (a, b, c, d) = (scale * cos, scale * sin, -scale * sin, scale * cos);
    let tx = ref_center.0 - (a * center.0 + b * center.1);
    let ty = ref_center.1 - (c * center.0 + d * center.1);
    let det = a * d - b * c;

    RgbImage::from_fn(size, size, |ox, oy| {
        let px = ox as f32 - tx;
        let py = oy as f32 - ty;
        let ix = (d * px - b * py) / det;
        let iy = (-c * px + a * py) / det;
        sample_bilinear(img, ix, iy).unwrap_or(Rgb([0, 0, 0]))
    })
}

pub(crate) fn l2_normalize(values: &mut [f32]) {
    let norm = values.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        values.iter_mut().for_each(|x| *x /= norm);
    }
}

/// Encode an aligned face crop with SFace.
pub fn encode_face(session: &mut Session, face: &RgbImage) -> Result<Embedding> {
    let size = ENCODER_INPUT;
    let face = if face.dimensions() == (size, size) {
        face.clone()
    } else {
        image::imageops::resize(face, size, size, FilterType::Triangle)
    };

    let input = Array4::from_shape_vec((1, 3, size as usize, size as usize), to_bgr_planes(&face))?;
    let outputs = session.run(ort::inputs![Value::from_array(input)?])?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

    let dim = if shape.len() == 2 {
        shape[1] as usize
    } else {
        data.len()
    };
    let mut values = data[..dim].to_vec();
    l2_normalize(&mut values);

    Ok(Embedding::from_vec(values))
}
