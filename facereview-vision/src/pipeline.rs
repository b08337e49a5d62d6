use std::path::Path;

use anyhow::{Context, Result};
use image::RgbImage;
use ort::session::Session;
use rand::{rngs::StdRng, SeedableRng};

use crate::face::{self, DetectOptions, Detection, Embedding, ENCODER_INPUT};
use crate::jitter;

/// Pipeline tuning, fixed for the lifetime of a [`Pipeline`].
#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub detect: DetectOptions,
    /// Number of re-samples averaged per embedding, at least 1.
    pub jitters: u32,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            detect: DetectOptions::default(),
            jitters: 1,
        }
    }
}

/// A detected face with its embedding.
#[derive(Debug, Clone)]
pub struct Face {
    pub detection: Detection,
    pub embedding: Embedding,
}

impl Face {
    /// Face box as `(left, top, right, bottom)` pixels, trimmed to a `width x height` image.
    pub fn bounds(&self, width: u32, height: u32) -> (i32, i32, i32, i32) {
        let [x, y, w, h] = self.detection.bbox;
        let left = (x.round() as i32).max(0);
        let top = (y.round() as i32).max(0);
        let right = ((x + w).round() as i32).min(width as i32);
        let bottom = ((y + h).round() as i32).min(height as i32);
        (left, top, right, bottom)
    }
}

/// Full pipeline: detect faces → align → encode
pub struct Pipeline {
    pub detector: Session,
    pub encoder: Session,
    options: PipelineOptions,
    rng: StdRng,
}

impl Pipeline {
    pub fn load(detector: &Path, recognizer: &Path, options: PipelineOptions) -> Result<Self> {
        Ok(Self {
            detector: crate::model::detector_session(detector)?,
            encoder: crate::model::recog_session(recognizer)?,
            options,
            rng: StdRng::from_entropy(),
        })
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub fn detect(&mut self, img: &RgbImage) -> Result<Vec<Detection>> {
        face::detect_faces(&mut self.detector, img, &self.options.detect)
            .context("detecting faces")
    }

    /// Align and encode one face, averaging `jitters` re-samples.
    pub fn encode(&mut self, img: &RgbImage, detection: &Detection) -> Result<Embedding> {
        let aligned = face::align_face(img, detection, ENCODER_INPUT);
        let rounds = self.options.jitters.max(1);

        let mut sum: Vec<f32> = Vec::new();
        for round in 0..rounds {
            let sample = if round == 0 {
                aligned.clone()
            } else {
                jitter::jitter_image(&aligned, &mut self.rng)
            };
            let emb = face::encode_face(&mut self.encoder, &sample).context("encoding face")?;
            if sum.is_empty() {
                sum = vec![0.0; emb.dim()];
            }
            sum.iter_mut().zip(emb.vector.iter()).for_each(|(s, v)| *s += v);
        }

        face::l2_normalize(&mut sum);
        Ok(Embedding::from_vec(sum))
    }

    /// Detect and encode every face in `img`.
    pub fn analyze(&mut self, img: &RgbImage) -> Result<Vec<Face>> {
        let detections = self.detect(img)?;
        log::debug!("{} face(s) detected", detections.len());
        detections
            .into_iter()
            .map(|detection| {
                let embedding = self.encode(img, &detection)?;
                Ok(Face {
                    detection,
                    embedding,
                })
            })
            .collect()
    }
}
