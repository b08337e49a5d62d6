//! Interactive per-alarm review loop.

use std::path::PathBuf;

use anyhow::{bail, Result};
use image::RgbImage;
use log::{debug, error, info, warn};

use crate::alarms::Alarm;
use crate::annotate::{crop, Annotator, PersonRegion};
use crate::config::Config;
use crate::keys::{Action, KeyMap};
use crate::known_faces::KnownFaces;
use crate::matcher;
use crate::save::{self, SavedFiles};
use crate::viewer::Viewer;
use crate::{Face, Pipeline};

/// Face detection and encoding over a person crop.
pub trait FaceAnalyzer {
    fn analyze(&mut self, roi: &RgbImage) -> Result<Vec<Face>>;
}

impl FaceAnalyzer for Pipeline {
    fn analyze(&mut self, roi: &RgbImage) -> Result<Vec<Face>> {
        Pipeline::analyze(self, roi)
    }
}

/// Position in the alarm list. Always within `[0, len)` for a non-empty list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    idx: usize,
    len: usize,
}

impl Cursor {
    pub fn new(len: usize) -> Self {
        Self { idx: 0, len }
    }

    pub fn index(&self) -> usize {
        self.idx
    }

    /// Move forward; `false` when already on the last alarm.
    pub fn advance(&mut self) -> bool {
        if self.idx + 1 >= self.len {
            return false;
        }
        self.idx += 1;
        true
    }

    /// Move back; `false` (and no move) on the first alarm.
    pub fn back(&mut self) -> bool {
        if self.idx == 0 {
            return false;
        }
        self.idx -= 1;
        true
    }
}

/// Why the review loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    NoAlarms,
    Quit,
    WindowClosed,
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct ReviewSummary {
    pub end: EndReason,
    /// Indices of alarms shown, in display order.
    pub shown: Vec<usize>,
    pub saved: Vec<SavedFiles>,
}

/// A face drawn on a review frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizedFace {
    pub name: String,
    /// `(left, top, right, bottom)` in frame pixels.
    pub bounds: (i32, i32, i32, i32),
    pub stored: Option<String>,
}

/// Settings the loop needs from [`Config`].
#[derive(Debug, Clone)]
struct Settings {
    person_label: String,
    unknown_label: String,
    min_confidence: f64,
    tolerance: f32,
    save_dir: PathBuf,
}

pub struct Review<'a, A, V> {
    alarms: &'a [Alarm],
    known: &'a KnownFaces,
    analyzer: A,
    viewer: V,
    annotator: Annotator,
    keys: KeyMap,
    settings: Settings,
}

impl<'a, A: FaceAnalyzer, V: Viewer> Review<'a, A, V> {
    pub fn new(
        cfg: &Config,
        alarms: &'a [Alarm],
        known: &'a KnownFaces,
        analyzer: A,
        viewer: V,
        annotator: Annotator,
    ) -> Result<Self> {
        cfg.validate()?;
        Ok(Self {
            alarms,
            known,
            analyzer,
            viewer,
            annotator,
            keys: KeyMap::new(&cfg.keys)?,
            settings: Settings {
                person_label: cfg.review.person_label.clone(),
                unknown_label: cfg.review.unknown_label.clone(),
                min_confidence: cfg.review.min_confidence,
                tolerance: cfg.recognition.tolerance,
                save_dir: cfg.review.save_dir.clone(),
            },
        })
    }

    /// Run detection and recognition over the person regions of `alarm`,
    /// drawing the results onto `frame`.
    ///
    /// Fails when the recognizer's embeddings do not have the length of the
    /// known-face encodings.
    pub fn annotate(&mut self, alarm: &Alarm, frame: &mut RgbImage) -> Result<Vec<RecognizedFace>> {
        let source = frame.clone();
        let (width, height) = source.dimensions();
        let mut recognized = Vec::new();

        for object in alarm.confident(&self.settings.person_label, self.settings.min_confidence) {
            let Some(bbox) = object.bbox else {
                warn!("{} object without a box, ignored", object.name);
                continue;
            };
            let region = PersonRegion::from_box(&bbox);
            debug!("found {} object at {:?}", object.name, region);
            self.annotator
                .draw_region(frame, &region, &self.settings.person_label);

            let Some(rect) = region.clamp(width, height) else {
                continue;
            };
            let roi = crop(&source, rect);

            let faces = match self.analyzer.analyze(&roi) {
                Ok(faces) => faces,
                Err(e) => {
                    warn!("face analysis failed: {e:#}");
                    continue;
                }
            };

            for face in faces {
                if let Some(dim) = self.known.dim() {
                    if face.embedding.dim() != dim {
                        bail!(
                            "recognizer produced {}-value embeddings but known encodings have {dim} values",
                            face.embedding.dim()
                        );
                    }
                }
                let name = matcher::identify(self.known, &face.embedding, self.settings.tolerance)
                    .unwrap_or(self.settings.unknown_label.as_str())
                    .to_string();
                let (l, t, r, b) = face.bounds(rect.width, rect.height);
                debug!("face box width {} height {}", r - l, b - t);

                let (ox, oy) = (rect.x as i32, rect.y as i32);
                let bounds = (l + ox, t + oy, r + ox, b + oy);
                self.annotator
                    .draw_face(frame, bounds, &name, object.face.as_deref());
                if name != self.settings.unknown_label {
                    info!("named {name}");
                }
                recognized.push(RecognizedFace {
                    name,
                    bounds,
                    stored: object.face.clone(),
                });
            }
        }

        Ok(recognized)
    }

    /// Load and annotate the image of `alarm`, `None` when it cannot be read.
    pub fn render(&mut self, alarm: &Alarm) -> Result<Option<RgbImage>> {
        let mut frame = match image::open(&alarm.image) {
            Ok(img) => img.to_rgb8(),
            Err(e) => {
                warn!("alarm image {} not readable ({e}), skipping", alarm.image);
                return Ok(None);
            }
        };
        self.annotate(alarm, &mut frame)?;
        Ok(Some(frame))
    }

    pub fn run(&mut self) -> Result<ReviewSummary> {
        let mut summary = ReviewSummary {
            end: EndReason::NoAlarms,
            shown: Vec::new(),
            saved: Vec::new(),
        };
        if self.alarms.is_empty() {
            info!("no alarms to review");
            return Ok(summary);
        }

        let alarms = self.alarms;
        let mut cursor = Cursor::new(alarms.len());
        summary.end = loop {
            let idx = cursor.index();
            let alarm = &alarms[idx];
            info!(
                "alarm {} ({}/{}): {}",
                alarm.id_string(),
                idx + 1,
                alarms.len(),
                alarm.image
            );

            let Some(frame) = self.render(alarm)? else {
                if !cursor.advance() {
                    info!("reached end of alarm images");
                    break EndReason::Exhausted;
                }
                continue;
            };
            summary.shown.push(idx);

            let Some(key) = self.viewer.show(&frame)? else {
                break EndReason::WindowClosed;
            };
            match self.keys.action(&key) {
                Some(Action::Quit) => break EndReason::Quit,
                Some(Action::Save) => {
                    match save::save_alarm(&self.settings.save_dir, alarm, &frame) {
                        Ok(files) => summary.saved.push(files),
                        Err(e) => error!("saving alarm {}: {e:#}", alarm.id_string()),
                    }
                }
                Some(Action::Back) => {
                    if !cursor.back() {
                        info!("already at the first alarm");
                    }
                }
                Some(Action::Advance) => {
                    if !cursor.advance() {
                        info!("reached end of alarm images");
                        break EndReason::Exhausted;
                    }
                }
                None => debug!("key {key} not bound"),
            }
        };

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_clamps_at_start() {
        let mut c = Cursor::new(3);
        assert!(!c.back());
        assert_eq!(c.index(), 0);
        assert!(c.advance());
        assert!(c.back());
        assert_eq!(c.index(), 0);
    }

    #[test]
    fn cursor_stops_at_end() {
        let mut c = Cursor::new(2);
        assert!(c.advance());
        assert!(!c.advance());
        assert_eq!(c.index(), 1);

        let mut single = Cursor::new(1);
        assert!(!single.advance());
    }
}
