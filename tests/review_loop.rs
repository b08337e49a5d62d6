use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::Path;
use std::rc::Rc;

use anyhow::Result;
use facereview::alarms::Alarm;
use facereview::annotate::{Annotator, MATCH_COLOR};
use facereview::config::Config;
use facereview::known_faces::{EncodingTable, KnownFaces};
use facereview::review::{EndReason, FaceAnalyzer, Review};
use facereview::save::parse_record;
use facereview::viewer::Viewer;
use facereview::{Detection, Embedding, Face};
use image::{Rgb, RgbImage};
use mongodb::bson::{doc, Document};

/// Returns the same faces for every crop and counts calls.
struct FixedAnalyzer {
    faces: Vec<Face>,
    calls: Rc<Cell<usize>>,
}

impl FaceAnalyzer for FixedAnalyzer {
    fn analyze(&mut self, _roi: &RgbImage) -> Result<Vec<Face>> {
        self.calls.set(self.calls.get() + 1);
        Ok(self.faces.clone())
    }
}

/// Fails on the first crop, then finds one face per crop.
struct FlakyAnalyzer {
    face: Face,
    calls: usize,
}

impl FaceAnalyzer for FlakyAnalyzer {
    fn analyze(&mut self, _roi: &RgbImage) -> Result<Vec<Face>> {
        self.calls += 1;
        if self.calls == 1 {
            anyhow::bail!("detector output malformed");
        }
        Ok(vec![self.face.clone()])
    }
}

/// Replays key names; behaves like a closed window once they run out.
struct ScriptedViewer {
    keys: VecDeque<&'static str>,
    frames: Rc<RefCell<Vec<RgbImage>>>,
}

impl Viewer for ScriptedViewer {
    fn show(&mut self, frame: &RgbImage) -> Result<Option<String>> {
        self.frames.borrow_mut().push(frame.clone());
        Ok(self.keys.pop_front().map(str::to_string))
    }
}

fn face_at(bbox: [f32; 4], embedding: Vec<f32>) -> Face {
    Face {
        detection: Detection {
            bbox,
            score: 0.9,
            landmarks: [0.0; 10],
        },
        embedding: Embedding::from_vec(embedding),
    }
}

fn known() -> KnownFaces {
    KnownFaces::from_table(EncodingTable {
        encodings: vec![vec![1.0, 0.0], vec![0.0, 1.0]],
        names: vec!["alice".into(), "bob".into()],
    })
    .unwrap()
}

fn write_image(dir: &Path, name: &str) -> String {
    let path = dir.join(name);
    RgbImage::from_pixel(64, 64, Rgb([40, 40, 40]))
        .save(&path)
        .unwrap();
    path.to_string_lossy().into_owned()
}

fn person_doc(id: &str, image: &str, confidence: f64, bbox: [f64; 4]) -> Document {
    let [xmin, xmax, ymin, ymax] = bbox;
    doc! {
        "_id": id,
        "image": image,
        "labels": {
            "Labels": [
                { "Name": "person", "Confidence": confidence, "Face": "bob",
                  "Box": { "xmin": xmin, "xmax": xmax, "ymin": ymin, "ymax": ymax } },
            ]
        }
    }
}

fn alarm(id: &str, image: &str) -> Alarm {
    Alarm::from_document(person_doc(id, image, 90.0, [10.0, 50.0, 20.0, 60.0])).unwrap()
}

struct Harness {
    cfg: Config,
    known: KnownFaces,
    calls: Rc<Cell<usize>>,
    frames: Rc<RefCell<Vec<RgbImage>>>,
    _dir: tempfile::TempDir,
}

impl Harness {
    fn new() -> (Self, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let mut cfg = Config::default();
        cfg.review.save_dir = root.join("saved");
        (
            Self {
                cfg,
                known: known(),
                calls: Rc::new(Cell::new(0)),
                frames: Rc::new(RefCell::new(Vec::new())),
                _dir: dir,
            },
            root,
        )
    }

    fn review<'a>(
        &'a self,
        alarms: &'a [Alarm],
        faces: Vec<Face>,
        keys: &[&'static str],
    ) -> Review<'a, FixedAnalyzer, ScriptedViewer> {
        let analyzer = FixedAnalyzer {
            faces,
            calls: self.calls.clone(),
        };
        let viewer = ScriptedViewer {
            keys: keys.iter().copied().collect(),
            frames: self.frames.clone(),
        };
        Review::new(
            &self.cfg,
            alarms,
            &self.known,
            analyzer,
            viewer,
            Annotator::new(None),
        )
        .unwrap()
    }
}

#[test]
fn advancing_past_last_alarm_ends_review() {
    let (h, dir) = Harness::new();
    let alarms = vec![
        alarm("a", &write_image(&dir, "a.png")),
        alarm("b", &write_image(&dir, "b.png")),
    ];
    let summary = h.review(&alarms, vec![], &["Space", "Right"]).run().unwrap();
    assert_eq!(summary.shown, vec![0, 1]);
    assert_eq!(summary.end, EndReason::Exhausted);
}

#[test]
fn back_navigation_clamps_at_first_alarm() {
    let (h, dir) = Harness::new();
    let alarms = vec![
        alarm("a", &write_image(&dir, "a.png")),
        alarm("b", &write_image(&dir, "b.png")),
    ];
    let summary = h
        .review(&alarms, vec![], &["Left", "Up", "Down", "Down", "Escape"])
        .run()
        .unwrap();
    assert_eq!(summary.shown, vec![0, 0, 1, 0, 0]);
    assert_eq!(summary.end, EndReason::Quit);
}

#[test]
fn unbound_key_redraws_same_alarm() {
    let (h, dir) = Harness::new();
    let alarms = vec![alarm("a", &write_image(&dir, "a.png"))];
    let summary = h.review(&alarms, vec![], &["X", "Key1", "Q"]).run().unwrap();
    assert_eq!(summary.shown, vec![0, 0, 0]);
    assert_eq!(summary.end, EndReason::Quit);
}

#[test]
fn unreadable_images_are_skipped() {
    let (h, dir) = Harness::new();
    let good = write_image(&dir, "good.png");
    let missing = dir.join("missing.png").to_string_lossy().into_owned();

    let alarms = vec![alarm("m", &missing), alarm("g", &good)];
    let summary = h.review(&alarms, vec![], &["Q"]).run().unwrap();
    assert_eq!(summary.shown, vec![1]);
    assert_eq!(summary.end, EndReason::Quit);

    let alarms = vec![alarm("g", &good), alarm("m", &missing)];
    let summary = h.review(&alarms, vec![], &["Space"]).run().unwrap();
    assert_eq!(summary.shown, vec![0]);
    assert_eq!(summary.end, EndReason::Exhausted);
}

#[test]
fn closed_window_and_empty_list() {
    let (h, dir) = Harness::new();
    let alarms = vec![alarm("a", &write_image(&dir, "a.png"))];
    let summary = h.review(&alarms, vec![], &[]).run().unwrap();
    assert_eq!(summary.end, EndReason::WindowClosed);

    let summary = h.review(&[], vec![], &["Q"]).run().unwrap();
    assert_eq!(summary.end, EndReason::NoAlarms);
    assert!(summary.shown.is_empty());
}

#[test]
fn save_writes_image_and_record() {
    let (h, dir) = Harness::new();
    let alarms = vec![alarm("X", &write_image(&dir, "x.png"))];
    let summary = h.review(&alarms, vec![], &["S", "Q"]).run().unwrap();
    assert_eq!(summary.shown, vec![0, 0]);
    assert_eq!(summary.saved.len(), 1);

    let saved = &h.cfg.review.save_dir;
    let mut names: Vec<String> = std::fs::read_dir(saved)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["X.jpg", "X.json"]);

    let img = image::open(saved.join("X.jpg")).unwrap();
    assert_eq!((img.width(), img.height()), (64, 64));

    let json = std::fs::read_to_string(saved.join("X.json")).unwrap();
    let record = parse_record(&json).unwrap();
    assert_eq!(record, alarms[0].raw);
    assert_eq!(Alarm::from_document(record).unwrap(), alarms[0]);
}

#[test]
fn recognized_face_is_offset_into_frame() {
    let (h, dir) = Harness::new();
    let a = alarm("a", &write_image(&dir, "a.png"));
    let mut review = h.review(
        std::slice::from_ref(&a),
        vec![face_at([2.0, 2.0, 10.0, 10.0], vec![0.9, 0.1])],
        &[],
    );

    let mut frame = RgbImage::from_pixel(64, 64, Rgb([40, 40, 40]));
    let faces = review.annotate(&a, &mut frame).unwrap();
    assert_eq!(faces.len(), 1);
    assert_eq!(faces[0].name, "alice");
    assert_eq!(faces[0].stored.as_deref(), Some("bob"));
    // crop origin (10, 20) + face box (2, 2)-(12, 12)
    assert_eq!(faces[0].bounds, (12, 22, 22, 32));
    assert_eq!(*frame.get_pixel(12, 27), MATCH_COLOR);
}

#[test]
fn far_face_is_unknown() {
    let (h, dir) = Harness::new();
    let a = alarm("a", &write_image(&dir, "a.png"));
    let mut review = h.review(
        std::slice::from_ref(&a),
        vec![face_at([0.0, 0.0, 8.0, 8.0], vec![-1.0, -1.0])],
        &[],
    );
    let mut frame = RgbImage::new(64, 64);
    let faces = review.annotate(&a, &mut frame).unwrap();
    assert_eq!(faces[0].name, "Unknown");
}

#[test]
fn low_confidence_and_empty_regions_are_not_analyzed() {
    let (h, dir) = Harness::new();
    let image = write_image(&dir, "a.png");
    let faces = vec![face_at([0.0, 0.0, 4.0, 4.0], vec![1.0, 0.0])];

    let weak = Alarm::from_document(person_doc("w", &image, 50.0, [0.0, 64.0, 0.0, 64.0])).unwrap();
    let flat = Alarm::from_document(person_doc("f", &image, 90.0, [10.0, 40.0, 30.0, 30.0])).unwrap();
    let alarms = vec![weak, flat];
    let mut review = h.review(&alarms, faces, &[]);

    for a in &alarms {
        let mut frame = RgbImage::new(64, 64);
        assert!(review.annotate(a, &mut frame).unwrap().is_empty());
    }
    assert_eq!(h.calls.get(), 0);
}

#[test]
fn shown_frames_carry_annotations() {
    let (h, dir) = Harness::new();
    let alarms = vec![alarm("a", &write_image(&dir, "a.png"))];
    h.review(&alarms, vec![], &["Q"]).run().unwrap();

    let frames = h.frames.borrow();
    assert_eq!(frames.len(), 1);
    // person region outline at xmin = 10
    assert_eq!(*frames[0].get_pixel(10, 40), facereview::annotate::REGION_COLOR);
    assert_eq!(*frames[0].get_pixel(30, 40), Rgb([40, 40, 40]));
}

#[test]
fn failed_region_does_not_stop_the_others() {
    let (h, dir) = Harness::new();
    let image = write_image(&dir, "a.png");
    let doc = doc! {
        "_id": "two",
        "image": image.as_str(),
        "labels": {
            "Labels": [
                { "Name": "person", "Confidence": 90.0,
                  "Box": { "xmin": 0.0, "xmax": 20.0, "ymin": 0.0, "ymax": 20.0 } },
                { "Name": "person", "Confidence": 90.0,
                  "Box": { "xmin": 30.0, "xmax": 60.0, "ymin": 30.0, "ymax": 60.0 } },
            ]
        }
    };
    let alarms = vec![Alarm::from_document(doc).unwrap()];
    let analyzer = FlakyAnalyzer {
        face: face_at([1.0, 1.0, 6.0, 6.0], vec![0.0, 1.0]),
        calls: 0,
    };
    let viewer = ScriptedViewer {
        keys: ["Q"].into_iter().collect(),
        frames: h.frames.clone(),
    };
    let mut review = Review::new(
        &h.cfg,
        &alarms,
        &h.known,
        analyzer,
        viewer,
        Annotator::new(None),
    )
    .unwrap();

    let mut frame = RgbImage::new(64, 64);
    let faces = review.annotate(&alarms[0], &mut frame).unwrap();
    assert_eq!(faces.len(), 1);
    assert_eq!(faces[0].name, "bob");
    assert_eq!(faces[0].bounds, (31, 31, 37, 37));

    let summary = review.run().unwrap();
    assert_eq!(summary.shown, vec![0]);
    assert_eq!(summary.end, EndReason::Quit);
    assert_eq!(h.frames.borrow().len(), 1);
}

#[test]
fn failed_save_keeps_reviewing() {
    let (mut h, dir) = Harness::new();
    let blocker = dir.join("not-a-dir");
    std::fs::write(&blocker, b"").unwrap();
    h.cfg.review.save_dir = blocker;

    let alarms = vec![
        alarm("a", &write_image(&dir, "a.png")),
        alarm("b", &write_image(&dir, "b.png")),
    ];
    let summary = h
        .review(&alarms, vec![], &["S", "Space", "Q"])
        .run()
        .unwrap();
    assert!(summary.saved.is_empty());
    assert_eq!(summary.shown, vec![0, 0, 1]);
    assert_eq!(summary.end, EndReason::Quit);
}

#[test]
fn embedding_length_mismatch_is_fatal() {
    let (h, dir) = Harness::new();
    let alarms = vec![alarm("a", &write_image(&dir, "a.png"))];
    let faces = vec![face_at([0.0, 0.0, 8.0, 8.0], vec![1.0, 0.0, 50.0])];
    let err = h.review(&alarms, faces, &["Q"]).run().unwrap_err();
    assert!(err.to_string().contains("known encodings"), "{err:#}");
}

#[test]
fn huge_person_box_is_clamped() {
    let (h, dir) = Harness::new();
    let image = write_image(&dir, "a.png");
    let a = Alarm::from_document(person_doc("h", &image, 90.0, [-2e9, 2e9, 0.0, 10.0])).unwrap();
    let mut review = h.review(std::slice::from_ref(&a), vec![], &[]);
    let mut frame = RgbImage::from_pixel(64, 64, Rgb([40, 40, 40]));
    assert!(review.annotate(&a, &mut frame).unwrap().is_empty());
    assert_eq!(*frame.get_pixel(32, 0), facereview::annotate::REGION_COLOR);
    assert_eq!(h.calls.get(), 1);
}
