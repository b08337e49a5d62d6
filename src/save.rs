use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::{ImageFormat, RgbImage};
use mongodb::bson::{Bson, Document};

use crate::alarms::Alarm;

/// Files written for one saved alarm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedFiles {
    pub image: PathBuf,
    pub record: PathBuf,
}

/// Original alarm document as relaxed Extended JSON.
pub fn record_json(doc: &Document) -> Result<String> {
    let value = Bson::Document(doc.clone()).into_relaxed_extjson();
    Ok(serde_json::to_string_pretty(&value)?)
}

/// Parse a record written by [`record_json`].
pub fn parse_record(json: &str) -> Result<Document> {
    let value: serde_json::Value = serde_json::from_str(json)?;
    match Bson::try_from(value).context("invalid extended JSON")? {
        Bson::Document(doc) => Ok(doc),
        other => anyhow::bail!("expected a document, found {:?}", other.element_type()),
    }
}

/// Write `<dir>/<id>.jpg` (the annotated frame) and `<dir>/<id>.json` (the stored record).
pub fn save_alarm(dir: &Path, alarm: &Alarm, frame: &RgbImage) -> Result<SavedFiles> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let id = alarm.id_string();
    let files = SavedFiles {
        image: dir.join(format!("{id}.jpg")),
        record: dir.join(format!("{id}.json")),
    };

    frame
        .save_with_format(&files.image, ImageFormat::Jpeg)
        .with_context(|| format!("writing {}", files.image.display()))?;
    std::fs::write(&files.record, record_json(&alarm.raw)?)
        .with_context(|| format!("writing {}", files.record.display()))?;

    log::info!("saved alarm {id} to {}", dir.display());
    Ok(files)
}
