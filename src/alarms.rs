//! Alarm records and the one-shot fetch from the alarm store.

use anyhow::{Context, Result};
use mongodb::bson::{self, doc, Bson, Document};
use serde::{Deserialize, Serialize};

use crate::config::DatabaseConfig;

/// Object box in image pixels. `ymin` is the top row, `ymax` the bottom row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xmin: f64,
    pub xmax: f64,
    pub ymin: f64,
    pub ymax: f64,
}

/// One entry of an alarm's object detection results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    #[serde(rename = "Name")]
    pub name: String,
    /// Detector confidence, 0-100.
    #[serde(rename = "Confidence", default)]
    pub confidence: f64,
    #[serde(rename = "Box", default)]
    pub bbox: Option<BoundingBox>,
    /// Face label assigned when the alarm was stored.
    #[serde(rename = "Face", default)]
    pub face: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Labels {
    #[serde(rename = "Labels", default)]
    labels: Vec<DetectedObject>,
}

#[derive(Debug, Deserialize)]
struct AlarmFields {
    #[serde(rename = "_id")]
    id: Bson,
    image: String,
    #[serde(default)]
    labels: Labels,
}

/// A stored alarm: typed fields plus the untouched source document.
#[derive(Debug, Clone, PartialEq)]
pub struct Alarm {
    pub id: Bson,
    pub image: String,
    pub objects: Vec<DetectedObject>,
    pub raw: Document,
}

impl Alarm {
    pub fn from_document(raw: Document) -> Result<Self> {
        let fields: AlarmFields =
            bson::from_document(raw.clone()).context("malformed alarm document")?;
        Ok(Self {
            id: fields.id,
            image: fields.image,
            objects: fields.labels.labels,
            raw,
        })
    }

    /// Identifier used for file names and logs.
    pub fn id_string(&self) -> String {
        match &self.id {
            Bson::ObjectId(oid) => oid.to_hex(),
            Bson::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.objects.iter().any(|o| o.name == label)
    }

    /// Objects named `label` with confidence above `min_confidence`.
    pub fn confident<'a>(
        &'a self,
        label: &'a str,
        min_confidence: f64,
    ) -> impl Iterator<Item = &'a DetectedObject> + 'a {
        self.objects
            .iter()
            .filter(move |o| o.name == label && o.confidence > min_confidence)
    }
}

/// Parameters of the alarm query.
#[derive(Debug, Clone, Copy)]
pub struct AlarmQuery<'a> {
    pub label: &'a str,
    pub limit: usize,
}

impl AlarmQuery<'_> {
    pub fn filter(&self) -> Document {
        doc! { "labels.Labels.Name": self.label }
    }

    pub fn sort() -> Document {
        doc! { "_id": -1 }
    }
}

/// Read-only source of alarm documents, newest first.
pub trait AlarmSource {
    fn find(&self, query: &AlarmQuery) -> Result<Vec<Document>>;
}

/// Alarm collection in MongoDB.
pub struct MongoAlarmSource {
    collection: mongodb::sync::Collection<Document>,
}

impl MongoAlarmSource {
    pub fn connect(cfg: &DatabaseConfig) -> Result<Self> {
        let client = mongodb::sync::Client::with_uri_str(&cfg.url)
            .context("connecting to the alarm database")?;
        let collection = client.database(&cfg.database).collection(&cfg.collection);
        Ok(Self { collection })
    }
}

impl AlarmSource for MongoAlarmSource {
    fn find(&self, query: &AlarmQuery) -> Result<Vec<Document>> {
        let cursor = self
            .collection
            .find(query.filter())
            .sort(AlarmQuery::sort())
            .limit(i64::try_from(query.limit).unwrap_or(i64::MAX))
            .run()
            .context("querying alarms")?;
        cursor
            .map(|doc| doc.context("reading alarm document"))
            .collect()
    }
}

/// Fetch alarms containing `query.label`, ordered for review.
///
/// The source returns newest first; unless `descending` is set the list is
/// reversed so the earliest alarm is reviewed first.
pub fn fetch(source: &dyn AlarmSource, query: &AlarmQuery, descending: bool) -> Result<Vec<Alarm>> {
    let docs = source.find(query)?;
    let mut alarms: Vec<Alarm> = docs
        .into_iter()
        .filter_map(|doc| match Alarm::from_document(doc) {
            Ok(alarm) if alarm.has_label(query.label) => Some(alarm),
            Ok(alarm) => {
                log::warn!("alarm {} has no {} object, dropped", alarm.id_string(), query.label);
                None
            }
            Err(e) => {
                log::warn!("skipping alarm: {e:#}");
                None
            }
        })
        .collect();
    alarms.truncate(query.limit);

    if !descending {
        alarms.reverse();
    }
    log::info!("fetched {} alarm(s)", alarms.len());
    Ok(alarms)
}
