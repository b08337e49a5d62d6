use std::path::Path;

use anyhow::{bail, Context, Result};
use facereview_vision::Embedding;
use serde::{Deserialize, Serialize};

/// On-disk layout of the known-face table: parallel encodings and names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncodingTable {
    pub encodings: Vec<Vec<f32>>,
    pub names: Vec<String>,
}

/// Known faces, loaded once at startup.
#[derive(Debug, Clone)]
pub struct KnownFaces {
    encodings: Vec<Embedding>,
    names: Vec<String>,
}

impl KnownFaces {
    pub fn from_table(table: EncodingTable) -> Result<Self> {
        if table.encodings.len() != table.names.len() {
            bail!(
                "{} encodings but {} names",
                table.encodings.len(),
                table.names.len()
            );
        }
        if let Some(first) = table.encodings.first() {
            let dim = first.len();
            if dim == 0 {
                bail!("empty face encoding");
            }
            if let Some(i) = table.encodings.iter().position(|e| e.len() != dim) {
                bail!(
                    "encoding {} has {} values, expected {}",
                    i,
                    table.encodings[i].len(),
                    dim
                );
            }
        }
        Ok(Self {
            encodings: table.encodings.into_iter().map(Embedding::from_vec).collect(),
            names: table.names,
        })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Length of every encoding, `None` for an empty table.
    pub fn dim(&self) -> Option<usize> {
        self.encodings.first().map(Embedding::dim)
    }

    pub fn encodings(&self) -> &[Embedding] {
        &self.encodings
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

/// Load the known-face table. `.json` files are read as JSON, anything else as postcard.
pub fn load(path: &Path) -> Result<KnownFaces> {
    let data =
        std::fs::read(path).with_context(|| format!("reading encodings {}", path.display()))?;
    let table: EncodingTable = if is_json(path) {
        serde_json::from_slice(&data)
            .with_context(|| format!("parsing encodings {}", path.display()))?
    } else {
        postcard::from_bytes(&data)
            .with_context(|| format!("decoding encodings {}", path.display()))?
    };
    let faces = KnownFaces::from_table(table)
        .with_context(|| format!("invalid encodings {}", path.display()))?;
    log::info!("loaded {} known face encoding(s)", faces.len());
    Ok(faces)
}

pub fn save(path: &Path, table: &EncodingTable) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let data = if is_json(path) {
        serde_json::to_vec(table)?
    } else {
        postcard::to_allocvec(table)?
    };
    std::fs::write(path, data).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> EncodingTable {
        EncodingTable {
            encodings: vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.6, 0.8]],
            names: vec!["alice".into(), "bob".into(), "alice".into()],
        }
    }

    #[test]
    fn json_and_postcard_load_the_same() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["encodings.json", "encodings.bin"] {
            let path = dir.path().join(name);
            save(&path, &table()).unwrap();
            let faces = load(&path).unwrap();
            assert_eq!(faces.len(), 3);
            assert_eq!(faces.dim(), Some(2));
            assert_eq!(faces.names()[1], "bob");
            assert_eq!(faces.encodings()[2].to_vec(), vec![0.6, 0.8]);
        }
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("nope.json")).is_err());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("encodings.json");
        std::fs::write(&path, b"{\"encodings\": [[1.0]").unwrap();
        assert!(load(&path).is_err());
    }

    #[test]
    fn mismatched_lengths_rejected() {
        let mut t = table();
        t.names.pop();
        assert!(KnownFaces::from_table(t).is_err());

        let mut t = table();
        t.encodings[1].push(0.5);
        assert!(KnownFaces::from_table(t).is_err());
    }
}
