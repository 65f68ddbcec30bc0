//! Known-identity gallery loaded once at startup.

use crate::types::Embedding;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("read gallery {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parse gallery: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("gallery has {encodings} encodings but {names} names")]
    LengthMismatch { encodings: usize, names: usize },
    #[error("gallery is empty")]
    Empty,
    #[error("encoding {index} has dimension {found}, expected {expected}")]
    DimensionMismatch {
        index: usize,
        found: usize,
        expected: usize,
    },
}

/// On-disk layout: parallel `encodings` and `names` arrays.
#[derive(Debug, Deserialize)]
struct GalleryFile {
    encodings: Vec<Vec<f32>>,
    names: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct GalleryEntry {
    pub label: String,
    pub embedding: Embedding,
}

/// Non-empty set of labelled embeddings. Several entries may share a label.
#[derive(Debug, Clone)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
    embeddings: Vec<Embedding>,
}

impl Gallery {
    pub fn load(path: &Path) -> Result<Self, GalleryError> {
        let raw = std::fs::read_to_string(path).map_err(|source| GalleryError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let gallery = Self::from_json(&raw)?;
        tracing::info!(
            path = %path.display(),
            entries = gallery.len(),
            labels = gallery.labels().len(),
            "gallery loaded"
        );
        Ok(gallery)
    }

    pub fn from_json(raw: &str) -> Result<Self, GalleryError> {
        let file: GalleryFile = serde_json::from_str(raw)?;
        if file.encodings.len() != file.names.len() {
            return Err(GalleryError::LengthMismatch {
                encodings: file.encodings.len(),
                names: file.names.len(),
            });
        }
        Self::from_entries(
            file.names
                .into_iter()
                .zip(file.encodings)
                .map(|(label, values)| GalleryEntry {
                    label,
                    embedding: Embedding::new(values),
                })
                .collect(),
        )
    }

    pub fn from_entries(entries: Vec<GalleryEntry>) -> Result<Self, GalleryError> {
        let expected = entries.first().ok_or(GalleryError::Empty)?.embedding.values.len();
        if let Some((index, entry)) = entries
            .iter()
            .enumerate()
            .find(|(_, e)| e.embedding.values.len() != expected)
        {
            return Err(GalleryError::DimensionMismatch {
                index,
                found: entry.embedding.values.len(),
                expected,
            });
        }
        let embeddings = entries.iter().map(|e| e.embedding.clone()).collect();
        Ok(Self { entries, embeddings })
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    /// Embeddings in entry order, as handed to a distance metric.
    pub fn embeddings(&self) -> &[Embedding] {
        &self.embeddings
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct labels, sorted.
    pub fn labels(&self) -> BTreeSet<&str> {
        self.entries.iter().map(|e| e.label.as_str()).collect()
    }

    pub fn dimension(&self) -> usize {
        self.embeddings.first().map_or(0, |e| e.values.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_from_json() {
        let g = Gallery::from_json(
            r#"{"encodings": [[0.1, 0.2], [0.3, 0.4], [0.5, 0.6]], "names": ["7_ana", "7_ana", "9_luis"]}"#,
        )
        .unwrap();
        assert_eq!(g.len(), 3);
        assert_eq!(g.dimension(), 2);
        assert_eq!(g.labels().into_iter().collect::<Vec<_>>(), vec!["7_ana", "9_luis"]);
    }

    #[test]
    fn test_length_mismatch() {
        let err = Gallery::from_json(r#"{"encodings": [[0.1]], "names": ["a", "b"]}"#).unwrap_err();
        assert!(matches!(err, GalleryError::LengthMismatch { encodings: 1, names: 2 }));
    }

    #[test]
    fn test_empty_is_rejected() {
        let err = Gallery::from_json(r#"{"encodings": [], "names": []}"#).unwrap_err();
        assert!(matches!(err, GalleryError::Empty));
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = Gallery::from_json(r#"{"encodings": [[0.1, 0.2], [0.3]], "names": ["a", "b"]}"#)
            .unwrap_err();
        assert!(matches!(err, GalleryError::DimensionMismatch { index: 1, found: 1, expected: 2 }));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Gallery::load(&dir.path().join("embeddings.json")).unwrap_err();
        assert!(matches!(err, GalleryError::Io { .. }));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("embeddings.json");
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, r#"{{"encodings": [[1.0, 0.0]], "names": ["3_eva"]}}"#).unwrap();
        let g = Gallery::load(&path).unwrap();
        assert_eq!(g.entries()[0].label, "3_eva");
    }
}
