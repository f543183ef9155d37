//! Persisted gallery of known face encodings.
//!
//! On disk the gallery is a JSON object with two parallel lists, one label
//! per vector. Loading validates the shape once so the matcher can assume a
//! well-formed gallery for the rest of the process.

use crate::types::{Embedding, ReferenceEncoding};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery not found: {0}; run `rollcall encode` first")]
    NotFound(PathBuf),
    #[error("gallery io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("gallery is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("gallery has {identities} identities but {vectors} vectors")]
    LengthMismatch { identities: usize, vectors: usize },
    #[error("gallery vector {index} has {actual} values, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        actual: usize,
    },
    #[error("gallery vector {0} is empty")]
    EmptyVector(usize),
}

#[derive(Debug, Serialize, Deserialize)]
struct GalleryFile {
    identities: Vec<String>,
    vectors: Vec<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    model_version: Option<String>,
}

/// Ordered, immutable set of reference encodings.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    references: Vec<ReferenceEncoding>,
    model_version: Option<String>,
}

impl Gallery {
    pub fn new(references: Vec<ReferenceEncoding>, model_version: Option<String>) -> Self {
        Self {
            references,
            model_version,
        }
    }

    /// Load and validate a gallery file.
    pub fn load(path: &Path) -> Result<Self, GalleryError> {
        let raw = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GalleryError::NotFound(path.to_path_buf())
            } else {
                GalleryError::Io {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })?;
        let gallery = Self::from_json(&raw)?;
        tracing::info!(
            path = %path.display(),
            references = gallery.len(),
            identities = gallery.identity_counts().len(),
            "loaded gallery"
        );
        Ok(gallery)
    }

    pub fn from_json(raw: &str) -> Result<Self, GalleryError> {
        let file: GalleryFile = serde_json::from_str(raw)?;

        if file.identities.len() != file.vectors.len() {
            return Err(GalleryError::LengthMismatch {
                identities: file.identities.len(),
                vectors: file.vectors.len(),
            });
        }

        let expected = file.vectors.first().map(Vec::len).unwrap_or(0);
        for (index, vector) in file.vectors.iter().enumerate() {
            if vector.is_empty() {
                return Err(GalleryError::EmptyVector(index));
            }
            if vector.len() != expected {
                return Err(GalleryError::DimensionMismatch {
                    index,
                    expected,
                    actual: vector.len(),
                });
            }
        }

        let references = file
            .identities
            .into_iter()
            .zip(file.vectors)
            .map(|(identity, values)| ReferenceEncoding {
                identity,
                embedding: Embedding::new(values),
            })
            .collect();

        Ok(Self {
            references,
            model_version: file.model_version,
        })
    }

    pub fn to_json(&self) -> Result<String, GalleryError> {
        let file = GalleryFile {
            identities: self.references.iter().map(|r| r.identity.clone()).collect(),
            vectors: self
                .references
                .iter()
                .map(|r| r.embedding.values.clone())
                .collect(),
            model_version: self.model_version.clone(),
        };
        Ok(serde_json::to_string(&file)?)
    }

    /// Write the gallery, creating the parent directory if needed.
    pub fn save(&self, path: &Path) -> Result<(), GalleryError> {
        let io_err = |source| GalleryError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(path, self.to_json()?).map_err(io_err)?;
        tracing::info!(path = %path.display(), references = self.len(), "saved gallery");
        Ok(())
    }

    pub fn references(&self) -> &[ReferenceEncoding] {
        &self.references
    }

    pub fn model_version(&self) -> Option<&str> {
        self.model_version.as_deref()
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    /// Number of samples per identity, sorted by identity.
    pub fn identity_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts = BTreeMap::new();
        for reference in &self.references {
            *counts.entry(reference.identity.as_str()).or_insert(0) += 1;
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> Gallery {
        Gallery::new(
            vec![
                ReferenceEncoding {
                    identity: "alice".into(),
                    embedding: Embedding::new(vec![0.1, 0.2]),
                },
                ReferenceEncoding {
                    identity: "bob".into(),
                    embedding: Embedding::new(vec![0.3, 0.4]),
                },
                ReferenceEncoding {
                    identity: "alice".into(),
                    embedding: Embedding::new(vec![0.15, 0.25]),
                },
            ],
            Some("w600k_r50".into()),
        )
    }

    #[test]
    fn test_save_and_load_preserves_order() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("encodings").join("faces.json");

        sample().save(&path).unwrap();
        let loaded = Gallery::load(&path).unwrap();

        let labels: Vec<&str> = loaded.references().iter().map(|r| r.identity.as_str()).collect();
        assert_eq!(labels, vec!["alice", "bob", "alice"]);
        assert_eq!(loaded.references()[2].embedding.values, vec![0.15, 0.25]);
        assert_eq!(loaded.model_version(), Some("w600k_r50"));
    }

    #[test]
    fn test_identity_counts() {
        let gallery = sample();
        let counts = gallery.identity_counts();
        assert_eq!(counts.get("alice"), Some(&2));
        assert_eq!(counts.get("bob"), Some(&1));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let tmp = tempdir().unwrap();
        let err = Gallery::load(&tmp.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, GalleryError::NotFound(_)));
    }

    #[test]
    fn test_malformed_json() {
        let err = Gallery::from_json("{not json").unwrap_err();
        assert!(matches!(err, GalleryError::Json(_)));
    }

    #[test]
    fn test_length_mismatch() {
        let err = Gallery::from_json(r#"{"identities": ["a", "b"], "vectors": [[0.1]]}"#).unwrap_err();
        assert!(matches!(
            err,
            GalleryError::LengthMismatch { identities: 2, vectors: 1 }
        ));
    }

    #[test]
    fn test_ragged_vectors_rejected() {
        let err = Gallery::from_json(r#"{"identities": ["a", "b"], "vectors": [[0.1, 0.2], [0.3]]}"#)
            .unwrap_err();
        assert!(matches!(
            err,
            GalleryError::DimensionMismatch { index: 1, expected: 2, actual: 1 }
        ));
    }

    #[test]
    fn test_empty_vector_rejected() {
        let err = Gallery::from_json(r#"{"identities": ["a"], "vectors": [[]]}"#).unwrap_err();
        assert!(matches!(err, GalleryError::EmptyVector(0)));
    }

    #[test]
    fn test_empty_gallery_is_valid() {
        let gallery = Gallery::from_json(r#"{"identities": [], "vectors": []}"#).unwrap();
        assert!(gallery.is_empty());
        assert_eq!(gallery.model_version(), None);
    }
}
