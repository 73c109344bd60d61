//! Enrolled-face gallery: immutable snapshots swapped in wholesale.
//!
//! A [`Gallery`] is an aligned pair of embedding and name lists. The
//! [`EmbeddingGallery`] owns the current snapshot behind an `Arc`; matchers
//! clone the `Arc` and work on a frozen view while a rebuild constructs the
//! replacement off to the side.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::store::{validate_identity, Sample, SampleStore, StoreError};
use crate::types::Embedding;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery misaligned: {embeddings} embeddings, {names} names")]
    Misaligned { embeddings: usize, names: usize },
    #[error("corrupt gallery snapshot {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("gallery snapshot i/o at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a single enrollment sample contributed nothing to a rebuild.
#[derive(Error, Debug)]
pub enum SampleError {
    #[error("read failed: {0}")]
    Read(#[from] io::Error),
    #[error("decode failed: {0}")]
    Decode(#[from] image::ImageError),
    #[error("analyzer failed: {0}")]
    Capability(#[from] AnalyzerError),
}

/// What a rebuild does with a sample in which several faces were found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MultiFacePolicy {
    /// Keep the first face reported by the analyzer.
    #[default]
    TakeFirst,
    /// Leave the sample out, matching the single-face rule for enrollment.
    Skip,
}

impl FromStr for MultiFacePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" | "take-first" => Ok(Self::TakeFirst),
            "skip" => Ok(Self::Skip),
            other => Err(format!("unknown multi-face policy {other:?}")),
        }
    }
}

/// On-disk form of a gallery.
#[derive(Serialize, Deserialize)]
struct GalleryFile {
    encodings: Vec<Embedding>,
    names: Vec<String>,
}

/// Immutable, index-aligned set of embeddings and their identity names.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gallery {
    embeddings: Vec<Embedding>,
    names: Vec<String>,
}

impl Gallery {
    pub fn new(embeddings: Vec<Embedding>, names: Vec<String>) -> Result<Self, GalleryError> {
        if embeddings.len() != names.len() {
            return Err(GalleryError::Misaligned {
                embeddings: embeddings.len(),
                names: names.len(),
            });
        }
        Ok(Self { embeddings, names })
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    pub fn embeddings(&self) -> &[Embedding] {
        &self.embeddings
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Distinct identity names, sorted.
    pub fn identities(&self) -> BTreeSet<&str> {
        self.names.iter().map(String::as_str).collect()
    }

    fn push(&mut self, name: String, embedding: Embedding) {
        self.names.push(name);
        self.embeddings.push(embedding);
    }

    /// Read a persisted snapshot. `Ok(None)` if the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>, GalleryError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(GalleryError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        let file: GalleryFile = serde_json::from_slice(&bytes).map_err(|source| GalleryError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;
        Self::new(file.encodings, file.names).map(Some)
    }

    /// Overwrite the snapshot at `path` via a temp file and rename.
    pub fn persist(&self, path: &Path) -> Result<(), GalleryError> {
        let io_err = |source| GalleryError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(io_err)?;
        }

        let file = GalleryFile {
            encodings: self.embeddings.clone(),
            names: self.names.clone(),
        };
        let bytes = serde_json::to_vec(&file).map_err(|source| GalleryError::Corrupt {
            path: path.to_path_buf(),
            source,
        })?;

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes).map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)
    }
}

/// Counts from one rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebuildReport {
    pub samples: usize,
    pub embedded: usize,
    pub skipped: usize,
}

/// Process-wide owner of the current gallery snapshot.
pub struct EmbeddingGallery {
    store: SampleStore,
    snapshot_path: PathBuf,
    analyzer: Arc<dyn FaceAnalyzer>,
    policy: MultiFacePolicy,
    current: RwLock<Arc<Gallery>>,
    /// Serialises writers so a slow rebuild cannot overwrite a newer one.
    write_lock: Mutex<()>,
}

impl EmbeddingGallery {
    /// Load the persisted snapshot, or rebuild from the store if there is none
    /// or it cannot be read.
    pub fn load_or_build(
        store: SampleStore,
        snapshot_path: PathBuf,
        analyzer: Arc<dyn FaceAnalyzer>,
        policy: MultiFacePolicy,
    ) -> Result<Self, GalleryError> {
        let loaded = match Gallery::load(&snapshot_path) {
            Ok(loaded) => loaded,
            Err(e) => {
                tracing::warn!(path = %snapshot_path.display(), error = %e, "ignoring unreadable gallery snapshot");
                None
            }
        };

        let from_disk = loaded.is_some();
        let gallery = Self {
            store,
            snapshot_path,
            analyzer,
            policy,
            current: RwLock::new(Arc::new(loaded.unwrap_or_default())),
            write_lock: Mutex::new(()),
        };

        if from_disk {
            let snapshot = gallery.snapshot();
            tracing::info!(
                embeddings = snapshot.len(),
                identities = snapshot.identities().len(),
                "gallery loaded from snapshot"
            );
        } else {
            gallery.rebuild()?;
        }
        Ok(gallery)
    }

    /// The current snapshot. Never observes a partially built gallery.
    pub fn snapshot(&self) -> Arc<Gallery> {
        let current = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&current)
    }

    pub fn store(&self) -> &SampleStore {
        &self.store
    }

    /// Re-embed every stored sample, persist the result and swap it in.
    ///
    /// Per-sample failures are logged and skipped; only store listing and
    /// snapshot persistence abort the rebuild.
    pub fn rebuild(&self) -> Result<RebuildReport, GalleryError> {
        let _writer = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let samples = self.store.samples()?;
        let mut next = Gallery::default();
        let mut skipped = 0;

        for sample in &samples {
            match self.embed_sample(sample) {
                Ok(Some(embedding)) => next.push(sample.identity.clone(), embedding),
                Ok(None) => skipped += 1,
                Err(e) => {
                    tracing::warn!(
                        identity = %sample.identity,
                        path = %sample.path.display(),
                        error = %e,
                        "skipping sample"
                    );
                    skipped += 1;
                }
            }
        }

        next.persist(&self.snapshot_path)?;

        let report = RebuildReport {
            samples: samples.len(),
            embedded: next.len(),
            skipped,
        };
        tracing::info!(
            samples = report.samples,
            embedded = report.embedded,
            skipped = report.skipped,
            identities = next.identities().len(),
            "gallery rebuilt"
        );
        self.swap(next);
        Ok(report)
    }

    /// Add one embedding without rescanning the store.
    pub fn append(&self, identity: &str, embedding: Embedding) -> Result<Arc<Gallery>, GalleryError> {
        validate_identity(identity)?;
        let _writer = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut next = (*self.snapshot()).clone();
        next.push(identity.to_string(), embedding);
        next.persist(&self.snapshot_path)?;

        tracing::info!(identity, embeddings = next.len(), "gallery entry appended");
        Ok(self.swap(next))
    }

    fn swap(&self, next: Gallery) -> Arc<Gallery> {
        let next = Arc::new(next);
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = Arc::clone(&next);
        next
    }

    /// `Ok(None)` when the sample yields no usable face under the policy.
    fn embed_sample(&self, sample: &Sample) -> Result<Option<Embedding>, SampleError> {
        let bytes = fs::read(&sample.path)?;
        let image = image::load_from_memory(&bytes)?.to_rgb8();
        let mut detections = self.analyzer.analyze(&image)?;

        match detections.len() {
            0 => {
                tracing::warn!(identity = %sample.identity, path = %sample.path.display(), "no face found in sample");
                Ok(None)
            }
            1 => Ok(Some(detections.swap_remove(0).embedding)),
            count => match self.policy {
                MultiFacePolicy::TakeFirst => {
                    tracing::warn!(
                        identity = %sample.identity,
                        path = %sample.path.display(),
                        faces = count,
                        "multiple faces in sample; using the first"
                    );
                    Ok(Some(detections.swap_remove(0).embedding))
                }
                MultiFacePolicy::Skip => {
                    tracing::warn!(
                        identity = %sample.identity,
                        path = %sample.path.display(),
                        faces = count,
                        "multiple faces in sample; skipping"
                    );
                    Ok(None)
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn e(v: &[f32]) -> Embedding {
        Embedding::new(v.to_vec())
    }

    #[test]
    fn test_new_rejects_misaligned() {
        let err = Gallery::new(vec![e(&[1.0])], vec![]).unwrap_err();
        assert!(matches!(err, GalleryError::Misaligned { embeddings: 1, names: 0 }));
    }

    #[test]
    fn test_persist_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("gallery.json");
        let gallery = Gallery::new(
            vec![e(&[0.1, 0.2]), e(&[0.3, 0.4])],
            vec!["alice".into(), "bob".into()],
        )
        .unwrap();
        gallery.persist(&path).unwrap();

        assert_eq!(Gallery::load(&path).unwrap(), Some(gallery));
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Gallery::load(&dir.path().join("absent.json")).unwrap(), None);
    }

    #[test]
    fn test_load_rejects_misaligned_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gallery.json");
        fs::write(&path, r#"{"encodings": [[1.0]], "names": ["a", "b"]}"#).unwrap();
        assert!(matches!(
            Gallery::load(&path),
            Err(GalleryError::Misaligned { embeddings: 1, names: 2 })
        ));
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gallery.json");
        fs::write(&path, b"not json").unwrap();
        assert!(matches!(Gallery::load(&path), Err(GalleryError::Corrupt { .. })));
    }

    #[test]
    fn test_identities_are_distinct() {
        let gallery = Gallery::new(
            vec![e(&[0.0]), e(&[1.0]), e(&[2.0])],
            vec!["bob".into(), "alice".into(), "bob".into()],
        )
        .unwrap();
        assert_eq!(gallery.identities().into_iter().collect::<Vec<_>>(), vec!["alice", "bob"]);
    }

    #[test]
    fn test_multi_face_policy_from_str() {
        assert_eq!("first".parse::<MultiFacePolicy>().unwrap(), MultiFacePolicy::TakeFirst);
        assert_eq!(" SKIP ".parse::<MultiFacePolicy>().unwrap(), MultiFacePolicy::Skip);
        assert!("strictest".parse::<MultiFacePolicy>().is_err());
    }
}
