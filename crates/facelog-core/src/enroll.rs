//! Interactive enrollment of a new face sample.
//!
//! Unlike a gallery rebuild, enrollment insists on exactly one face in the
//! submitted image.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::events::EnrollmentResponse;
use crate::gallery::{EmbeddingGallery, GalleryError};
use crate::store::{validate_identity, StoreError};
use crate::types::{Embedding, FaceBox};
use chrono::{Local, NaiveDateTime};
use image::RgbImage;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("invalid identity name {0:?}")]
    InvalidIdentity(String),
    #[error("image could not be decoded: {0}")]
    SampleDecode(#[from] image::ImageError),
    #[error("no face detected")]
    NoFaceDetected,
    #[error("{count} faces detected, expected exactly one")]
    MultipleFacesDetected { count: usize },
    #[error("face analyzer failed: {0}")]
    Capability(#[from] AnalyzerError),
    #[error("saving sample failed: {0}")]
    Store(#[from] StoreError),
    #[error("updating gallery failed: {0}")]
    Gallery(#[from] GalleryError),
}

/// How the gallery absorbs a newly saved sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnrollMode {
    /// Rescan and re-embed every stored sample.
    #[default]
    Rebuild,
    /// Append the new sample's embedding to the current snapshot.
    Incremental,
}

impl FromStr for EnrollMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rebuild" | "full" => Ok(Self::Rebuild),
            "incremental" | "append" => Ok(Self::Incremental),
            other => Err(format!("unknown enroll mode {other:?}")),
        }
    }
}

/// A committed enrollment.
#[derive(Debug, Clone)]
pub struct Enrolled {
    pub identity: String,
    pub sample: PathBuf,
    /// Gallery size after the update.
    pub gallery_size: usize,
}

pub struct EnrollmentService {
    analyzer: Arc<dyn FaceAnalyzer>,
    gallery: Arc<EmbeddingGallery>,
    mode: EnrollMode,
}

impl EnrollmentService {
    pub fn new(analyzer: Arc<dyn FaceAnalyzer>, gallery: Arc<EmbeddingGallery>) -> Self {
        Self {
            analyzer,
            gallery,
            mode: EnrollMode::default(),
        }
    }

    pub fn with_mode(mut self, mode: EnrollMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn enroll(&self, identity: &str, image_bytes: &[u8]) -> Result<Enrolled, EnrollError> {
        self.enroll_at(identity, image_bytes, Local::now().naive_local())
    }

    /// Validate, store and index one sample. The gallery reflects the new
    /// sample by the time this returns `Ok`.
    pub fn enroll_at(
        &self,
        identity: &str,
        image_bytes: &[u8],
        when: NaiveDateTime,
    ) -> Result<Enrolled, EnrollError> {
        validate_identity(identity).map_err(|_| EnrollError::InvalidIdentity(identity.to_string()))?;

        let image = image::load_from_memory(image_bytes)?.to_rgb8();
        let faces = self.analyzer.locate(&image)?;
        match faces.len() {
            0 => return Err(EnrollError::NoFaceDetected),
            1 => {}
            count => return Err(EnrollError::MultipleFacesDetected { count }),
        }

        // Embed before saving so a failure cannot leave an orphaned sample.
        let embedding = match self.mode {
            EnrollMode::Rebuild => None,
            EnrollMode::Incremental => Some(self.single_embedding(&image, &faces)?),
        };

        let sample = self.gallery.store().save(identity, image_bytes, when)?;

        let gallery_size = match embedding {
            None => self.gallery.rebuild()?.embedded,
            Some(embedding) => self.gallery.append(identity, embedding)?.len(),
        };

        tracing::info!(identity, sample = %sample.display(), gallery_size, "enrolled face sample");
        Ok(Enrolled {
            identity: identity.to_string(),
            sample,
            gallery_size,
        })
    }

    fn single_embedding(&self, image: &RgbImage, faces: &[FaceBox]) -> Result<Embedding, EnrollError> {
        let embeddings = self.analyzer.encode(image, faces)?;
        let count = embeddings.len();
        embeddings.into_iter().next().filter(|_| count == 1).ok_or(
            EnrollError::Capability(AnalyzerError::Misaligned {
                faces: faces.len(),
                embeddings: count,
            }),
        )
    }
}

impl From<&Result<Enrolled, EnrollError>> for EnrollmentResponse {
    fn from(result: &Result<Enrolled, EnrollError>) -> Self {
        match result {
            Ok(enrolled) => EnrollmentResponse::ok(format!("{} was added successfully!", enrolled.identity)),
            Err(EnrollError::NoFaceDetected) => {
                EnrollmentResponse::failed("No face could be detected. Please try again.")
            }
            Err(EnrollError::MultipleFacesDetected { .. }) => EnrollmentResponse::failed(
                "Multiple faces detected. Please ensure only one person is in the frame.",
            ),
            Err(EnrollError::InvalidIdentity(_)) => EnrollmentResponse::failed(
                "Invalid name. Names may not be empty or contain commas, slashes or control characters.",
            ),
            Err(EnrollError::SampleDecode(_)) => EnrollmentResponse::failed("The image could not be decoded."),
            Err(e) => {
                tracing::error!(error = %e, "enrollment failed");
                EnrollmentResponse::failed("An error occurred on the server.")
            }
        }
    }
}
