//! facelog-core: face-recognition attendance pipeline.
//!
//! Enrolled face samples are embedded into an in-memory [`Gallery`]; each
//! video frame is run through detection, nearest-neighbour matching and an
//! append-only [`AttendanceLedger`] that records an identity at most once per
//! day. Detection and embedding sit behind the [`FaceAnalyzer`] trait, with
//! SCRFD + ArcFace on ONNX Runtime as the shipped implementation.

pub mod analyzer;
pub mod detector;
pub mod enroll;
pub mod events;
pub mod gallery;
pub mod guard;
pub mod ledger;
pub mod matcher;
pub mod processor;
pub mod recognizer;
pub mod store;
pub mod types;

pub use analyzer::{AnalyzerError, FaceAnalyzer, OnnxAnalyzer};
pub use enroll::{EnrollError, EnrollMode, Enrolled, EnrollmentService};
pub use events::{AttendanceUpdate, EnrollmentResponse, FrameResponse, RecognitionResults};
pub use gallery::{EmbeddingGallery, Gallery, GalleryError, MultiFacePolicy, RebuildReport};
pub use guard::{FlightPermit, SingleFlight};
pub use ledger::{AttendanceLedger, AttendanceRecord, LedgerError};
pub use matcher::{EuclideanMatcher, MatchOutcome, Matcher, DEFAULT_TOLERANCE};
pub use processor::{FaceResult, FrameOutcome, FrameProcessor, FrameReport, ProcessError, DEFAULT_DOWNSCALE};
pub use store::{SampleStore, StoreError};
pub use types::{Detection, Embedding, FaceBox};
