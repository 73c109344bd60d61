//! Payloads handed to the transport layer.

use crate::ledger::AttendanceRecord;
use crate::processor::{FaceResult, FrameOutcome, FrameReport};
use serde::{Deserialize, Serialize};

/// Label used for faces that matched no enrolled identity.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Outcome of an enrollment request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentResponse {
    pub success: bool,
    pub message: String,
}

impl EnrollmentResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// A newly written attendance record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceUpdate {
    pub name: String,
    /// `HH:MM:SS`
    pub time: String,
}

impl From<&AttendanceRecord> for AttendanceUpdate {
    fn from(record: &AttendanceRecord) -> Self {
        Self {
            name: record.name.clone(),
            time: record.time_str(),
        }
    }
}

/// One labelled box, `(left, top, right, bottom)` in original frame pixels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionResult {
    #[serde(rename = "box")]
    pub bbox: (u32, u32, u32, u32),
    pub name: String,
}

impl From<&FaceResult> for RecognitionResult {
    fn from(face: &FaceResult) -> Self {
        Self {
            bbox: face.face.ltrb(),
            name: face.name.clone().unwrap_or_else(|| UNKNOWN_LABEL.to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecognitionResults {
    pub results: Vec<RecognitionResult>,
}

impl From<&FrameReport> for RecognitionResults {
    fn from(report: &FrameReport) -> Self {
        Self {
            results: report.faces.iter().map(RecognitionResult::from).collect(),
        }
    }
}

/// Reply to a frame submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FrameResponse {
    Processed { results: Vec<RecognitionResult> },
    Dropped,
}

impl From<&FrameOutcome> for FrameResponse {
    fn from(outcome: &FrameOutcome) -> Self {
        match outcome {
            FrameOutcome::Processed(report) => FrameResponse::Processed {
                results: RecognitionResults::from(report).results,
            },
            FrameOutcome::Dropped => FrameResponse::Dropped,
        }
    }
}
