//! Per-frame pipeline: downscale, detect + embed, match, record attendance.
//!
//! One [`FrameProcessor`] serves one camera stream. Frames that arrive while a
//! previous frame is still in the pipeline are dropped, not queued, so latency
//! stays bounded when the capture rate outruns inference.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::events::AttendanceUpdate;
use crate::gallery::EmbeddingGallery;
use crate::guard::SingleFlight;
use crate::ledger::AttendanceLedger;
use crate::matcher::{EuclideanMatcher, Matcher, MatchOutcome, DEFAULT_TOLERANCE};
use crate::types::FaceBox;
use chrono::{Local, NaiveDateTime};
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::sync::Arc;
use thiserror::Error;

/// Default linear downscale applied before detection.
pub const DEFAULT_DOWNSCALE: u32 = 4;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("face analyzer failed: {0}")]
    Capability(#[from] AnalyzerError),
}

/// One face in a processed frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceResult {
    /// Matched identity, `None` for unknown faces.
    pub name: Option<String>,
    /// Box in original frame coordinates.
    pub face: FaceBox,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    pub faces: Vec<FaceResult>,
    /// Attendance records created by this frame, in face order.
    pub attendance: Vec<AttendanceUpdate>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FrameOutcome {
    Processed(FrameReport),
    /// Another frame was in flight; this one was discarded untouched.
    Dropped,
}

pub struct FrameProcessor {
    analyzer: Arc<dyn FaceAnalyzer>,
    gallery: Arc<EmbeddingGallery>,
    ledger: Arc<AttendanceLedger>,
    tolerance: f32,
    downscale: u32,
    flight: SingleFlight,
}

impl FrameProcessor {
    pub fn new(
        analyzer: Arc<dyn FaceAnalyzer>,
        gallery: Arc<EmbeddingGallery>,
        ledger: Arc<AttendanceLedger>,
    ) -> Self {
        Self {
            analyzer,
            gallery,
            ledger,
            tolerance: DEFAULT_TOLERANCE,
            downscale: DEFAULT_DOWNSCALE,
            flight: SingleFlight::new(),
        }
    }

    pub fn with_tolerance(mut self, tolerance: f32) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Linear downscale factor; values below 1 are treated as 1.
    pub fn with_downscale(mut self, factor: u32) -> Self {
        self.downscale = factor.max(1);
        self
    }

    /// True while a frame is in the pipeline.
    pub fn is_busy(&self) -> bool {
        self.flight.is_busy()
    }

    /// Process a frame, timestamping new attendance with local now.
    pub fn process(&self, frame: &RgbImage) -> Result<FrameOutcome, ProcessError> {
        self.process_at(frame, || Local::now().naive_local())
    }

    /// Process a frame with an explicit clock for attendance timestamps.
    pub fn process_at(
        &self,
        frame: &RgbImage,
        now: impl Fn() -> NaiveDateTime,
    ) -> Result<FrameOutcome, ProcessError> {
        let Some(_permit) = self.flight.try_acquire() else {
            tracing::debug!("frame dropped: pipeline busy");
            return Ok(FrameOutcome::Dropped);
        };
        self.run(frame, now).map(FrameOutcome::Processed)
    }

    fn run(&self, frame: &RgbImage, now: impl Fn() -> NaiveDateTime) -> Result<FrameReport, ProcessError> {
        let small = downscale(frame, self.downscale);
        let detections = self.analyzer.analyze(small.as_ref().unwrap_or(frame))?;

        let gallery = self.gallery.snapshot();
        let mut report = FrameReport::default();

        for detection in detections {
            let outcome = EuclideanMatcher.compare(&detection.embedding, &gallery, self.tolerance);
            let name = match outcome {
                MatchOutcome::Known { name, distance, .. } => {
                    tracing::trace!(identity = %name, distance, "face matched");
                    // A failed write leaves the identity unrecorded, so a later frame retries.
                    match self.ledger.record_if_first(&name, now()) {
                        Ok(Some(record)) => report.attendance.push(AttendanceUpdate::from(&record)),
                        Ok(None) => {}
                        Err(e) => tracing::error!(identity = %name, error = %e, "attendance write failed"),
                    }
                    Some(name)
                }
                MatchOutcome::Unknown { nearest } => {
                    tracing::trace!(?nearest, "face unknown");
                    None
                }
            };

            report.faces.push(FaceResult {
                name,
                face: detection.face.scaled(self.downscale),
            });
        }

        tracing::debug!(
            faces = report.faces.len(),
            new_attendance = report.attendance.len(),
            "frame processed"
        );
        Ok(report)
    }
}

/// Shrink `frame` by `factor`; `None` when no resize is needed.
fn downscale(frame: &RgbImage, factor: u32) -> Option<RgbImage> {
    if factor <= 1 {
        return None;
    }
    let (w, h) = frame.dimensions();
    let scaled = |v: u32| ((v as f32 / factor as f32).round() as u32).max(1);
    Some(imageops::resize(frame, scaled(w), scaled(h), FilterType::Triangle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downscale_quarter() {
        let frame = RgbImage::new(640, 480);
        let small = downscale(&frame, 4).unwrap();
        assert_eq!(small.dimensions(), (160, 120));
    }

    #[test]
    fn test_downscale_identity_factor() {
        assert!(downscale(&RgbImage::new(10, 10), 1).is_none());
        assert!(downscale(&RgbImage::new(10, 10), 0).is_none());
    }

    #[test]
    fn test_downscale_never_collapses_to_zero() {
        let small = downscale(&RgbImage::new(2, 3), 4).unwrap();
        assert_eq!(small.dimensions(), (1, 1));
    }
}
