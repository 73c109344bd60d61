use facelog_core::{
    AttendanceLedger, AttendanceRecord, EmbeddingGallery, EnrollError, Enrolled, EnrollmentService,
    FaceAnalyzer, FrameOutcome, FrameProcessor, LedgerError, ProcessError, RebuildReport,
    SampleStore,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("gallery error: {0}")]
    Gallery(#[from] facelog_core::GalleryError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("frame processing failed: {0}")]
    Process(#[from] ProcessError),
    #[error("frame could not be decoded: {0}")]
    Decode(#[from] image::ImageError),
    #[error("frame processing exceeded {0:?}")]
    Timeout(Duration),
    #[error("engine task failed: {0}")]
    TaskFailed(String),
}

impl From<EngineError> for zbus::fdo::Error {
    fn from(e: EngineError) -> Self {
        zbus::fdo::Error::Failed(e.to_string())
    }
}

/// Process-wide services, constructed once at startup.
struct Engine {
    gallery: Arc<EmbeddingGallery>,
    ledger: Arc<AttendanceLedger>,
    processor: FrameProcessor,
    enrollment: EnrollmentService,
}

/// Clone-safe handle to the engine.
///
/// Pipeline work runs on the blocking pool; the handle's methods are safe to
/// call from D-Bus handlers.
#[derive(Clone)]
pub struct EngineHandle {
    engine: Arc<Engine>,
    detect_timeout: Duration,
}

impl EngineHandle {
    /// Request enrollment of one face sample.
    pub async fn enroll(&self, identity: String, image: Vec<u8>) -> Result<Result<Enrolled, EnrollError>, EngineError> {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || engine.enrollment.enroll(&identity, &image))
            .await
            .map_err(|e| EngineError::TaskFailed(e.to_string()))
    }

    /// Submit one encoded frame.
    ///
    /// A frame that arrives while another is in flight is dropped before it
    /// is even decoded. On timeout the caller gets an error immediately; the
    /// in-flight frame keeps the pipeline busy until the analyzer returns.
    pub async fn process_frame(&self, image: Vec<u8>) -> Result<FrameOutcome, EngineError> {
        if self.engine.processor.is_busy() {
            tracing::debug!("frame dropped: pipeline busy");
            return Ok(FrameOutcome::Dropped);
        }

        let engine = Arc::clone(&self.engine);
        let task = tokio::task::spawn_blocking(move || -> Result<FrameOutcome, EngineError> {
            let frame = image::load_from_memory(&image)?.to_rgb8();
            Ok(engine.processor.process(&frame)?)
        });

        match tokio::time::timeout(self.detect_timeout, task).await {
            Ok(joined) => joined.map_err(|e| EngineError::TaskFailed(e.to_string()))?,
            Err(_) => {
                tracing::warn!(timeout = ?self.detect_timeout, "frame processing timed out");
                Err(EngineError::Timeout(self.detect_timeout))
            }
        }
    }

    /// Re-embed every stored sample.
    pub async fn rebuild(&self) -> Result<RebuildReport, EngineError> {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || engine.gallery.rebuild())
            .await
            .map_err(|e| EngineError::TaskFailed(e.to_string()))?
            .map_err(EngineError::from)
    }

    /// Attendance records, most recent first; all dates when `date` is `None`.
    pub async fn attendance(&self, date: Option<chrono::NaiveDate>) -> Result<Vec<AttendanceRecord>, EngineError> {
        let engine = Arc::clone(&self.engine);
        tokio::task::spawn_blocking(move || match date {
            Some(date) => engine.ledger.records_on(date),
            None => engine.ledger.records(),
        })
        .await
        .map_err(|e| EngineError::TaskFailed(e.to_string()))?
        .map_err(EngineError::from)
    }

    pub fn gallery_size(&self) -> usize {
        self.engine.gallery.snapshot().len()
    }

    pub fn identity_count(&self) -> usize {
        self.engine.gallery.snapshot().identities().len()
    }

    pub fn is_busy(&self) -> bool {
        self.engine.processor.is_busy()
    }
}

/// Build the engine from configuration and an analyzer.
///
/// Loads (or builds) the gallery and opens the attendance log. Fails fast if
/// either is unavailable.
pub fn start_engine(config: &Config, analyzer: Arc<dyn FaceAnalyzer>) -> Result<EngineHandle, EngineError> {
    let store = SampleStore::new(&config.known_faces_dir);
    let gallery = Arc::new(EmbeddingGallery::load_or_build(
        store,
        config.gallery_path.clone(),
        Arc::clone(&analyzer),
        config.multi_face_policy,
    )?);
    let ledger = Arc::new(AttendanceLedger::open(&config.attendance_path)?);

    let processor = FrameProcessor::new(Arc::clone(&analyzer), Arc::clone(&gallery), Arc::clone(&ledger))
        .with_tolerance(config.tolerance)
        .with_downscale(config.downscale);
    let enrollment = EnrollmentService::new(analyzer, Arc::clone(&gallery)).with_mode(config.enroll_mode);

    tracing::info!(
        tolerance = config.tolerance,
        downscale = config.downscale,
        enroll_mode = ?config.enroll_mode,
        multi_face_policy = ?config.multi_face_policy,
        "engine ready"
    );

    Ok(EngineHandle {
        engine: Arc::new(Engine {
            gallery,
            ledger,
            processor,
            enrollment,
        }),
        detect_timeout: config.detect_timeout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use facelog_core::{AnalyzerError, Embedding, FaceBox};
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;
    use std::sync::mpsc;
    use std::sync::Mutex;

    /// One face per image, embedding `[g / 100]`; optionally stalls in `locate`.
    struct Stub {
        stall: Mutex<Option<mpsc::Receiver<()>>>,
    }

    impl FaceAnalyzer for Stub {
        fn locate(&self, _image: &RgbImage) -> Result<Vec<FaceBox>, AnalyzerError> {
            let stall = self.stall.lock().unwrap().take();
            if let Some(release) = stall {
                let _ = release.recv();
            }
            Ok(vec![FaceBox::new(0, 4, 4, 0)])
        }

        fn encode(&self, image: &RgbImage, faces: &[FaceBox]) -> Result<Vec<Embedding>, AnalyzerError> {
            let g = image.get_pixel(0, 0)[1] as f32 / 100.0;
            Ok(faces.iter().map(|_| Embedding::new(vec![g])).collect())
        }
    }

    fn png(g: u8) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        RgbImage::from_pixel(16, 16, Rgb([0, g, 0]))
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    fn config(dir: &std::path::Path, timeout: Duration) -> Config {
        Config {
            known_faces_dir: dir.join("known_faces"),
            gallery_path: dir.join("gallery.json"),
            attendance_path: dir.join("attendance.csv"),
            model_dir: dir.join("models"),
            tolerance: 0.05,
            downscale: 1,
            detect_timeout: timeout,
            multi_face_policy: Default::default(),
            enroll_mode: Default::default(),
            bus: crate::config::Bus::Session,
        }
    }

    #[tokio::test]
    async fn test_enroll_then_recognize() {
        let dir = tempfile::tempdir().unwrap();
        let stub = Arc::new(Stub { stall: Mutex::new(None) });
        let engine = start_engine(&config(dir.path(), Duration::from_secs(5)), stub).unwrap();

        let enrolled = engine.enroll("Alice".into(), png(50)).await.unwrap().unwrap();
        assert_eq!(enrolled.gallery_size, 1);
        assert_eq!(engine.identity_count(), 1);

        match engine.process_frame(png(51)).await.unwrap() {
            FrameOutcome::Processed(report) => {
                assert_eq!(report.faces[0].name.as_deref(), Some("Alice"));
                assert_eq!(report.attendance.len(), 1);
            }
            FrameOutcome::Dropped => panic!("dropped"),
        }
        let today = chrono::Local::now().date_naive();
        let records = engine.attendance(Some(today)).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "Alice");
    }

    #[tokio::test]
    async fn test_undecodable_frame_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let stub = Arc::new(Stub { stall: Mutex::new(None) });
        let engine = start_engine(&config(dir.path(), Duration::from_secs(5)), stub).unwrap();

        let err = engine.process_frame(b"garbage".to_vec()).await.unwrap_err();
        assert!(matches!(err, EngineError::Decode(_)));
        assert!(!engine.is_busy());
    }

    #[tokio::test]
    async fn test_stalled_analyzer_times_out_and_drops_followers() {
        let dir = tempfile::tempdir().unwrap();
        let (release, stall) = mpsc::channel();
        let stub = Arc::new(Stub { stall: Mutex::new(None) });
        let engine = start_engine(&config(dir.path(), Duration::from_millis(100)), stub.clone()).unwrap();
        *stub.stall.lock().unwrap() = Some(stall);

        let err = engine.process_frame(png(50)).await.unwrap_err();
        assert!(matches!(err, EngineError::Timeout(_)));

        assert!(engine.is_busy());
        assert!(matches!(engine.process_frame(png(50)).await.unwrap(), FrameOutcome::Dropped));

        release.send(()).unwrap();
        for _ in 0..100 {
            if !engine.is_busy() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!engine.is_busy());
    }
}
