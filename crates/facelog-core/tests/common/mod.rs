//! Shared fixtures: a pixel-driven fake analyzer and on-disk harness.
#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use facelog_core::{
    AnalyzerError, AttendanceLedger, EmbeddingGallery, Embedding, FaceAnalyzer, FaceBox,
    MultiFacePolicy, SampleStore,
};
use image::{ImageFormat, Rgb, RgbImage};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Red channel at or above this makes the fake analyzer fail.
const FAIL_THRESHOLD: u8 = 250;

struct Gate {
    entered: Sender<()>,
    release: Receiver<()>,
}

/// Reads its answer from the top-left pixel `[10 * faces, g, b]`.
///
/// Channel values are decoded with slack so resampling noise from the
/// processor's downscale does not change the answer.
///
/// Face `i` gets box `(top 0, left 10i, right 10i+8, bottom 8)` and embedding
/// `[g / 100, b / 100 + i]`.
#[derive(Default)]
pub struct FakeAnalyzer {
    calls: AtomicUsize,
    gate: Mutex<Option<Gate>>,
}

impl FakeAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Analyzer whose next `locate` signals `entered` and then blocks until
    /// `release` fires.
    pub fn gated() -> (Self, Receiver<()>, Sender<()>) {
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let analyzer = Self {
            calls: AtomicUsize::new(0),
            gate: Mutex::new(Some(Gate {
                entered: entered_tx,
                release: release_rx,
            })),
        };
        (analyzer, entered_rx, release_tx)
    }

    /// Number of `locate` invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FaceAnalyzer for FakeAnalyzer {
    fn locate(&self, image: &RgbImage) -> Result<Vec<FaceBox>, AnalyzerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.entered.send(()).unwrap();
            gate.release.recv().unwrap();
        }

        let [r, _, _] = image.get_pixel(0, 0).0;
        if r >= FAIL_THRESHOLD {
            return Err(AnalyzerError::Backend("fake analyzer failure".into()));
        }
        let faces = (r as u32 + 5) / 10;
        Ok((0..faces)
            .map(|i| FaceBox::new(0, i * 10 + 8, 8, i * 10))
            .collect())
    }

    fn encode(&self, image: &RgbImage, faces: &[FaceBox]) -> Result<Vec<Embedding>, AnalyzerError> {
        let [_, g, b] = image.get_pixel(0, 0).0;
        Ok((0..faces.len())
            .map(|i| Embedding::new(vec![g as f32 / 100.0, b as f32 / 100.0 + i as f32]))
            .collect())
    }
}

/// Uniform 64x64 image holding `faces` faces (at most 24) with base embedding `[g / 100, b / 100]`.
pub fn frame(faces: u8, g: u8, b: u8) -> RgbImage {
    RgbImage::from_pixel(64, 64, Rgb([faces * 10, g, b]))
}

/// Image the fake analyzer refuses to process.
pub fn failing_frame() -> RgbImage {
    RgbImage::from_pixel(64, 64, Rgb([255, 0, 0]))
}

pub fn png(image: &RgbImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png).unwrap();
    out.into_inner()
}

pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 9, 2).unwrap()
}

pub fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
    today().and_hms_opt(h, m, s).unwrap()
}

/// Temp directory with the store, gallery snapshot and attendance log laid out
/// the way the daemon lays them out.
pub struct Harness {
    pub dir: TempDir,
    pub analyzer: Arc<FakeAnalyzer>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_analyzer(FakeAnalyzer::new())
    }

    pub fn with_analyzer(analyzer: FakeAnalyzer) -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
            analyzer: Arc::new(analyzer),
        }
    }

    pub fn store(&self) -> SampleStore {
        SampleStore::new(self.dir.path().join("known_faces"))
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.path().join("known_face_data.json")
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.dir.path().join("attendance.csv")
    }

    /// Put a sample on disk without going through enrollment.
    pub fn seed(&self, identity: &str, image: &RgbImage, second: u32) {
        self.store().save(identity, &png(image), at(8, 0, second)).unwrap();
    }

    pub fn gallery(&self) -> Arc<EmbeddingGallery> {
        self.gallery_with(MultiFacePolicy::TakeFirst)
    }

    pub fn gallery_with(&self, policy: MultiFacePolicy) -> Arc<EmbeddingGallery> {
        Arc::new(
            EmbeddingGallery::load_or_build(self.store(), self.snapshot_path(), self.analyzer.clone(), policy)
                .unwrap(),
        )
    }

    pub fn ledger(&self) -> Arc<AttendanceLedger> {
        Arc::new(AttendanceLedger::open_for(self.ledger_path(), today()).unwrap())
    }
}
