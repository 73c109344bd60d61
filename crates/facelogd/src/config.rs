use facelog_core::{EnrollMode, MultiFacePolicy, DEFAULT_DOWNSCALE, DEFAULT_TOLERANCE};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which D-Bus bus the service registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bus {
    Session,
    System,
}

impl FromStr for Bus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "session" => Ok(Self::Session),
            "system" => Ok(Self::System),
            other => Err(format!("unknown bus {other:?}")),
        }
    }
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// One sub-directory of enrollment images per identity.
    pub known_faces_dir: PathBuf,
    /// Persisted gallery snapshot.
    pub gallery_path: PathBuf,
    /// Append-only attendance CSV.
    pub attendance_path: PathBuf,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Maximum Euclidean distance for a positive match.
    ///
    /// The 0.6 default is strict for the L2-normalised ArcFace embeddings the
    /// ONNX analyzer produces (cosine similarity of at least 0.82). Raise it
    /// with `FACELOG_TOLERANCE` (around 1.0) if enrolled people go
    /// unrecognised; lower it if strangers are matched.
    pub tolerance: f32,
    /// Linear downscale factor applied to frames before detection.
    pub downscale: u32,
    /// Upper bound on one frame's trip through the pipeline.
    pub detect_timeout: Duration,
    pub multi_face_policy: MultiFacePolicy,
    pub enroll_mode: EnrollMode,
    pub bus: Bus,
}

impl Config {
    /// Load configuration from `FACELOG_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = var("FACELOG_DATA_DIR").map(PathBuf::from).unwrap_or_else(|| {
            var("XDG_DATA_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| {
                    let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                    PathBuf::from(home).join(".local/share")
                })
                .join("facelog")
        });
        let tolerance = positive(
            "FACELOG_TOLERANCE",
            parsed(&var, "FACELOG_TOLERANCE", DEFAULT_TOLERANCE),
            DEFAULT_TOLERANCE,
        );
        let path = |key: &str, default: &str| var(key).map(PathBuf::from).unwrap_or_else(|| data_dir.join(default));

        Self {
            known_faces_dir: path("FACELOG_KNOWN_FACES_DIR", "known_faces"),
            gallery_path: path("FACELOG_GALLERY_PATH", "known_face_data.json"),
            attendance_path: path("FACELOG_ATTENDANCE_PATH", "attendance.csv"),
            model_dir: path("FACELOG_MODEL_DIR", "models"),
            tolerance,
            downscale: parsed(&var, "FACELOG_DOWNSCALE", DEFAULT_DOWNSCALE).max(1),
            detect_timeout: Duration::from_secs(parsed(&var, "FACELOG_DETECT_TIMEOUT_SECS", 10)),
            multi_face_policy: parsed(&var, "FACELOG_MULTI_FACE_POLICY", MultiFacePolicy::TakeFirst),
            enroll_mode: parsed(&var, "FACELOG_ENROLL_MODE", EnrollMode::Rebuild),
            bus: parsed(&var, "FACELOG_BUS", Bus::Session),
        }
    }
}

fn parsed<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match var(key) {
        None => default,
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "unparseable setting; using default");
            default
        }),
    }
}

/// NaN, infinite, zero or negative values disable matching; fall back instead.
fn positive(key: &str, value: f32, default: f32) -> f32 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        tracing::warn!(key, value, "setting must be a positive number; using default");
        default
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[("HOME", "/home/u")]);
        assert_eq!(c.known_faces_dir, PathBuf::from("/home/u/.local/share/facelog/known_faces"));
        assert_eq!(c.attendance_path, PathBuf::from("/home/u/.local/share/facelog/attendance.csv"));
        assert_eq!(c.tolerance, 0.6);
        assert_eq!(c.downscale, 4);
        assert_eq!(c.detect_timeout, Duration::from_secs(10));
        assert_eq!(c.multi_face_policy, MultiFacePolicy::TakeFirst);
        assert_eq!(c.enroll_mode, EnrollMode::Rebuild);
        assert_eq!(c.bus, Bus::Session);
    }

    #[test]
    fn test_overrides() {
        let c = config(&[
            ("FACELOG_DATA_DIR", "/srv/facelog"),
            ("FACELOG_GALLERY_PATH", "/var/cache/gallery.json"),
            ("FACELOG_TOLERANCE", "0.45"),
            ("FACELOG_DOWNSCALE", "0"),
            ("FACELOG_MULTI_FACE_POLICY", "skip"),
            ("FACELOG_ENROLL_MODE", "incremental"),
            ("FACELOG_BUS", "system"),
        ]);
        assert_eq!(c.known_faces_dir, PathBuf::from("/srv/facelog/known_faces"));
        assert_eq!(c.gallery_path, PathBuf::from("/var/cache/gallery.json"));
        assert_eq!(c.tolerance, 0.45);
        assert_eq!(c.downscale, 1);
        assert_eq!(c.multi_face_policy, MultiFacePolicy::Skip);
        assert_eq!(c.enroll_mode, EnrollMode::Incremental);
        assert_eq!(c.bus, Bus::System);
    }

    #[test]
    fn test_non_positive_tolerance_falls_back_to_default() {
        for bad in ["NaN", "-0.5", "0", "inf"] {
            let c = config(&[("FACELOG_TOLERANCE", bad)]);
            assert_eq!(c.tolerance, DEFAULT_TOLERANCE, "{bad:?}");
        }
        assert_eq!(config(&[("FACELOG_TOLERANCE", "1.05")]).tolerance, 1.05);
    }

    #[test]
    fn test_garbage_falls_back_to_default() {
        let c = config(&[("FACELOG_TOLERANCE", "tight"), ("FACELOG_BUS", "usb")]);
        assert_eq!(c.tolerance, DEFAULT_TOLERANCE);
        assert_eq!(c.bus, Bus::Session);
    }
}
