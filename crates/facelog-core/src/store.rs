//! Enrollment image store: one directory per identity, one file per sample.

use chrono::NaiveDateTime;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Same-second saves beyond this many give up.
const MAX_SUFFIX: u32 = 1000;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid identity name {0:?}")]
    InvalidIdentity(String),
    #[error("store i/o at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Reject names that cannot double as a directory name and a CSV field.
pub fn validate_identity(name: &str) -> Result<(), StoreError> {
    let bad = name.trim().is_empty()
        || name == "."
        || name == ".."
        || name.chars().any(|c| c == '/' || c == '\\' || c == ',' || c.is_control());
    if bad {
        Err(StoreError::InvalidIdentity(name.to_string()))
    } else {
        Ok(())
    }
}

/// One stored enrollment image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub identity: String,
    pub path: PathBuf,
}

/// Directory-backed store of enrollment images.
#[derive(Debug, Clone)]
pub struct SampleStore {
    root: PathBuf,
}

impl SampleStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// List every sample, ordered by identity then file name.
    ///
    /// A missing root is an empty store. Non-directory entries at the top level,
    /// directories whose name is not a valid identity, and non-file entries
    /// inside identity directories are ignored.
    pub fn samples(&self) -> Result<Vec<Sample>, StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&self.root)(e)),
        };

        let mut identities = Vec::new();
        for entry in entries {
            let entry = entry.map_err(io_err(&self.root))?;
            if !entry.path().is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if validate_identity(&name).is_ok() => identities.push(name),
                Ok(name) => tracing::warn!(identity = %name, "skipping identity directory with an invalid name"),
                Err(raw) => tracing::warn!(name = ?raw, "skipping non-UTF-8 identity directory"),
            }
        }
        identities.sort();

        let mut samples = Vec::new();
        for identity in identities {
            let dir = self.root.join(&identity);
            let mut files: Vec<PathBuf> = fs::read_dir(&dir)
                .map_err(io_err(&dir))?
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.is_file())
                .collect();
            files.sort();
            samples.extend(files.into_iter().map(|path| Sample {
                identity: identity.clone(),
                path,
            }));
        }

        Ok(samples)
    }

    /// Write a new sample for `identity`, named after the capture time.
    ///
    /// Never overwrites: a same-second collision gets a numeric suffix.
    pub fn save(&self, identity: &str, bytes: &[u8], when: NaiveDateTime) -> Result<PathBuf, StoreError> {
        validate_identity(identity)?;

        let dir = self.root.join(identity);
        fs::create_dir_all(&dir).map_err(io_err(&dir))?;

        let stem = when.format("%Y%m%d_%H%M%S").to_string();
        let ext = extension_for(bytes);

        for attempt in 0..MAX_SUFFIX {
            let name = if attempt == 0 {
                format!("{stem}.{ext}")
            } else {
                format!("{stem}_{attempt}.{ext}")
            };
            let path = dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(mut file) => {
                    file.write_all(bytes).map_err(io_err(&path))?;
                    file.sync_all().map_err(io_err(&path))?;
                    return Ok(path);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(io_err(&path)(e)),
            }
        }
        Err(StoreError::Io {
            path: dir.join(format!("{stem}.{ext}")),
            source: io::Error::new(io::ErrorKind::AlreadyExists, "no free sample file name"),
        })
    }
}

fn extension_for(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .ok()
        .and_then(|f| f.extensions_str().first().copied())
        .unwrap_or("jpg")
}
