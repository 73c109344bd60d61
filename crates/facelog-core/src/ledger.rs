//! Append-only attendance log with at-most-once-per-day semantics.
//!
//! Records are CSV lines `name,YYYY-MM-DD,HH:MM:SS` with no header. The log is
//! only ever appended to; the in-memory set of names already seen on the
//! tracked day makes the duplicate check O(1).

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use serde::Serialize;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIME_FORMAT: &str = "%H:%M:%S";

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("attendance log i/o at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("identity {0:?} cannot be written to the attendance log")]
    InvalidIdentity(String),
}

/// One line of the attendance log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttendanceRecord {
    pub name: String,
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl AttendanceRecord {
    /// Build a record, truncating the time to whole seconds.
    pub fn at(name: impl Into<String>, when: NaiveDateTime) -> Self {
        let time = when.time();
        Self {
            name: name.into(),
            date: when.date(),
            time: time.with_nanosecond(0).unwrap_or(time),
        }
    }

    pub fn time_str(&self) -> String {
        self.time.format(TIME_FORMAT).to_string()
    }

    pub fn to_line(&self) -> String {
        format!("{},{},{}", self.name, self.date.format(DATE_FORMAT), self.time_str())
    }

    /// Parse a log line. `None` for blank or malformed lines.
    pub fn parse_line(line: &str) -> Option<Self> {
        let mut fields = line.trim_end_matches(&['\r', '\n'][..]).split(',');
        let name = fields.next()?.trim();
        let date = NaiveDate::parse_from_str(fields.next()?.trim(), DATE_FORMAT).ok()?;
        let time = NaiveTime::parse_from_str(fields.next()?.trim(), TIME_FORMAT).ok()?;
        if name.is_empty() || fields.next().is_some() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            date,
            time,
        })
    }
}

struct LedgerState {
    day: NaiveDate,
    attended: HashSet<String>,
    file: File,
}

/// Process-wide attendance ledger.
pub struct AttendanceLedger {
    path: PathBuf,
    state: Mutex<LedgerState>,
}

impl AttendanceLedger {
    /// Open (or create) the log at `path`, seeding the today-set from local today.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        Self::open_for(path, Local::now().date_naive())
    }

    /// Open the log with an explicit "today".
    pub fn open_for(path: impl Into<PathBuf>, today: NaiveDate) -> Result<Self, LedgerError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| LedgerError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| LedgerError::Io {
                path: path.clone(),
                source,
            })?;
        let attended = names_on(&path, today)?;
        tracing::info!(path = %path.display(), %today, attended = attended.len(), "attendance ledger opened");

        Ok(Self {
            path,
            state: Mutex::new(LedgerState {
                day: today,
                attended,
                file,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `identity` has a record for local today.
    pub fn has_attended_today(&self, identity: &str) -> bool {
        self.has_attended(identity, Local::now().date_naive())
    }

    /// Whether `identity` has a record on `date`, as far as the in-memory set knows.
    /// Only the tracked day is held in memory; other dates report `false`.
    pub fn has_attended(&self, identity: &str, date: NaiveDate) -> bool {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.day == date && state.attended.contains(identity)
    }

    /// Append a record for `identity` unless one already exists for the day of `when`.
    ///
    /// The membership check and the append happen under one lock, so concurrent
    /// callers for the same identity produce exactly one record.
    pub fn record_if_first(
        &self,
        identity: &str,
        when: NaiveDateTime,
    ) -> Result<Option<AttendanceRecord>, LedgerError> {
        if identity.is_empty() || identity.contains(&[',', '\n', '\r'][..]) {
            return Err(LedgerError::InvalidIdentity(identity.to_string()));
        }

        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        let date = when.date();
        if state.day != date {
            state.attended = names_on(&self.path, date)?;
            state.day = date;
            tracing::info!(%date, attended = state.attended.len(), "attendance day rolled over");
        }

        if state.attended.contains(identity) {
            return Ok(None);
        }

        let record = AttendanceRecord::at(identity, when);
        let line = format!("{}\n", record.to_line());
        append_line(&mut state.file, line.as_bytes()).map_err(|source| LedgerError::Io {
            path: self.path.clone(),
            source,
        })?;
        state.attended.insert(identity.to_string());

        tracing::info!(identity, date = %record.date, time = %record.time_str(), "attendance recorded");
        Ok(Some(record))
    }

    /// Every record in the log, most recent first.
    pub fn records(&self) -> Result<Vec<AttendanceRecord>, LedgerError> {
        let _guard = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let mut records = read_records(&self.path)?;
        records.reverse();
        Ok(records)
    }

    /// Records on `date`, most recent first.
    pub fn records_on(&self, date: NaiveDate) -> Result<Vec<AttendanceRecord>, LedgerError> {
        Ok(self.records()?.into_iter().filter(|r| r.date == date).collect())
    }
}

fn read_records(path: &Path) -> Result<Vec<AttendanceRecord>, LedgerError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(LedgerError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let mut records = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match AttendanceRecord::parse_line(line) {
            Some(record) => records.push(record),
            None => tracing::warn!(path = %path.display(), line = lineno + 1, "skipping malformed attendance line"),
        }
    }
    Ok(records)
}

/// Append-only sink that can be cut back to an earlier length.
trait LogSink: Write {
    fn end(&mut self) -> io::Result<u64>;
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl LogSink for File {
    fn end(&mut self) -> io::Result<u64> {
        self.metadata().map(|m| m.len())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Write one whole line or nothing: a failed write is truncated away so the
/// next append does not join onto a partial record.
fn append_line(sink: &mut impl LogSink, line: &[u8]) -> io::Result<()> {
    let start = sink.end()?;
    if let Err(e) = sink.write_all(line).and_then(|()| sink.flush()) {
        if let Err(rollback) = sink.truncate(start) {
            tracing::error!(error = %rollback, "could not roll back partial attendance line");
        }
        return Err(e);
    }
    Ok(())
}

fn names_on(path: &Path, date: NaiveDate) -> Result<HashSet<String>, LedgerError> {
    Ok(read_records(path)?
        .into_iter()
        .filter(|r| r.date == date)
        .map(|r| r.name)
        .collect())
}
