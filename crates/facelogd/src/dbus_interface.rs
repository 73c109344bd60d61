use chrono::NaiveDate;
use facelog_core::{EnrollmentResponse, FrameOutcome, FrameResponse};
use zbus::interface;
use zbus::object_server::SignalEmitter;

use crate::engine::EngineHandle;

/// D-Bus interface for the attendance daemon.
///
/// Bus name: org.facelog.Attendance1
/// Object path: /org/facelog/Attendance1
pub struct AttendanceService {
    pub engine: EngineHandle,
}

#[interface(name = "org.facelog.Attendance1")]
impl AttendanceService {
    /// Enroll one encoded face image under `name`. Returns an
    /// `{"success", "message"}` JSON object; rejections are not D-Bus errors.
    async fn enroll(&self, name: &str, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::info!(name, bytes = image.len(), "enroll requested");
        let result = self.engine.enroll(name.to_string(), image).await?;
        to_json(&EnrollmentResponse::from(&result))
    }

    /// Run one encoded frame through the pipeline.
    ///
    /// Emits `AttendanceUpdated` for every first sighting of the day.
    async fn process_frame(
        &self,
        image: Vec<u8>,
        #[zbus(signal_emitter)] emitter: SignalEmitter<'_>,
    ) -> zbus::fdo::Result<String> {
        let outcome = self.engine.process_frame(image).await?;
        if let FrameOutcome::Processed(report) = &outcome {
            for update in &report.attendance {
                tracing::info!(name = %update.name, time = %update.time, "attendance recorded");
                if let Err(e) = Self::attendance_updated(&emitter, &update.name, &update.time).await {
                    tracing::warn!(error = %e, "failed to emit AttendanceUpdated");
                }
            }
        }
        to_json(&FrameResponse::from(&outcome))
    }

    /// Attendance records as a JSON array, most recent first. An empty
    /// `date` lists every day; otherwise `YYYY-MM-DD`.
    async fn attendance(&self, date: &str) -> zbus::fdo::Result<String> {
        let date = parse_date(date)?;
        let records = self.engine.attendance(date).await?;
        to_json(&records)
    }

    /// Rescan the sample store and rebuild the gallery. Returns the number of
    /// embeddings in the new gallery.
    async fn rebuild(&self) -> zbus::fdo::Result<u32> {
        tracing::info!("rebuild requested");
        let report = self.engine.rebuild().await?;
        Ok(u32::try_from(report.embedded).unwrap_or(u32::MAX))
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "gallery_size": self.engine.gallery_size(),
            "identities": self.engine.identity_count(),
            "busy": self.engine.is_busy(),
        })
        .to_string())
    }

    /// A person was marked present for the first time today.
    #[zbus(signal)]
    async fn attendance_updated(emitter: &SignalEmitter<'_>, name: &str, time: &str) -> zbus::Result<()>;
}

fn parse_date(raw: &str) -> zbus::fdo::Result<Option<NaiveDate>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<NaiveDate>()
        .map(Some)
        .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("invalid date {raw:?}: {e}")))
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use facelog_core::AttendanceRecord;

    #[test]
    fn test_parse_date() {
        assert_eq!(parse_date("").unwrap(), None);
        assert_eq!(parse_date(" 2024-09-02 ").unwrap(), NaiveDate::from_ymd_opt(2024, 9, 2));
        assert!(matches!(parse_date("yesterday"), Err(zbus::fdo::Error::InvalidArgs(_))));
    }

    #[test]
    fn test_records_as_json() {
        let records = vec![AttendanceRecord::parse_line("Alice,2024-09-02,08:30:00").unwrap()];
        let json: serde_json::Value = serde_json::from_str(&to_json(&records).unwrap()).unwrap();
        assert_eq!(json[0]["name"], "Alice");
        assert_eq!(json[0]["date"], "2024-09-02");
    }
}
