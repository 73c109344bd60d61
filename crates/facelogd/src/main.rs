use anyhow::{Context, Result};
use facelog_core::OnnxAnalyzer;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use config::{Bus, Config};

const BUS_NAME: &str = "org.facelog.Attendance1";
const OBJECT_PATH: &str = "/org/facelog/Attendance1";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facelogd starting");

    let config = Config::from_env();
    tracing::info!(
        known_faces = %config.known_faces_dir.display(),
        gallery = %config.gallery_path.display(),
        attendance = %config.attendance_path.display(),
        models = %config.model_dir.display(),
        "configuration loaded"
    );

    let analyzer = OnnxAnalyzer::load(&config.model_dir)
        .with_context(|| format!("loading models from {}", config.model_dir.display()))?;

    let startup_config = config.clone();
    let engine = tokio::task::spawn_blocking(move || engine::start_engine(&startup_config, Arc::new(analyzer)))
        .await
        .context("engine startup task panicked")??;

    let service = dbus_interface::AttendanceService { engine };
    let builder = match config.bus {
        Bus::Session => zbus::connection::Builder::session()?,
        Bus::System => zbus::connection::Builder::system()?,
    };
    let _conn = builder
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, service)?
        .build()
        .await
        .with_context(|| format!("registering {BUS_NAME} on the {:?} bus", config.bus))?;

    tracing::info!(bus = ?config.bus, name = BUS_NAME, "facelogd ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("facelogd shutting down");

    Ok(())
}
