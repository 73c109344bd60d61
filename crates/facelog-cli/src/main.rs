use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "facelog", about = "Face-recognition attendance CLI")]
struct Cli {
    /// Talk to the daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll a face sample for a person
    Enroll {
        /// Name to file the sample under
        #[arg(short, long)]
        name: String,
        /// Image containing exactly one face
        image: PathBuf,
    },
    /// Recognize faces in an image and record attendance
    Recognize {
        image: PathBuf,
    },
    /// List attendance records, most recent first
    Attendance {
        /// Only show this day (YYYY-MM-DD)
        #[arg(short, long)]
        date: Option<String>,
    },
    /// Rebuild the gallery from stored samples
    Rebuild,
    /// Show daemon status
    Status,
}

#[zbus::proxy(
    interface = "org.facelog.Attendance1",
    default_service = "org.facelog.Attendance1",
    default_path = "/org/facelog/Attendance1"
)]
trait Attendance {
    async fn enroll(&self, name: &str, image: Vec<u8>) -> zbus::Result<String>;
    async fn process_frame(&self, image: Vec<u8>) -> zbus::Result<String>;
    async fn attendance(&self, date: &str) -> zbus::Result<String>;
    async fn rebuild(&self) -> zbus::Result<u32>;
    async fn status(&self) -> zbus::Result<String>;
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("reading {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    tracing::debug!(system = cli.system, "connecting to facelogd");

    let conn = if cli.system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("connecting to D-Bus")?;
    let proxy = AttendanceProxy::new(&conn)
        .await
        .context("facelogd is not reachable")?;

    match cli.command {
        Commands::Enroll { name, image } => {
            let reply: Value = serde_json::from_str(&proxy.enroll(&name, read_image(&image)?).await?)?;
            let message = reply["message"].as_str().unwrap_or_default();
            if reply["success"].as_bool() != Some(true) {
                bail!("{message}");
            }
            println!("{message}");
        }
        Commands::Recognize { image } => {
            let reply: Value = serde_json::from_str(&proxy.process_frame(read_image(&image)?).await?)?;
            if reply["status"] == "dropped" {
                println!("Frame dropped: daemon busy");
                return Ok(());
            }
            let results = reply["results"].as_array().cloned().unwrap_or_default();
            if results.is_empty() {
                println!("No faces found");
            }
            for result in results {
                println!("{:<24} {}", result["name"].as_str().unwrap_or("?"), result["box"]);
            }
        }
        Commands::Attendance { date } => {
            let reply: Value = serde_json::from_str(&proxy.attendance(date.as_deref().unwrap_or("")).await?)?;
            let records = reply.as_array().cloned().unwrap_or_default();
            if records.is_empty() {
                println!("No attendance recorded");
            }
            for record in records {
                println!(
                    "{}  {}  {}",
                    record["date"].as_str().unwrap_or("?"),
                    record["time"].as_str().unwrap_or("?"),
                    record["name"].as_str().unwrap_or("?"),
                );
            }
        }
        Commands::Rebuild => {
            let embedded = proxy.rebuild().await?;
            println!("Gallery rebuilt: {embedded} embeddings");
        }
        Commands::Status => {
            let status: Value = serde_json::from_str(&proxy.status().await?)?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}
