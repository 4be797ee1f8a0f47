use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance CLI")]
struct Cli {
    /// Base URL of the rollcalld daemon
    #[arg(long, default_value = "http://127.0.0.1:8741")]
    daemon: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a student's face from a reference image
    Register {
        /// Student number
        student: String,
        /// Path to the reference image
        image: PathBuf,
    },
    /// Submit a single frame to the capture pipeline
    Capture {
        /// Path to the frame image
        image: PathBuf,
        /// Capture time (ISO-8601, defaults to now)
        #[arg(long)]
        at: Option<String>,
        /// Restrict to one lecturer's timetable
        #[arg(long)]
        lecturer: Option<String>,
    },
    /// Watch a spool directory and submit frames until the roster is marked
    Watch {
        /// Directory external camera tooling drops frames into
        spool: PathBuf,
        /// Process 1 in N frames (defaults to the daemon's advertised stride)
        #[arg(long)]
        stride: Option<usize>,
        /// Poll interval in milliseconds
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
        /// Restrict to one lecturer's timetable
        #[arg(long)]
        lecturer: Option<String>,
    },
    /// List enrolled students
    Students,
    /// List scheduled sessions
    Sessions,
    /// Show attendance records for a date (defaults to today)
    Attendance {
        #[arg(long)]
        date: Option<String>,
    },
    /// Show daemon status
    Status,
}

#[derive(Deserialize)]
struct CaptureResponse {
    status: String,
    student_id: Option<String>,
    student_name: Option<String>,
}

#[derive(Deserialize)]
struct RosterEntry {
    student_id: String,
    student_name: String,
    marked: bool,
}

#[derive(Deserialize)]
struct ActiveSessionResponse {
    active: bool,
    roster: Option<Vec<RosterEntry>>,
    all_marked: bool,
}

struct Client {
    http: reqwest::Client,
    base: String,
}

impl Client {
    fn new(base: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base,
        }
    }

    async fn capture(
        &self,
        image: &Path,
        at: Option<&str>,
        lecturer: Option<&str>,
    ) -> Result<CaptureResponse> {
        let body = serde_json::json!({
            "image_data": encode_image(image)?,
            "at_time": at,
            "lecturer": lecturer,
        });
        let resp = self
            .http
            .post(format!("{}/api/v1/capture", self.base))
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    async fn active_session(&self, lecturer: Option<&str>) -> Result<ActiveSessionResponse> {
        let mut req = self
            .http
            .get(format!("{}/api/v1/sessions/active", self.base));
        if let Some(l) = lecturer {
            req = req.query(&[("lecturer", l)]);
        }
        Ok(req.send().await?.error_for_status()?.json().await?)
    }

    async fn get_json(&self, path: &str) -> Result<serde_json::Value> {
        let resp = self
            .http
            .get(format!("{}{}", self.base, path))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }
}

fn encode_image(path: &Path) -> Result<String> {
    let bytes =
        std::fs::read(path).with_context(|| format!("reading frame {}", path.display()))?;
    Ok(BASE64.encode(bytes))
}

fn print_outcome(resp: &CaptureResponse) {
    match (resp.status.as_str(), &resp.student_id, &resp.student_name) {
        ("present", Some(id), Some(name)) => println!("present: {name} ({id})"),
        ("already_present", Some(id), Some(name)) => println!("already present: {name} ({id})"),
        ("unidentifiable", _, _) => println!("unidentifiable"),
        ("no_active_session", _, _) => println!("no active session"),
        (other, _, _) => println!("{other}"),
    }
}

/// Poll the spool directory, submitting every Nth new frame to the daemon
/// until every roster member is marked. The camera stays external: anything
/// that drops image files into the spool feeds this loop, and the stride
/// keeps a fast producer from flooding the embedder with redundant frames.
async fn watch_loop(
    client: &Client,
    spool: &Path,
    stride: usize,
    interval: Duration,
    lecturer: Option<&str>,
) -> Result<()> {
    let stride = stride.max(1);
    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut frame_counter: usize = 0;

    println!("watching {} (1 in {stride} frames)", spool.display());

    loop {
        let status = client.active_session(lecturer).await?;
        if !status.active {
            println!("no active session; waiting");
            tokio::time::sleep(interval).await;
            continue;
        }
        if status.all_marked {
            println!("all roster members marked present");
            if let Some(roster) = &status.roster {
                for entry in roster {
                    println!("  {} ({})", entry.student_name, entry.student_id);
                }
            }
            return Ok(());
        }

        let mut frames: Vec<PathBuf> = std::fs::read_dir(spool)
            .with_context(|| format!("reading spool {}", spool.display()))?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && !seen.contains(p))
            .collect();
        frames.sort();

        for frame in frames {
            seen.insert(frame.clone());
            frame_counter += 1;
            if frame_counter % stride != 0 {
                continue;
            }

            match client.capture(&frame, None, lecturer).await {
                Ok(resp) => print_outcome(&resp),
                Err(err) => eprintln!("capture failed for {}: {err}", frame.display()),
            }
        }

        tokio::time::sleep(interval).await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = Client::new(cli.daemon.trim_end_matches('/').to_string());

    match cli.command {
        Commands::Register { student, image } => {
            let body = serde_json::json!({ "image_data": encode_image(&image)? });
            let resp = client
                .http
                .post(format!(
                    "{}/api/v1/students/{student}/face",
                    client.base
                ))
                .json(&body)
                .send()
                .await?;
            let code = resp.status();
            let payload: serde_json::Value = resp.json().await?;
            if code.is_success() {
                println!("face registered for {student}");
            } else {
                println!("registration failed: {payload}");
            }
        }
        Commands::Capture { image, at, lecturer } => {
            let resp = client
                .capture(&image, at.as_deref(), lecturer.as_deref())
                .await?;
            print_outcome(&resp);
        }
        Commands::Watch {
            spool,
            stride,
            interval_ms,
            lecturer,
        } => {
            let stride = match stride {
                Some(s) => s,
                None => client
                    .get_json("/api/v1/status")
                    .await?
                    .get("frame_stride")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(5) as usize,
            };
            watch_loop(
                &client,
                &spool,
                stride,
                Duration::from_millis(interval_ms),
                lecturer.as_deref(),
            )
            .await?;
        }
        Commands::Students => {
            let students = client.get_json("/api/v1/students").await?;
            println!("{}", serde_json::to_string_pretty(&students)?);
        }
        Commands::Sessions => {
            let sessions = client.get_json("/api/v1/sessions").await?;
            println!("{}", serde_json::to_string_pretty(&sessions)?);
        }
        Commands::Attendance { date } => {
            let path = match date {
                Some(d) => format!("/api/v1/attendance?date={d}"),
                None => "/api/v1/attendance".to_string(),
            };
            let records = client.get_json(&path).await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        Commands::Status => {
            let status = client.get_json("/api/v1/status").await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}
