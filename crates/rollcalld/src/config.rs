use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Path to the embedding model (ONNX).
    pub model_path: PathBuf,
    /// Cosine similarity threshold for a positive identification.
    ///
    /// One value for every code path. Raising it trades false accepts for
    /// false rejects; 0.70 holds up well for 512-dim ArcFace embeddings.
    pub similarity_threshold: f32,
    /// Address the HTTP surface listens on.
    pub listen_addr: String,
    /// Recommended capture stride for live callers (process 1 in N
    /// frames). Advertised via the status endpoint; the daemon itself
    /// does no throttling.
    pub frame_stride: usize,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("rollcall");

        let db_path = std::env::var("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        let model_path = std::env::var("ROLLCALL_MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("models/w600k_r50.onnx"));

        Self {
            db_path,
            model_path,
            similarity_threshold: env_f32("ROLLCALL_SIMILARITY_THRESHOLD", 0.70),
            listen_addr: std::env::var("ROLLCALL_LISTEN_ADDR")
                .unwrap_or_else(|_| "127.0.0.1:8741".to_string()),
            frame_stride: env_usize("ROLLCALL_FRAME_STRIDE", 5),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
