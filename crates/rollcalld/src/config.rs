use std::time::Duration;

/// Service configuration, loaded from environment variables.
pub struct Config {
    /// Base URL of the FaceNet embedding service.
    pub facenet_url: String,
    /// Cosine similarity threshold for a positive match.
    pub match_threshold: f32,
    /// Cooldown between session creations for the same class key.
    pub session_creation_cooldown: Duration,
    /// Timeout for one embedding-service round trip.
    pub embed_timeout: Duration,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self {
            facenet_url: std::env::var("ROLLCALL_FACENET_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:8000".to_string()),
            match_threshold: env_f32(
                "ROLLCALL_MATCH_THRESHOLD",
                rollcall_core::FACE_MATCH_THRESHOLD,
            ),
            session_creation_cooldown: Duration::from_millis(env_u64(
                "ROLLCALL_SESSION_COOLDOWN_MS",
                1000,
            )),
            embed_timeout: Duration::from_secs(env_u64("ROLLCALL_EMBED_TIMEOUT_SECS", 10)),
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
