use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration
/// Provides defaults with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    pub work_dir: PathBuf,
    pub worker_concurrency: usize,
    pub clone_timeout_secs: u64,
    pub build_timeout_secs: u64,
    pub test_timeout_secs: u64,
    pub kill_grace_secs: u64,
    pub sandbox_memory_mb: u64,
    pub sandbox_cpus: f64,
    pub max_attempts: u8,
    pub backoff_base_ms: u64,
    pub completed_history: usize,
    pub failed_history: usize,
    pub status_ttl_secs: u64,
    pub port: u16,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
            work_dir: env::var("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir().join("evalforge")),
            worker_concurrency: env_or("WORKER_CONCURRENCY", 2).max(1),
            clone_timeout_secs: env_or("CLONE_TIMEOUT_SECS", 300),
            build_timeout_secs: env_or("BUILD_TIMEOUT_SECS", 900),
            test_timeout_secs: env_or("TEST_TIMEOUT_SECS", 1800),
            kill_grace_secs: env_or("KILL_GRACE_SECS", 5),
            sandbox_memory_mb: env_or("SANDBOX_MEMORY_MB", 2048),
            sandbox_cpus: env_or("SANDBOX_CPUS", 2.0),
            max_attempts: env_or("MAX_ATTEMPTS", 3).max(1),
            backoff_base_ms: env_or("BACKOFF_BASE_MS", 2000),
            completed_history: env_or("COMPLETED_HISTORY", 100),
            failed_history: env_or("FAILED_HISTORY", 50),
            status_ttl_secs: env_or("STATUS_TTL_SECS", 86_400),
            port: env_or("PORT", 3000),
            log_format: match env::var("LOG_FORMAT") {
                Ok(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        }
    }

    pub fn new() -> Self {
        Self::from_env()
    }

    pub fn clone_timeout(&self) -> Duration {
        Duration::from_secs(self.clone_timeout_secs)
    }

    pub fn build_timeout(&self) -> Duration {
        Duration::from_secs(self.build_timeout_secs)
    }

    pub fn test_timeout(&self) -> Duration {
        Duration::from_secs(self.test_timeout_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }

    pub fn sandbox_memory_bytes(&self) -> i64 {
        (self.sandbox_memory_mb as i64) * 1024 * 1024
    }

    /// CPU ceiling in the unit Docker expects (1e9 per core)
    pub fn sandbox_nano_cpus(&self) -> i64 {
        (self.sandbox_cpus * 1_000_000_000.0) as i64
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
