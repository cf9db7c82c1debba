use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration
/// Provides defaults with environment variable overrides
#[derive(Debug, Clone)]
pub struct Config {
    pub submissions_dir: PathBuf,
    pub expectations_dir: PathBuf,
    pub environment_dir: PathBuf,
    pub registrations_path: PathBuf,
    pub execution_timeout_ms: u64,
    pub cancel_grace_ms: u64,
    pub javac_bin: String,
    pub java_bin: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            submissions_dir: env_path("GRADEKIT_SUBMISSIONS_DIR", "submissions"),
            expectations_dir: env_path("GRADEKIT_EXPECTATIONS_DIR", "expectations"),
            environment_dir: env_path("GRADEKIT_ENVIRONMENT_DIR", "environment"),
            registrations_path: env_path("GRADEKIT_REGISTRATIONS", "config/registrations.json"),
            execution_timeout_ms: env_u64("GRADEKIT_TIMEOUT_MS", 5000),
            cancel_grace_ms: env_u64("GRADEKIT_CANCEL_GRACE_MS", 500),
            javac_bin: env::var("GRADEKIT_JAVAC").unwrap_or_else(|_| "javac".to_string()),
            java_bin: env::var("GRADEKIT_JAVA").unwrap_or_else(|_| "java".to_string()),
        }
    }

    pub fn new() -> Self {
        Self::from_env()
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

fn env_path(key: &str, default: &str) -> PathBuf {
    env::var(key)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(default))
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
