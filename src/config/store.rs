//! Session store configuration.

use serde::Deserialize;
use std::time::Duration;

/// Which backend persists sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Embedded redb database at `path`.
    Redb,
    /// Process memory only; sessions vanish on restart.
    Memory,
}

/// Store backend and retry policy.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,
    /// Path of the redb file (default: "sessions.redb").
    #[serde(default = "default_store_path")]
    pub path: String,
    /// Read-transform-write attempts before giving up (default: 5).
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    /// First backoff delay; doubles per failed attempt (default: 100ms).
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Backoff ceiling (default: 2000ms).
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
    /// Deadline for a single load or compare-and-swap (default: 2000ms).
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            path: default_store_path(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
        }
    }
}

impl StoreConfig {
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }
}

fn default_backend() -> StoreBackend {
    StoreBackend::Redb
}

fn default_store_path() -> String {
    "sessions.redb".to_string()
}

fn default_retry_max_attempts() -> u32 {
    5
}

fn default_retry_base_delay_ms() -> u64 {
    100
}

fn default_retry_max_delay_ms() -> u64 {
    2_000
}

fn default_attempt_timeout_ms() -> u64 {
    2_000
}
