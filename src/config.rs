//! Configuration for Braid.
//!
//! Everything comes from the environment (.env supported via dotenvy).
//! The config is built once at startup and passed into AppState; nothing
//! reads process-wide configuration after that.

use std::time::Duration;

/// Server listen configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file (":memory:" for ephemeral).
    pub path: String,
}

/// Consolidation worker tuning.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Sleep between polls when the queue is empty.
    pub poll_interval: Duration,
    /// Maximum jobs claimed per poll.
    pub claim_batch: u32,
    /// Claimed-but-unfinished jobs older than this are swept back to the queue.
    pub stale_after: Duration,
    /// Per-session advisory lock lease duration.
    pub lock_ttl: Duration,
}

/// Top-level application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub worker: WorkerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 5002,
            },
            database: DatabaseConfig {
                path: "data/braid.db".to_string(),
            },
            worker: WorkerConfig {
                poll_interval: Duration::from_secs(2),
                claim_batch: 64,
                stale_after: Duration::from_secs(300),
                lock_ttl: Duration::from_secs(300),
            },
        }
    }
}

impl Config {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        Self {
            server: ServerConfig {
                host: env_or("BRAID_HOST", defaults.server.host),
                port: env_parse("BRAID_PORT", defaults.server.port),
            },
            database: DatabaseConfig {
                path: env_or("BRAID_DATABASE_PATH", defaults.database.path),
            },
            worker: WorkerConfig {
                poll_interval: Duration::from_secs(env_parse(
                    "BRAID_POLL_INTERVAL_SECS",
                    defaults.worker.poll_interval.as_secs(),
                )),
                claim_batch: env_parse("BRAID_CLAIM_BATCH", defaults.worker.claim_batch),
                stale_after: Duration::from_secs(env_parse(
                    "BRAID_STALE_AFTER_SECS",
                    defaults.worker.stale_after.as_secs(),
                )),
                lock_ttl: Duration::from_secs(env_parse(
                    "BRAID_LOCK_TTL_SECS",
                    defaults.worker.lock_ttl.as_secs(),
                )),
            },
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.worker.poll_interval, Duration::from_secs(2));
        assert_eq!(config.worker.claim_batch, 64);
    }
}
