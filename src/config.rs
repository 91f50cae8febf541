use std::path::PathBuf;
use std::time::Duration;

use crate::engine::EngineConfig;

/// Runtime settings, read from `INNKEEP_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    /// WAL appends since the last compaction that trigger the next one.
    pub compact_threshold: u64,
    pub compact_interval: Duration,
    pub store_timeout: Option<Duration>,
    /// Idle time after which a session and its snapshots are dropped.
    pub session_lifetime: Duration,
    pub metrics_port: Option<u16>,
    /// Rooms created on first start, in listing order.
    pub seed_rooms: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(30),
            store_timeout: Some(Duration::from_millis(5000)),
            session_lifetime: Duration::from_secs(24 * 60 * 60),
            metrics_port: None,
            seed_rooms: vec!["General's Quarters".into(), "Major's Suite".into()],
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Unset or unparsable values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| lookup(key).and_then(|s| s.trim().parse::<u64>().ok());

        Self {
            data_dir: lookup("INNKEEP_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            compact_threshold: parsed("INNKEEP_COMPACT_THRESHOLD").unwrap_or(defaults.compact_threshold),
            compact_interval: defaults.compact_interval,
            // 0 disables the deadline.
            store_timeout: match parsed("INNKEEP_STORE_TIMEOUT_MS") {
                Some(0) => None,
                Some(ms) => Some(Duration::from_millis(ms)),
                None => defaults.store_timeout,
            },
            session_lifetime: parsed("INNKEEP_SESSION_LIFETIME_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.session_lifetime),
            metrics_port: lookup("INNKEEP_METRICS_PORT").and_then(|s| s.trim().parse().ok()),
            seed_rooms: lookup("INNKEEP_SEED_ROOMS")
                .map(|s| {
                    s.split(',')
                        .map(str::trim)
                        .filter(|name| !name.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or(defaults.seed_rooms),
        }
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            store_timeout: self.store_timeout,
        }
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join("innkeep.wal")
    }
}
