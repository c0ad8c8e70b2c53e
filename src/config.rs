use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{ParcelExchangeError, Result};

pub const DEFAULT_DB_PATH: &str = "./data/parcel-exchange.db";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub sqlite_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RealtimeConfig {
    pub heartbeat_seconds: Option<u64>,
    pub idle_timeout_seconds: Option<u64>,
    pub outbound_buffer: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MatchingConfig {
    pub date_window_days: Option<i64>,
    pub default_limit: Option<usize>,
    pub default_min_score: Option<u8>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    pub server: Option<ServerConfig>,
    pub database: Option<DatabaseConfig>,
    pub realtime: Option<RealtimeConfig>,
    pub matching: Option<MatchingConfig>,
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| ParcelExchangeError::Config(e.to_string()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|e| ParcelExchangeError::Config(e.to_string()))?;
        Ok(config)
    }

    pub fn from_store(db_path: &str) -> Result<Self> {
        crate::config_store::load_config(db_path)
    }

    /// Config written to a fresh database on first daemon start.
    pub fn defaults_for(db_path: &str) -> Self {
        Self {
            server: Some(ServerConfig {
                host: Some("127.0.0.1".to_string()),
                port: Some(8080),
            }),
            database: Some(DatabaseConfig {
                sqlite_path: Some(db_path.to_string()),
            }),
            realtime: Some(RealtimeConfig {
                heartbeat_seconds: Some(25),
                idle_timeout_seconds: Some(60),
                outbound_buffer: Some(256),
            }),
            matching: Some(MatchingConfig {
                date_window_days: Some(14),
                default_limit: Some(50),
                default_min_score: Some(0),
            }),
        }
    }

    pub fn sqlite_path(&self) -> String {
        self.database
            .as_ref()
            .and_then(|db| db.sqlite_path.as_ref())
            .map(|path| path.trim().to_string())
            .filter(|path| !path.is_empty())
            .unwrap_or_else(|| DEFAULT_DB_PATH.to_string())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        let secs = self
            .realtime
            .as_ref()
            .and_then(|rt| rt.heartbeat_seconds)
            .unwrap_or(25);
        Duration::from_secs(secs.max(1))
    }

    pub fn idle_timeout(&self) -> Duration {
        let secs = self
            .realtime
            .as_ref()
            .and_then(|rt| rt.idle_timeout_seconds)
            .unwrap_or(60);
        Duration::from_secs(secs.max(1))
    }

    pub fn outbound_buffer(&self) -> usize {
        self.realtime
            .as_ref()
            .and_then(|rt| rt.outbound_buffer)
            .unwrap_or(256)
            .max(1)
    }

    pub fn date_window_days(&self) -> i64 {
        self.matching
            .as_ref()
            .and_then(|m| m.date_window_days)
            .unwrap_or(14)
            .max(0)
    }

    pub fn default_match_limit(&self) -> usize {
        self.matching
            .as_ref()
            .and_then(|m| m.default_limit)
            .unwrap_or(50)
    }

    pub fn default_min_score(&self) -> u8 {
        self.matching
            .as_ref()
            .and_then(|m| m.default_min_score)
            .unwrap_or(0)
            .min(100)
    }
}
