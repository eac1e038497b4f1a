//! Configuration surface: where the local store lives and how to reach the
//! master store.
//!
//! Both are externally supplied. The local database path comes from
//! `CABSYNC_DATABASE_URL` (falling back to `<base>/cabsync.db`), the master
//! connection target is persisted as JSON under the base directory once
//! `configure` has verified it with a live connection test.

use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SyncError;

const DEFAULT_BASE_DIR: &str = "/opt/cabsync";
const MASTER_FILE: &str = "master.json";

/// Base directory for the database, config and logs.
pub fn base_dir() -> PathBuf {
    env::var("CABSYNC_BASE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_BASE_DIR))
}

/// Path of the device-local SQLite database.
pub fn database_url() -> String {
    env::var("CABSYNC_DATABASE_URL")
        .unwrap_or_else(|_| base_dir().join("cabsync.db").to_string_lossy().into_owned())
}

/// Connection target for the shared master store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterSettings {
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_read_timeout() -> u64 {
    30
}

impl MasterSettings {
    pub fn new(url: impl Into<String>) -> Self {
        MasterSettings {
            url: url.into(),
            api_key: None,
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    fn path() -> PathBuf {
        base_dir().join(MASTER_FILE)
    }

    /// Load the persisted master target, `None` when the device has never
    /// been configured.
    pub fn load() -> Result<Option<Self>, SyncError> {
        let path = Self::path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(SyncError::Configuration(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )));
            }
        };
        let settings = serde_json::from_str(&raw).map_err(|e| {
            SyncError::Configuration(format!("invalid {}: {}", path.display(), e))
        })?;
        Ok(Some(settings))
    }

    /// Persist the target. Callers must have verified it with
    /// [`crate::store::MasterStore::ping`] first.
    pub fn save(&self) -> Result<(), SyncError> {
        let path = Self::path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| {
                SyncError::Configuration(format!("cannot create {}: {}", dir.display(), e))
            })?;
        }
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(&path, raw).map_err(|e| {
            SyncError::Configuration(format!("cannot write {}: {}", path.display(), e))
        })
    }
}
