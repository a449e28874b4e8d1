//! Build configuration
//!
//! Loaded from a JSON file; every field has a default so a partial file (or
//! no file) is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use structure_plan::{PlacementOptions, ServerContext};

use crate::error::{Error, Result};
use crate::executor::ExecutorConfig;

/// Directory under the home directory holding builder state
pub const APP_DIR: &str = ".structure-builder";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub executor: ExecutorConfig,
    pub placement: PlacementOptions,
    /// Overrides `~/.structure-builder/builds`
    pub state_dir: Option<PathBuf>,
    /// Overrides `~/.structure-builder/target.sock`
    pub socket: Option<PathBuf>,
    pub server_version: String,
    /// Empty columns between neighbouring structures in a batch
    pub batch_gap: i32,
    pub request_timeout_ms: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorConfig::default(),
            placement: PlacementOptions::default(),
            state_dir: None,
            socket: None,
            server_version: "1.20.4".into(),
            batch_gap: 4,
            request_timeout_ms: 5000,
        }
    }
}

impl BuildConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let config: BuildConfig =
            serde_json::from_str(&raw).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// `path` if given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let pps = self.executor.placements_per_second;
        if pps.is_nan() || pps <= 0.0 {
            return Err(Error::Config("executor.placements_per_second must be positive".into()));
        }
        if self.executor.retry.max_attempts == 0 {
            return Err(Error::Config("executor.retry.max_attempts must be at least 1".into()));
        }
        if self.placement.checkpoint_interval == 0 {
            return Err(Error::Config("placement.checkpoint_interval must be positive".into()));
        }
        if self.placement.max_region_volume == 0 {
            return Err(Error::Config("placement.max_region_volume must be positive".into()));
        }
        if self.batch_gap < 0 {
            return Err(Error::Config("batch_gap must not be negative".into()));
        }
        Ok(())
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| app_dir().join("builds"))
    }

    pub fn socket_path(&self) -> PathBuf {
        self.socket.clone().unwrap_or_else(default_socket_path)
    }

    pub fn server_context(&self) -> ServerContext {
        ServerContext::new(self.server_version.clone())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn app_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(APP_DIR)
}

pub fn default_socket_path() -> PathBuf {
    app_dir().join("target.sock")
}
