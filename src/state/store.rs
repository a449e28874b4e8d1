//! File-per-build storage
//!
//! `<dir>/<build_id>.json` holds `{"crc32": .., "state": {..}}`; the checksum
//! covers the compact JSON of `state`. Writes go to a temp file and are renamed
//! into place.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::BuildState;
use crate::error::{Error, Result};

#[derive(Serialize, Deserialize)]
struct Envelope {
    crc32: u32,
    state: Value,
}

#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, build_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", build_id))
    }

    pub fn save(&self, state: &BuildState) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let value = serde_json::to_value(state)?;
        let body = serde_json::to_vec(&value)?;
        let envelope = Envelope {
            crc32: crc32fast::hash(&body),
            state: value,
        };
        let path = self.path_for(&state.build_id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&envelope)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn load(&self, build_id: &str) -> Result<Option<BuildState>> {
        let path = self.path_for(build_id);
        if !path.exists() {
            return Ok(None);
        }
        Self::read(&path).map(Some)
    }

    fn read(path: &Path) -> Result<BuildState> {
        let raw = fs::read(path)?;
        let envelope: Envelope = serde_json::from_slice(&raw)
            .map_err(|e| Error::CorruptState(format!("{}: {}", path.display(), e)))?;
        let body = serde_json::to_vec(&envelope.state)?;
        let actual = crc32fast::hash(&body);
        if actual != envelope.crc32 {
            return Err(Error::CorruptState(format!(
                "{}: crc {:#010x} does not match recorded {:#010x}",
                path.display(),
                actual,
                envelope.crc32
            )));
        }
        serde_json::from_value(envelope.state)
            .map_err(|e| Error::CorruptState(format!("{}: {}", path.display(), e)))
    }

    /// Every readable record, ordered by build id. Unreadable records are skipped.
    pub fn load_all(&self) -> Result<Vec<BuildState>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut states = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read(&path) {
                Ok(state) => states.push(state),
                Err(e) => warn!(error = %e, "skipping unreadable build record"),
            }
        }
        states.sort_by(|a, b| a.build_id.cmp(&b.build_id));
        Ok(states)
    }

    pub fn remove(&self, build_id: &str) -> Result<()> {
        let path = self.path_for(build_id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        Ok(())
    }
}
