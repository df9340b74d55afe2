use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::atomic::{AtomicWriter, WriteOptions};
use crate::error::{AuditError, Result};

/// Discovery file telling local tools which port the running server took.
/// May be stale after a crash; readers confirm with `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryMarker {
    pub port: u16,
    pub pid: u32,
    /// ISO-8601 local time.
    pub started: String,
}

impl DiscoveryMarker {
    pub fn for_current_process(port: u16) -> Self {
        Self {
            port,
            pid: std::process::id(),
            started: chrono::Local::now().to_rfc3339(),
        }
    }

    pub fn read(path: &Path) -> Option<Self> {
        let raw = fs::read_to_string(path).ok()?;
        serde_json::from_str(&raw).ok()
    }
}

/// Owns a written marker file and removes it on Drop.
pub(crate) struct MarkerGuard {
    path: PathBuf,
}

impl MarkerGuard {
    pub(crate) fn write(path: &Path, marker: &DiscoveryMarker) -> Result<Self> {
        let json =
            serde_json::to_string_pretty(marker).map_err(|e| AuditError::Parse(e.to_string()))?;
        AtomicWriter::new(WriteOptions::fast()).write_bytes(path, json.as_bytes())?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for MarkerGuard {
    fn drop(&mut self) {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to remove discovery marker")
            }
        }
    }
}
