//! Artifact store: one derived-JSON record per audited asset under a fixed audit root.
//!
//! `<audit_root>/<identity minus namespace>.json`, e.g. `/Game/UI/WBP_Menu` ->
//! `<audit_root>/UI/WBP_Menu.json`.

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::atomic::{AtomicWriter, WriteOptions};
use crate::error::{AuditError, Result};
use crate::hasher::SourceFingerprint;
use crate::identity::{AssetIdentity, Namespace};
use crate::summary::SummaryDocument;

/// Bump when the summary shape changes; every stored record becomes stale.
pub const AUDIT_SCHEMA_VERSION: u32 = 2;

const RECORD_EXTENSION: &str = "json";
// NamedTempFile's default prefix
const TEMP_PREFIX: &str = ".tmp";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRecord {
    pub schema_version: u32,
    pub source_fingerprint: SourceFingerprint,
    pub summary: SummaryDocument,
}

impl ArtifactRecord {
    pub fn new(schema_version: u32, source_fingerprint: SourceFingerprint, summary: SummaryDocument) -> Self {
        Self {
            schema_version,
            source_fingerprint,
            summary,
        }
    }

    pub fn ensure_schema(&self, current: u32) -> Result<()> {
        if self.schema_version != current {
            return Err(AuditError::SchemaStale {
                stored: self.schema_version,
                current,
            });
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| AuditError::Parse(e.to_string()))
    }
}

pub struct ArtifactStore {
    root: PathBuf,
    namespace: Namespace,
    writer: AtomicWriter,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>, namespace: Namespace) -> Self {
        Self {
            root: root.into(),
            namespace,
            writer: AtomicWriter::new(WriteOptions::default()),
        }
    }

    pub fn with_write_options(mut self, options: WriteOptions) -> Self {
        self.writer = AtomicWriter::new(options);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Record location for `identity`; `None` outside the namespace, which never has records.
    pub fn output_path(&self, identity: &AssetIdentity) -> Option<PathBuf> {
        let rel = self.namespace.relative(identity)?;
        let mut path = self.root.clone();
        for seg in rel.split('/') {
            path.push(seg);
        }
        // push rather than set_extension: asset names may contain dots
        let mut name: OsString = path.into_os_string();
        name.push(".");
        name.push(RECORD_EXTENSION);
        Some(PathBuf::from(name))
    }

    /// [`ArtifactStore::output_path`], with foreign identities as an error.
    pub fn record_path(&self, identity: &AssetIdentity) -> Result<PathBuf> {
        self.output_path(identity)
            .ok_or_else(|| AuditError::OutsideNamespace {
                identity: identity.to_string(),
                namespace: self.namespace.root().to_string(),
            })
    }

    /// Inverse of [`ArtifactStore::output_path`] for in-namespace records.
    pub fn identity_for_path(&self, path: &Path) -> Option<AssetIdentity> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let file_name = rel.file_name()?.to_str()?;
        let stem = file_name.strip_suffix(&format!(".{RECORD_EXTENSION}"))?;
        if stem.is_empty() {
            return None;
        }
        let mut segments = Vec::new();
        if let Some(parent) = rel.parent() {
            for component in parent.components() {
                match component {
                    Component::Normal(seg) => segments.push(seg.to_str()?),
                    _ => return None,
                }
            }
        }
        segments.push(stem);
        self.namespace.join(&segments.join("/")).ok()
    }

    /// Absent, unreadable or corrupt records all read as `None`.
    pub fn read(&self, path: &Path) -> Option<ArtifactRecord> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable artifact record");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "corrupt artifact record treated as absent");
                None
            }
        }
    }

    pub fn write(&self, record: &ArtifactRecord, path: &Path) -> Result<()> {
        let json = record.to_json()?;
        self.writer.write_bytes(path, json.as_bytes())?;
        Ok(())
    }

    /// Idempotent: `Ok(false)` when there was nothing to delete.
    pub fn delete(&self, path: &Path) -> Result<bool> {
        match fs::remove_file(path) {
            Ok(()) => {
                self.prune_empty_dirs(path);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(AuditError::io(path, e)),
        }
    }

    /// Every record file under the root, in path order. In-flight temp files are skipped;
    /// any other stray `.json` is listed so the sweep can remove it.
    pub fn list_records(&self) -> Vec<PathBuf> {
        if !self.root.is_dir() {
            return Vec::new();
        }
        let mut records: Vec<PathBuf> = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                let name = entry.file_name().to_string_lossy();
                !name.starts_with(TEMP_PREFIX) && name.ends_with(&format!(".{RECORD_EXTENSION}"))
            })
            .map(|entry| entry.into_path())
            .collect();
        records.sort();
        records
    }

    fn prune_empty_dirs(&self, removed: &Path) {
        let mut dir = removed.parent();
        while let Some(current) = dir {
            if current == self.root || !current.starts_with(&self.root) {
                break;
            }
            // fails (and stops) as soon as a directory still has entries
            if fs::remove_dir(current).is_err() {
                break;
            }
            dir = current.parent();
        }
    }
}
