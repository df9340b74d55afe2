//! Incremental audit cache: fingerprint-based staleness, re-derivation and orphan sweeping.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::artifact::{ArtifactRecord, ArtifactStore, AUDIT_SCHEMA_VERSION};
use crate::error::{AuditError, Result};
use crate::hasher::hash_file;
use crate::identity::{AssetIdentity, Namespace};
use crate::lock::RootLockGuard;
use crate::registry::{AssetRegistry, KindFilter};
use crate::summary::GraphSummarizer;

pub const DEFAULT_RELEASE_INTERVAL: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    NoRecord,
    SchemaChanged,
    FingerprintChanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Staleness {
    UpToDate,
    Stale(StaleReason),
    /// Source bytes could not be resolved or read.
    Missing,
    /// Outside the audited namespace; such assets never get a record.
    Excluded,
}

impl Staleness {
    pub fn label(&self) -> &'static str {
        match self {
            Staleness::UpToDate => "up-to-date",
            Staleness::Stale(StaleReason::NoRecord) => "stale (no record)",
            Staleness::Stale(StaleReason::SchemaChanged) => "stale (schema changed)",
            Staleness::Stale(StaleReason::FingerprintChanged) => "stale (source changed)",
            Staleness::Missing => "missing",
            Staleness::Excluded => "outside namespace",
        }
    }
}

impl fmt::Display for Staleness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditFailure {
    pub asset: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub scanned: usize,
    pub up_to_date: usize,
    pub reaudited: usize,
    pub failed: usize,
    pub failures: Vec<AuditFailure>,
    /// Stopped early by the cancel flag; records written so far are valid.
    pub interrupted: bool,
    pub elapsed_ms: u64,
}

pub struct IncrementalAuditCache {
    registry: Arc<dyn AssetRegistry>,
    summarizer: Arc<dyn GraphSummarizer>,
    store: ArtifactStore,
    schema_version: u32,
    release_interval: usize,
    in_flight: Mutex<HashMap<AssetIdentity, Arc<Mutex<()>>>>,
    cancel: Arc<AtomicBool>,
    startup_claimed: AtomicBool,
}

impl IncrementalAuditCache {
    pub fn new(
        registry: Arc<dyn AssetRegistry>,
        summarizer: Arc<dyn GraphSummarizer>,
        store: ArtifactStore,
    ) -> Self {
        Self {
            registry,
            summarizer,
            store,
            schema_version: AUDIT_SCHEMA_VERSION,
            release_interval: DEFAULT_RELEASE_INTERVAL,
            in_flight: Mutex::new(HashMap::new()),
            cancel: Arc::new(AtomicBool::new(false)),
            startup_claimed: AtomicBool::new(false),
        }
    }

    pub fn with_schema_version(mut self, version: u32) -> Self {
        self.schema_version = version;
        self
    }

    /// 0 disables the periodic release.
    pub fn with_release_interval(mut self, interval: usize) -> Self {
        self.release_interval = interval;
        self
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn namespace(&self) -> &Namespace {
        self.store.namespace()
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn registry(&self) -> &Arc<dyn AssetRegistry> {
        &self.registry
    }

    /// Setting the flag stops a running batch before its next asset.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// `true` exactly once per cache; every startup sweep over this cache races for it.
    pub fn claim_startup(&self) -> bool {
        !self.startup_claimed.swap(true, Ordering::SeqCst)
    }

    pub fn output_path(&self, identity: &AssetIdentity) -> Option<PathBuf> {
        self.store.output_path(identity)
    }

    pub fn check_staleness(&self, identity: &AssetIdentity) -> Staleness {
        let Some(record_path) = self.store.output_path(identity) else {
            return Staleness::Excluded;
        };
        let Some(source) = self.registry.source_path(identity) else {
            return Staleness::Missing;
        };
        let fingerprint = match hash_file(&source) {
            Ok(fp) => fp,
            Err(e) => {
                tracing::debug!(asset = %identity, error = %e, "source not hashable");
                return Staleness::Missing;
            }
        };
        let Some(record) = self.store.read(&record_path) else {
            return Staleness::Stale(StaleReason::NoRecord);
        };
        if let Err(e) = record.ensure_schema(self.schema_version) {
            tracing::debug!(asset = %identity, error = %e, "record invalidated");
            return Staleness::Stale(StaleReason::SchemaChanged);
        }
        if record.source_fingerprint != fingerprint {
            return Staleness::Stale(StaleReason::FingerprintChanged);
        }
        Staleness::UpToDate
    }

    /// Re-derive and overwrite the record for `identity`. On failure any prior record is left as is.
    /// Identities outside the namespace are rejected before anything is loaded.
    pub fn audit_one(&self, identity: &AssetIdentity) -> Result<ArtifactRecord> {
        let slot = self.identity_slot(identity);
        let result = {
            let _held = slot.lock().unwrap_or_else(|e| e.into_inner());
            self.derive_and_write(identity)
        };
        drop(slot);
        self.release_slot(identity);
        result
    }

    fn derive_and_write(&self, identity: &AssetIdentity) -> Result<ArtifactRecord> {
        let record_path = self.store.record_path(identity)?;
        let record = self.derive_record(identity)?;
        self.store.write(&record, &record_path)?;
        tracing::debug!(asset = %identity, "audited");
        Ok(record)
    }

    /// Fingerprint, load and summarize `identity` without persisting anything.
    pub fn derive_record(&self, identity: &AssetIdentity) -> Result<ArtifactRecord> {
        let source = self
            .registry
            .source_path(identity)
            .ok_or_else(|| AuditError::NotFound(identity.to_string()))?;
        // hash before load: a concurrent edit leaves an older fingerprint, so the next check re-audits
        let fingerprint = hash_file(&source)?;
        let summary = {
            let asset = self.registry.load(identity)?;
            self.summarizer.summarize(&asset)?
        };
        Ok(ArtifactRecord::new(self.schema_version, fingerprint, summary))
    }

    /// Delete the record for `identity`, if any. Identities outside the namespace are an error.
    pub fn delete_record(&self, identity: &AssetIdentity) -> Result<bool> {
        let slot = self.identity_slot(identity);
        let result = {
            let _held = slot.lock().unwrap_or_else(|e| e.into_inner());
            self.store
                .record_path(identity)
                .and_then(|path| self.store.delete(&path))
        };
        drop(slot);
        self.release_slot(identity);
        result
    }

    pub fn audit_stale_assets<I>(&self, candidates: I) -> AuditReport
    where
        I: IntoIterator<Item = AssetIdentity>,
    {
        self.run_batch(candidates, false)
    }

    /// Audit every graph asset the registry knows; `force` re-derives even up-to-date records.
    pub fn audit_all(&self, force: bool) -> AuditReport {
        let candidates = self.registry.enumerate(KindFilter::GraphAssets);
        self.run_batch(candidates, force)
    }

    fn run_batch<I>(&self, candidates: I, force: bool) -> AuditReport
    where
        I: IntoIterator<Item = AssetIdentity>,
    {
        let start = Instant::now();
        let _lock = match RootLockGuard::acquire(self.store.root()) {
            Ok(guard) => Some(guard),
            Err(e) => {
                tracing::warn!(error = %e, "audit root lock unavailable, continuing unlocked");
                None
            }
        };

        let mut report = AuditReport::default();
        for identity in candidates {
            if self.cancel.load(Ordering::SeqCst) {
                report.interrupted = true;
                break;
            }
            if !self.namespace().contains(&identity) {
                continue;
            }
            report.scanned += 1;

            let staleness = self.check_staleness(&identity);
            if staleness == Staleness::UpToDate && !force {
                tracing::debug!(asset = %identity, "up to date");
                report.up_to_date += 1;
                continue;
            }

            match self.audit_one(&identity) {
                Ok(_) => {
                    report.reaudited += 1;
                    if self.release_interval > 0 && report.reaudited % self.release_interval == 0 {
                        self.registry.release_transient();
                        tracing::info!(
                            reaudited = report.reaudited,
                            scanned = report.scanned,
                            "audit progress"
                        );
                    }
                }
                Err(e) => {
                    tracing::warn!(asset = %identity, error = %e, "audit failed");
                    report.failed += 1;
                    report.failures.push(AuditFailure {
                        asset: identity.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        report.elapsed_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            scanned = report.scanned,
            up_to_date = report.up_to_date,
            reaudited = report.reaudited,
            failed = report.failed,
            interrupted = report.interrupted,
            elapsed_ms = report.elapsed_ms,
            "audit pass complete"
        );
        report
    }

    /// Delete every record whose asset no longer exists. Refuses to run while the registry is
    /// still loading, since unscanned assets would look orphaned.
    pub fn sweep_orphans(&self) -> Result<usize> {
        if self.registry.is_still_loading() {
            return Err(AuditError::RegistryLoading);
        }
        let _lock = RootLockGuard::acquire(self.store.root())?;

        let mut swept = 0;
        for path in self.store.list_records() {
            let live = match self.store.identity_for_path(&path) {
                Some(identity) => self.registry.resolve_exists(&identity),
                None => false,
            };
            if live {
                continue;
            }
            match self.store.delete(&path) {
                Ok(true) => {
                    tracing::debug!(path = %path.display(), "swept orphan");
                    swept += 1;
                }
                Ok(false) => {}
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to sweep orphan"),
            }
        }
        tracing::info!(swept, "orphan sweep complete");
        Ok(swept)
    }

    fn identity_slot(&self, identity: &AssetIdentity) -> Arc<Mutex<()>> {
        let mut slots = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(slots.entry(identity.clone()).or_default())
    }

    fn release_slot(&self, identity: &AssetIdentity) {
        let mut slots = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = slots.get(identity) {
            if Arc::strong_count(slot) == 1 {
                slots.remove(identity);
            }
        }
    }
}
