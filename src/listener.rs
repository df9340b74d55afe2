//! Drives single-asset cache updates from registry change events, plus the one-shot startup sweep.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::asset::AssetKind;
use crate::cache::{AuditReport, IncrementalAuditCache};
use crate::identity::AssetIdentity;
use crate::registry::{AssetEvent, SubscriptionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NonInteractive,
    OutsideNamespace,
    NotAuditedKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerOutcome {
    Audited(AssetIdentity),
    Deleted {
        identity: AssetIdentity,
        existed: bool,
    },
    Skipped(SkipReason),
    Failed {
        identity: AssetIdentity,
        reason: String,
    },
}

pub struct ChangeListener {
    cache: Arc<IncrementalAuditCache>,
    subscription: Mutex<Option<SubscriptionId>>,
}

impl ChangeListener {
    pub fn new(cache: Arc<IncrementalAuditCache>) -> Self {
        Self {
            cache,
            subscription: Mutex::new(None),
        }
    }

    /// A save always re-derives: no fingerprint check first.
    pub fn on_asset_saved(&self, identity: &AssetIdentity, interactive: bool) -> ListenerOutcome {
        if !interactive {
            return ListenerOutcome::Skipped(SkipReason::NonInteractive);
        }
        if !self.cache.namespace().contains(identity) {
            return ListenerOutcome::Skipped(SkipReason::OutsideNamespace);
        }
        let audited_kind = self
            .cache
            .registry()
            .kind_of(identity)
            .is_some_and(|kind| kind.is_graph_asset());
        if !audited_kind {
            return ListenerOutcome::Skipped(SkipReason::NotAuditedKind);
        }

        match self.cache.audit_one(identity) {
            Ok(_) => {
                tracing::info!(asset = %identity, "re-audited on save");
                ListenerOutcome::Audited(identity.clone())
            }
            Err(e) => {
                tracing::warn!(asset = %identity, error = %e, "audit on save failed");
                ListenerOutcome::Failed {
                    identity: identity.clone(),
                    reason: e.to_string(),
                }
            }
        }
    }

    pub fn on_asset_removed(&self, identity: &AssetIdentity, kind: &AssetKind) -> ListenerOutcome {
        if !self.cache.namespace().contains(identity) {
            return ListenerOutcome::Skipped(SkipReason::OutsideNamespace);
        }
        if !kind.is_graph_asset() {
            return ListenerOutcome::Skipped(SkipReason::NotAuditedKind);
        }
        self.delete(identity)
    }

    /// Only the old record is deleted. The new identity gets its record on the next save or
    /// startup sweep; until then it has none.
    pub fn on_asset_renamed(
        &self,
        old: &AssetIdentity,
        new: &AssetIdentity,
        kind: &AssetKind,
    ) -> ListenerOutcome {
        if !kind.is_graph_asset() {
            return ListenerOutcome::Skipped(SkipReason::NotAuditedKind);
        }
        if !self.cache.namespace().contains(old) {
            return ListenerOutcome::Skipped(SkipReason::OutsideNamespace);
        }
        tracing::debug!(old = %old, new = %new, "asset renamed");
        self.delete(old)
    }

    fn delete(&self, identity: &AssetIdentity) -> ListenerOutcome {
        match self.cache.delete_record(identity) {
            Ok(existed) => {
                if existed {
                    tracing::info!(asset = %identity, "deleted audit record");
                }
                ListenerOutcome::Deleted {
                    identity: identity.clone(),
                    existed,
                }
            }
            Err(e) => {
                tracing::warn!(asset = %identity, error = %e, "failed to delete audit record");
                ListenerOutcome::Failed {
                    identity: identity.clone(),
                    reason: e.to_string(),
                }
            }
        }
    }

    pub fn handle(&self, event: &AssetEvent) -> ListenerOutcome {
        match event {
            AssetEvent::Saved {
                identity,
                interactive,
            } => self.on_asset_saved(identity, *interactive),
            AssetEvent::Removed { identity, kind } => self.on_asset_removed(identity, kind),
            AssetEvent::Renamed { old, new, kind } => self.on_asset_renamed(old, new, kind),
        }
    }

    /// Subscribe to the registry. Events queue on the returned receiver until [`ChangeListener::run`] drains them.
    pub fn attach(&self) -> Receiver<AssetEvent> {
        let (tx, rx) = mpsc::channel();
        let id = self.cache.registry().subscribe(tx);
        let previous = self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(id);
        if let Some(previous) = previous {
            self.cache.registry().unsubscribe(previous);
        }
        rx
    }

    pub fn detach(&self) {
        let current = self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(id) = current {
            self.cache.registry().unsubscribe(id);
        }
    }

    /// Handle events until `shutdown` is set or every sender is gone. Returns the number handled.
    pub fn run(&self, events: &Receiver<AssetEvent>, shutdown: &AtomicBool, poll: Duration) -> usize {
        let mut handled = 0;
        while !shutdown.load(Ordering::SeqCst) {
            match events.recv_timeout(poll) {
                Ok(event) => {
                    self.handle(&event);
                    handled += 1;
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        handled
    }
}

impl Drop for ChangeListener {
    fn drop(&mut self) {
        self.detach();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupReport {
    pub audit: AuditReport,
    /// `None` when the sweep was skipped (interrupted batch) or failed.
    pub swept: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepPoll {
    /// Registry still loading; poll again later.
    Pending,
    Completed(StartupReport),
    /// Already ran.
    Inactive,
}

/// Full stale pass plus orphan sweep, run once the registry reports it has finished loading.
/// Waits indefinitely if it never does.
///
/// The once-only claim lives on the cache, so several sweeps over one cache still run a single
/// pass between them; the losers report [`SweepPoll::Inactive`].
pub struct StartupSweep {
    cache: Arc<IncrementalAuditCache>,
    done: AtomicBool,
}

impl StartupSweep {
    pub fn new(cache: Arc<IncrementalAuditCache>) -> Self {
        Self {
            cache,
            done: AtomicBool::new(false),
        }
    }

    pub fn is_active(&self) -> bool {
        !self.done.load(Ordering::SeqCst)
    }

    pub fn poll(&self) -> SweepPoll {
        if !self.is_active() {
            return SweepPoll::Inactive;
        }
        if self.cache.registry().is_still_loading() {
            return SweepPoll::Pending;
        }
        if self.done.swap(true, Ordering::SeqCst) || !self.cache.claim_startup() {
            return SweepPoll::Inactive;
        }

        tracing::info!("registry ready, running startup audit");
        let audit = self.cache.audit_all(false);
        let swept = if audit.interrupted {
            None
        } else {
            match self.cache.sweep_orphans() {
                Ok(n) => Some(n),
                Err(e) => {
                    tracing::warn!(error = %e, "startup sweep failed");
                    None
                }
            }
        };
        SweepPoll::Completed(StartupReport { audit, swept })
    }

    /// Poll every `interval` until the sweep completes or `shutdown` is set.
    pub fn run_blocking(&self, interval: Duration, shutdown: &AtomicBool) -> Option<StartupReport> {
        loop {
            if shutdown.load(Ordering::SeqCst) {
                return None;
            }
            match self.poll() {
                SweepPoll::Pending => std::thread::sleep(interval),
                SweepPoll::Completed(report) => return Some(report),
                SweepPoll::Inactive => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::ArtifactStore;
    use crate::asset::LoadedAsset;
    use crate::atomic::WriteOptions;
    use crate::identity::Namespace;
    use crate::registry::{AssetRegistry, MemoryRegistry};
    use crate::summary::BlueprintSummarizer;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn id(raw: &str) -> AssetIdentity {
        AssetIdentity::parse(raw).unwrap()
    }

    struct Fixture {
        tmp: TempDir,
        registry: Arc<MemoryRegistry>,
        cache: Arc<IncrementalAuditCache>,
    }

    impl Fixture {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let registry = Arc::new(MemoryRegistry::new());
            let store = ArtifactStore::new(tmp.path().join("Audit"), Namespace::default())
                .with_write_options(WriteOptions::fast());
            let cache = Arc::new(IncrementalAuditCache::new(
                registry.clone(),
                Arc::new(BlueprintSummarizer),
                store,
            ));
            Self {
                tmp,
                registry,
                cache,
            }
        }

        fn add(&self, raw: &str, kind: AssetKind) -> AssetIdentity {
            let identity = id(raw);
            let source: PathBuf = self.tmp.path().join(format!("{}.asset", identity.name()));
            fs::write(&source, raw).unwrap();
            self.registry
                .add_asset(LoadedAsset::new(identity.clone(), kind), Some(source))
                .unwrap();
            identity
        }

        fn record_exists(&self, identity: &AssetIdentity) -> bool {
            self.cache.output_path(identity).is_some_and(|p| p.exists())
        }
    }

    #[test]
    fn interactive_save_audits_unconditionally() {
        let fx = Fixture::new();
        let a = fx.add("/Game/A", AssetKind::Blueprint);
        let listener = ChangeListener::new(fx.cache.clone());

        assert_eq!(listener.on_asset_saved(&a, true), ListenerOutcome::Audited(a.clone()));
        // already up to date, still re-derived
        assert_eq!(listener.on_asset_saved(&a, true), ListenerOutcome::Audited(a.clone()));
        assert!(fx.record_exists(&a));
    }

    #[test]
    fn save_filters() {
        let fx = Fixture::new();
        let a = fx.add("/Game/A", AssetKind::Blueprint);
        let outside = fx.add("/Engine/B", AssetKind::Blueprint);
        let texture = fx.add("/Game/T", AssetKind::Other("Texture2D".into()));
        let listener = ChangeListener::new(fx.cache.clone());

        assert_eq!(
            listener.on_asset_saved(&a, false),
            ListenerOutcome::Skipped(SkipReason::NonInteractive)
        );
        assert_eq!(
            listener.on_asset_saved(&outside, true),
            ListenerOutcome::Skipped(SkipReason::OutsideNamespace)
        );
        assert_eq!(
            listener.on_asset_saved(&texture, true),
            ListenerOutcome::Skipped(SkipReason::NotAuditedKind)
        );
        assert!(!fx.record_exists(&a));
    }

    #[test]
    fn removal_deletes_record() {
        let fx = Fixture::new();
        let a = fx.add("/Game/A", AssetKind::Blueprint);
        let listener = ChangeListener::new(fx.cache.clone());
        listener.on_asset_saved(&a, true);

        assert_eq!(
            listener.on_asset_removed(&a, &AssetKind::Other("Texture2D".into())),
            ListenerOutcome::Skipped(SkipReason::NotAuditedKind)
        );
        assert!(fx.record_exists(&a));
        assert_eq!(
            listener.on_asset_removed(&a, &AssetKind::Blueprint),
            ListenerOutcome::Deleted {
                identity: a.clone(),
                existed: true
            }
        );
        assert!(!fx.record_exists(&a));
    }

    // Known boundary: after a rename the new identity has no record until its next save or
    // the startup sweep.
    #[test]
    fn rename_deletes_old_record_without_creating_new_one() {
        let fx = Fixture::new();
        let old = fx.add("/Game/Old", AssetKind::Blueprint);
        let listener = ChangeListener::new(fx.cache.clone());
        listener.on_asset_saved(&old, true);

        let new = id("/Game/New");
        fx.registry.rename(&old, new.clone());
        let outcome = listener.on_asset_renamed(&old, &new, &AssetKind::Blueprint);
        assert!(matches!(outcome, ListenerOutcome::Deleted { existed: true, .. }));
        assert!(!fx.record_exists(&old));
        assert!(!fx.record_exists(&new));

        assert_eq!(listener.on_asset_saved(&new, true), ListenerOutcome::Audited(new.clone()));
        assert!(fx.record_exists(&new));
    }

    #[test]
    fn attached_listener_drains_registry_events() {
        let fx = Fixture::new();
        let a = fx.add("/Game/A", AssetKind::Blueprint);
        let listener = ChangeListener::new(fx.cache.clone());
        let rx = listener.attach();

        fx.registry.mark_saved(&a, true);
        fx.registry.remove(&a);
        listener.detach();

        // detaching drops the registry's sender, so run returns once the queue is drained
        let shutdown = AtomicBool::new(false);
        assert_eq!(listener.run(&rx, &shutdown, Duration::from_millis(10)), 2);
        assert!(!fx.record_exists(&a));
    }

    #[test]
    fn startup_sweep_waits_for_registry_then_runs_once() {
        let fx = Fixture::new();
        let a = fx.add("/Game/A", AssetKind::Blueprint);
        let gone = fx.add("/Game/Gone", AssetKind::Blueprint);
        fx.cache.audit_one(&gone).unwrap();
        fx.registry.remove(&gone);
        fx.registry.set_loading(true);

        let sweep = StartupSweep::new(fx.cache.clone());
        assert_eq!(sweep.poll(), SweepPoll::Pending);
        assert!(sweep.is_active());

        fx.registry.set_loading(false);
        match sweep.poll() {
            SweepPoll::Completed(report) => {
                assert_eq!(report.audit.reaudited, 1);
                assert_eq!(report.swept, Some(1));
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert!(fx.record_exists(&a));
        assert!(!fx.record_exists(&gone));
        assert_eq!(sweep.poll(), SweepPoll::Inactive);
        assert!(!fx.registry.is_still_loading());
    }

    #[test]
    fn run_blocking_honours_shutdown() {
        let fx = Fixture::new();
        fx.registry.set_loading(true);
        let sweep = StartupSweep::new(fx.cache.clone());
        let shutdown = AtomicBool::new(true);
        assert_eq!(sweep.run_blocking(Duration::from_millis(1), &shutdown), None);
        assert!(sweep.is_active());
    }

    #[test]
    fn second_sweep_over_same_cache_stays_inactive() {
        let fx = Fixture::new();
        fx.add("/Game/A", AssetKind::Blueprint);
        let first = StartupSweep::new(fx.cache.clone());
        let second = StartupSweep::new(fx.cache.clone());

        assert!(matches!(first.poll(), SweepPoll::Completed(_)));
        assert_eq!(second.poll(), SweepPoll::Inactive);
        assert!(!second.is_active());

        // a fresh cache gets its own pass
        let other = Fixture::new();
        assert!(matches!(
            StartupSweep::new(other.cache.clone()).poll(),
            SweepPoll::Completed(_)
        ));
    }
}
