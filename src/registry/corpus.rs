// Filesystem-backed registry: one JSON asset document per `<rel>.<ext>` file under a content root.
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use walkdir::WalkDir;

use super::{
    AssetEvent, AssetRegistry, CategoryMask, DependencyEdge, KindFilter, SubscriptionId,
    Subscribers,
};
use crate::asset::{AssetKind, LoadedAsset};
use crate::error::{AuditError, Result};
use crate::identity::{AssetIdentity, Namespace};

pub const DEFAULT_ASSET_EXTENSION: &str = "asset";

/// The slice of an asset document the index needs; the rest is read on load.
#[derive(Deserialize)]
struct AssetHeader {
    #[serde(default)]
    kind: AssetKind,
    #[serde(default)]
    dependencies: Vec<DependencyEdge>,
}

struct IndexedAsset {
    kind: AssetKind,
    path: PathBuf,
    dependencies: Vec<DependencyEdge>,
}

type Index = BTreeMap<AssetIdentity, IndexedAsset>;

/// Paths changed while a scan walks the corpus; replayed onto the fresh index before it is swapped in.
#[derive(Default)]
struct ScanJournal {
    active: usize,
    touched: Vec<PathBuf>,
}

pub struct FsRegistry {
    content_root: PathBuf,
    namespace: Namespace,
    extension: String,
    index: RwLock<Index>,
    journal: Mutex<ScanJournal>,
    loading: AtomicBool,
    subscribers: Subscribers,
}

impl FsRegistry {
    /// Registry over `content_root`; reports loading until [`FsRegistry::scan`] completes.
    pub fn new(content_root: impl Into<PathBuf>, namespace: Namespace, extension: &str) -> Self {
        Self {
            content_root: content_root.into(),
            namespace,
            extension: extension.trim_start_matches('.').to_string(),
            index: RwLock::new(BTreeMap::new()),
            journal: Mutex::new(ScanJournal::default()),
            loading: AtomicBool::new(true),
            subscribers: Subscribers::default(),
        }
    }

    pub fn content_root(&self) -> &Path {
        &self.content_root
    }

    /// Rebuild the index from disk. Returns the number of indexed assets.
    ///
    /// Changes applied through [`FsRegistry::refresh_path`] or [`FsRegistry::apply_rename`] while
    /// the walk runs survive the swap.
    pub fn scan(&self) -> Result<usize> {
        self.loading.store(true, Ordering::SeqCst);
        let start = Instant::now();

        self.begin_scan();
        let fresh = if self.content_root.is_dir() {
            self.collect_under(&self.content_root)
        } else {
            tracing::warn!(root = %self.content_root.display(), "content root does not exist");
            BTreeMap::new()
        };
        let count = self.finish_scan(fresh);

        self.loading.store(false, Ordering::SeqCst);
        tracing::info!(
            assets = count,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "corpus scan complete"
        );
        Ok(count)
    }

    fn begin_scan(&self) {
        self.journal.lock().unwrap_or_else(|e| e.into_inner()).active += 1;
    }

    fn finish_scan(&self, mut fresh: Index) -> usize {
        // lock order: index, then journal
        let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());
        let mut journal = self.journal.lock().unwrap_or_else(|e| e.into_inner());
        for path in &journal.touched {
            // already published when the change first landed
            self.reconcile(&mut fresh, path);
        }
        if !journal.touched.is_empty() {
            tracing::debug!(paths = journal.touched.len(), "replayed changes onto fresh index");
        }
        journal.active = journal.active.saturating_sub(1);
        if journal.active == 0 {
            journal.touched.clear();
        }
        let count = fresh.len();
        *index = fresh;
        count
    }

    fn record_touched(&self, paths: &[&Path]) {
        let mut journal = self.journal.lock().unwrap_or_else(|e| e.into_inner());
        if journal.active > 0 {
            journal.touched.extend(paths.iter().map(|p| p.to_path_buf()));
        }
    }

    /// Every asset file under `dir`, keyed by identity.
    fn collect_under(&self, dir: &Path) -> Index {
        let mut found = BTreeMap::new();
        for entry in WalkDir::new(dir).follow_links(false) {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(error = %e, "corpus scan: skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(identity) = self.identity_for_file(entry.path()) else {
                continue;
            };
            found.insert(identity, self.read_header(entry.path()));
        }
        found
    }

    /// Map a file under the content root to the identity it holds, if it is an asset file.
    pub fn identity_for_file(&self, path: &Path) -> Option<AssetIdentity> {
        let rel = path.strip_prefix(&self.content_root).ok()?;
        let file_name = rel.file_name()?.to_str()?;
        let stem = file_name.strip_suffix(&format!(".{}", self.extension))?;
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

    /// Inverse of [`FsRegistry::identity_for_file`].
    pub fn file_for_identity(&self, identity: &AssetIdentity) -> Option<PathBuf> {
        let rel = self.namespace.relative(identity)?;
        let mut path = self.content_root.clone();
        for seg in rel.split('/') {
            path.push(seg);
        }
        let mut name: OsString = path.into_os_string();
        name.push(".");
        name.push(&self.extension);
        Some(PathBuf::from(name))
    }

    fn read_header(&self, path: &Path) -> IndexedAsset {
        let header = fs::read_to_string(path)
            .ok()
            .and_then(|raw| serde_json::from_str::<AssetHeader>(&raw).ok());
        match header {
            Some(h) => IndexedAsset {
                kind: h.kind,
                path: path.to_path_buf(),
                dependencies: h.dependencies,
            },
            None => {
                tracing::warn!(path = %path.display(), "unparsable asset document indexed without dependencies");
                IndexedAsset {
                    kind: AssetKind::default(),
                    path: path.to_path_buf(),
                    dependencies: Vec::new(),
                }
            }
        }
    }

    /// Bring `index` in line with what is on disk at `path`, which may be an asset file, a
    /// directory or something that no longer exists.
    fn reconcile(&self, index: &mut Index, path: &Path) -> Vec<AssetEvent> {
        let mut events = Vec::new();

        if path.is_file() {
            if let Some(identity) = self.identity_for_file(path) {
                index.insert(identity.clone(), self.read_header(path));
                events.push(AssetEvent::Saved {
                    identity,
                    interactive: true,
                });
            }
            return events;
        }

        let found = if path.is_dir() {
            self.collect_under(path)
        } else {
            BTreeMap::new()
        };
        let own = self.identity_for_file(path);
        let vanished: Vec<AssetIdentity> = index
            .iter()
            .filter(|(identity, a)| {
                (a.path.starts_with(path) || own.as_ref() == Some(*identity))
                    && !found.contains_key(*identity)
            })
            .map(|(identity, _)| identity.clone())
            .collect();
        for identity in vanished {
            if let Some(removed) = index.remove(&identity) {
                events.push(AssetEvent::Removed {
                    identity,
                    kind: removed.kind,
                });
            }
        }
        for (identity, indexed) in found {
            let known = index
                .get(&identity)
                .is_some_and(|existing| existing.path == indexed.path);
            index.insert(identity.clone(), indexed);
            if !known {
                events.push(AssetEvent::Saved {
                    identity,
                    interactive: true,
                });
            }
        }
        events
    }

    fn publish_all(&self, events: &[AssetEvent]) {
        for event in events {
            self.subscribers.publish(event.clone());
        }
    }

    /// Re-index one changed path (file or directory) and publish what happened under it.
    pub fn refresh_path(&self, path: &Path) -> Vec<AssetEvent> {
        let events = {
            let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());
            let events = self.reconcile(&mut index, path);
            self.record_touched(&[path]);
            events
        };
        self.publish_all(&events);
        events
    }

    /// Apply a move reported as a single rename. A file moved within the corpus becomes one
    /// [`AssetEvent::Renamed`]; directories and moves across the corpus boundary become removals
    /// and saves.
    pub fn apply_rename(&self, from: &Path, to: &Path) -> Vec<AssetEvent> {
        let events = {
            let mut index = self.index.write().unwrap_or_else(|e| e.into_inner());
            let events = match (self.identity_for_file(from), self.identity_for_file(to)) {
                (Some(old), Some(new)) if to.is_file() => {
                    let indexed = self.read_header(to);
                    let kind = indexed.kind.clone();
                    index.remove(&old);
                    index.insert(new.clone(), indexed);
                    vec![AssetEvent::Renamed { old, new, kind }]
                }
                _ => {
                    let mut events = self.reconcile(&mut index, from);
                    events.extend(self.reconcile(&mut index, to));
                    events
                }
            };
            self.record_touched(&[from, to]);
            events
        };
        self.publish_all(&events);
        events
    }

    /// Start turning filesystem notifications under the content root into [`AssetEvent`]s.
    /// Events arriving within `debounce` of each other are coalesced per path.
    pub fn watch(self: &Arc<Self>, debounce: Duration) -> Result<CorpusWatcher> {
        use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};

        let (tx, rx) = mpsc::channel::<notify::Result<Event>>();
        let mut watcher = RecommendedWatcher::new(
            move |res| {
                let _ = tx.send(res);
            },
            Config::default(),
        )
        .map_err(|e| AuditError::Parse(format!("failed to create corpus watcher: {e}")))?;
        watcher
            .watch(&self.content_root, RecursiveMode::Recursive)
            .map_err(|e| {
                AuditError::io(
                    &self.content_root,
                    std::io::Error::new(std::io::ErrorKind::Other, e.to_string()),
                )
            })?;

        let registry = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("corpus-watch".into())
            .spawn(move || pump_events(&registry, &rx, debounce))
            .map_err(|e| AuditError::io(&self.content_root, e))?;

        tracing::info!(
            root = %self.content_root.display(),
            debounce_ms = debounce.as_millis() as u64,
            "watching corpus"
        );
        Ok(CorpusWatcher {
            watcher: Some(watcher),
            handle: Some(handle),
        })
    }
}

fn pump_events(
    registry: &FsRegistry,
    rx: &Receiver<notify::Result<notify::Event>>,
    debounce: Duration,
) {
    loop {
        let Ok(first) = rx.recv() else {
            return;
        };
        let mut batch = vec![first];
        let deadline = Instant::now() + debounce;
        let mut disconnected = false;
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            match rx.recv_timeout(remaining) {
                Ok(ev) => batch.push(ev),
                Err(mpsc::RecvTimeoutError::Timeout) => break,
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }
        apply_batch(registry, batch);
        if disconnected {
            return;
        }
    }
}

fn apply_batch(registry: &FsRegistry, batch: Vec<notify::Result<notify::Event>>) {
    use notify::event::{ModifyKind, RenameMode};
    use notify::EventKind;

    let mut touched = BTreeSet::new();
    for res in batch {
        let event = match res {
            Ok(ev) => ev,
            Err(e) => {
                tracing::warn!(error = %e, "corpus watcher error");
                continue;
            }
        };
        match event.kind {
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
                // renames are applied in arrival order; later writes to the target still coalesce
                touched.remove(&event.paths[0]);
                registry.apply_rename(&event.paths[0], &event.paths[1]);
            }
            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => {
                touched.extend(event.paths);
            }
            _ => {}
        }
    }
    for path in touched {
        registry.refresh_path(&path);
    }
}

/// Keeps the corpus watcher alive; dropping it stops event delivery.
pub struct CorpusWatcher {
    watcher: Option<notify::RecommendedWatcher>,
    handle: Option<JoinHandle<()>>,
}

impl Drop for CorpusWatcher {
    fn drop(&mut self) {
        // dropping the watcher closes the channel, which ends the pump thread
        self.watcher.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl AssetRegistry for FsRegistry {
    fn enumerate(&self, filter: KindFilter) -> Vec<AssetIdentity> {
        let index = self.index.read().unwrap_or_else(|e| e.into_inner());
        index
            .iter()
            .filter(|(_, a)| filter.matches(&a.kind))
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn dependencies(&self, identity: &AssetIdentity, mask: CategoryMask) -> Vec<DependencyEdge> {
        let index = self.index.read().unwrap_or_else(|e| e.into_inner());
        index
            .get(identity)
            .map(|a| {
                a.dependencies
                    .iter()
                    .filter(|edge| mask.contains(edge.category))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn referencers(&self, identity: &AssetIdentity, mask: CategoryMask) -> Vec<DependencyEdge> {
        let index = self.index.read().unwrap_or_else(|e| e.into_inner());
        index
            .iter()
            .flat_map(|(from, a)| {
                a.dependencies
                    .iter()
                    .filter(|edge| edge.package == *identity && mask.contains(edge.category))
                    .map(move |edge| DependencyEdge::new(from.clone(), edge.category, edge.kind))
            })
            .collect()
    }

    fn resolve_exists(&self, identity: &AssetIdentity) -> bool {
        let index = self.index.read().unwrap_or_else(|e| e.into_inner());
        index.contains_key(identity)
    }

    fn is_still_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    fn kind_of(&self, identity: &AssetIdentity) -> Option<AssetKind> {
        let index = self.index.read().unwrap_or_else(|e| e.into_inner());
        index.get(identity).map(|a| a.kind.clone())
    }

    fn source_path(&self, identity: &AssetIdentity) -> Option<PathBuf> {
        let index = self.index.read().unwrap_or_else(|e| e.into_inner());
        index.get(identity).map(|a| a.path.clone())
    }

    fn load(&self, identity: &AssetIdentity) -> Result<LoadedAsset> {
        let path = self
            .source_path(identity)
            .ok_or_else(|| AuditError::NotFound(identity.to_string()))?;
        let raw = fs::read_to_string(&path).map_err(|e| AuditError::Load {
            identity: identity.to_string(),
            reason: e.to_string(),
        })?;
        let mut asset: LoadedAsset = serde_json::from_str(&raw).map_err(|e| AuditError::Load {
            identity: identity.to_string(),
            reason: e.to_string(),
        })?;
        if asset.name.is_empty() {
            asset.name = identity.name().to_string();
        }
        asset.identity = Some(identity.clone());
        Ok(asset)
    }

    fn subscribe(&self, sink: Sender<AssetEvent>) -> SubscriptionId {
        self.subscribers.subscribe(sink)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers.unsubscribe(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn id(raw: &str) -> AssetIdentity {
        AssetIdentity::parse(raw).unwrap()
    }

    fn write_asset(root: &Path, rel: &str, body: &str) -> PathBuf {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, body).unwrap();
        path
    }

    fn corpus() -> (TempDir, FsRegistry) {
        let tmp = TempDir::new().unwrap();
        write_asset(
            tmp.path(),
            "Props/BP_Door.asset",
            r#"{"kind":"Blueprint","dependencies":[{"package":"/Game/Props/BP_Hinge","category":"Package","type":"Hard"}]}"#,
        );
        write_asset(tmp.path(), "Props/BP_Hinge.asset", r#"{"kind":"Blueprint"}"#);
        write_asset(tmp.path(), "Textures/T_Wood.asset", r#"{"kind":"Texture2D"}"#);
        write_asset(tmp.path(), "README.md", "not an asset");
        let registry = FsRegistry::new(tmp.path(), Namespace::default(), DEFAULT_ASSET_EXTENSION);
        (tmp, registry)
    }

    #[test]
    fn loading_until_scan_completes() {
        let (_tmp, registry) = corpus();
        assert!(registry.is_still_loading());
        assert_eq!(registry.scan().unwrap(), 3);
        assert!(!registry.is_still_loading());
    }

    #[test]
    fn scan_indexes_kinds_and_edges() {
        let (_tmp, registry) = corpus();
        registry.scan().unwrap();
        assert_eq!(
            registry.enumerate(KindFilter::GraphAssets),
            vec![id("/Game/Props/BP_Door"), id("/Game/Props/BP_Hinge")]
        );
        assert_eq!(
            registry.referencers(&id("/Game/Props/BP_Hinge"), CategoryMask::ALL),
            vec![DependencyEdge::hard(id("/Game/Props/BP_Door"))]
        );
        assert!(registry.resolve_exists(&id("/Game/Textures/T_Wood")));
    }

    #[test]
    fn identity_file_mapping_round_trips() {
        let (tmp, registry) = corpus();
        let identity = id("/Game/Props/BP_Door");
        let file = registry.file_for_identity(&identity).unwrap();
        assert_eq!(file, tmp.path().join("Props").join("BP_Door.asset"));
        assert_eq!(registry.identity_for_file(&file), Some(identity));
        assert_eq!(registry.identity_for_file(&tmp.path().join("README.md")), None);
        assert_eq!(registry.identity_for_file(Path::new("/elsewhere/X.asset")), None);
    }

    #[test]
    fn load_sets_identity_and_default_name() {
        let (_tmp, registry) = corpus();
        registry.scan().unwrap();
        let asset = registry.load(&id("/Game/Props/BP_Hinge")).unwrap();
        assert_eq!(asset.identity, Some(id("/Game/Props/BP_Hinge")));
        assert_eq!(asset.name, "BP_Hinge");
    }

    #[test]
    fn broken_document_is_indexed_but_fails_to_load() {
        let (tmp, registry) = corpus();
        write_asset(tmp.path(), "Broken/BP_Bad.asset", "{not json");
        registry.scan().unwrap();
        assert!(registry.resolve_exists(&id("/Game/Broken/BP_Bad")));
        assert!(matches!(
            registry.load(&id("/Game/Broken/BP_Bad")),
            Err(AuditError::Load { .. })
        ));
    }

    #[test]
    fn refresh_publishes_saved_then_removed() {
        let (tmp, registry) = corpus();
        registry.scan().unwrap();
        let (tx, rx) = mpsc::channel();
        registry.subscribe(tx);

        let path = write_asset(tmp.path(), "New/BP_Lamp.asset", r#"{"kind":"Blueprint"}"#);
        registry.refresh_path(&path);
        assert_eq!(
            rx.try_recv().unwrap(),
            AssetEvent::Saved {
                identity: id("/Game/New/BP_Lamp"),
                interactive: true
            }
        );

        fs::remove_file(&path).unwrap();
        registry.refresh_path(&path);
        assert_eq!(
            rx.try_recv().unwrap(),
            AssetEvent::Removed {
                identity: id("/Game/New/BP_Lamp"),
                kind: AssetKind::Blueprint
            }
        );
        assert!(registry.refresh_path(&path).is_empty(), "second removal is silent");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn rename_moves_index_entry() {
        let (tmp, registry) = corpus();
        registry.scan().unwrap();
        let from = tmp.path().join("Props/BP_Hinge.asset");
        let to = tmp.path().join("Props/BP_Pivot.asset");
        fs::rename(&from, &to).unwrap();

        let events = registry.apply_rename(&from, &to);
        assert_eq!(
            events,
            vec![AssetEvent::Renamed {
                old: id("/Game/Props/BP_Hinge"),
                new: id("/Game/Props/BP_Pivot"),
                kind: AssetKind::Blueprint
            }]
        );
        assert!(!registry.resolve_exists(&id("/Game/Props/BP_Hinge")));
        assert!(registry.resolve_exists(&id("/Game/Props/BP_Pivot")));
    }

    #[test]
    fn directory_rename_reindexes_everything_under_it() {
        let (tmp, registry) = corpus();
        registry.scan().unwrap();
        let from = tmp.path().join("Props");
        let to = tmp.path().join("Moved");
        fs::rename(&from, &to).unwrap();

        let events = registry.apply_rename(&from, &to);
        assert_eq!(
            events,
            vec![
                AssetEvent::Removed {
                    identity: id("/Game/Props/BP_Door"),
                    kind: AssetKind::Blueprint
                },
                AssetEvent::Removed {
                    identity: id("/Game/Props/BP_Hinge"),
                    kind: AssetKind::Blueprint
                },
                AssetEvent::Saved {
                    identity: id("/Game/Moved/BP_Door"),
                    interactive: true
                },
                AssetEvent::Saved {
                    identity: id("/Game/Moved/BP_Hinge"),
                    interactive: true
                },
            ]
        );
        assert_eq!(
            registry.enumerate(KindFilter::GraphAssets),
            vec![id("/Game/Moved/BP_Door"), id("/Game/Moved/BP_Hinge")]
        );
        assert_eq!(
            registry.source_path(&id("/Game/Moved/BP_Door")),
            Some(to.join("BP_Door.asset"))
        );
    }

    #[test]
    fn removed_directory_drops_its_assets() {
        let (tmp, registry) = corpus();
        registry.scan().unwrap();
        let dir = tmp.path().join("Props");
        fs::remove_dir_all(&dir).unwrap();

        let events = registry.refresh_path(&dir);
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|e| matches!(e, AssetEvent::Removed { .. })));
        assert_eq!(
            registry.enumerate(KindFilter::All),
            vec![id("/Game/Textures/T_Wood")]
        );
    }

    #[test]
    fn changes_during_scan_survive_the_swap() {
        let (tmp, registry) = corpus();
        registry.scan().unwrap();

        registry.begin_scan();
        let fresh = registry.collect_under(tmp.path());
        // the walk saw BP_Hinge; it is deleted before the swap
        let hinge = tmp.path().join("Props/BP_Hinge.asset");
        fs::remove_file(&hinge).unwrap();
        registry.refresh_path(&hinge);
        let lamp = write_asset(tmp.path(), "New/BP_Lamp.asset", r#"{"kind":"Blueprint"}"#);
        registry.refresh_path(&lamp);
        assert_eq!(registry.finish_scan(fresh), 3);

        assert!(!registry.resolve_exists(&id("/Game/Props/BP_Hinge")));
        assert!(registry.resolve_exists(&id("/Game/New/BP_Lamp")));
        assert!(registry.journal.lock().unwrap().touched.is_empty());

        // outside a scan nothing is journaled
        registry.refresh_path(&lamp);
        assert!(registry.journal.lock().unwrap().touched.is_empty());
    }

    #[test]
    fn deletions_racing_a_scan_leave_no_ghosts() {
        let tmp = TempDir::new().unwrap();
        let paths: Vec<PathBuf> = (0..300)
            .map(|i| {
                write_asset(
                    tmp.path(),
                    &format!("Bulk/BP_{i:03}.asset"),
                    r#"{"kind":"Blueprint"}"#,
                )
            })
            .collect();
        let registry = Arc::new(FsRegistry::new(
            tmp.path(),
            Namespace::default(),
            DEFAULT_ASSET_EXTENSION,
        ));
        registry.scan().unwrap();

        let scanner = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for _ in 0..5 {
                    registry.scan().unwrap();
                }
            })
        };
        for path in &paths {
            fs::remove_file(path).unwrap();
            registry.refresh_path(path);
        }
        scanner.join().unwrap();

        assert!(registry.enumerate(KindFilter::All).is_empty());
    }

    mod watcher {
        use super::*;
        use notify::event::{CreateKind, DataChange, ModifyKind, RemoveKind, RenameMode};
        use notify::{Event, EventKind};

        fn created(path: &Path) -> notify::Result<Event> {
            Ok(Event::new(EventKind::Create(CreateKind::File)).add_path(path.to_path_buf()))
        }

        fn modified(path: &Path) -> notify::Result<Event> {
            Ok(
                Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
                    .add_path(path.to_path_buf()),
            )
        }

        fn removed(path: &Path) -> notify::Result<Event> {
            Ok(Event::new(EventKind::Remove(RemoveKind::File)).add_path(path.to_path_buf()))
        }

        fn renamed(from: &Path, to: &Path) -> notify::Result<Event> {
            Ok(
                Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
                    .add_path(from.to_path_buf())
                    .add_path(to.to_path_buf()),
            )
        }

        fn subscribed(registry: &FsRegistry) -> Receiver<AssetEvent> {
            let (tx, rx) = mpsc::channel();
            registry.subscribe(tx);
            rx
        }

        #[test]
        fn create_then_modify_coalesce_into_one_save() {
            let (tmp, registry) = corpus();
            registry.scan().unwrap();
            let rx = subscribed(&registry);

            let lamp = write_asset(tmp.path(), "New/BP_Lamp.asset", r#"{"kind":"Blueprint"}"#);
            apply_batch(&registry, vec![created(&lamp), modified(&lamp), modified(&lamp)]);

            let events: Vec<_> = rx.try_iter().collect();
            assert_eq!(
                events,
                vec![AssetEvent::Saved {
                    identity: id("/Game/New/BP_Lamp"),
                    interactive: true
                }]
            );
        }

        #[test]
        fn removal_and_watcher_errors() {
            let (tmp, registry) = corpus();
            registry.scan().unwrap();
            let rx = subscribed(&registry);

            let hinge = tmp.path().join("Props/BP_Hinge.asset");
            fs::remove_file(&hinge).unwrap();
            apply_batch(
                &registry,
                vec![Err(notify::Error::generic("watch overflow")), removed(&hinge)],
            );

            let events: Vec<_> = rx.try_iter().collect();
            assert_eq!(
                events,
                vec![AssetEvent::Removed {
                    identity: id("/Game/Props/BP_Hinge"),
                    kind: AssetKind::Blueprint
                }]
            );
        }

        #[test]
        fn rename_supersedes_earlier_writes_to_the_source() {
            let (tmp, registry) = corpus();
            registry.scan().unwrap();
            let rx = subscribed(&registry);

            let from = tmp.path().join("Props/BP_Hinge.asset");
            let to = tmp.path().join("Props/BP_Pivot.asset");
            fs::rename(&from, &to).unwrap();
            apply_batch(&registry, vec![modified(&from), renamed(&from, &to)]);

            let events: Vec<_> = rx.try_iter().collect();
            assert_eq!(
                events,
                vec![AssetEvent::Renamed {
                    old: id("/Game/Props/BP_Hinge"),
                    new: id("/Game/Props/BP_Pivot"),
                    kind: AssetKind::Blueprint
                }]
            );
        }

        #[test]
        fn pump_debounces_until_channel_closes() {
            let (tmp, registry) = corpus();
            registry.scan().unwrap();
            let rx = subscribed(&registry);

            let lamp = write_asset(tmp.path(), "New/BP_Lamp.asset", r#"{"kind":"Blueprint"}"#);
            let (tx, events) = mpsc::channel();
            tx.send(created(&lamp)).unwrap();
            tx.send(modified(&lamp)).unwrap();
            drop(tx);
            pump_events(&registry, &events, Duration::from_millis(50));

            let published: Vec<_> = rx.try_iter().collect();
            assert_eq!(published.len(), 1);
            assert!(registry.resolve_exists(&id("/Game/New/BP_Lamp")));
        }

        #[test]
        fn live_watcher_publishes_saves() {
            let (tmp, registry) = corpus();
            let registry = Arc::new(registry);
            registry.scan().unwrap();
            let rx = subscribed(&registry);
            let _watcher = registry.watch(Duration::from_millis(20)).unwrap();

            write_asset(tmp.path(), "Props/BP_Lamp.asset", r#"{"kind":"Blueprint"}"#);
            let lamp = id("/Game/Props/BP_Lamp");
            let deadline = Instant::now() + Duration::from_secs(10);
            loop {
                let remaining = deadline
                    .checked_duration_since(Instant::now())
                    .expect("no save event before the deadline");
                match rx.recv_timeout(remaining) {
                    Ok(AssetEvent::Saved { identity, .. }) if identity == lamp => break,
                    Ok(_) => {}
                    Err(e) => panic!("no save event: {e}"),
                }
            }
            assert!(registry.resolve_exists(&lamp));
        }
    }
}
