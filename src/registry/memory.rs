use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::RwLock;

use super::{
    AssetEvent, AssetRegistry, CategoryMask, DependencyEdge, KindFilter, SubscriptionId,
    Subscribers,
};
use crate::asset::{AssetKind, LoadedAsset};
use crate::error::{AuditError, Result};
use crate::identity::AssetIdentity;

struct Entry {
    kind: AssetKind,
    source_path: Option<PathBuf>,
    asset: Option<LoadedAsset>,
}

#[derive(Default)]
struct MemoryState {
    entries: BTreeMap<AssetIdentity, Entry>,
    /// (from, edge-to)
    edges: Vec<(AssetIdentity, DependencyEdge)>,
}

/// Thread-safe in-process registry for embedding hosts and tests.
#[derive(Default)]
pub struct MemoryRegistry {
    state: RwLock<MemoryState>,
    loading: AtomicBool,
    subscribers: Subscribers,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `asset` (its identity must be set) along with its declared dependencies.
    pub fn add_asset(&self, asset: LoadedAsset, source_path: Option<PathBuf>) -> Result<()> {
        let identity = asset
            .identity
            .clone()
            .ok_or_else(|| AuditError::InvalidIdentity(asset.name.clone()))?;
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.edges.retain(|(from, _)| *from != identity);
        for edge in &asset.dependencies {
            state.edges.push((identity.clone(), edge.clone()));
        }
        state.entries.insert(
            identity,
            Entry {
                kind: asset.kind.clone(),
                source_path,
                asset: Some(asset),
            },
        );
        Ok(())
    }

    /// Register an asset that exists in the registry but cannot be loaded.
    pub fn add_unloadable(&self, identity: AssetIdentity, kind: AssetKind, source: Option<PathBuf>) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.entries.insert(
            identity,
            Entry {
                kind,
                source_path: source,
                asset: None,
            },
        );
    }

    pub fn add_dependency(&self, from: AssetIdentity, edge: DependencyEdge) {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        state.edges.push((from, edge));
    }

    pub fn set_loading(&self, loading: bool) {
        self.loading.store(loading, Ordering::SeqCst);
    }

    /// Publish a save of `identity`.
    pub fn mark_saved(&self, identity: &AssetIdentity, interactive: bool) {
        self.subscribers.publish(AssetEvent::Saved {
            identity: identity.clone(),
            interactive,
        });
    }

    /// Remove the asset and every edge touching it, then publish the removal.
    pub fn remove(&self, identity: &AssetIdentity) -> bool {
        let removed = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            state
                .edges
                .retain(|(from, edge)| from != identity && edge.package != *identity);
            state.entries.remove(identity)
        };
        match removed {
            Some(entry) => {
                self.subscribers.publish(AssetEvent::Removed {
                    identity: identity.clone(),
                    kind: entry.kind,
                });
                true
            }
            None => false,
        }
    }

    /// Move an asset to a new identity, rewriting edges, then publish the rename.
    pub fn rename(&self, old: &AssetIdentity, new: AssetIdentity) -> bool {
        let kind = {
            let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
            let Some(mut entry) = state.entries.remove(old) else {
                return false;
            };
            if let Some(asset) = entry.asset.as_mut() {
                asset.identity = Some(new.clone());
                asset.name = new.name().to_string();
            }
            for (from, edge) in state.edges.iter_mut() {
                if from == old {
                    *from = new.clone();
                }
                if edge.package == *old {
                    edge.package = new.clone();
                }
            }
            let kind = entry.kind.clone();
            state.entries.insert(new.clone(), entry);
            kind
        };
        self.subscribers.publish(AssetEvent::Renamed {
            old: old.clone(),
            new,
            kind,
        });
        true
    }
}

impl AssetRegistry for MemoryRegistry {
    fn enumerate(&self, filter: KindFilter) -> Vec<AssetIdentity> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .entries
            .iter()
            .filter(|(_, entry)| filter.matches(&entry.kind))
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn dependencies(&self, identity: &AssetIdentity, mask: CategoryMask) -> Vec<DependencyEdge> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .edges
            .iter()
            .filter(|(from, edge)| from == identity && mask.contains(edge.category))
            .map(|(_, edge)| edge.clone())
            .collect()
    }

    fn referencers(&self, identity: &AssetIdentity, mask: CategoryMask) -> Vec<DependencyEdge> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .edges
            .iter()
            .filter(|(_, edge)| edge.package == *identity && mask.contains(edge.category))
            .map(|(from, edge)| DependencyEdge::new(from.clone(), edge.category, edge.kind))
            .collect()
    }

    fn resolve_exists(&self, identity: &AssetIdentity) -> bool {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.entries.contains_key(identity)
    }

    fn is_still_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    fn kind_of(&self, identity: &AssetIdentity) -> Option<AssetKind> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state.entries.get(identity).map(|e| e.kind.clone())
    }

    fn source_path(&self, identity: &AssetIdentity) -> Option<PathBuf> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .entries
            .get(identity)
            .and_then(|e| e.source_path.clone())
    }

    fn load(&self, identity: &AssetIdentity) -> Result<LoadedAsset> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let entry = state
            .entries
            .get(identity)
            .ok_or_else(|| AuditError::NotFound(identity.to_string()))?;
        let mut asset = entry.asset.clone().ok_or_else(|| AuditError::Load {
            identity: identity.to_string(),
            reason: "asset is not loadable".to_string(),
        })?;
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
