//! Asset registry collaborator: enumeration, dependency graph, change notifications.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Mutex;

use crate::asset::{AssetKind, LoadedAsset};
use crate::error::Result;
use crate::identity::AssetIdentity;

mod corpus;
mod memory;

pub use corpus::{CorpusWatcher, FsRegistry, DEFAULT_ASSET_EXTENSION};
pub use memory::MemoryRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DependencyCategory {
    Package,
    SearchableName,
    Manage,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DependencyKind {
    Hard,
    Soft,
    #[serde(other)]
    Other,
}

/// Directed edge as reported by the registry; `package` is the far end of the edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub package: AssetIdentity,
    pub category: DependencyCategory,
    #[serde(rename = "type")]
    pub kind: DependencyKind,
}

impl DependencyEdge {
    pub fn new(package: AssetIdentity, category: DependencyCategory, kind: DependencyKind) -> Self {
        Self {
            package,
            category,
            kind,
        }
    }

    pub fn hard(package: AssetIdentity) -> Self {
        Self::new(package, DependencyCategory::Package, DependencyKind::Hard)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CategoryMask(u8);

impl CategoryMask {
    pub const PACKAGE: CategoryMask = CategoryMask(1);
    pub const SEARCHABLE_NAME: CategoryMask = CategoryMask(1 << 1);
    pub const MANAGE: CategoryMask = CategoryMask(1 << 2);
    pub const ALL: CategoryMask = CategoryMask(u8::MAX);

    pub fn contains(self, category: DependencyCategory) -> bool {
        match category {
            DependencyCategory::Package => self.0 & Self::PACKAGE.0 != 0,
            DependencyCategory::SearchableName => self.0 & Self::SEARCHABLE_NAME.0 != 0,
            DependencyCategory::Manage => self.0 & Self::MANAGE.0 != 0,
            DependencyCategory::Unknown => self == Self::ALL,
        }
    }
}

impl std::ops::BitOr for CategoryMask {
    type Output = CategoryMask;

    fn bitor(self, rhs: Self) -> Self {
        CategoryMask(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindFilter {
    All,
    GraphAssets,
}

impl KindFilter {
    pub fn matches(self, kind: &AssetKind) -> bool {
        match self {
            KindFilter::All => true,
            KindFilter::GraphAssets => kind.is_graph_asset(),
        }
    }
}

/// Corpus mutation notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetEvent {
    /// `interactive` is false for programmatic, bulk or export saves.
    Saved {
        identity: AssetIdentity,
        interactive: bool,
    },
    Removed {
        identity: AssetIdentity,
        kind: AssetKind,
    },
    Renamed {
        old: AssetIdentity,
        new: AssetIdentity,
        kind: AssetKind,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub trait AssetRegistry: Send + Sync {
    fn enumerate(&self, filter: KindFilter) -> Vec<AssetIdentity>;

    fn dependencies(&self, identity: &AssetIdentity, mask: CategoryMask) -> Vec<DependencyEdge>;

    fn referencers(&self, identity: &AssetIdentity, mask: CategoryMask) -> Vec<DependencyEdge>;

    fn resolve_exists(&self, identity: &AssetIdentity) -> bool;

    /// True until the initial corpus scan has completed.
    fn is_still_loading(&self) -> bool;

    fn kind_of(&self, identity: &AssetIdentity) -> Option<AssetKind>;

    /// On-disk location of the asset's serialized source bytes.
    fn source_path(&self, identity: &AssetIdentity) -> Option<PathBuf>;

    fn load(&self, identity: &AssetIdentity) -> Result<LoadedAsset>;

    fn subscribe(&self, sink: Sender<AssetEvent>) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId);

    /// Drop transient state accumulated by loads during a batch. No-op by default.
    fn release_transient(&self) {}
}

/// Subscriber list shared by the registry implementations.
#[derive(Default)]
pub(crate) struct Subscribers {
    next_id: AtomicU64,
    sinks: Mutex<Vec<(SubscriptionId, Sender<AssetEvent>)>>,
}

impl Subscribers {
    pub(crate) fn subscribe(&self, sink: Sender<AssetEvent>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.sinks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, sink));
        id
    }

    pub(crate) fn unsubscribe(&self, id: SubscriptionId) {
        self.sinks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(sub, _)| *sub != id);
    }

    /// Deliver to every live subscriber; receivers that hung up are dropped.
    pub(crate) fn publish(&self, event: AssetEvent) {
        let mut sinks = self.sinks.lock().unwrap_or_else(|e| e.into_inner());
        sinks.retain(|(_, sink)| sink.send(event.clone()).is_ok());
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.sinks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}
