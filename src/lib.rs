//! Incremental audit cache and dependency query service for hierarchical asset corpora.
//!
//! Each graph asset in a corpus gets a derived JSON summary on disk, kept current by
//! content fingerprint. A localhost HTTP endpoint answers dependency and referencer queries
//! against the registry's dependency graph.

pub mod artifact;
pub mod asset;
pub mod atomic;
pub mod cache;
pub mod config;
pub mod error;
pub mod hasher;
pub mod identity;
pub mod listener;
pub mod lock;
pub mod registry;
pub mod server;
pub mod summary;

pub use artifact::{ArtifactRecord, ArtifactStore, AUDIT_SCHEMA_VERSION};
pub use cache::{AuditReport, IncrementalAuditCache, StaleReason, Staleness};
pub use error::{AuditError, Result};
pub use identity::{AssetIdentity, Namespace};
pub use listener::{ChangeListener, StartupSweep, SweepPoll};
pub use registry::{AssetEvent, AssetRegistry, FsRegistry, MemoryRegistry};
pub use server::{DependencyQueryServer, ServerConfig, ServerStatus};
pub use summary::{BlueprintSummarizer, GraphSummarizer, SummaryDocument};
