//! Seams to the outside world. The engine only ever talks to the cluster through
//! these traits; `resact-kubehub` implements them against the Kubernetes API and
//! tests implement them in memory.

use std::collections::BTreeMap;

use async_trait::async_trait;
use futures::stream::BoxStream;
use resact_core::{EngineResult, Gvk, ResourceAction, RuleId};

/// Read and status-write access to `ResourceAction` rules.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn list(&self) -> EngineResult<Vec<ResourceAction>>;

    /// `NotFound` when the rule no longer exists.
    async fn get(&self, id: &RuleId) -> EngineResult<ResourceAction>;

    /// Persist `rule.status`, guarded by `metadata.resourceVersion`.
    /// Returns `Conflict` when the stored version moved on.
    async fn update_status(&self, rule: &ResourceAction) -> EngineResult<ResourceAction>;
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Data of the named secret, keyed by data key.
    async fn get_secret(&self, namespace: &str, name: &str) -> EngineResult<BTreeMap<String, Vec<u8>>>;
}

/// A resolved, watchable collection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchTarget {
    pub gvk: Gvk,
    pub plural: String,
    pub namespaced: bool,
}

#[async_trait]
pub trait ResourceResolver: Send + Sync {
    /// `UnknownResourceType` when the cluster does not serve `gvk`.
    async fn resolve(&self, gvk: &Gvk) -> EngineResult<WatchTarget>;
}

/// Raw notification from a list+watch stream, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchNotification {
    Applied(serde_json::Value),
    Deleted(serde_json::Value),
    /// Full relist; objects missing from it were deleted while disconnected.
    Restarted(Vec<serde_json::Value>),
}

pub type NotificationStream = BoxStream<'static, EngineResult<WatchNotification>>;

pub trait WatchSource: Send + Sync {
    /// Open a list+watch over every namespace of `target`. The stream reconnects
    /// on its own; transient errors surface as `Err` items.
    fn subscribe(&self, target: &WatchTarget) -> NotificationStream;
}
