//! Lifecycle events emitted by the watch layer and the object snapshots they carry.

use std::collections::BTreeMap;
use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Lifecycle transition observed for a watched object.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventType {
    #[serde(alias = "create", alias = "CREATE")]
    Create,
    #[serde(alias = "update", alias = "UPDATE")]
    Update,
    #[serde(alias = "delete", alias = "DELETE")]
    Delete,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Create => "Create",
            EventType::Update => "Update",
            EventType::Delete => "Delete",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Group/Version/Kind of a resource type. `group` is empty for the core API group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Gvk {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl Gvk {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self { group: group.into(), version: version.into(), kind: kind.into() }
    }
}

impl fmt::Display for Gvk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.kind)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.kind)
        }
    }
}

/// Shaped view of a watched object. Fields may be empty when the snapshot was
/// reconstructed from a last-known state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ObjectSnapshot {
    pub name: String,
    pub namespace: Option<String>,
    pub uid: String,
    pub resource_version: Option<String>,
    pub labels: BTreeMap<String, String>,
    /// Raw object with `metadata.managedFields` stripped.
    pub raw: serde_json::Value,
}

impl ObjectSnapshot {
    /// Shape a raw object. Returns `None` when neither a uid nor a name can be read.
    pub fn from_value(mut raw: serde_json::Value) -> Option<Self> {
        strip_managed_fields(&mut raw);
        let meta = raw.get("metadata");
        let read = |key: &str| meta.and_then(|m| m.get(key)).and_then(|v| v.as_str()).map(str::to_string);
        let name = read("name").unwrap_or_default();
        let uid = read("uid").unwrap_or_default();
        if name.is_empty() && uid.is_empty() {
            return None;
        }
        let labels = meta
            .and_then(|m| m.get("labels"))
            .and_then(|l| l.as_object())
            .map(|l| {
                l.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        Some(Self {
            name,
            namespace: read("namespace").filter(|s| !s.is_empty()),
            uid,
            resource_version: read("resourceVersion"),
            labels,
            raw,
        })
    }

    /// `namespace/name` (or just `name` for cluster-scoped objects).
    pub fn key(&self) -> String {
        match &self.namespace {
            Some(ns) => format!("{}/{}", ns, self.name),
            None => self.name.clone(),
        }
    }

    /// Identity used for dedup and interval task keys: the uid, or `ns/name`
    /// for a reconstructed snapshot that lost it.
    pub fn identity(&self) -> String { if self.uid.is_empty() { self.key() } else { self.uid.clone() } }

    /// Fixed context exposed to body templates.
    pub fn template_context(&self) -> serde_json::Value {
        serde_json::json!({
            "name": self.name,
            "namespace": self.namespace.clone().unwrap_or_default(),
            "uid": self.uid,
            "labels": self.labels,
        })
    }
}

fn strip_managed_fields(v: &mut serde_json::Value) {
    if let Some(meta) = v.get_mut("metadata") {
        if let Some(obj) = meta.as_object_mut() {
            obj.remove("managedFields");
        }
    }
}

/// Whether the snapshot is the live object or a best-effort reconstruction
/// from the last state seen before a missed deletion.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectState {
    Live(ObjectSnapshot),
    LastKnown(ObjectSnapshot),
}

impl ObjectState {
    pub fn snapshot(&self) -> &ObjectSnapshot {
        match self {
            ObjectState::Live(s) | ObjectState::LastKnown(s) => s,
        }
    }

    pub fn is_last_known(&self) -> bool { matches!(self, ObjectState::LastKnown(_)) }
}

/// Normalized notification handed to the dispatcher. Immutable once emitted.
#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleEvent {
    pub event_type: EventType,
    pub gvk: Gvk,
    pub object: ObjectState,
}

impl LifecycleEvent {
    pub fn live(event_type: EventType, gvk: Gvk, snapshot: ObjectSnapshot) -> Self {
        Self { event_type, gvk, object: ObjectState::Live(snapshot) }
    }

    pub fn snapshot(&self) -> &ObjectSnapshot { self.object.snapshot() }
}
