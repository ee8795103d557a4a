//! `ResourceAction` custom resource: which objects to watch and which actions to fire.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::condition::{set_condition, Condition};
use crate::error::EngineError;
use crate::event::{EventType, Gvk};

/// Spec object for the `ResourceAction` CRD
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(group = "automation.resact.io", version = "v1alpha1", kind = "ResourceAction", namespaced)]
#[kube(status = "ResourceActionStatus", shortname = "ract")]
#[kube(printcolumn = r#"{"name":"Kind","type":"string","jsonPath":".spec.selector.kind"}"#)]
#[kube(printcolumn = r#"{"name":"Last Error","type":"string","jsonPath":".status.lastError"}"#)]
#[serde(rename_all = "camelCase")]
pub struct ResourceActionSpec {
    /// Resource type to watch.
    pub selector: ResourceSelector,
    /// Lifecycle events that trigger the actions.
    pub events: Vec<EventType>,
    /// Optional conjunctive object filter; absent matches everything.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filters: Option<FilterSpec>,
    /// Actions, run in declared order.
    pub actions: Vec<ActionSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct ResourceSelector {
    /// API group; empty for the core group.
    #[serde(default)]
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl ResourceSelector {
    pub fn gvk(&self) -> Gvk { Gvk::new(self.group.clone(), self.version.clone(), self.kind.clone()) }

    pub fn matches(&self, gvk: &Gvk) -> bool {
        self.group == gvk.group && self.version == gvk.version && self.kind == gvk.kind
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FilterSpec {
    /// Every key must be present on the object with an equal value.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_regex: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ActionMode {
    #[default]
    Once,
    /// Repeats on a fixed `schedule` duration.
    #[serde(alias = "cron", alias = "schedule")]
    Interval,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ActionSpec {
    /// Executor kind; only "http" ships today.
    #[serde(rename = "type", default = "default_action_type")]
    pub action_type: String,
    /// HTTP method (default POST).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    pub url: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, HeaderValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<BodySpec>,
    /// Regex tested against the decimal status code (default `^2..$`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_status: Option<String>,
    #[serde(default)]
    pub mode: ActionMode,
    /// Fixed repeat interval such as "30s" or "5m". Not a cron expression.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    /// Per-attempt timeout (default 10s).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetrySpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsSpec>,
}

fn default_action_type() -> String { "http".to_string() }

impl Default for ActionSpec {
    fn default() -> Self {
        Self {
            action_type: default_action_type(),
            method: None,
            url: String::new(),
            headers: BTreeMap::new(),
            body: None,
            expected_status: None,
            mode: ActionMode::Once,
            schedule: None,
            timeout: None,
            retry: None,
            tls: None,
        }
    }
}

impl ActionSpec {
    pub fn is_interval(&self) -> bool { self.mode == ActionMode::Interval }
}

/// Literal header value or a reference to a key in a Secret of the rule's namespace.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct HeaderValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_key_ref: Option<SecretKeyRef>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct SecretKeyRef {
    pub name: String,
    pub key: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct BodySpec {
    pub template: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetrySpec {
    /// Total attempts including the first (default 1).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    /// Base backoff, e.g. "500ms".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backoff: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_on_network_error: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_on_status: Option<Vec<u16>>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TlsSpec {
    #[serde(default)]
    pub insecure_skip_verify: bool,
    /// Name used for certificate verification instead of the URL host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    /// PEM CA bundle; replaces the system trust roots.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_secret_ref: Option<CaSecretRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_cert_secret_ref: Option<ClientCertSecretRef>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct CaSecretRef {
    pub name: String,
    #[serde(default = "default_ca_key")]
    pub key: String,
}

fn default_ca_key() -> String { "ca.crt".to_string() }

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClientCertSecretRef {
    pub name: String,
    #[serde(default = "default_cert_key")]
    pub cert_key: String,
    #[serde(default = "default_key_key")]
    pub key_key: String,
}

fn default_cert_key() -> String { "tls.crt".to_string() }
fn default_key_key() -> String { "tls.key".to_string() }

/// State object for the `ResourceAction` CRD
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceActionStatus {
    /// Append-only ledger used for once-mode dedup.
    #[serde(default)]
    pub executions: Vec<ExecutionRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    #[serde(rename = "resourceUID")]
    pub resource_uid: String,
    pub event: EventType,
    pub executed_at: DateTime<Utc>,
}

impl ResourceActionStatus {
    pub fn has_executed(&self, uid: &str, event: EventType) -> bool {
        self.executions.iter().any(|r| r.resource_uid == uid && r.event == event)
    }

    /// Append the ledger record (unless already present) and move the `Ready`
    /// condition and `lastError` to reflect `outcome`.
    pub fn record_outcome(
        &mut self,
        record: ExecutionRecord,
        outcome: Result<(), &EngineError>,
        generation: Option<i64>,
        now: DateTime<Utc>,
    ) {
        if !self.has_executed(&record.resource_uid, record.event) {
            self.executions.push(record);
        }
        let cond = match outcome {
            Ok(()) => {
                self.last_error = None;
                Condition::ready(true, "ActionSucceeded", "All actions executed successfully", generation, now)
            }
            Err(e) => {
                self.last_error = Some(e.to_string());
                Condition::ready(false, e.reason(), e.to_string(), generation, now)
            }
        };
        set_condition(&mut self.conditions, cond, now);
    }
}

/// Identity of a rule: `namespace/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleId {
    pub namespace: String,
    pub name: String,
}

impl RuleId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), name: name.into() }
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}/{}", self.namespace, self.name) }
}

impl ResourceAction {
    pub fn rule_id(&self) -> RuleId { RuleId::new(self.namespace().unwrap_or_default(), self.name_any()) }

    pub fn has_executed(&self, uid: &str, event: EventType) -> bool {
        self.status.as_ref().map(|s| s.has_executed(uid, event)).unwrap_or(false)
    }
}
