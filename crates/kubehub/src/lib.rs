//! Resact kubehub: kube-rs implementations of the engine ports.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::{Api, ListParams, PostParams},
    core::{ApiResource, DynamicObject, GroupVersionKind},
    discovery::{self, Scope},
    runtime::{
        watcher::{self, Event},
        WatchStreamExt,
    },
    Client, ResourceExt,
};
use resact_core::{EngineError, EngineResult, Gvk, ResourceAction, RuleId};
use resact_engine::{
    EnginePorts, NotificationStream, ResourceResolver, RuleStore, SecretStore, WatchNotification, WatchSource,
    WatchTarget,
};
use tracing::{debug, info};

pub async fn get_kube_client() -> Result<Client> {
    Client::try_default().await.context("building kube client from the current context")
}

/// Ports backed by a single shared client.
pub fn kube_ports(client: Client) -> EnginePorts {
    use std::sync::Arc;
    EnginePorts {
        rules: Arc::new(KubeRuleStore::new(client.clone())),
        secrets: Arc::new(KubeSecretStore::new(client.clone())),
        resolver: Arc::new(KubeDiscovery::new(client.clone())),
        watches: Arc::new(KubeWatchSource::new(client)),
    }
}

/// Map a kube error onto the engine taxonomy: 409 is a version conflict, 404 a
/// missing object, anything else a store failure.
pub fn map_kube_error(e: kube::Error, what: &str) -> EngineError {
    match e {
        kube::Error::Api(ae) if ae.code == 409 => EngineError::Conflict(format!("{what}: {}", ae.message)),
        kube::Error::Api(ae) if ae.code == 404 => EngineError::NotFound(format!("{what}: {}", ae.message)),
        other => EngineError::Store(format!("{what}: {other}")),
    }
}

pub struct KubeRuleStore {
    client: Client,
}

impl KubeRuleStore {
    pub fn new(client: Client) -> Self { Self { client } }

    fn namespaced(&self, ns: &str) -> Api<ResourceAction> { Api::namespaced(self.client.clone(), ns) }
}

#[async_trait]
impl RuleStore for KubeRuleStore {
    async fn list(&self) -> EngineResult<Vec<ResourceAction>> {
        let api: Api<ResourceAction> = Api::all(self.client.clone());
        let list = api.list(&ListParams::default()).await.map_err(|e| map_kube_error(e, "list resourceactions"))?;
        Ok(list.items)
    }

    async fn get(&self, id: &RuleId) -> EngineResult<ResourceAction> {
        self.namespaced(&id.namespace).get(&id.name).await.map_err(|e| map_kube_error(e, &format!("get resourceaction {id}")))
    }

    async fn update_status(&self, rule: &ResourceAction) -> EngineResult<ResourceAction> {
        let id = rule.rule_id();
        // The body carries metadata.resourceVersion, so a stale write is rejected with 409.
        let body = serde_json::to_vec(rule).map_err(|e| EngineError::Store(format!("encode {id}: {e}")))?;
        self.namespaced(&id.namespace)
            .replace_status(&id.name, &PostParams::default(), body)
            .await
            .map_err(|e| map_kube_error(e, &format!("update status of {id}")))
    }
}

pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self { Self { client } }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get_secret(&self, namespace: &str, name: &str) -> EngineResult<BTreeMap<String, Vec<u8>>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api.get(name).await.map_err(|e| map_kube_error(e, &format!("get secret {namespace}/{name}")))?;
        Ok(secret_bytes(secret))
    }
}

fn secret_bytes(secret: Secret) -> BTreeMap<String, Vec<u8>> {
    let mut out: BTreeMap<String, Vec<u8>> = secret.data.unwrap_or_default().into_iter().map(|(k, v)| (k, v.0)).collect();
    // stringData is write-only on a real cluster but shows up in fixtures.
    for (k, v) in secret.string_data.unwrap_or_default() {
        out.entry(k).or_insert_with(|| v.into_bytes());
    }
    out
}

pub struct KubeDiscovery {
    client: Client,
}

impl KubeDiscovery {
    pub fn new(client: Client) -> Self { Self { client } }
}

#[async_trait]
impl ResourceResolver for KubeDiscovery {
    async fn resolve(&self, gvk: &Gvk) -> EngineResult<WatchTarget> {
        let kgvk = GroupVersionKind::gvk(&gvk.group, &gvk.version, &gvk.kind);
        let (ar, caps) = discovery::pinned_kind(&self.client, &kgvk)
            .await
            .map_err(|e| EngineError::UnknownResourceType(format!("{gvk}: {e}")))?;
        debug!(gvk = %gvk, plural = %ar.plural, "resolved resource type");
        Ok(WatchTarget { gvk: gvk.clone(), plural: ar.plural, namespaced: matches!(caps.scope, Scope::Namespaced) })
    }
}

pub struct KubeWatchSource {
    client: Client,
}

impl KubeWatchSource {
    pub fn new(client: Client) -> Self { Self { client } }
}

impl WatchSource for KubeWatchSource {
    fn subscribe(&self, target: &WatchTarget) -> NotificationStream {
        let gvk = &target.gvk;
        let ar = ApiResource::from_gvk_with_plural(&GroupVersionKind::gvk(&gvk.group, &gvk.version, &gvk.kind), &target.plural);
        let api: Api<DynamicObject> = Api::all_with(self.client.clone(), &ar);
        info!(gvk = %gvk, "watcher started");
        let key = gvk.to_string();
        watcher::watcher(api, watcher::Config::default())
            .default_backoff()
            .map(move |res| match res {
                Ok(ev) => notification(ev),
                Err(e) => Err(EngineError::Store(format!("watch {key}: {e}"))),
            })
            .boxed()
    }
}

fn to_value(obj: DynamicObject) -> EngineResult<serde_json::Value> {
    let name = obj.name_any();
    serde_json::to_value(obj).map_err(|e| EngineError::Store(format!("serializing {name}: {e}")))
}

/// Convert a watcher event into the engine's raw notification.
pub fn notification(ev: Event<DynamicObject>) -> EngineResult<WatchNotification> {
    match ev {
        Event::Applied(o) => Ok(WatchNotification::Applied(to_value(o)?)),
        Event::Deleted(o) => Ok(WatchNotification::Deleted(to_value(o)?)),
        Event::Restarted(list) => {
            debug!(count = list.len(), "watch restart");
            let items = list.into_iter().map(to_value).collect::<EngineResult<Vec<_>>>()?;
            Ok(WatchNotification::Restarted(items))
        }
    }
}
