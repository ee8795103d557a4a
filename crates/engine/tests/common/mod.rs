#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::StreamExt;
use resact_core::{
    ActionSpec, EngineError, EngineResult, EventType, Gvk, LifecycleEvent, ObjectSnapshot, ResourceAction,
    ResourceActionSpec, ResourceSelector, RuleId,
};
use resact_engine::{
    ActionContext, ActionExecutor, EngineConfig, EnginePorts, NotificationStream, ResourceResolver, RuleStore,
    SecretStore, WatchNotification, WatchSource, WatchTarget,
};

pub fn configmap_gvk() -> Gvk { Gvk::new("", "v1", "ConfigMap") }

pub fn rule(ns: &str, name: &str, events: Vec<EventType>, actions: Vec<ActionSpec>) -> ResourceAction {
    let mut r = ResourceAction::new(
        name,
        ResourceActionSpec {
            selector: ResourceSelector { group: String::new(), version: "v1".into(), kind: "ConfigMap".into() },
            events,
            filters: None,
            actions,
        },
    );
    r.metadata.namespace = Some(ns.into());
    r.metadata.uid = Some(format!("rule-uid-{ns}-{name}"));
    r.metadata.generation = Some(1);
    r
}

pub fn http_action(url: impl Into<String>) -> ActionSpec { ActionSpec { url: url.into(), ..Default::default() } }

pub fn snapshot(name: &str, uid: &str) -> ObjectSnapshot {
    ObjectSnapshot {
        name: name.into(),
        namespace: Some("default".into()),
        uid: uid.into(),
        resource_version: Some("1".into()),
        labels: BTreeMap::from([("app".to_string(), "shop".to_string())]),
        raw: serde_json::json!({ "metadata": { "name": name, "namespace": "default", "uid": uid } }),
    }
}

pub fn event(event_type: EventType, name: &str, uid: &str) -> LifecycleEvent {
    LifecycleEvent::live(event_type, configmap_gvk(), snapshot(name, uid))
}

pub fn raw_object(name: &str, uid: &str, rv: &str) -> serde_json::Value {
    serde_json::json!({ "metadata": { "name": name, "namespace": "default", "uid": uid, "resourceVersion": rv } })
}

/// Rules in memory with resourceVersion-guarded status writes.
#[derive(Default)]
pub struct FakeRules {
    rules: Mutex<BTreeMap<RuleId, ResourceAction>>,
    /// Next N status writes fail with `Conflict` (after bumping the version).
    pub inject_conflicts: AtomicU32,
    pub status_writes: AtomicU32,
    pub conflicts_seen: AtomicU32,
    /// When set, `list` serves this copy instead of the live rules, as a lagging cache would.
    pub stale_list: Mutex<Option<Vec<ResourceAction>>>,
}

impl FakeRules {
    pub fn with(rules: Vec<ResourceAction>) -> Arc<Self> {
        let f = Self::default();
        for r in rules {
            f.put(r);
        }
        Arc::new(f)
    }

    pub fn put(&self, mut r: ResourceAction) {
        let mut g = self.rules.lock().unwrap();
        let next = g.get(&r.rule_id()).and_then(|p| p.metadata.resource_version.clone()).map_or(1, |v| v.parse::<u64>().unwrap() + 1);
        r.metadata.resource_version = Some(next.to_string());
        g.insert(r.rule_id(), r);
    }

    pub fn snapshot_all(&self) -> Vec<ResourceAction> { self.rules.lock().unwrap().values().cloned().collect() }

    pub fn remove(&self, id: &RuleId) { self.rules.lock().unwrap().remove(id); }

    pub fn current(&self, ns: &str, name: &str) -> ResourceAction {
        self.rules.lock().unwrap().get(&RuleId::new(ns, name)).cloned().expect("rule present")
    }
}

#[async_trait]
impl RuleStore for FakeRules {
    async fn list(&self) -> EngineResult<Vec<ResourceAction>> {
        if let Some(stale) = self.stale_list.lock().unwrap().clone() {
            return Ok(stale);
        }
        Ok(self.rules.lock().unwrap().values().cloned().collect())
    }

    async fn get(&self, id: &RuleId) -> EngineResult<ResourceAction> {
        self.rules.lock().unwrap().get(id).cloned().ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    async fn update_status(&self, rule: &ResourceAction) -> EngineResult<ResourceAction> {
        let mut g = self.rules.lock().unwrap();
        let id = rule.rule_id();
        let stored = g.get_mut(&id).ok_or_else(|| EngineError::NotFound(id.to_string()))?;
        let bump = |s: &mut ResourceAction| {
            let v = s.metadata.resource_version.as_deref().unwrap_or("0").parse::<u64>().unwrap() + 1;
            s.metadata.resource_version = Some(v.to_string());
        };
        if self.inject_conflicts.load(Ordering::SeqCst) > 0 {
            self.inject_conflicts.fetch_sub(1, Ordering::SeqCst);
            self.conflicts_seen.fetch_add(1, Ordering::SeqCst);
            bump(stored);
            return Err(EngineError::Conflict(format!("{id} modified")));
        }
        if stored.metadata.resource_version != rule.metadata.resource_version {
            self.conflicts_seen.fetch_add(1, Ordering::SeqCst);
            return Err(EngineError::Conflict(format!("{id} modified")));
        }
        stored.status = rule.status.clone();
        bump(stored);
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(stored.clone())
    }
}

#[derive(Default)]
pub struct FakeSecrets {
    data: Mutex<HashMap<(String, String), BTreeMap<String, Vec<u8>>>>,
}

impl FakeSecrets {
    pub fn with(ns: &str, name: &str, data: &[(&str, &str)]) -> Arc<Self> {
        let f = Self::default();
        f.insert(ns, name, data);
        Arc::new(f)
    }

    pub fn insert(&self, ns: &str, name: &str, data: &[(&str, &str)]) {
        let data = data.iter().map(|(k, v)| (k.to_string(), v.as_bytes().to_vec())).collect();
        self.data.lock().unwrap().insert((ns.to_string(), name.to_string()), data);
    }
}

#[async_trait]
impl SecretStore for FakeSecrets {
    async fn get_secret(&self, namespace: &str, name: &str) -> EngineResult<BTreeMap<String, Vec<u8>>> {
        self.data
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("secret {namespace}/{name}")))
    }
}

/// Resolves only the kinds it was given.
pub struct FakeResolver {
    known: Vec<Gvk>,
    pub calls: AtomicUsize,
}

impl FakeResolver {
    pub fn new(known: Vec<Gvk>) -> Arc<Self> { Arc::new(Self { known, calls: AtomicUsize::new(0) }) }
}

#[async_trait]
impl ResourceResolver for FakeResolver {
    async fn resolve(&self, gvk: &Gvk) -> EngineResult<WatchTarget> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.known.contains(gvk) {
            Ok(WatchTarget { gvk: gvk.clone(), plural: format!("{}s", gvk.kind.to_lowercase()), namespaced: true })
        } else {
            Err(EngineError::UnknownResourceType(gvk.to_string()))
        }
    }
}

/// Hands out channel-backed streams; tests push notifications by GVK.
#[derive(Default)]
pub struct FakeWatches {
    senders: Mutex<HashMap<Gvk, mpsc::UnboundedSender<EngineResult<WatchNotification>>>>,
    pub subscriptions: AtomicUsize,
}

impl FakeWatches {
    pub fn send(&self, gvk: &Gvk, n: WatchNotification) {
        let g = self.senders.lock().unwrap();
        g.get(gvk).expect("subscribed").unbounded_send(Ok(n)).expect("session alive");
    }

    pub fn close(&self, gvk: &Gvk) { self.senders.lock().unwrap().remove(gvk); }
}

impl WatchSource for FakeWatches {
    fn subscribe(&self, target: &WatchTarget) -> NotificationStream {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded();
        self.senders.lock().unwrap().insert(target.gvk.clone(), tx);
        rx.boxed()
    }
}

/// Executor that records every call and returns a scripted result.
#[derive(Default)]
pub struct RecordingExecutor {
    pub calls: Mutex<Vec<(String, ObjectSnapshot, BTreeMap<String, String>)>>,
    pub fail_with: Mutex<Option<EngineError>>,
}

impl RecordingExecutor {
    pub fn count(&self) -> usize { self.calls.lock().unwrap().len() }
}

#[async_trait]
impl ActionExecutor for RecordingExecutor {
    async fn execute(&self, ctx: ActionContext<'_>) -> EngineResult<()> {
        self.calls.lock().unwrap().push((ctx.action.url.clone(), ctx.object.clone(), ctx.headers.clone()));
        match self.fail_with.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

pub fn ports(rules: Arc<FakeRules>, secrets: Arc<FakeSecrets>, resolver: Arc<FakeResolver>, watches: Arc<FakeWatches>) -> EnginePorts {
    EnginePorts { rules, secrets, resolver, watches }
}

pub fn fast_config() -> EngineConfig { EngineConfig { status_update_attempts: 5, status_retry_base: std::time::Duration::from_millis(1) } }

/// Serve `router` on an ephemeral local port.
pub async fn serve(router: axum::Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    addr
}

pub async fn eventually<F: Fn() -> bool>(f: F) {
    for _ in 0..200 {
        if f() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
