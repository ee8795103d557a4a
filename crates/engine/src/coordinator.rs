//! Watch coordination: one session per resource type, each feeding normalized
//! events to the dispatcher one at a time.

use std::sync::Arc;

use futures::StreamExt;
use resact_core::{EngineResult, Gvk};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::dispatcher::Dispatcher;
use crate::executor::ExecutorRegistry;
use crate::normalize::Normalizer;
use crate::ports::{NotificationStream, ResourceResolver, RuleStore, SecretStore, WatchSource, WatchTarget};
use crate::registry::Registry;
use crate::scheduler::Scheduler;

/// External collaborators the engine runs against.
#[derive(Clone)]
pub struct EnginePorts {
    pub rules: Arc<dyn RuleStore>,
    pub secrets: Arc<dyn SecretStore>,
    pub resolver: Arc<dyn ResourceResolver>,
    pub watches: Arc<dyn WatchSource>,
}

pub struct Engine {
    resolver: Arc<dyn ResourceResolver>,
    watches: Arc<dyn WatchSource>,
    dispatcher: Arc<Dispatcher>,
    scheduler: Arc<Scheduler>,
    registry: Arc<Registry>,
}

impl Engine {
    pub fn new(ports: EnginePorts, executors: ExecutorRegistry, config: EngineConfig) -> Self {
        let registry = Arc::new(Registry::new(CancellationToken::new()));
        let executors = Arc::new(executors);
        let scheduler = Arc::new(Scheduler::new(ports.rules.clone(), ports.secrets.clone(), executors.clone(), registry.clone()));
        let dispatcher = Arc::new(Dispatcher::new(
            ports.rules.clone(),
            ports.secrets.clone(),
            executors,
            scheduler.clone(),
            registry.clone(),
            config,
        ));
        Self { resolver: ports.resolver, watches: ports.watches, dispatcher, scheduler, registry }
    }

    /// Engine with the built-in `http` executor.
    pub fn with_http(ports: EnginePorts, config: EngineConfig) -> Self {
        let executors = ExecutorRegistry::with_http(ports.secrets.clone());
        Self::new(ports, executors, config)
    }

    /// Start watching `gvk` unless already watched. Fails with
    /// `UnknownResourceType` when the type cannot be resolved right now; the
    /// caller retries later.
    pub async fn ensure_watching(&self, gvk: &Gvk) -> EngineResult<()> {
        if self.registry.is_watching(gvk) {
            return Ok(());
        }
        let target = self.resolver.resolve(gvk).await?;
        let Some((session_id, token)) = self.registry.register_session(gvk, target.clone()) else {
            return Ok(());
        };
        if self.registry.mark_started() {
            info!("watch dispatch started");
            self.scheduler.start();
        }
        info!(gvk = %gvk, plural = %target.plural, namespaced = target.namespaced, "watch session started");
        let stream = self.watches.subscribe(&target);
        let session = Session { id: session_id, target, dispatcher: self.dispatcher.clone(), registry: self.registry.clone() };
        tokio::spawn(session.run(stream, token));
        Ok(())
    }

    /// Tear down the session for `gvk` and every interval task it armed.
    pub fn stop_watching(&self, gvk: &Gvk) -> bool {
        match self.registry.remove_session(gvk) {
            Some(token) => {
                token.cancel();
                info!(gvk = %gvk, "watch session stopped");
                true
            }
            None => false,
        }
    }

    /// Cancel every session and interval task.
    pub fn shutdown(&self) {
        info!("engine shutting down");
        self.registry.root().cancel();
    }

    pub fn is_watching(&self, gvk: &Gvk) -> bool { self.registry.is_watching(gvk) }

    pub fn watched(&self) -> Vec<WatchTarget> { self.registry.watched() }

    pub fn interval_tasks(&self) -> usize { self.registry.task_count() }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> { &self.dispatcher }

    pub fn shutdown_token(&self) -> CancellationToken { self.registry.root().clone() }
}

struct Session {
    id: u64,
    target: WatchTarget,
    dispatcher: Arc<Dispatcher>,
    registry: Arc<Registry>,
}

impl Session {
    async fn run(self, mut stream: NotificationStream, token: CancellationToken) {
        let gvk = self.target.gvk.clone();
        let mut normalizer = Normalizer::new(gvk.clone());
        'session: loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(notification)) => {
                    for event in normalizer.push(notification) {
                        if token.is_cancelled() {
                            break 'session;
                        }
                        debug!(gvk = %gvk, event = %event.event_type, name = %event.snapshot().key(), "dispatching");
                        if let Err(e) = self.dispatcher.on_event(&event).await {
                            warn!(gvk = %gvk, event = %event.event_type, name = %event.snapshot().key(), error = %e, "dispatch failed");
                        }
                    }
                }
                Some(Err(e)) => warn!(gvk = %gvk, error = %e, "watch stream error"),
                None => {
                    warn!(gvk = %gvk, "watch stream ended");
                    // Let a later ensure_watching start a fresh session.
                    self.registry.release_session(&gvk, self.id);
                    break;
                }
            }
        }
        debug!(gvk = %gvk, session = self.id, tracked = normalizer.tracked(), "watch session exited");
    }
}
