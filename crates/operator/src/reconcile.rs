//! Rule reconciliation: every applied `ResourceAction` makes sure its selected
//! resource type is watched. Types discovery cannot resolve yet are parked and
//! retried on a fixed cadence.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::{Stream, StreamExt};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client};
use resact_core::{EngineError, Gvk, ResourceAction};
use resact_engine::Engine;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct RuleReconciler {
    engine: Arc<Engine>,
    requeue: Duration,
    parked: BTreeSet<Gvk>,
}

impl RuleReconciler {
    pub fn new(engine: Arc<Engine>, requeue: Duration) -> Self { Self { engine, requeue, parked: BTreeSet::new() } }

    pub fn parked(&self) -> impl Iterator<Item = &Gvk> { self.parked.iter() }

    pub async fn observe(&mut self, rule: &ResourceAction) {
        let gvk = rule.spec.selector.gvk();
        debug!(rule = %rule.rule_id(), gvk = %gvk, "rule observed");
        self.ensure(gvk).await;
    }

    async fn ensure(&mut self, gvk: Gvk) {
        match self.engine.ensure_watching(&gvk).await {
            Ok(()) => {
                if self.parked.remove(&gvk) {
                    info!(gvk = %gvk, "parked resource type is now watched");
                }
            }
            Err(EngineError::UnknownResourceType(msg)) => {
                if self.parked.insert(gvk.clone()) {
                    warn!(gvk = %gvk, error = %msg, requeue_secs = self.requeue.as_secs(), "resource type not served; parking");
                }
            }
            Err(e) => {
                warn!(gvk = %gvk, error = %e, "ensure watching failed; parking");
                self.parked.insert(gvk);
            }
        }
    }

    /// Try every parked type once more.
    pub async fn retry_parked(&mut self) {
        let pending: Vec<Gvk> = self.parked.iter().cloned().collect();
        for gvk in pending {
            self.ensure(gvk).await;
        }
    }

    /// Watch rules cluster-wide until `shutdown` fires or the stream ends.
    pub async fn run(self, client: Client, shutdown: CancellationToken) -> Result<()> {
        let api: Api<ResourceAction> = Api::all(client);
        let rules = watcher::watcher(api, watcher::Config::default()).default_backoff();
        self.drive(rules, shutdown).await
    }

    pub async fn drive<S>(mut self, rules: S, shutdown: CancellationToken) -> Result<()>
    where
        S: Stream<Item = Result<Event<ResourceAction>, watcher::Error>> + Send,
    {
        let mut rules = std::pin::pin!(rules);
        let mut requeue = tokio::time::interval_at(tokio::time::Instant::now() + self.requeue, self.requeue);
        requeue.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("rule reconciler started");
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = requeue.tick() => {
                    if !self.parked.is_empty() {
                        self.retry_parked().await;
                    }
                }
                next = rules.next() => match next {
                    Some(Ok(Event::Applied(rule))) => self.observe(&rule).await,
                    Some(Ok(Event::Restarted(list))) => {
                        for rule in &list {
                            self.observe(rule).await;
                        }
                    }
                    // Watches stay up after their last rule goes away.
                    Some(Ok(Event::Deleted(rule))) => debug!(rule = %rule.rule_id(), "rule deleted"),
                    Some(Err(e)) => warn!(error = %e, "rule watch error"),
                    None => {
                        warn!("rule watch ended");
                        break;
                    }
                },
            }
        }
        info!("rule reconciler stopped");
        Ok(())
    }
}
