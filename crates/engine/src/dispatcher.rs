//! Rule dispatch: match an event against every rule, run the immediate actions
//! at most once per (rule, object, event) and record the outcome in status.

use std::sync::Arc;

use chrono::Utc;
use kube::ResourceExt;
use metrics::counter;
use resact_core::{EngineResult, ExecutionRecord, LifecycleEvent, ResourceAction};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::executor::{ActionContext, ExecutorRegistry};
use crate::matcher::rule_matches;
use crate::ports::{RuleStore, SecretStore};
use crate::registry::{LedgerKey, Registry};
use crate::scheduler::Scheduler;
use crate::secrets::resolve_headers;
use crate::status::persist_outcome;

pub struct Dispatcher {
    rules: Arc<dyn RuleStore>,
    secrets: Arc<dyn SecretStore>,
    executors: Arc<ExecutorRegistry>,
    scheduler: Arc<Scheduler>,
    registry: Arc<Registry>,
    config: EngineConfig,
}

impl Dispatcher {
    pub fn new(
        rules: Arc<dyn RuleStore>,
        secrets: Arc<dyn SecretStore>,
        executors: Arc<ExecutorRegistry>,
        scheduler: Arc<Scheduler>,
        registry: Arc<Registry>,
        config: EngineConfig,
    ) -> Self {
        Self { rules, secrets, executors, scheduler, registry, config }
    }

    /// Ledger claims held in memory, i.e. executions whose record is not persisted.
    pub fn claims_held(&self) -> usize { self.registry.claim_count() }

    /// Dispatch one event to every matching rule. A failing rule does not stop
    /// the others; the first error is returned once all have been processed.
    pub async fn on_event(&self, event: &LifecycleEvent) -> EngineResult<()> {
        counter!("resact_dispatch_total", 1u64, "event" => event.event_type.as_str());
        let rules = self.rules.list().await?;
        if let Err(e) = self.scheduler.arm_matching(event, &rules) {
            warn!(gvk = %event.gvk, name = %event.snapshot().name, error = %e, "could not arm every interval action");
        }
        let mut first_err = None;
        for rule in rules.iter().filter(|r| rule_matches(r, event)) {
            if let Err(e) = self.dispatch_rule(rule, event).await {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    async fn dispatch_rule(&self, rule: &ResourceAction, event: &LifecycleEvent) -> EngineResult<()> {
        let id = rule.rule_id();
        let obj = event.snapshot();
        let uid = obj.identity();
        if rule.has_executed(&uid, event.event_type) {
            debug!(rule = %id, uid = %uid, event = %event.event_type, "already executed; skipping");
            return Ok(());
        }
        let claim = LedgerKey { rule: rule.uid().unwrap_or_else(|| id.to_string()), object_uid: uid.clone(), event: event.event_type };
        if !self.registry.claim(claim.clone()) {
            debug!(rule = %id, uid = %uid, event = %event.event_type, "already claimed; skipping");
            return Ok(());
        }
        // The listed copy may predate a ledger write that landed since; the claim
        // is only dropped after such a write, so a fresh read closes the gap.
        match self.rules.get(&id).await {
            Ok(fresh) if fresh.has_executed(&uid, event.event_type) => {
                self.registry.release(&claim);
                debug!(rule = %id, uid = %uid, event = %event.event_type, "executed since listing; skipping");
                return Ok(());
            }
            Ok(_) => {}
            Err(e) => {
                self.registry.release(&claim);
                if e.is_not_found() {
                    debug!(rule = %id, "rule deleted before dispatch");
                    return Ok(());
                }
                return Err(e);
            }
        }

        let outcome = self.run_immediate(rule, event).await;
        match &outcome {
            Ok(()) => info!(rule = %id, name = %obj.key(), event = %event.event_type, "actions executed"),
            Err(e) => {
                counter!("resact_action_failures_total", 1u64, "reason" => e.reason());
                warn!(rule = %id, name = %obj.key(), event = %event.event_type, error = %e, "action failed");
            }
        }

        let record = ExecutionRecord { resource_uid: uid, event: event.event_type, executed_at: Utc::now() };
        if let Err(e) = persist_outcome(&*self.rules, &id, &record, outcome.as_ref().map(|_| ()), &self.config).await {
            // The claim stays: it is now the only record that this key ran.
            warn!(rule = %id, error = %e, "failed to update status");
            return Err(e);
        }
        self.registry.release(&claim);
        outcome
    }

    /// Immediate actions in declared order; stops at the first failure.
    async fn run_immediate(&self, rule: &ResourceAction, event: &LifecycleEvent) -> EngineResult<()> {
        let namespace = rule.namespace().unwrap_or_default();
        for (index, action) in rule.spec.actions.iter().enumerate().filter(|(_, a)| !a.is_interval()) {
            debug!(rule = %rule.name_any(), action_index = index, kind = %action.action_type, url = %action.url, "running action");
            let headers = resolve_headers(&*self.secrets, &namespace, &action.headers).await?;
            let ctx = ActionContext { action, namespace: &namespace, object: event.snapshot(), headers: &headers };
            self.executors.execute(ctx).await?;
        }
        Ok(())
    }
}
