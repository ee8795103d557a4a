//! Interval actions: one task per (rule, object, action, event), re-running the
//! action every `schedule` until the rule goes away or its session is stopped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use resact_core::{ActionSpec, EngineResult, EventType, LifecycleEvent, ResourceAction};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::executor::retry::parse_duration;
use crate::executor::{ActionContext, ExecutorRegistry};
use crate::matcher::rule_matches;
use crate::ports::{RuleStore, SecretStore};
use crate::registry::{Registry, TaskKey};
use crate::secrets::resolve_headers;

pub struct Scheduler {
    rules: Arc<dyn RuleStore>,
    secrets: Arc<dyn SecretStore>,
    executors: Arc<ExecutorRegistry>,
    registry: Arc<Registry>,
    started: AtomicBool,
}

impl Scheduler {
    pub fn new(
        rules: Arc<dyn RuleStore>,
        secrets: Arc<dyn SecretStore>,
        executors: Arc<ExecutorRegistry>,
        registry: Arc<Registry>,
    ) -> Self {
        Self { rules, secrets, executors, registry, started: AtomicBool::new(false) }
    }

    /// Allow tasks to be armed. Idempotent.
    pub fn start(&self) {
        if !self.started.swap(true, Ordering::SeqCst) {
            info!("interval scheduler started");
        }
    }

    pub fn is_started(&self) -> bool { self.started.load(Ordering::SeqCst) }

    pub fn task_count(&self) -> usize { self.registry.task_count() }

    /// Arm interval tasks for every rule matching `event`, listing rules first.
    pub async fn ensure_for_match(&self, event: &LifecycleEvent) -> EngineResult<()> {
        if !self.is_started() {
            return Ok(());
        }
        let rules = self.rules.list().await?;
        self.arm_matching(event, &rules)
    }

    /// Arm interval tasks for `event` against an already-listed rule set. Keys
    /// already running are left alone and actions without a `schedule` are
    /// ignored. A malformed `schedule` skips that action and is reported after
    /// the others are armed.
    pub fn arm_matching(&self, event: &LifecycleEvent, rules: &[ResourceAction]) -> EngineResult<()> {
        if !self.is_started() {
            return Ok(());
        }
        let mut first_err = None;
        for rule in rules.iter().filter(|r| r.spec.actions.iter().any(ActionSpec::is_interval)) {
            if !rule_matches(rule, event) {
                continue;
            }
            let id = rule.rule_id();
            for (index, action) in rule.spec.actions.iter().enumerate().filter(|(_, a)| a.is_interval()) {
                let Some(schedule) = action.schedule.as_deref().filter(|s| !s.trim().is_empty()) else { continue };
                let key = TaskKey {
                    rule: id.clone(),
                    object_uid: event.snapshot().identity(),
                    action_index: index,
                    event: event.event_type,
                };
                if self.registry.has_task(&key) {
                    continue;
                }
                let period = match parse_duration("schedule", schedule) {
                    Ok(p) => p,
                    Err(e) => {
                        warn!(rule = %id, action_index = index, error = %e, "skipping interval action");
                        first_err.get_or_insert(e);
                        continue;
                    }
                };
                let Some(token) = self.registry.register_task(key.clone(), &event.gvk) else { continue };
                counter!("resact_interval_tasks_armed_total", 1u64);
                info!(task = %key, period = ?period, name = %event.snapshot().name, "starting interval action");
                let task = IntervalTask {
                    key,
                    period,
                    action: action.clone(),
                    namespace: id.namespace.clone(),
                    event: event.clone(),
                    rules: self.rules.clone(),
                    secrets: self.secrets.clone(),
                    executors: self.executors.clone(),
                    registry: self.registry.clone(),
                };
                tokio::spawn(task.run(token));
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

/// Everything captured when a task is armed. The action and event stay fixed
/// for the task's life; headers are re-resolved on every tick.
struct IntervalTask {
    key: TaskKey,
    period: Duration,
    action: ActionSpec,
    namespace: String,
    event: LifecycleEvent,
    rules: Arc<dyn RuleStore>,
    secrets: Arc<dyn SecretStore>,
    executors: Arc<ExecutorRegistry>,
    registry: Arc<Registry>,
}

impl IntervalTask {
    async fn run(self, token: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    info!(task = %self.key, "interval action cancelled");
                    break;
                }
                _ = ticker.tick() => {}
            }
            // A deleted object never comes back, so there is nothing to re-check.
            if self.event.event_type != EventType::Delete {
                match self.rules.get(&self.key.rule).await {
                    Ok(_) => {}
                    Err(e) if e.is_not_found() => {
                        info!(task = %self.key, "rule gone; stopping interval action");
                        break;
                    }
                    Err(e) => {
                        warn!(task = %self.key, error = %e, "rule lookup failed; skipping tick");
                        continue;
                    }
                }
            }
            self.tick().await;
        }
        self.registry.remove_task(&self.key);
    }

    async fn tick(&self) {
        let headers = match resolve_headers(&*self.secrets, &self.namespace, &self.action.headers).await {
            Ok(h) => h,
            Err(e) => {
                warn!(task = %self.key, error = %e, "interval action headers unresolved");
                return;
            }
        };
        let ctx = ActionContext { action: &self.action, namespace: &self.namespace, object: self.event.snapshot(), headers: &headers };
        match self.executors.execute(ctx).await {
            Ok(()) => debug!(task = %self.key, "interval action ran"),
            Err(e) => warn!(task = %self.key, error = %e, "interval action failed"),
        }
    }
}
