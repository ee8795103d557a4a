mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use resact_core::{ActionMode, ActionSpec, EngineError, EventType, RuleId};
use resact_engine::{ExecutorRegistry, Registry, Scheduler};
use tokio_util::sync::CancellationToken;

fn interval_action(url: &str, schedule: &str) -> ActionSpec {
    ActionSpec { mode: ActionMode::Interval, schedule: Some(schedule.into()), ..http_action(url) }
}

struct Harness {
    rules: Arc<FakeRules>,
    exec: Arc<RecordingExecutor>,
    root: CancellationToken,
    scheduler: Scheduler,
}

fn harness(rules: Arc<FakeRules>) -> Harness {
    let exec = Arc::new(RecordingExecutor::default());
    let mut executors = ExecutorRegistry::new();
    executors.register("http", exec.clone());
    let root = CancellationToken::new();
    let registry = Arc::new(Registry::new(root.clone()));
    let scheduler = Scheduler::new(rules.clone(), Arc::new(FakeSecrets::default()), Arc::new(executors), registry);
    scheduler.start();
    Harness { rules, exec, root, scheduler }
}

#[tokio::test(start_paused = true)]
async fn interval_action_stops_after_rule_removal() {
    let h = harness(FakeRules::with(vec![rule(
        "default",
        "heartbeat",
        vec![EventType::Create],
        vec![interval_action("http://hook/beat", "30s")],
    )]));
    let ev = event(EventType::Create, "cm-a", "uid-a");

    h.scheduler.ensure_for_match(&ev).await.expect("armed");
    h.scheduler.ensure_for_match(&ev).await.expect("re-arm is a no-op");
    assert_eq!(h.scheduler.task_count(), 1);
    assert_eq!(h.exec.count(), 0, "nothing runs before the first tick");

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(h.exec.count(), 2);
    {
        let calls = h.exec.calls.lock().unwrap();
        assert!(calls.iter().all(|(url, obj, _)| url == "http://hook/beat" && obj.uid == "uid-a"));
    }

    h.rules.remove(&RuleId::new("default", "heartbeat"));
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.exec.count(), 2, "rule gone: tick exits without running");
    assert_eq!(h.scheduler.task_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn matching_event_does_not_reset_running_interval() {
    let h = harness(FakeRules::with(vec![rule(
        "default",
        "heartbeat",
        vec![EventType::Create],
        vec![interval_action("http://hook/beat", "30s")],
    )]));
    let ev = event(EventType::Create, "cm-a", "uid-a");
    h.scheduler.ensure_for_match(&ev).await.expect("armed");

    tokio::time::sleep(Duration::from_secs(20)).await;
    h.scheduler.ensure_for_match(&ev).await.expect("no-op");
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(h.exec.count(), 1, "first tick still at 30s");
}

#[tokio::test(start_paused = true)]
async fn distinct_objects_get_distinct_tasks() {
    let h = harness(FakeRules::with(vec![rule(
        "default",
        "heartbeat",
        vec![EventType::Create, EventType::Update],
        vec![interval_action("http://hook/a", "10s"), http_action("http://hook/once"), interval_action("http://hook/b", "1m")],
    )]));
    h.scheduler.ensure_for_match(&event(EventType::Create, "cm-a", "uid-a")).await.expect("armed");
    h.scheduler.ensure_for_match(&event(EventType::Create, "cm-b", "uid-b")).await.expect("armed");
    h.scheduler.ensure_for_match(&event(EventType::Update, "cm-a", "uid-a")).await.expect("armed");
    // 3 keys (object, event) x 2 interval actions; the once action never arms.
    assert_eq!(h.scheduler.task_count(), 6);
    h.root.cancel();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(h.scheduler.task_count(), 0);
    assert_eq!(h.exec.count(), 0);
}

#[tokio::test(start_paused = true)]
async fn delete_triggered_interval_keeps_running_until_cancelled() {
    let h = harness(FakeRules::with(vec![rule(
        "default",
        "cleanup",
        vec![EventType::Delete],
        vec![interval_action("http://hook/cleanup", "5s")],
    )]));
    h.scheduler.ensure_for_match(&event(EventType::Delete, "cm-a", "uid-a")).await.expect("armed");
    h.rules.remove(&RuleId::new("default", "cleanup"));

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(h.exec.count(), 2, "no rule check for delete-triggered tasks");

    h.root.cancel();
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.exec.count(), 2);
    assert_eq!(h.scheduler.task_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn execution_failures_do_not_stop_the_task() {
    let h = harness(FakeRules::with(vec![rule(
        "default",
        "heartbeat",
        vec![EventType::Create],
        vec![interval_action("http://hook/beat", "1s")],
    )]));
    *h.exec.fail_with.lock().unwrap() = Some(EngineError::Status { status: 500, body: String::new() });
    h.scheduler.ensure_for_match(&event(EventType::Create, "cm-a", "uid-a")).await.expect("armed");

    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(h.exec.count(), 3);
    assert_eq!(h.scheduler.task_count(), 1);
    // Interval runs never touch the ledger.
    assert!(h.rules.current("default", "heartbeat").status.is_none());
}

#[tokio::test]
async fn bad_schedule_is_reported_but_other_actions_arm() {
    let h = harness(FakeRules::with(vec![rule(
        "default",
        "mixed",
        vec![EventType::Create],
        vec![interval_action("http://hook/bad", "every tuesday"), interval_action("http://hook/good", "30s")],
    )]));
    let err = h.scheduler.ensure_for_match(&event(EventType::Create, "cm-a", "uid-a")).await.expect_err("bad schedule");
    assert!(matches!(err, EngineError::Config(_)));
    assert_eq!(h.scheduler.task_count(), 1);
    h.root.cancel();
}

#[tokio::test]
async fn nothing_arms_before_start() {
    let exec = Arc::new(RecordingExecutor::default());
    let mut executors = ExecutorRegistry::new();
    executors.register("http", exec);
    let rules = FakeRules::with(vec![rule(
        "default",
        "heartbeat",
        vec![EventType::Create],
        vec![interval_action("http://hook/beat", "30s")],
    )]);
    let scheduler = Scheduler::new(
        rules,
        Arc::new(FakeSecrets::default()),
        Arc::new(executors),
        Arc::new(Registry::new(CancellationToken::new())),
    );
    scheduler.ensure_for_match(&event(EventType::Create, "cm-a", "uid-a")).await.expect("no-op");
    assert!(!scheduler.is_started());
    assert_eq!(scheduler.task_count(), 0);
}

#[tokio::test]
async fn interval_action_without_schedule_is_ignored() {
    let action = ActionSpec { mode: ActionMode::Interval, ..http_action("http://hook/none") };
    let h = harness(FakeRules::with(vec![rule("default", "empty", vec![EventType::Create], vec![action])]));
    h.scheduler.ensure_for_match(&event(EventType::Create, "cm-a", "uid-a")).await.expect("ignored");
    assert_eq!(h.scheduler.task_count(), 0);
}

#[tokio::test]
async fn uid_less_deletes_are_keyed_by_namespace_and_name() {
    let h = harness(FakeRules::with(vec![rule(
        "default",
        "cleanup",
        vec![EventType::Delete],
        vec![interval_action("http://hook/cleanup", "1h")],
    )]));
    h.scheduler.ensure_for_match(&event(EventType::Delete, "cm-a", "")).await.expect("armed");
    h.scheduler.ensure_for_match(&event(EventType::Delete, "cm-b", "")).await.expect("armed");
    h.scheduler.ensure_for_match(&event(EventType::Delete, "cm-a", "")).await.expect("no-op");
    assert_eq!(h.scheduler.task_count(), 2);
    h.root.cancel();
}
