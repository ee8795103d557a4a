//! Shared bookkeeping for watch sessions, interval tasks and in-flight ledger claims.
//!
//! Everything sits behind one mutex so registration checks and inserts are a
//! single critical section. The lock is never held across an await.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use resact_core::{EventType, Gvk, RuleId};
use tokio_util::sync::CancellationToken;

use crate::ports::WatchTarget;

/// Identity of a running interval task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskKey {
    pub rule: RuleId,
    pub object_uid: String,
    pub action_index: usize,
    pub event: EventType,
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}/{}", self.rule, self.object_uid, self.action_index, self.event)
    }
}

/// Once-mode dedup key: (rule, object, event).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerKey {
    /// Rule uid when known, `ns/name` otherwise, so a recreated rule starts fresh.
    pub rule: String,
    pub object_uid: String,
    pub event: EventType,
}

struct Session {
    id: u64,
    target: WatchTarget,
    token: CancellationToken,
}

#[derive(Default)]
struct Inner {
    started: bool,
    next_session: u64,
    sessions: HashMap<Gvk, Session>,
    tasks: HashMap<TaskKey, CancellationToken>,
    claimed: HashSet<LedgerKey>,
}

pub struct Registry {
    root: CancellationToken,
    inner: Mutex<Inner>,
}

impl Registry {
    pub fn new(root: CancellationToken) -> Self { Self { root, inner: Mutex::new(Inner::default()) } }

    fn lock(&self) -> MutexGuard<'_, Inner> { self.inner.lock().unwrap_or_else(PoisonError::into_inner) }

    /// Cancelled on engine shutdown; every session and task token descends from it.
    pub fn root(&self) -> &CancellationToken { &self.root }

    /// Flip the started flag. Returns true only for the first caller.
    pub fn mark_started(&self) -> bool {
        let mut g = self.lock();
        !std::mem::replace(&mut g.started, true)
    }

    pub fn is_started(&self) -> bool { self.lock().started }

    /// Register a session for `gvk`, returning its id and token. `None` if one
    /// already exists.
    pub fn register_session(&self, gvk: &Gvk, target: WatchTarget) -> Option<(u64, CancellationToken)> {
        let mut g = self.lock();
        if g.sessions.contains_key(gvk) {
            return None;
        }
        g.next_session += 1;
        let id = g.next_session;
        let token = self.root.child_token();
        g.sessions.insert(gvk.clone(), Session { id, target, token: token.clone() });
        Some((id, token))
    }

    pub fn remove_session(&self, gvk: &Gvk) -> Option<CancellationToken> { self.lock().sessions.remove(gvk).map(|s| s.token) }

    /// Remove the session for `gvk` only if it is still session `id`.
    pub fn release_session(&self, gvk: &Gvk, id: u64) -> bool {
        let mut g = self.lock();
        if g.sessions.get(gvk).map(|s| s.id) != Some(id) {
            return false;
        }
        g.sessions.remove(gvk);
        true
    }

    pub fn is_watching(&self, gvk: &Gvk) -> bool { self.lock().sessions.contains_key(gvk) }

    /// Resolved targets of every live session, ordered by GVK.
    pub fn watched(&self) -> Vec<WatchTarget> {
        let mut out: Vec<WatchTarget> = self.lock().sessions.values().map(|s| s.target.clone()).collect();
        out.sort_by(|a, b| a.gvk.cmp(&b.gvk));
        out
    }

    /// Register an interval task. The token is a child of the session watching
    /// `gvk` (or of the root when none is), so stopping the session stops it.
    /// `None` if the key is already registered; an existing task is never replaced.
    pub fn register_task(&self, key: TaskKey, gvk: &Gvk) -> Option<CancellationToken> {
        let mut g = self.lock();
        if g.tasks.contains_key(&key) {
            return None;
        }
        let token = match g.sessions.get(gvk) {
            Some(s) => s.token.child_token(),
            None => self.root.child_token(),
        };
        g.tasks.insert(key, token.clone());
        Some(token)
    }

    pub fn remove_task(&self, key: &TaskKey) -> bool { self.lock().tasks.remove(key).is_some() }

    pub fn has_task(&self, key: &TaskKey) -> bool { self.lock().tasks.contains_key(key) }

    pub fn task_count(&self) -> usize { self.lock().tasks.len() }

    /// Claim a ledger key for execution. False when already claimed by this process.
    pub fn claim(&self, key: LedgerKey) -> bool { self.lock().claimed.insert(key) }

    /// Drop a claim once the persisted ledger covers it.
    pub fn release(&self, key: &LedgerKey) -> bool { self.lock().claimed.remove(key) }

    pub fn claim_count(&self) -> usize { self.lock().claimed.len() }
}
