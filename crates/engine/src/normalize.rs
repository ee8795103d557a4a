//! Turns raw watch notifications into Create/Update/Delete lifecycle events.
//!
//! A watch stream only reports "applied" and "deleted"; telling a creation from
//! an update, and noticing deletions missed during a disconnect, needs the set of
//! objects already seen on this stream. Each session owns one [`Normalizer`].

use std::collections::{HashMap, HashSet};

use resact_core::{EventType, Gvk, LifecycleEvent, ObjectSnapshot, ObjectState};
use tracing::debug;

use crate::ports::WatchNotification;

pub struct Normalizer {
    gvk: Gvk,
    /// Last snapshot per identity (uid, or ns/name when the uid is missing).
    known: HashMap<String, ObjectSnapshot>,
}

impl Normalizer {
    pub fn new(gvk: Gvk) -> Self { Self { gvk, known: HashMap::new() } }

    pub fn tracked(&self) -> usize { self.known.len() }

    pub fn push(&mut self, notification: WatchNotification) -> Vec<LifecycleEvent> {
        match notification {
            WatchNotification::Applied(raw) => self.applied(raw).into_iter().collect(),
            WatchNotification::Deleted(raw) => self.deleted(raw).into_iter().collect(),
            WatchNotification::Restarted(list) => self.restarted(list),
        }
    }

    fn applied(&mut self, raw: serde_json::Value) -> Option<LifecycleEvent> {
        let Some(snap) = ObjectSnapshot::from_value(raw) else {
            debug!(gvk = %self.gvk, "discarding applied object without identity");
            return None;
        };
        self.observe(snap)
    }

    fn observe(&mut self, snap: ObjectSnapshot) -> Option<LifecycleEvent> {
        match self.known.insert(snap.identity(), snap.clone()) {
            None => Some(LifecycleEvent::live(EventType::Create, self.gvk.clone(), snap)),
            // Same resourceVersion means nothing changed (typically a relist).
            Some(prev) if prev.resource_version.is_some() && prev.resource_version == snap.resource_version => None,
            Some(_) => Some(LifecycleEvent::live(EventType::Update, self.gvk.clone(), snap)),
        }
    }

    fn deleted(&mut self, raw: serde_json::Value) -> Option<LifecycleEvent> {
        let Some(snap) = ObjectSnapshot::from_value(raw) else {
            debug!(gvk = %self.gvk, "discarding delete without identity");
            return None;
        };
        if !snap.uid.is_empty() {
            self.known.remove(&snap.uid);
            return Some(self.delete_event(ObjectState::Live(snap)));
        }
        let key = snap.key();
        let last = self.known.iter().find(|(_, s)| s.key() == key).map(|(id, _)| id.clone()).and_then(|id| self.known.remove(&id));
        Some(self.delete_event(ObjectState::LastKnown(last.unwrap_or(snap))))
    }

    fn restarted(&mut self, list: Vec<serde_json::Value>) -> Vec<LifecycleEvent> {
        let mut out = Vec::new();
        let mut present = HashSet::new();
        for raw in list {
            let Some(snap) = ObjectSnapshot::from_value(raw) else { continue };
            present.insert(snap.identity());
            out.extend(self.observe(snap));
        }
        let gone: Vec<String> = self.known.keys().filter(|id| !present.contains(*id)).cloned().collect();
        for id in gone {
            if let Some(last) = self.known.remove(&id) {
                debug!(gvk = %self.gvk, name = %last.key(), "object vanished across relist");
                out.push(self.delete_event(ObjectState::LastKnown(last)));
            }
        }
        out
    }

    fn delete_event(&self, object: ObjectState) -> LifecycleEvent {
        LifecycleEvent { event_type: EventType::Delete, gvk: self.gvk.clone(), object }
    }
}
