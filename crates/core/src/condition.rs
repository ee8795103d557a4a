//! Status conditions with transition-time bookkeeping.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const READY: &str = "Ready";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// `Ready` condition for the outcome of a dispatch. The transition time is
    /// provisional; [`set_condition`] decides the stored value.
    pub fn ready(ok: bool, reason: &str, message: impl Into<String>, generation: Option<i64>, now: DateTime<Utc>) -> Self {
        Self {
            type_: READY.to_string(),
            status: if ok { ConditionStatus::True } else { ConditionStatus::False },
            reason: reason.to_string(),
            message: message.into(),
            observed_generation: generation,
            last_transition_time: now,
        }
    }
}

/// Upsert `cond` by type. `last_transition_time` moves to `now` only when the
/// status differs from the stored condition of the same type.
pub fn set_condition(conditions: &mut Vec<Condition>, mut cond: Condition, now: DateTime<Utc>) {
    match conditions.iter_mut().find(|c| c.type_ == cond.type_) {
        Some(existing) => {
            cond.last_transition_time = if existing.status != cond.status { now } else { existing.last_transition_time };
            *existing = cond;
        }
        None => {
            cond.last_transition_time = now;
            conditions.push(cond);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> { Utc.timestamp_opt(secs, 0).single().expect("valid ts") }

    #[test]
    fn first_condition_gets_now() {
        let mut conds = Vec::new();
        set_condition(&mut conds, Condition::ready(true, "ActionSucceeded", "ok", Some(1), at(0)), at(10));
        assert_eq!(conds.len(), 1);
        assert_eq!(conds[0].last_transition_time, at(10));
    }

    #[test]
    fn same_status_keeps_transition_time_but_updates_reason() {
        let mut conds = Vec::new();
        set_condition(&mut conds, Condition::ready(false, "ActionFailed", "first", Some(1), at(0)), at(10));
        set_condition(&mut conds, Condition::ready(false, "InvalidConfig", "second", Some(2), at(0)), at(20));
        assert_eq!(conds.len(), 1);
        assert_eq!(conds[0].last_transition_time, at(10));
        assert_eq!(conds[0].reason, "InvalidConfig");
        assert_eq!(conds[0].message, "second");
        assert_eq!(conds[0].observed_generation, Some(2));
    }

    #[test]
    fn status_flip_moves_transition_time() {
        let mut conds = Vec::new();
        set_condition(&mut conds, Condition::ready(false, "ActionFailed", "x", None, at(0)), at(10));
        set_condition(&mut conds, Condition::ready(true, "ActionSucceeded", "y", None, at(0)), at(30));
        assert_eq!(conds[0].status, ConditionStatus::True);
        assert_eq!(conds[0].last_transition_time, at(30));
    }

    #[test]
    fn other_types_are_left_alone() {
        let mut conds = vec![Condition {
            type_: "Synced".into(),
            status: ConditionStatus::True,
            reason: String::new(),
            message: String::new(),
            observed_generation: None,
            last_transition_time: at(1),
        }];
        set_condition(&mut conds, Condition::ready(true, "ActionSucceeded", "", None, at(0)), at(5));
        assert_eq!(conds.len(), 2);
        assert_eq!(conds[0].last_transition_time, at(1));
    }
}
