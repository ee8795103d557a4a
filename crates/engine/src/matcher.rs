//! Rule matching: selector, event set, then the optional object filter.

use regex::Regex;
use resact_core::{FilterSpec, LifecycleEvent, ObjectSnapshot, ResourceAction};
use tracing::debug;

/// Selector, event type and filter all match.
pub fn rule_matches(rule: &ResourceAction, event: &LifecycleEvent) -> bool {
    rule.spec.selector.matches(&event.gvk)
        && rule.spec.events.contains(&event.event_type)
        && filter_matches(rule.spec.filters.as_ref(), event.snapshot())
}

/// Conjunction of label equality, name regex and namespace regex. An absent
/// filter matches everything; an invalid regex matches nothing.
pub fn filter_matches(filter: Option<&FilterSpec>, obj: &ObjectSnapshot) -> bool {
    let Some(f) = filter else { return true };
    if let Some(pattern) = non_empty(f.name_regex.as_deref()) {
        if !regex_matches(pattern, &obj.name) {
            return false;
        }
    }
    if let Some(pattern) = non_empty(f.namespace_regex.as_deref()) {
        if !regex_matches(pattern, obj.namespace.as_deref().unwrap_or_default()) {
            return false;
        }
    }
    f.labels.iter().all(|(k, v)| obj.labels.get(k) == Some(v))
}

fn non_empty(s: Option<&str>) -> Option<&str> { s.filter(|s| !s.is_empty()) }

fn regex_matches(pattern: &str, text: &str) -> bool {
    match Regex::new(pattern) {
        Ok(re) => re.is_match(text),
        Err(e) => {
            debug!(pattern, error = %e, "invalid filter regex; treating as no match");
            false
        }
    }
}
