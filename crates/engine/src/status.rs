//! Optimistic-concurrency status writes.

use chrono::Utc;
use metrics::counter;
use resact_core::{EngineError, EngineResult, ExecutionRecord, RuleId};
use tracing::debug;

use crate::config::EngineConfig;
use crate::ports::RuleStore;

/// Append `record` to the rule's ledger and set `Ready`/`lastError` from
/// `outcome`. Each attempt re-reads the rule so a conflicting writer's changes
/// are merged, not overwritten. Returns `Conflict` once the attempt budget is spent.
pub async fn persist_outcome(
    rules: &dyn RuleStore,
    id: &RuleId,
    record: &ExecutionRecord,
    outcome: Result<(), &EngineError>,
    config: &EngineConfig,
) -> EngineResult<()> {
    let budget = config.status_update_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let mut latest = rules.get(id).await?;
        let generation = latest.metadata.generation;
        latest.status.get_or_insert_with(Default::default).record_outcome(record.clone(), outcome, generation, Utc::now());
        match rules.update_status(&latest).await {
            Ok(_) => return Ok(()),
            Err(e) if e.is_conflict() => {
                counter!("resact_status_conflicts_total", 1u64);
                if attempt >= budget {
                    return Err(EngineError::Conflict(format!("status of {id} still conflicting after {attempt} attempts")));
                }
                debug!(rule = %id, attempt, "status conflict; retrying");
                tokio::time::sleep(config.status_retry_base * attempt).await;
            }
            Err(e) => return Err(e),
        }
    }
}
