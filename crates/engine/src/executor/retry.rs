//! Retry policy, backoff schedule and status expectations for HTTP actions.

use std::collections::BTreeSet;
use std::time::Duration;

use rand::Rng;
use regex::Regex;
use resact_core::{EngineError, EngineResult, RetrySpec};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(10);
pub const DEFAULT_RETRY_ON_STATUS: [u16; 5] = [429, 500, 502, 503, 504];
pub const DEFAULT_EXPECTED_STATUS: &str = "^2..$";

/// Parse a positive duration such as "500ms", "30s" or "1m 30s".
pub fn parse_duration(field: &str, raw: &str) -> EngineResult<Duration> {
    let d = humantime::parse_duration(raw.trim()).map_err(|e| EngineError::config(format!("invalid {field} {raw:?}: {e}")))?;
    if d.is_zero() {
        return Err(EngineError::config(format!("{field} must be positive, got {raw:?}")));
    }
    Ok(d)
}

/// `parse_duration` for optional fields; absent or blank yields `default`.
pub fn duration_or(field: &str, raw: Option<&str>, default: Duration) -> EngineResult<Duration> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => parse_duration(field, s),
        None => Ok(default),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; at least 1.
    pub max_attempts: u32,
    pub backoff: Duration,
    pub max_backoff: Duration,
    pub retry_on_network_error: bool,
    pub retry_on_status: BTreeSet<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            backoff: DEFAULT_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            retry_on_network_error: true,
            retry_on_status: DEFAULT_RETRY_ON_STATUS.into_iter().collect(),
        }
    }
}

impl RetryPolicy {
    pub fn from_spec(spec: Option<&RetrySpec>) -> EngineResult<Self> {
        let d = Self::default();
        let Some(spec) = spec else { return Ok(d) };
        Ok(Self {
            max_attempts: spec.max_attempts.unwrap_or(d.max_attempts).max(1),
            backoff: duration_or("retry.backoff", spec.backoff.as_deref(), d.backoff)?,
            max_backoff: duration_or("retry.maxBackoff", spec.max_backoff.as_deref(), d.max_backoff)?,
            retry_on_network_error: spec.retry_on_network_error.unwrap_or(d.retry_on_network_error),
            retry_on_status: match &spec.retry_on_status {
                Some(codes) if !codes.is_empty() => codes.iter().copied().collect(),
                _ => d.retry_on_status,
            },
        })
    }

    /// Un-jittered pause after failed attempt `attempt` (1-based): doubles from
    /// `backoff`, capped at `max_backoff`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(31);
        self.backoff.checked_mul(1u32 << shift).unwrap_or(self.max_backoff).min(self.max_backoff)
    }

    /// `base_delay` plus uniform jitter in `[0, base/4)`.
    pub fn backoff_delay<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base_delay(attempt);
        let spread = u64::try_from((base / 4).as_nanos()).unwrap_or(u64::MAX);
        if spread == 0 {
            return base;
        }
        base + Duration::from_nanos(rng.gen_range(0..spread))
    }

    pub fn has_attempts_left(&self, attempt: u32) -> bool { attempt < self.max_attempts }

    pub fn retries_status(&self, status: u16) -> bool { self.retry_on_status.contains(&status) }
}

/// Regex tested against the decimal status code.
#[derive(Debug, Clone)]
pub struct StatusExpectation(Regex);

impl StatusExpectation {
    pub fn new(pattern: Option<&str>) -> EngineResult<Self> {
        let pattern = pattern.map(str::trim).filter(|p| !p.is_empty()).unwrap_or(DEFAULT_EXPECTED_STATUS);
        Regex::new(pattern)
            .map(Self)
            .map_err(|e| EngineError::config(format!("invalid expectedStatus {pattern:?}: {e}")))
    }

    pub fn matches(&self, status: u16) -> bool { self.0.is_match(&status.to_string()) }
}
