use std::time::Duration;

/// Engine-wide tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Total status write attempts per dispatch before giving up with `Conflict`.
    pub status_update_attempts: u32,
    /// Linear pause between status attempts (attempt n sleeps n * base).
    pub status_retry_base: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self { Self { status_update_attempts: 5, status_retry_base: Duration::from_millis(10) } }
}
