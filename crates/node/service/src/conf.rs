//! Driver configuration.

use std::time::Duration;

/// The deadline for delivering a base-layer signal into the driver.
pub const L1_SIGNAL_TIMEOUT: Duration = Duration::from_secs(10);

/// The deadline for an alt-sync range request.
pub const ALT_SYNC_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// How long a halted driver idles before teardown, to avoid restart-loop
/// amplification.
pub const HALT_GRACE_PERIOD: Duration = Duration::from_secs(5 * 60);

/// Driver settings: verifier and sequencer behavior. Not modified after the
/// driver starts.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Whether the driver should sequence new blocks.
    pub sequencer_enabled: bool,
    /// Whether the sequencer starts out stopped.
    pub sequencer_stopped: bool,
    /// Abort sequencing when the unsafe head runs this many blocks ahead of
    /// the safe head. Zero disables the check.
    pub sequencer_max_safe_lag: u64,
    /// Start the sequencer in recover mode: empty blocks on the exact next
    /// base-layer origin.
    pub recover_mode: bool,
    /// Resets are directed by an external supervisor instead of taken
    /// internally.
    pub managed_mode: bool,
    /// The upper bound on a range-sync batch.
    pub max_requests_per_batch: u64,
    /// The deadline for persisting a safe-head entry.
    pub safe_head_persist_timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            sequencer_enabled: false,
            sequencer_stopped: false,
            sequencer_max_safe_lag: 0,
            recover_mode: false,
            managed_mode: false,
            max_requests_per_batch: 20,
            safe_head_persist_timeout: Duration::from_secs(10),
        }
    }
}
