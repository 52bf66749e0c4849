//! Pool, monitor, and driver configuration.
//!
//! Plain structs with production defaults. The binary fills these from
//! flags/env (see `main.rs`); embedders construct them directly.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Number of slots. Fixed for the lifetime of the process.
    pub size: usize,
    /// A LEASED slot idle longer than this is unilaterally reclaimed.
    pub inactivity_timeout: Duration,
    /// Maximum number of waiters; acquire beyond this is rejected.
    pub max_queue_depth: usize,
    /// A waiter that has not re-polled acquire within this window is
    /// dropped from the queue and never promoted.
    pub queue_staleness_timeout: Duration,
    /// Advisory per-position wait estimate reported to queued callers.
    pub turnaround_estimate: Duration,
    /// Deadline for one driver round trip; on expiry the slot goes to
    /// ERROR because the far side's outcome is unknown.
    pub send_timeout: Duration,
    /// Upper bound on binary attachments per send.
    pub max_files_per_send: usize,
    /// Optional per-lease quotas. `None` means unlimited; counters are
    /// tracked either way.
    pub max_messages_per_lease: Option<u64>,
    pub max_upload_bytes_per_lease: Option<u64>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 4,
            inactivity_timeout: Duration::from_secs(300),
            max_queue_depth: 10,
            queue_staleness_timeout: Duration::from_secs(120),
            turnaround_estimate: Duration::from_secs(30),
            send_timeout: Duration::from_secs(2400),
            max_files_per_send: 9,
            max_messages_per_lease: None,
            max_upload_bytes_per_lease: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Cadence of the lease inactivity sweep.
    pub sweep_interval: Duration,
    /// Cadence of the driver health poll.
    pub health_check_interval: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
            health_check_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Base URL of the automation sidecar, e.g. `http://127.0.0.1:9222`.
    pub base_url: String,
    /// Timeout for non-send sidecar calls (open/reset/system). Sends use
    /// `PoolConfig::send_timeout` instead.
    pub request_timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9222".to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}
