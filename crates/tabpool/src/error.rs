//! Error taxonomy for pool operations.
//!
//! Every fallible pool operation returns `PoolError`. Queue rejection is
//! deliberately NOT here: a full queue is an expected outcome of `acquire`
//! and is reported as `AcquireOutcome::Rejected`, never as an error.

use std::time::Duration;

use crate::slot::{SlotId, SlotState};

#[derive(Debug, Clone, thiserror::Error)]
pub enum PoolError {
    /// Acquire was given a blank owner label. Leases and queue entries
    /// are keyed by owner, so there is nothing to mint one for.
    #[error("owner must not be empty")]
    InvalidOwner,

    /// The presented token does not match the slot's live lease.
    #[error("lease token does not match the live lease on slot {slot}")]
    Unauthorized { slot: SlotId },

    /// The slot id is outside the pool, or a release named a lease that
    /// does not exist (double release included).
    #[error("{0}")]
    NotFound(String),

    /// The slot exists but its state does not admit the operation.
    #[error("slot {slot} is {state}: {reason}")]
    Conflict {
        slot: SlotId,
        state: SlotState,
        reason: String,
    },

    /// The lease the token was minted for has ended (released, swept for
    /// inactivity, or reset). The token can never become valid again.
    #[error("lease on slot {slot} has expired")]
    Gone { slot: SlotId },

    /// The driver round trip exceeded the configured deadline. The slot is
    /// moved to ERROR because the outcome on the far side is unknown.
    #[error("driver round trip on slot {slot} exceeded {}s", timeout.as_secs())]
    DriverTimeout { slot: SlotId, timeout: Duration },

    /// The driver reported a failure other than a timeout.
    #[error("driver failure on slot {slot}: {detail}")]
    DriverFailure { slot: SlotId, detail: String },

    /// The driver reported that the session's authentication is gone.
    /// Recovery requires an operator to log in again, then reset.
    #[error("login expired on slot {slot}; operator intervention required")]
    LoginExpired { slot: SlotId },

    /// A configured per-lease quota (message count or upload bytes) would
    /// be exceeded. The slot stays LEASED; only this lease is spent.
    #[error("lease quota exceeded on slot {slot}: {detail}")]
    QuotaExceeded { slot: SlotId, detail: String },
}

impl PoolError {
    pub fn unknown_slot(slot: SlotId) -> Self {
        Self::NotFound(format!("slot {slot} does not exist"))
    }

    pub fn unknown_lease(slot: SlotId) -> Self {
        Self::NotFound(format!("no such lease on slot {slot}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_slot() {
        let e = PoolError::Gone { slot: SlotId(3) };
        assert_eq!(e.to_string(), "lease on slot 3 has expired");

        let e = PoolError::unknown_slot(SlotId(9));
        assert_eq!(e.to_string(), "slot 9 does not exist");

        let e = PoolError::DriverTimeout {
            slot: SlotId(0),
            timeout: Duration::from_secs(120),
        };
        assert!(e.to_string().contains("120s"));
    }
}
