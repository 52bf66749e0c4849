//! Slot records and the slot state machine.
//!
//! A slot is one pre-opened browser session. Transitions:
//!
//! ```text
//! IDLE -> LEASED -> BUSY -> LEASED -> ... -> IDLE
//!                     \-> ERROR / LOGIN_EXPIRED
//! ```
//!
//! Every transition out of LEASED/BUSY that ends the lease cycle bumps the
//! slot generation, which is what structurally invalidates old tokens.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::lease::{Generation, Lease};

/// Identifies one slot. Slots are numbered `0..size` at startup and the set
/// never changes while the process runs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SlotId(pub usize);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SlotState {
    Idle,
    Leased,
    Busy,
    Error,
    LoginExpired,
}

impl SlotState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Leased => "LEASED",
            Self::Busy => "BUSY",
            Self::Error => "ERROR",
            Self::LoginExpired => "LOGIN_EXPIRED",
        }
    }

    /// States that carry a live lease.
    pub fn is_leased(&self) -> bool {
        matches!(self, Self::Leased | Self::Busy)
    }

    /// States no caller operation can leave; only a reset (and for
    /// LOGIN_EXPIRED, an operator login first) recovers them.
    pub fn is_faulted(&self) -> bool {
        matches!(self, Self::Error | Self::LoginExpired)
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One slot record. Owned exclusively by the pool; all mutation goes
/// through the transition methods so the lease-presence invariant
/// (`state.is_leased() == lease.is_some()`) holds at every step.
#[derive(Debug)]
pub struct Slot {
    id: SlotId,
    state: SlotState,
    generation: Generation,
    lease: Option<Lease>,
}

impl Slot {
    pub fn new(id: SlotId) -> Self {
        Self {
            id,
            state: SlotState::Idle,
            generation: Generation::default(),
            lease: None,
        }
    }

    pub fn id(&self) -> SlotId {
        self.id
    }

    pub fn state(&self) -> SlotState {
        self.state
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn lease(&self) -> Option<&Lease> {
        self.lease.as_ref()
    }

    pub fn owner(&self) -> Option<&str> {
        self.lease.as_ref().map(|l| l.owner.as_str())
    }

    /// Grant a freshly minted lease. Caller must have verified the slot is
    /// IDLE under the pool lock.
    pub fn grant(&mut self, lease: Lease) {
        debug_assert_eq!(self.state, SlotState::Idle);
        debug_assert_eq!(lease.minted_for, self.generation);
        self.state = SlotState::Leased;
        self.lease = Some(lease);
    }

    /// A driver exchange is starting on this slot.
    pub fn begin_send(&mut self, now: Instant) {
        debug_assert_eq!(self.state, SlotState::Leased);
        self.state = SlotState::Busy;
        if let Some(lease) = self.lease.as_mut() {
            lease.last_activity = now;
        }
    }

    /// The exchange completed successfully; back to LEASED with counters
    /// updated.
    pub fn finish_send(&mut self, message: &str, upload_bytes: u64, now: Instant) {
        debug_assert_eq!(self.state, SlotState::Busy);
        self.state = SlotState::Leased;
        if let Some(lease) = self.lease.as_mut() {
            lease.record_exchange(message, upload_bytes, now);
        }
    }

    /// End the lease cycle and return to IDLE (explicit release or
    /// inactivity sweep).
    pub fn release(&mut self) {
        self.end_cycle();
        self.state = SlotState::Idle;
    }

    /// End the cycle and fault the slot; only a reset recovers it.
    pub fn mark_error(&mut self) {
        self.end_cycle();
        self.state = SlotState::Error;
    }

    /// End the cycle and park the slot until an operator logs in again.
    pub fn mark_login_expired(&mut self) {
        self.end_cycle();
        self.state = SlotState::LoginExpired;
    }

    /// A reset is underway: the cycle ends immediately (token dies now) and
    /// the slot is unusable until the driver finishes reinitializing.
    pub fn begin_reset(&mut self) {
        self.end_cycle();
        self.state = SlotState::Error;
    }

    /// Driver reinitialization succeeded.
    pub fn finish_reset(&mut self) {
        debug_assert!(self.lease.is_none());
        self.state = SlotState::Idle;
    }

    /// How long the lease has been idle, if one is live.
    pub fn idle_for(&self, now: Instant) -> Option<Duration> {
        self.lease.as_ref().map(|l| l.idle_for(now))
    }

    fn end_cycle(&mut self) {
        self.generation.bump();
        self.lease = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lease::LeaseAuthority;

    fn leased_slot(owner: &str) -> Slot {
        let mut slot = Slot::new(SlotId(0));
        let auth = LeaseAuthority::new(Duration::from_secs(300));
        let lease = auth.mint(owner, slot.generation(), Instant::now());
        slot.grant(lease);
        slot
    }

    #[test]
    fn new_slot_is_idle_without_lease() {
        let slot = Slot::new(SlotId(3));
        assert_eq!(slot.state(), SlotState::Idle);
        assert_eq!(slot.generation(), Generation(0));
        assert!(slot.lease().is_none());
        assert!(slot.owner().is_none());
    }

    #[test]
    fn grant_carries_the_lease() {
        let slot = leased_slot("alice");
        assert_eq!(slot.state(), SlotState::Leased);
        assert_eq!(slot.owner(), Some("alice"));
        assert!(slot.state().is_leased());
    }

    #[test]
    fn send_round_trip_updates_counters() {
        let mut slot = leased_slot("alice");
        let now = Instant::now();

        slot.begin_send(now);
        assert_eq!(slot.state(), SlotState::Busy);

        slot.finish_send("hello there", 42, now);
        assert_eq!(slot.state(), SlotState::Leased);

        let lease = slot.lease().unwrap();
        assert_eq!(lease.message_count, 1);
        assert_eq!(lease.bytes_uploaded, 42);
        assert_eq!(lease.last_message_preview.as_deref(), Some("hello there"));
    }

    #[test]
    fn release_bumps_generation_and_clears_lease() {
        let mut slot = leased_slot("alice");
        let before = slot.generation();

        slot.release();

        assert_eq!(slot.state(), SlotState::Idle);
        assert!(slot.lease().is_none());
        assert_eq!(slot.generation(), Generation(before.0 + 1));
    }

    #[test]
    fn every_cycle_end_bumps_generation() {
        let mut error_slot = leased_slot("a");
        error_slot.mark_error();
        assert_eq!(error_slot.state(), SlotState::Error);
        assert_eq!(error_slot.generation(), Generation(1));
        assert!(error_slot.lease().is_none());

        let mut expired_slot = leased_slot("b");
        expired_slot.mark_login_expired();
        assert_eq!(expired_slot.state(), SlotState::LoginExpired);
        assert_eq!(expired_slot.generation(), Generation(1));

        let mut reset_slot = leased_slot("c");
        reset_slot.begin_reset();
        assert_eq!(reset_slot.state(), SlotState::Error);
        assert_eq!(reset_slot.generation(), Generation(1));
        reset_slot.finish_reset();
        assert_eq!(reset_slot.state(), SlotState::Idle);
        assert_eq!(reset_slot.generation(), Generation(1));
    }

    #[test]
    fn faulted_states_are_recognized() {
        assert!(SlotState::Error.is_faulted());
        assert!(SlotState::LoginExpired.is_faulted());
        assert!(!SlotState::Idle.is_faulted());
        assert!(!SlotState::Leased.is_faulted());
        assert!(!SlotState::Busy.is_faulted());
    }

    #[test]
    fn states_serialize_screaming_snake_case() {
        let states = [
            SlotState::Idle,
            SlotState::Leased,
            SlotState::Busy,
            SlotState::Error,
            SlotState::LoginExpired,
        ];
        insta::assert_json_snapshot!(states, @r###"
        [
          "IDLE",
          "LEASED",
          "BUSY",
          "ERROR",
          "LOGIN_EXPIRED"
        ]
        "###);
    }
}
