//! Point-in-time pool status.
//!
//! Everything here is assembled in one pass under the pool lock, so a
//! snapshot is internally consistent: counts always add up, and a slot
//! shown as LEASED always carries its owner. Lease tokens are never
//! included; they are credentials, not status.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;

use crate::lease::Generation;
use crate::queue::WaitQueue;
use crate::slot::{Slot, SlotId, SlotState};

#[derive(Debug, Clone, Serialize)]
pub struct SlotSnapshot {
    pub id: SlotId,
    pub state: SlotState,
    pub generation: Generation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease_age_s: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_uploaded: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_preview: Option<String>,
}

impl SlotSnapshot {
    fn of(slot: &Slot, now: Instant) -> Self {
        let lease = slot.lease();
        Self {
            id: slot.id(),
            state: slot.state(),
            generation: slot.generation(),
            owner: lease.map(|l| l.owner.clone()),
            idle_s: lease.map(|l| l.idle_for(now).as_secs()),
            lease_age_s: lease.map(|l| l.age(now).as_secs()),
            message_count: lease.map(|l| l.message_count),
            bytes_uploaded: lease.map(|l| l.bytes_uploaded),
            message_preview: lease.and_then(|l| l.last_message_preview.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WaiterSnapshot {
    pub owner: String,
    pub position: usize,
    pub waiting_s: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SlotCounts {
    pub total: usize,
    pub idle: usize,
    pub leased: usize,
    pub busy: usize,
    pub error: usize,
    pub login_expired: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemSnapshot {
    pub driver_alive: bool,
    pub login_ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_health_check_s: Option<u64>,
    pub uptime_s: u64,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    pub counts: SlotCounts,
    pub slots: Vec<SlotSnapshot>,
    pub queue_depth: usize,
    pub queue: Vec<WaiterSnapshot>,
    pub system: SystemSnapshot,
}

impl PoolSnapshot {
    /// Single read pass. `now` pins the instant all relative figures
    /// (idle seconds, wait seconds) are computed against.
    pub fn assemble(
        slots: &[Slot],
        queue: &WaitQueue,
        system: SystemSnapshot,
        now: Instant,
    ) -> Self {
        let mut counts = SlotCounts {
            total: slots.len(),
            idle: 0,
            leased: 0,
            busy: 0,
            error: 0,
            login_expired: 0,
        };
        for slot in slots {
            match slot.state() {
                SlotState::Idle => counts.idle += 1,
                SlotState::Leased => counts.leased += 1,
                SlotState::Busy => counts.busy += 1,
                SlotState::Error => counts.error += 1,
                SlotState::LoginExpired => counts.login_expired += 1,
            }
        }

        let queue_snapshots: Vec<WaiterSnapshot> = queue
            .waiters()
            .enumerate()
            .map(|(i, w)| WaiterSnapshot {
                owner: w.owner.clone(),
                position: i + 1,
                waiting_s: w.waiting_for(now).as_secs(),
            })
            .collect();

        Self {
            counts,
            slots: slots.iter().map(|s| SlotSnapshot::of(s, now)).collect(),
            queue_depth: queue_snapshots.len(),
            queue: queue_snapshots,
            system,
        }
    }
}
