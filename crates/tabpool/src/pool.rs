//! The slot pool: every slot record and every state transition.
//!
//! Locking is two-tier. One std mutex guards the slot table and wait queue;
//! its critical sections are short and never await. One tokio mutex per
//! slot serializes driver sends, so a long round trip on slot 2 never
//! blocks acquire, release, status, or traffic on other slots.
//!
//! A send's outcome is applied only if the slot generation is unchanged
//! since dispatch. Sweeps and resets that land mid-flight therefore win:
//! the late completion returns its result to the caller but cannot
//! resurrect a lease that was already ended.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use crate::config::PoolConfig;
use crate::driver::{Attachment, BrowserDriver, DriverError, SystemInfo};
use crate::error::PoolError;
use crate::lease::{LeaseAuthority, LeaseCheck, LeaseToken};
use crate::queue::WaitQueue;
use crate::slot::{Slot, SlotId, SlotState};
use crate::status::{PoolSnapshot, SystemSnapshot};

/// Result of one acquire call. Rejection is an outcome, not an error.
#[derive(Debug, Clone)]
pub enum AcquireOutcome {
    Acquired {
        slot_id: SlotId,
        token: LeaseToken,
        reattached: bool,
    },
    Queued {
        position: usize,
        estimated_wait: Duration,
    },
    Rejected {
        total_slots: usize,
        queue_depth: usize,
        queue_max: usize,
    },
}

struct PoolCore {
    slots: Vec<Slot>,
    queue: WaitQueue,
}

impl PoolCore {
    fn slot(&self, id: SlotId) -> Result<&Slot, PoolError> {
        self.slots.get(id.0).ok_or_else(|| PoolError::unknown_slot(id))
    }

    fn slot_mut(&mut self, id: SlotId) -> Result<&mut Slot, PoolError> {
        self.slots
            .get_mut(id.0)
            .ok_or_else(|| PoolError::unknown_slot(id))
    }
}

/// Driver health as last observed by a probe.
#[derive(Debug, Clone, Copy)]
struct ObservedHealth {
    info: SystemInfo,
    checked_at: Option<Instant>,
}

pub struct SlotPool {
    core: Mutex<PoolCore>,
    send_locks: Vec<tokio::sync::Mutex<()>>,
    driver: Arc<dyn BrowserDriver>,
    authority: LeaseAuthority,
    config: PoolConfig,
    health: Mutex<ObservedHealth>,
    started_at: Instant,
    started_at_utc: DateTime<Utc>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl SlotPool {
    pub fn new(config: PoolConfig, driver: Arc<dyn BrowserDriver>) -> Self {
        let slots = (0..config.size).map(|i| Slot::new(SlotId(i))).collect();
        let queue = WaitQueue::new(
            config.max_queue_depth,
            config.queue_staleness_timeout,
            config.turnaround_estimate,
        );
        let send_locks = (0..config.size).map(|_| tokio::sync::Mutex::new(())).collect();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Self {
            core: Mutex::new(PoolCore { slots, queue }),
            send_locks,
            driver,
            authority: LeaseAuthority::new(config.inactivity_timeout),
            config,
            health: Mutex::new(ObservedHealth {
                info: SystemInfo::default(),
                checked_at: None,
            }),
            started_at: Instant::now(),
            started_at_utc: Utc::now(),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Open every slot's backing session. A slot whose session fails to
    /// open starts faulted; the rest of the pool serves.
    pub async fn warm_up(&self) {
        let ids: Vec<SlotId> = (0..self.config.size).map(SlotId).collect();
        let results =
            futures::future::join_all(ids.iter().map(|id| self.driver.open_session(*id))).await;

        let mut core = self.core.lock().unwrap();
        for (id, result) in ids.into_iter().zip(results) {
            if let Err(e) = result {
                tracing::error!(slot = %id, error = %e, "Failed to open session during warmup");
                core.slots[id.0].mark_error();
            }
        }
    }

    /// Lease a slot for `owner`, or queue/reject the request.
    ///
    /// `owner` is a caller-supplied label used for reattachment, not an
    /// authenticated principal: whoever presents the same label is the
    /// same caller as far as the pool is concerned. A blank label is
    /// refused, since leases and queue entries are keyed by it.
    pub fn acquire(&self, owner: &str) -> Result<AcquireOutcome, PoolError> {
        if owner.trim().is_empty() {
            return Err(PoolError::InvalidOwner);
        }

        let now = Instant::now();
        let mut core = self.core.lock().unwrap();

        let evicted = core.queue.prune_stale(now);
        if evicted > 0 {
            tracing::info!(evicted, "Dropped stale waiters from the queue");
        }

        // An owner that already holds a lease gets the same one back.
        if let Some(slot) = core
            .slots
            .iter()
            .find(|s| s.state().is_leased() && s.owner() == Some(owner))
        {
            // Lease presence is guaranteed by the is_leased check.
            let token = slot.lease().map(|l| l.token.clone());
            if let Some(token) = token {
                tracing::debug!(slot = %slot.id(), owner, "Acquire reattached to live lease");
                return Ok(AcquireOutcome::Acquired {
                    slot_id: slot.id(),
                    token,
                    reattached: true,
                });
            }
        }

        // An owner already in line stays in line.
        if let Some(position) = core.queue.repoll(owner, now) {
            return Ok(AcquireOutcome::Queued {
                position,
                estimated_wait: core.queue.estimated_wait(position),
            });
        }

        // Lowest-id idle slot wins.
        if let Some(index) = core.slots.iter().position(|s| s.state() == SlotState::Idle) {
            let slot = &mut core.slots[index];
            let lease = self.authority.mint(owner, slot.generation(), now);
            let token = lease.token.clone();
            tracing::info!(
                slot = %slot.id(),
                owner,
                generation = %slot.generation(),
                token = lease.token.redacted(),
                "Slot leased"
            );
            slot.grant(lease);
            return Ok(AcquireOutcome::Acquired {
                slot_id: SlotId(index),
                token,
                reattached: false,
            });
        }

        if let Some(position) = core.queue.enqueue(owner, now) {
            tracing::info!(owner, position, "All slots leased; caller queued");
            return Ok(AcquireOutcome::Queued {
                position,
                estimated_wait: core.queue.estimated_wait(position),
            });
        }

        let faulted = core.slots.iter().filter(|s| s.state().is_faulted()).count();
        tracing::warn!(
            owner,
            depth = core.queue.depth(),
            faulted,
            "Acquire rejected: queue full"
        );
        Ok(AcquireOutcome::Rejected {
            total_slots: core.slots.len(),
            queue_depth: core.queue.depth(),
            queue_max: core.queue.max_depth(),
        })
    }

    /// One message round trip on a leased slot.
    pub async fn send(
        &self,
        slot_id: SlotId,
        token: &str,
        message: &str,
        attachments: &[Attachment],
    ) -> Result<String, PoolError> {
        let upload_bytes: u64 = attachments.iter().map(|a| a.size).sum();

        // Cheap validation before lining up on the slot.
        {
            let core = self.core.lock().unwrap();
            let slot = core.slot(slot_id)?;
            self.check_sendable(slot, token)?;
        }

        let _slot_guard = self.send_locks[slot_id.0].lock().await;

        // Re-validate: the lease may have ended while we waited our turn.
        let dispatch_generation = {
            let mut core = self.core.lock().unwrap();
            let slot = core.slot_mut(slot_id)?;
            self.check_sendable(slot, token)?;
            self.check_quotas(slot, upload_bytes)?;
            slot.begin_send(Instant::now());
            slot.generation()
        };

        tracing::debug!(slot = %slot_id, bytes = upload_bytes, "Dispatching message to driver");
        let result = tokio::time::timeout(
            self.config.send_timeout,
            self.driver.send_message(slot_id, message, attachments),
        )
        .await;

        let now = Instant::now();
        let mut core = self.core.lock().unwrap();
        let slot = core.slot_mut(slot_id)?;

        if slot.generation() != dispatch_generation {
            tracing::warn!(
                slot = %slot_id,
                "Lease ended while a send was in flight; outcome not applied"
            );
            return match result {
                Ok(Ok(reply)) => Ok(reply),
                Ok(Err(e)) => Err(Self::driver_failure(slot_id, e, self.config.send_timeout)),
                Err(_) => Err(PoolError::DriverTimeout {
                    slot: slot_id,
                    timeout: self.config.send_timeout,
                }),
            };
        }

        match result {
            Ok(Ok(reply)) => {
                slot.finish_send(message, upload_bytes, now);
                Ok(reply)
            }
            Ok(Err(DriverError::LoginExpired)) => {
                tracing::error!(slot = %slot_id, "Login expired; slot parked until operator logs in");
                slot.mark_login_expired();
                Err(PoolError::LoginExpired { slot: slot_id })
            }
            Ok(Err(e)) => {
                tracing::error!(slot = %slot_id, error = %e, "Driver send failed; slot faulted");
                slot.mark_error();
                Err(Self::driver_failure(slot_id, e, self.config.send_timeout))
            }
            Err(_) => {
                tracing::error!(
                    slot = %slot_id,
                    timeout_s = self.config.send_timeout.as_secs(),
                    "Send deadline exceeded; slot faulted"
                );
                slot.mark_error();
                Err(PoolError::DriverTimeout {
                    slot: slot_id,
                    timeout: self.config.send_timeout,
                })
            }
        }
    }

    /// End a lease explicitly and hand the slot to the next waiter.
    pub fn release(&self, slot_id: SlotId, token: &str) -> Result<(), PoolError> {
        let now = Instant::now();
        let mut core = self.core.lock().unwrap();

        {
            let slot = core.slot_mut(slot_id)?;
            if !slot.state().is_leased() {
                return Err(PoolError::unknown_lease(slot_id));
            }
            self.authority
                .validate(slot.lease(), slot.generation(), token)
                .map_err(|_| PoolError::unknown_lease(slot_id))?;

            let owner = slot.owner().unwrap_or_default().to_string();
            slot.release();
            tracing::info!(slot = %slot_id, owner, "Lease released");
        }

        self.promote_waiter(&mut core, slot_id, now);
        Ok(())
    }

    /// Reclaim leases idle past the inactivity timeout. Returns how many
    /// slots were reclaimed. BUSY slots (send in flight) are never touched;
    /// the send deadline bounds those.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut core = self.core.lock().unwrap();
        let mut reclaimed = 0;

        for index in 0..core.slots.len() {
            let expired = {
                let slot = &mut core.slots[index];
                if slot.state() == SlotState::Leased
                    && slot.lease().is_some_and(|l| self.authority.expired(l, now))
                {
                    let owner = slot.owner().unwrap_or_default().to_string();
                    let idle_s = slot.idle_for(now).unwrap_or_default().as_secs();
                    slot.release();
                    Some((owner, idle_s))
                } else {
                    None
                }
            };

            if let Some((owner, idle_s)) = expired {
                tracing::info!(
                    slot = %SlotId(index),
                    owner,
                    idle_s,
                    "Lease reclaimed for inactivity"
                );
                self.promote_waiter(&mut core, SlotId(index), now);
                reclaimed += 1;
            }
        }

        let evicted = core.queue.prune_stale(now);
        if evicted > 0 {
            tracing::info!(evicted, "Dropped stale waiters from the queue");
        }

        reclaimed
    }

    /// Force one slot back toward IDLE: end any lease cycle immediately,
    /// then have the driver reinitialize the session. The slot is faulted
    /// while the driver works and stays faulted if reinitialization fails.
    pub async fn reset_slot(&self, slot_id: SlotId) -> Result<(), PoolError> {
        let reset_generation = {
            let mut core = self.core.lock().unwrap();
            let slot = core.slot_mut(slot_id)?;
            let prior = slot.state();
            slot.begin_reset();
            tracing::info!(slot = %slot_id, from = %prior, "Resetting slot");
            slot.generation()
        };

        // No pool or slot lock held: a reset supersedes in-flight traffic,
        // and the generation bump above keeps a late send from undoing it.
        match self.driver.reset_session(slot_id).await {
            Ok(()) => {
                let now = Instant::now();
                let mut core = self.core.lock().unwrap();
                let slot = &mut core.slots[slot_id.0];
                if slot.generation() == reset_generation && slot.state() == SlotState::Error {
                    slot.finish_reset();
                    tracing::info!(slot = %slot_id, "Slot reset complete");
                    self.promote_waiter(&mut core, slot_id, now);
                }
                Ok(())
            }
            Err(e) => {
                tracing::error!(slot = %slot_id, error = %e, "Driver failed to reinitialize session");
                Err(PoolError::DriverFailure {
                    slot: slot_id,
                    detail: e.to_string(),
                })
            }
        }
    }

    /// Catastrophic recovery: clear the queue, then reset every slot.
    /// Individual failures are logged and leave those slots faulted.
    pub async fn reset_all(&self) {
        {
            let mut core = self.core.lock().unwrap();
            let cleared = core.queue.clear();
            if cleared > 0 {
                tracing::info!(waiters = cleared, "Cleared wait queue for pool reset");
            }
        }

        let ids: Vec<SlotId> = (0..self.config.size).map(SlotId).collect();
        let results = futures::future::join_all(ids.iter().map(|id| self.reset_slot(*id))).await;
        let failed = results.iter().filter(|r| r.is_err()).count();
        if failed > 0 {
            tracing::error!(failed, "Pool reset left slots faulted");
        } else {
            tracing::info!("Pool reset complete");
        }
    }

    /// Consistent point-in-time status.
    pub fn snapshot(&self) -> PoolSnapshot {
        let now = Instant::now();
        let observed = *self.health.lock().unwrap();
        let system = SystemSnapshot {
            driver_alive: observed.info.driver_alive,
            login_ok: observed.info.login_ok,
            last_health_check_s: observed
                .checked_at
                .map(|t| now.saturating_duration_since(t).as_secs()),
            uptime_s: self.started_at.elapsed().as_secs(),
            started_at: self.started_at_utc,
        };

        let core = self.core.lock().unwrap();
        PoolSnapshot::assemble(&core.slots, &core.queue, system, now)
    }

    /// Ask the driver how it is doing and cache the answer for the health
    /// endpoint and snapshots.
    pub async fn probe_driver(&self) -> SystemInfo {
        let info = self.driver.system_info().await;
        let mut health = self.health.lock().unwrap();
        health.info = info;
        health.checked_at = Some(Instant::now());
        info
    }

    /// Last cached driver health (startup default until the first probe).
    pub fn observed_system(&self) -> SystemInfo {
        self.health.lock().unwrap().info
    }

    pub fn has_live_leases(&self) -> bool {
        let core = self.core.lock().unwrap();
        core.slots.iter().any(|s| s.state().is_leased())
    }

    pub fn inactivity_timeout(&self) -> Duration {
        self.authority.inactivity_timeout()
    }

    pub fn max_files_per_send(&self) -> usize {
        self.config.max_files_per_send
    }

    pub fn trigger_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn shutdown_rx(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Hand a freed slot straight to the queue head, if anyone is waiting.
    /// The promoted owner picks the token up on their next acquire poll.
    fn promote_waiter(&self, core: &mut PoolCore, slot_id: SlotId, now: Instant) {
        if core.slots[slot_id.0].state() != SlotState::Idle {
            return;
        }
        if let Some(waiter) = core.queue.promote_next(now) {
            let slot = &mut core.slots[slot_id.0];
            let lease = self.authority.mint(&waiter.owner, slot.generation(), now);
            tracing::info!(
                slot = %slot_id,
                owner = %waiter.owner,
                waited_s = waiter.waiting_for(now).as_secs(),
                "Waiter promoted into freed slot"
            );
            slot.grant(lease);
        }
    }

    /// State and token checks shared by both send validation passes.
    fn check_sendable(&self, slot: &Slot, token: &str) -> Result<(), PoolError> {
        match slot.state() {
            SlotState::Error => Err(PoolError::Conflict {
                slot: slot.id(),
                state: slot.state(),
                reason: "slot is faulted and needs a reset".to_string(),
            }),
            SlotState::LoginExpired => Err(PoolError::Conflict {
                slot: slot.id(),
                state: slot.state(),
                reason: "operator login required, then reset".to_string(),
            }),
            SlotState::Idle => Err(PoolError::Gone { slot: slot.id() }),
            SlotState::Leased | SlotState::Busy => self
                .authority
                .validate(slot.lease(), slot.generation(), token)
                .map_err(|check| match check {
                    LeaseCheck::TokenMismatch => PoolError::Unauthorized { slot: slot.id() },
                    LeaseCheck::NotLive | LeaseCheck::StaleGeneration => {
                        PoolError::Gone { slot: slot.id() }
                    }
                }),
        }
    }

    fn check_quotas(&self, slot: &Slot, upload_bytes: u64) -> Result<(), PoolError> {
        let Some(lease) = slot.lease() else {
            return Ok(());
        };
        if let Some(max) = self.config.max_messages_per_lease
            && lease.message_count >= max
        {
            return Err(PoolError::QuotaExceeded {
                slot: slot.id(),
                detail: format!("message quota of {max} already used"),
            });
        }
        if let Some(max) = self.config.max_upload_bytes_per_lease
            && lease.bytes_uploaded + upload_bytes > max
        {
            return Err(PoolError::QuotaExceeded {
                slot: slot.id(),
                detail: format!("upload quota of {max} bytes would be exceeded"),
            });
        }
        Ok(())
    }

    fn driver_failure(slot: SlotId, e: DriverError, send_timeout: Duration) -> PoolError {
        match e {
            DriverError::Timeout => PoolError::DriverTimeout {
                slot,
                timeout: send_timeout,
            },
            DriverError::LoginExpired => PoolError::LoginExpired { slot },
            DriverError::Dead(detail) | DriverError::Failed(detail) => {
                PoolError::DriverFailure { slot, detail }
            }
        }
    }
}
