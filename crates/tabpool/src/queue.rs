//! FIFO wait queue for acquire overflow.
//!
//! When every slot is leased, acquire callers line up here. Order is strictly
//! by enqueue time; positions reported to callers are 1-based. Waiters are
//! expected to re-poll acquire; one that stops polling goes stale and is
//! pruned so it can never be promoted into a slot nobody will use.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct Waiter {
    pub owner: String,
    pub enqueued_at: Instant,
    pub last_polled_at: Instant,
}

impl Waiter {
    pub fn waiting_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.enqueued_at)
    }
}

#[derive(Debug)]
pub struct WaitQueue {
    entries: VecDeque<Waiter>,
    max_depth: usize,
    staleness_timeout: Duration,
    turnaround_estimate: Duration,
}

impl WaitQueue {
    pub fn new(
        max_depth: usize,
        staleness_timeout: Duration,
        turnaround_estimate: Duration,
    ) -> Self {
        Self {
            entries: VecDeque::new(),
            max_depth,
            staleness_timeout,
            turnaround_estimate,
        }
    }

    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.max_depth
    }

    /// 1-based position of `owner`, if queued.
    pub fn position_of(&self, owner: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|w| w.owner == owner)
            .map(|i| i + 1)
    }

    /// An already-queued owner polled acquire again: refresh its staleness
    /// clock and report its current position. Enqueue order is untouched.
    pub fn repoll(&mut self, owner: &str, now: Instant) -> Option<usize> {
        let index = self.entries.iter().position(|w| w.owner == owner)?;
        self.entries[index].last_polled_at = now;
        Some(index + 1)
    }

    /// Append a new waiter; `None` when the queue is at max depth. The
    /// caller is responsible for the duplicate-owner check (`repoll`).
    pub fn enqueue(&mut self, owner: &str, now: Instant) -> Option<usize> {
        debug_assert!(self.position_of(owner).is_none());
        if self.is_full() {
            return None;
        }
        self.entries.push_back(Waiter {
            owner: owner.to_string(),
            enqueued_at: now,
            last_polled_at: now,
        });
        Some(self.entries.len())
    }

    /// Drop waiters that stopped polling. Returns how many were removed.
    pub fn prune_stale(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let staleness = self.staleness_timeout;
        self.entries
            .retain(|w| now.saturating_duration_since(w.last_polled_at) <= staleness);
        before - self.entries.len()
    }

    /// Prune, then hand out the head waiter for promotion into a freed slot.
    pub fn promote_next(&mut self, now: Instant) -> Option<Waiter> {
        self.prune_stale(now);
        self.entries.pop_front()
    }

    pub fn clear(&mut self) -> usize {
        let cleared = self.entries.len();
        self.entries.clear();
        cleared
    }

    /// Advisory wait estimate for a 1-based queue position.
    pub fn estimated_wait(&self, position: usize) -> Duration {
        let estimate = self.turnaround_estimate * position as u32;
        estimate.max(Duration::from_secs(1))
    }

    pub fn waiters(&self) -> impl Iterator<Item = &Waiter> {
        self.entries.iter()
    }
}
