//! Lease tokens, generation counters, and the authority that mints them.
//!
//! A lease is the credential for one exclusive slot cycle. Tokens are bound
//! to the slot generation they were minted for; ending a cycle (release,
//! reset, sweep, failure) bumps the generation, so an old token can never
//! validate again no matter who still holds it.

use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Monotonic per-slot counter, bumped every time a lease cycle ends.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Generation(pub u64);

impl Generation {
    pub fn bump(&mut self) {
        self.0 += 1;
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque lease credential. Callers must present it verbatim on every
/// send/release; it is never derivable from slot id or owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseToken(String);

impl LeaseToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Loggable prefix. Full tokens never go to logs.
    pub fn redacted(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

/// One live lease cycle: who holds the slot, under which credential, and
/// what they have done with it so far.
#[derive(Debug, Clone)]
pub struct Lease {
    pub owner: String,
    pub token: LeaseToken,
    pub minted_for: Generation,
    pub issued_at: Instant,
    pub last_activity: Instant,
    pub message_count: u64,
    pub bytes_uploaded: u64,
    pub last_message_preview: Option<String>,
}

impl Lease {
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.issued_at)
    }

    /// Bookkeeping for one successful driver exchange.
    pub fn record_exchange(&mut self, message: &str, upload_bytes: u64, now: Instant) {
        self.message_count += 1;
        self.bytes_uploaded += upload_bytes;
        self.last_message_preview = Some(preview(message));
        self.last_activity = now;
    }
}

/// First 50 characters of an outbound message, for status displays.
pub(crate) fn preview(message: &str) -> String {
    message.chars().take(50).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LeaseCheck {
    #[error("no live lease")]
    NotLive,
    #[error("token mismatch")]
    TokenMismatch,
    #[error("token was minted for an earlier generation")]
    StaleGeneration,
}

/// Mints lease credentials and decides validity and expiry. The pool owns
/// the slot records; this type owns what counts as a valid lease.
#[derive(Debug, Clone)]
pub struct LeaseAuthority {
    inactivity_timeout: Duration,
}

impl LeaseAuthority {
    pub fn new(inactivity_timeout: Duration) -> Self {
        Self { inactivity_timeout }
    }

    /// Mint a fresh lease for `owner`, bound to the slot generation it is
    /// being granted under. Counters start at zero.
    pub fn mint(&self, owner: &str, generation: Generation, now: Instant) -> Lease {
        Lease {
            owner: owner.to_string(),
            token: LeaseToken(Uuid::new_v4().simple().to_string()),
            minted_for: generation,
            issued_at: now,
            last_activity: now,
            message_count: 0,
            bytes_uploaded: 0,
            last_message_preview: None,
        }
    }

    /// A presented token validates only against a live lease whose token
    /// matches and whose minted generation is still the slot's current one.
    pub fn validate(
        &self,
        lease: Option<&Lease>,
        current: Generation,
        presented: &str,
    ) -> Result<(), LeaseCheck> {
        let lease = lease.ok_or(LeaseCheck::NotLive)?;
        if lease.token.as_str() != presented {
            return Err(LeaseCheck::TokenMismatch);
        }
        if lease.minted_for != current {
            return Err(LeaseCheck::StaleGeneration);
        }
        Ok(())
    }

    /// Inactivity policy: a lease idle longer than the configured timeout
    /// is eligible for unilateral reclamation.
    pub fn expired(&self, lease: &Lease, now: Instant) -> bool {
        lease.idle_for(now) > self.inactivity_timeout
    }

    pub fn inactivity_timeout(&self) -> Duration {
        self.inactivity_timeout
    }
}
