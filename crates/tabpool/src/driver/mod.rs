//! Browser driver capability interface.
//!
//! The automation engine that actually owns tabs and talks to the web
//! application is an external collaborator. The pool reaches it through
//! this narrow trait and never touches session internals; everything the
//! pool knows about a session it learned from these four calls.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::slot::SlotId;

mod fake;
mod remote;

pub use fake::{FakeDriver, SendOutcome};
pub use remote::HttpDriver;

/// One binary attachment for a send. Size is captured when the request is
/// validated so the pool can meter upload bytes without re-reading files.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum DriverError {
    /// The round trip did not complete in time. The far side's outcome is
    /// unknown.
    #[error("driver round trip timed out")]
    Timeout,
    /// The driver process or browser is gone; no session on it is usable.
    #[error("driver is dead: {0}")]
    Dead(String),
    /// The session's authentication lapsed; an operator must log in again.
    #[error("session login has expired")]
    LoginExpired,
    /// Any other driver-side failure.
    #[error("driver call failed: {0}")]
    Failed(String),
}

/// Driver-level health as the driver itself reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub driver_alive: bool,
    pub login_ok: bool,
}

impl Default for SystemInfo {
    fn default() -> Self {
        Self {
            driver_alive: true,
            login_ok: true,
        }
    }
}

#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Open the session backing `slot`. Called once per slot at startup
    /// warmup; a failure leaves that slot faulted, not the whole pool.
    async fn open_session(&self, slot: SlotId) -> Result<(), DriverError>;

    /// One message round trip on `slot`. Attachments are uploaded before
    /// the text is submitted; the returned string is the application's
    /// reply.
    async fn send_message(
        &self,
        slot: SlotId,
        text: &str,
        attachments: &[Attachment],
    ) -> Result<String, DriverError>;

    /// Tear down and reopen the session backing `slot`.
    async fn reset_session(&self, slot: SlotId) -> Result<(), DriverError>;

    /// Liveness and login state for the whole driver.
    async fn system_info(&self) -> SystemInfo;
}
