//! Deterministic in-memory driver.
//!
//! Used by the test suite and by `--driver fake` for local development.
//! Outcomes are scripted per slot; with no script a send echoes the
//! default reply. Every call is recorded so tests can assert on traffic.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::slot::SlotId;

use super::{Attachment, BrowserDriver, DriverError, SystemInfo};

/// Scripted result for one send on one slot.
#[derive(Debug, Clone)]
pub enum SendOutcome {
    Reply(String),
    /// Sleep this long before replying; pair with a short pool send
    /// timeout to exercise the deadline path.
    Hang(Duration),
    Timeout,
    Dead(String),
    LoginExpired,
}

#[derive(Debug)]
pub struct FakeDriver {
    default_reply: String,
    scripts: Mutex<HashMap<SlotId, VecDeque<SendOutcome>>>,
    sent: Mutex<Vec<(SlotId, String, usize)>>,
    opened: Mutex<Vec<SlotId>>,
    resets: Mutex<Vec<SlotId>>,
    fail_open: Mutex<HashSet<SlotId>>,
    fail_reset: Mutex<HashSet<SlotId>>,
    system: Mutex<SystemInfo>,
    probes: Mutex<usize>,
}

impl FakeDriver {
    pub fn new() -> Self {
        Self::with_reply("ok")
    }

    pub fn with_reply(reply: impl Into<String>) -> Self {
        Self {
            default_reply: reply.into(),
            scripts: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            opened: Mutex::new(Vec::new()),
            resets: Mutex::new(Vec::new()),
            fail_open: Mutex::new(HashSet::new()),
            fail_reset: Mutex::new(HashSet::new()),
            system: Mutex::new(SystemInfo::default()),
            probes: Mutex::new(0),
        }
    }

    /// Queue an outcome for the next send on `slot`. Outcomes are consumed
    /// in order; once drained, sends fall back to the default reply.
    pub fn script_send(&self, slot: SlotId, outcome: SendOutcome) {
        self.scripts
            .lock()
            .unwrap()
            .entry(slot)
            .or_default()
            .push_back(outcome);
    }

    pub fn fail_open(&self, slot: SlotId) {
        self.fail_open.lock().unwrap().insert(slot);
    }

    pub fn fail_reset(&self, slot: SlotId) {
        self.fail_reset.lock().unwrap().insert(slot);
    }

    pub fn set_system(&self, info: SystemInfo) {
        *self.system.lock().unwrap() = info;
    }

    /// Every (slot, text, attachment count) send that reached the driver.
    pub fn sent(&self) -> Vec<(SlotId, String, usize)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn opened(&self) -> Vec<SlotId> {
        self.opened.lock().unwrap().clone()
    }

    pub fn resets(&self) -> Vec<SlotId> {
        self.resets.lock().unwrap().clone()
    }

    /// How many times `system_info` has been asked.
    pub fn probes(&self) -> usize {
        *self.probes.lock().unwrap()
    }
}

impl Default for FakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserDriver for FakeDriver {
    async fn open_session(&self, slot: SlotId) -> Result<(), DriverError> {
        self.opened.lock().unwrap().push(slot);
        if self.fail_open.lock().unwrap().contains(&slot) {
            return Err(DriverError::Failed(format!("scripted open failure on slot {slot}")));
        }
        Ok(())
    }

    async fn send_message(
        &self,
        slot: SlotId,
        text: &str,
        attachments: &[Attachment],
    ) -> Result<String, DriverError> {
        self.sent
            .lock()
            .unwrap()
            .push((slot, text.to_string(), attachments.len()));

        let outcome = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&slot)
            .and_then(|q| q.pop_front());

        match outcome {
            None => Ok(self.default_reply.clone()),
            Some(SendOutcome::Reply(reply)) => Ok(reply),
            Some(SendOutcome::Hang(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(self.default_reply.clone())
            }
            Some(SendOutcome::Timeout) => Err(DriverError::Timeout),
            Some(SendOutcome::Dead(detail)) => Err(DriverError::Dead(detail)),
            Some(SendOutcome::LoginExpired) => Err(DriverError::LoginExpired),
        }
    }

    async fn reset_session(&self, slot: SlotId) -> Result<(), DriverError> {
        self.resets.lock().unwrap().push(slot);
        if self.fail_reset.lock().unwrap().contains(&slot) {
            return Err(DriverError::Failed(format!("scripted reset failure on slot {slot}")));
        }
        Ok(())
    }

    async fn system_info(&self) -> SystemInfo {
        *self.probes.lock().unwrap() += 1;
        *self.system.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_outcomes_are_consumed_in_order() {
        let driver = FakeDriver::with_reply("default");
        driver.script_send(SlotId(0), SendOutcome::Reply("first".into()));
        driver.script_send(SlotId(0), SendOutcome::Timeout);

        let reply = driver.send_message(SlotId(0), "hi", &[]).await.unwrap();
        assert_eq!(reply, "first");

        let err = driver.send_message(SlotId(0), "hi", &[]).await.unwrap_err();
        assert!(matches!(err, DriverError::Timeout));

        // Script drained: back to the default reply.
        let reply = driver.send_message(SlotId(0), "hi", &[]).await.unwrap();
        assert_eq!(reply, "default");
    }

    #[tokio::test]
    async fn scripts_are_per_slot() {
        let driver = FakeDriver::new();
        driver.script_send(SlotId(1), SendOutcome::LoginExpired);

        assert!(driver.send_message(SlotId(0), "a", &[]).await.is_ok());
        let err = driver.send_message(SlotId(1), "b", &[]).await.unwrap_err();
        assert!(matches!(err, DriverError::LoginExpired));
    }

    #[tokio::test]
    async fn records_traffic() {
        let driver = FakeDriver::new();
        driver.open_session(SlotId(0)).await.unwrap();
        driver.send_message(SlotId(0), "hello", &[]).await.unwrap();
        driver.reset_session(SlotId(0)).await.unwrap();

        assert_eq!(driver.opened(), vec![SlotId(0)]);
        assert_eq!(driver.sent(), vec![(SlotId(0), "hello".to_string(), 0)]);
        assert_eq!(driver.resets(), vec![SlotId(0)]);
    }

    #[tokio::test]
    async fn system_info_is_togglable() {
        let driver = FakeDriver::new();
        assert!(driver.system_info().await.driver_alive);

        driver.set_system(SystemInfo {
            driver_alive: false,
            login_ok: false,
        });
        let info = driver.system_info().await;
        assert!(!info.driver_alive);
        assert!(!info.login_ok);
    }
}
