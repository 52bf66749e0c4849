//! tabpool: lease-based session pool server for shared browser sessions.

mod error;
mod lease;
mod queue;
mod slot;
mod status;

pub mod config;
pub mod driver;
pub mod monitor;
pub mod pool;
pub mod transport;

pub use config::{DriverConfig, MonitorConfig, PoolConfig};
pub use driver::{
    Attachment, BrowserDriver, DriverError, FakeDriver, HttpDriver, SendOutcome, SystemInfo,
};
pub use error::PoolError;
pub use lease::{Generation, Lease, LeaseToken};
pub use monitor::PoolMonitor;
pub use pool::{AcquireOutcome, SlotPool};
pub use queue::{WaitQueue, Waiter};
pub use slot::{SlotId, SlotState};
pub use status::{PoolSnapshot, SlotCounts, SlotSnapshot, SystemSnapshot, WaiterSnapshot};
pub use transport::{ServerConfig, serve};
