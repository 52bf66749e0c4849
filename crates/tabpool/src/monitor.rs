//! Background maintenance: the inactivity sweep and the driver health poll.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::MonitorConfig;
use crate::pool::SlotPool;

/// Handles to the two maintenance loops. Both stop when the pool signals
/// shutdown; `stop` waits for them to finish.
pub struct PoolMonitor {
    sweeper: JoinHandle<()>,
    health: JoinHandle<()>,
}

impl PoolMonitor {
    pub fn spawn(pool: Arc<SlotPool>, config: MonitorConfig) -> Self {
        let sweeper = tokio::spawn(sweep_loop(pool.clone(), config.sweep_interval));
        let health = tokio::spawn(health_loop(pool, config.health_check_interval));
        Self { sweeper, health }
    }

    pub async fn stop(self) {
        let _ = self.sweeper.await;
        let _ = self.health.await;
    }
}

async fn sweep_loop(pool: Arc<SlotPool>, interval: Duration) {
    let mut shutdown = pool.shutdown_rx();
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                let reclaimed = pool.sweep_expired();
                if reclaimed > 0 {
                    tracing::info!(reclaimed, "Inactivity sweep reclaimed slots");
                }
            }
            _ = shutdown.changed() => {
                tracing::debug!("Sweep loop stopping");
                return;
            }
        }
    }
}

/// The first pass always probes so the health endpoint has data from the
/// start. After that, a quiet pool (no live leases) is left undisturbed.
async fn health_loop(pool: Arc<SlotPool>, interval: Duration) {
    let mut shutdown = pool.shutdown_rx();
    let mut first = true;
    loop {
        if first || pool.has_live_leases() {
            first = false;
            health_pass(&pool).await;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                tracing::debug!("Health loop stopping");
                return;
            }
        }
    }
}

/// One health pass: probe the driver and, when it is gone, reset every
/// slot so sessions get reopened against whatever replaced it. Expired
/// login is only reported; recovery needs an operator.
pub(crate) async fn health_pass(pool: &SlotPool) {
    let info = pool.probe_driver().await;
    if !info.driver_alive {
        tracing::error!("Driver is unreachable; resetting all slots");
        pool.reset_all().await;
    } else if !info.login_ok {
        tracing::warn!("Driver reports expired login; operator attention needed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::driver::{FakeDriver, SystemInfo};
    use crate::pool::AcquireOutcome;

    fn pool_with_driver(driver: Arc<FakeDriver>) -> Arc<SlotPool> {
        let config = PoolConfig {
            size: 2,
            inactivity_timeout: Duration::from_millis(20),
            ..PoolConfig::default()
        };
        Arc::new(SlotPool::new(config, driver))
    }

    #[tokio::test]
    async fn dead_driver_triggers_full_reset() {
        let driver = Arc::new(FakeDriver::new());
        let pool = pool_with_driver(driver.clone());
        driver.set_system(SystemInfo {
            driver_alive: false,
            login_ok: true,
        });

        health_pass(&pool).await;

        assert_eq!(driver.resets(), vec![crate::slot::SlotId(0), crate::slot::SlotId(1)]);
        assert!(!pool.observed_system().driver_alive);
    }

    #[tokio::test]
    async fn expired_login_is_reported_without_resetting() {
        let driver = Arc::new(FakeDriver::new());
        let pool = pool_with_driver(driver.clone());
        driver.set_system(SystemInfo {
            driver_alive: true,
            login_ok: false,
        });

        health_pass(&pool).await;

        assert!(driver.resets().is_empty());
        assert!(!pool.observed_system().login_ok);
    }

    #[tokio::test]
    async fn sweep_loop_reclaims_abandoned_leases() {
        let driver = Arc::new(FakeDriver::new());
        let pool = pool_with_driver(driver);
        let monitor = PoolMonitor::spawn(
            pool.clone(),
            MonitorConfig {
                sweep_interval: Duration::from_millis(10),
                health_check_interval: Duration::from_secs(3600),
            },
        );

        match pool.acquire("alice").unwrap() {
            AcquireOutcome::Acquired { .. } => {}
            other => panic!("expected a lease, got {other:?}"),
        }

        // Inactivity timeout is 20ms; the sweeper runs every 10ms.
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(pool.snapshot().counts.idle, 2);

        pool.trigger_shutdown();
        monitor.stop().await;
    }

    #[tokio::test]
    async fn health_loop_probes_once_then_skips_while_idle() {
        let driver = Arc::new(FakeDriver::new());
        let pool = pool_with_driver(driver.clone());
        let monitor = PoolMonitor::spawn(
            pool.clone(),
            MonitorConfig {
                sweep_interval: Duration::from_secs(3600),
                health_check_interval: Duration::from_millis(10),
            },
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(driver.probes(), 1, "idle pool gets only the startup probe");

        // A live lease turns probing back on.
        match pool.acquire("alice").unwrap() {
            AcquireOutcome::Acquired { .. } => {}
            other => panic!("expected a lease, got {other:?}"),
        }
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(driver.probes() > 1);

        pool.trigger_shutdown();
        monitor.stop().await;
    }
}
