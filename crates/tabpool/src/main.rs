//! tabpool server binary.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tabpool::{
    BrowserDriver, DriverConfig, FakeDriver, HttpDriver, MonitorConfig, PoolConfig, PoolMonitor,
    ServerConfig, SlotPool, serve,
};

#[derive(Parser, Debug, Clone)]
#[command(name = "tabpool")]
#[command(about = "Lease-based session pool server for shared browser sessions")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "TABPOOL_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(long, env = "TABPOOL_PORT", default_value = "9200")]
    port: u16,

    /// Number of browser session slots
    #[arg(long, env = "TABPOOL_SLOTS", default_value = "4")]
    slots: usize,

    /// Seconds a lease may sit idle before the sweeper reclaims it
    #[arg(long, env = "TABPOOL_INACTIVITY_TIMEOUT_S", default_value = "300")]
    inactivity_timeout_s: u64,

    /// Maximum number of callers waiting in the acquire queue
    #[arg(long, env = "TABPOOL_QUEUE_DEPTH", default_value = "10")]
    queue_depth: usize,

    /// Seconds before a waiter that stopped polling is dropped from the queue
    #[arg(long, env = "TABPOOL_QUEUE_STALENESS_S", default_value = "120")]
    queue_staleness_s: u64,

    /// Hard deadline for one message round trip, in seconds
    #[arg(long, env = "TABPOOL_SEND_TIMEOUT_S", default_value = "2400")]
    send_timeout_s: u64,

    /// Seconds between inactivity sweeps
    #[arg(long, env = "TABPOOL_SWEEP_INTERVAL_S", default_value = "30")]
    sweep_interval_s: u64,

    /// Seconds between driver health checks
    #[arg(long, env = "TABPOOL_HEALTH_INTERVAL_S", default_value = "60")]
    health_interval_s: u64,

    /// Messages allowed per lease (unset = unlimited)
    #[arg(long, env = "TABPOOL_MAX_MESSAGES_PER_LEASE")]
    max_messages_per_lease: Option<u64>,

    /// Upload bytes allowed per lease (unset = unlimited)
    #[arg(long, env = "TABPOOL_MAX_UPLOAD_BYTES_PER_LEASE")]
    max_upload_bytes_per_lease: Option<u64>,

    /// Driver backend: "http" (automation sidecar) or "fake" (development)
    #[arg(long, env = "TABPOOL_DRIVER", default_value = "http")]
    driver: String,

    /// Base URL of the browser automation sidecar
    #[arg(long, env = "TABPOOL_DRIVER_URL", default_value = "http://127.0.0.1:9222")]
    driver_url: String,

    /// Per-request timeout for driver control calls, in seconds
    #[arg(long, env = "TABPOOL_DRIVER_TIMEOUT_S", default_value = "30")]
    driver_timeout_s: u64,

    /// Ignore SIGTERM and wait for explicit /api/shutdown or SIGINT
    #[arg(long, env = "TABPOOL_AWAIT_EXPLICIT_SHUTDOWN", default_value = "false")]
    await_explicit_shutdown: bool,

    /// Log level when RUST_LOG is not set
    #[arg(long, env = "TABPOOL_LOG", default_value = "info")]
    log_level: String,
}

fn build_driver(args: &Args) -> anyhow::Result<Arc<dyn BrowserDriver>> {
    match args.driver.as_str() {
        "http" => {
            let config = DriverConfig {
                base_url: args.driver_url.clone(),
                request_timeout: Duration::from_secs(args.driver_timeout_s),
            };
            Ok(Arc::new(HttpDriver::new(&config)?))
        }
        "fake" => Ok(Arc::new(FakeDriver::new())),
        other => anyhow::bail!("unknown driver '{other}', expected 'http' or 'fake'"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("tabpool={},info", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    anyhow::ensure!(args.slots > 0, "--slots must be at least 1");

    let pool_config = PoolConfig {
        size: args.slots,
        inactivity_timeout: Duration::from_secs(args.inactivity_timeout_s),
        max_queue_depth: args.queue_depth,
        queue_staleness_timeout: Duration::from_secs(args.queue_staleness_s),
        send_timeout: Duration::from_secs(args.send_timeout_s),
        max_messages_per_lease: args.max_messages_per_lease,
        max_upload_bytes_per_lease: args.max_upload_bytes_per_lease,
        ..PoolConfig::default()
    };

    let driver = build_driver(&args)?;

    info!("tabpool {}", env!("CARGO_PKG_VERSION"));
    info!("Listen: {}:{}", args.host, args.port);
    info!("Slots: {}", args.slots);
    match args.driver.as_str() {
        "http" => info!("Driver: http ({})", args.driver_url),
        other => info!("Driver: {}", other),
    }
    info!(
        "Inactivity timeout: {}s, queue depth: {}",
        args.inactivity_timeout_s, args.queue_depth
    );

    let pool = Arc::new(SlotPool::new(pool_config, driver));
    pool.warm_up().await;

    let monitor = PoolMonitor::spawn(
        pool.clone(),
        MonitorConfig {
            sweep_interval: Duration::from_secs(args.sweep_interval_s),
            health_check_interval: Duration::from_secs(args.health_interval_s),
        },
    );

    let server_config = ServerConfig {
        host: args.host.clone(),
        port: args.port,
        await_explicit_shutdown: args.await_explicit_shutdown,
    };

    let result = serve(server_config, pool.clone()).await;

    monitor.stop().await;
    info!("tabpool stopped");
    result
}
