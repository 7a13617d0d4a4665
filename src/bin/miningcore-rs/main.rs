use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use miningcore_rs::ban::InMemoryBanManager;
use miningcore_rs::bus::EventBus;
use miningcore_rs::config::{Args, PoolConfig};
use miningcore_rs::coordinator::PoolCoordinator;
use miningcore_rs::daemon::{DaemonClient, DaemonEndpoint};
use miningcore_rs::job::{EvictionPolicy, JobManager};
use miningcore_rs::metrics;
use miningcore_rs::stratum::StratumServer;

#[path = "demo_handler.rs"]
mod demo_handler;
use demo_handler::BitcoinFamilyHandler;

/// Wires one pool end to end: daemon fan-out, job manager lifecycle, Stratum listener, and the
/// Redis-backed coordinator subscribed to the event bus (spec §10.3, §10.5).
///
/// All configured pools run the demo `BitcoinFamilyHandler` (spec §9's "dynamic dispatch ->
/// tagged abstraction" resolves, in a real multi-coin deployment, to one `PoolHandler` chosen
/// per pool's configured coin; this binary fixes the handler type at compile time to keep the
/// demonstration self-contained).
async fn run_pool(
    pool_config: PoolConfig,
    coordinator: Arc<PoolCoordinator<BitcoinFamilyHandler>>,
    bus: EventBus,
    shutdown: CancellationToken,
) -> miningcore_rs::Result<()> {
    let pool_id = pool_config.pool_id.clone();
    let handler = Arc::new(BitcoinFamilyHandler::new());

    let endpoints: Vec<DaemonEndpoint> = pool_config
        .daemons
        .iter()
        .map(|d| match (&d.username, &d.password) {
            (Some(u), Some(p)) => DaemonEndpoint::new(d.url.clone()).with_auth(u.clone(), p.clone()),
            _ => DaemonEndpoint::new(d.url.clone()),
        })
        .collect();
    let daemon = Arc::new(DaemonClient::new(endpoints));

    let manager = JobManager::new(
        pool_id.clone(),
        handler.clone(),
        daemon,
        EvictionPolicy::ClearOnNewTip,
        pool_config.var_diff.into(),
        bus.clone(),
        Duration::from_millis(pool_config.block_refresh_interval_ms),
        Duration::from_secs(pool_config.job_rebroadcast_secs),
        Duration::from_secs(pool_config.client_connection_timeout_secs),
    );

    info!(pool_id = %pool_id, "waiting for daemon to become healthy");
    manager.wait_daemon_healthy(&shutdown).await?;
    manager.wait_daemon_connected(&shutdown).await?;
    manager.wait_daemon_synched(&shutdown).await?;

    if let Err(e) = handler.validate_address(&pool_config.payout_address) {
        error!(pool_id = %pool_id, error = %e, "configured payout address rejected by handler");
        return Err(e);
    }

    manager.post_start_init().await?;
    info!(pool_id = %pool_id, "daemon ready, job stream starting");

    let manager = Arc::new(manager);
    manager.setup_job_stream(shutdown.clone());

    let ban_manager = Arc::new(InMemoryBanManager::new());
    let stratum = StratumServer::new(
        pool_id.clone(),
        pool_config.stratum_bind,
        manager,
        ban_manager,
        pool_config.initial_diff,
        pool_config.ban_on_junk_receive,
    );

    coordinator.clone().spawn(&bus, shutdown.clone());

    let maintenance_coordinator = coordinator.clone();
    let maintenance_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            tokio::select! {
                _ = maintenance_shutdown.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = maintenance_coordinator.run_maintenance().await {
                        error!(error = %e, "maintenance task failed");
                    }
                }
            }
        }
    });

    if let Err(e) = stratum.run(shutdown).await {
        error!(pool_id = %pool_id, error = %e, "stratum listener exited with error");
    }

    Ok(())
}

fn load_pool_configs(args: &Args) -> miningcore_rs::Result<Vec<PoolConfig>> {
    match &args.config_path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            let configs: Vec<PoolConfig> = serde_json::from_str(&raw)?;
            if configs.is_empty() {
                return Err(miningcore_rs::error::PoolError::Configuration(
                    "pool configuration file contains no pools".into(),
                ));
            }
            Ok(configs)
        }
        None => {
            warn!("no --config-path given; starting a single demo pool bound to 127.0.0.1:3333");
            Ok(vec![PoolConfig {
                pool_id: "demo".to_string(),
                coin: "bitcoin".to_string(),
                stratum_bind: "0.0.0.0:3333".parse().expect("static address parses"),
                daemons: vec![miningcore_rs::config::DaemonEndpointConfig {
                    url: "http://127.0.0.1:8332/".to_string(),
                    username: None,
                    password: None,
                }],
                initial_diff: 16.0,
                var_diff: miningcore_rs::config::VarDiffSettings {
                    min_diff: 1.0,
                    max_diff: None,
                    target_time_secs: 15.0,
                    retarget_time_secs: 90.0,
                    variance_percent: 30.0,
                },
                pool_fee_percent: args.default_fee_percent,
                payout_address: "1BoatSLRHtKNngkdXEeobR76b53LETtpyT".to_string(),
                job_rebroadcast_secs: 55,
                block_refresh_interval_ms: 500,
                ban_on_junk_receive: true,
                client_connection_timeout_secs: 600,
            }])
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Share validation hashing is CPU-bound (spec §5) and runs via `spawn_blocking`; size the
    // blocking pool off the machine's core count rather than tokio's flat default of 512, so a
    // burst of concurrent shares can't outrun available CPU with runaway thread counts.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(num_cpus::get() * 4)
        .build()?;
    runtime.block_on(run())
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    metrics::register_metrics();

    let pool_configs = load_pool_configs(&args)?;
    let bus = EventBus::default();
    let shutdown = CancellationToken::new();

    let mut routes = Router::new().route("/metrics", axum::routing::get(|| async { metrics::metrics_handler() }));

    for pool_config in pool_configs {
        let pool_id = pool_config.pool_id.clone();
        let handler = Arc::new(BitcoinFamilyHandler::new());
        let coordinator = Arc::new(
            PoolCoordinator::<BitcoinFamilyHandler>::new(
                pool_id.clone(),
                &args.redis_url,
                handler,
                pool_config.pool_fee_percent,
                24,
            )
            .await?,
        );
        routes = routes.nest(&format!("/pools/{pool_id}"), miningcore_rs::api::router(coordinator.clone()));

        let bus = bus.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = run_pool(pool_config, coordinator, bus, shutdown).await {
                error!(pool_id = %pool_id, error = %e, "pool failed to start");
            }
        });
    }

    let listener = tokio::net::TcpListener::bind(args.http_bind).await?;
    info!(addr = %args.http_bind, "http stats/metrics api listening");

    tokio::select! {
        res = axum::serve(listener, routes.into_make_service()) => {
            if let Err(e) = res {
                error!(error = %e, "http server error");
            }
        }
        _ = signal::ctrl_c() => {
            info!("received shutdown signal");
        }
    }

    shutdown.cancel();
    info!("miningcore-rs shutting down");
    Ok(())
}
