use std::net::SocketAddr;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::stratum::vardiff::VarDiffConfig;

/// One configured upstream daemon endpoint (spec §2/§4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonEndpointConfig {
    pub url: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Pool-wide VarDiff knobs as loaded from configuration, translated into a
/// [`VarDiffConfig`] once a pool starts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VarDiffSettings {
    pub min_diff: f64,
    #[serde(default)]
    pub max_diff: Option<f64>,
    pub target_time_secs: f64,
    pub retarget_time_secs: f64,
    pub variance_percent: f64,
}

impl From<VarDiffSettings> for VarDiffConfig {
    fn from(s: VarDiffSettings) -> Self {
        VarDiffConfig {
            min_diff: s.min_diff,
            max_diff: s.max_diff,
            target_time_secs: s.target_time_secs,
            retarget_time_secs: s.retarget_time_secs,
            variance_percent: s.variance_percent,
        }
    }
}

/// One configured pool (spec §2): its coin identity, daemon fan-out, Stratum bind address,
/// and starting/variance difficulty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    pub pool_id: String,
    pub coin: String,
    pub stratum_bind: SocketAddr,
    pub daemons: Vec<DaemonEndpointConfig>,
    pub initial_diff: f64,
    pub var_diff: VarDiffSettings,
    pub pool_fee_percent: f64,
    pub payout_address: String,
    #[serde(default = "default_job_rebroadcast_secs")]
    pub job_rebroadcast_secs: u64,
    /// Fast daemon-poll cadence in milliseconds (spec §4.3 `blockRefreshInterval`), separate
    /// from `job_rebroadcast_secs`'s rebroadcast-watchdog timeout.
    #[serde(default = "default_block_refresh_interval_ms")]
    pub block_refresh_interval_ms: u64,
    /// Ban a peer for `BAN_DURATION` after it sends an unparseable line (spec §4.2/§7).
    #[serde(default = "default_ban_on_junk_receive")]
    pub ban_on_junk_receive: bool,
    /// Evict a connection if `now - lastActivity` exceeds this many seconds at job-broadcast
    /// time (spec §5 "zombie worker" eviction). `0` disables the check.
    #[serde(default)]
    pub client_connection_timeout_secs: u64,
}

fn default_job_rebroadcast_secs() -> u64 {
    55
}

fn default_block_refresh_interval_ms() -> u64 {
    500
}

fn default_ban_on_junk_receive() -> bool {
    true
}

/// Demonstration binary CLI surface (spec §10.3). Mirrors the shape of the teacher's `Args`
/// (clap derive + env fallbacks), extended with the per-pool and per-daemon-endpoint knobs
/// this spec's core needs instead of the teacher's single hardcoded coordinator config.
#[derive(Parser, Debug)]
#[clap(name = "miningcore-rs")]
#[clap(about = "Multi-coin Stratum mining pool core", long_about = None)]
pub struct Args {
    /// Path to a pool configuration file (JSON array of `PoolConfig`).
    #[clap(long, env = "POOL_CONFIG_PATH")]
    pub config_path: Option<String>,

    /// Redis URL for state storage.
    #[clap(long, env = "POOL_REDIS_URL", default_value = "redis://localhost:6379")]
    pub redis_url: String,

    /// HTTP bind address for the stats/metrics API.
    #[clap(long, env = "POOL_HTTP_BIND", default_value = "0.0.0.0:8080")]
    pub http_bind: SocketAddr,

    /// Pool fee percentage, used when no per-pool value is configured.
    #[clap(long, env = "POOL_FEE_PERCENT", default_value = "1.0")]
    pub default_fee_percent: f64,

    /// Minimum payout amount, in the coin's smallest unit.
    #[clap(long, env = "POOL_MIN_PAYOUT", default_value = "1000000")]
    pub min_payout: u64,
}
