use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One accepted share, in the coin-agnostic shape the repository and payout layers consume
/// (spec §3). `PoolHandler::process_share` produces the difficulty/block fields; everything
/// else is stamped on by [`crate::job::manager::JobManager`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Share {
    pub pool_id: String,
    pub job_id: String,
    pub worker: String,
    pub miner_address: String,
    pub ip_address: String,
    pub difficulty: f64,
    pub network_difficulty: f64,
    pub block_height: u64,
    pub is_block_candidate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_hex: Option<String>,
    /// Coin-specific data (e.g. a coinbase txid) a payout processor needs to confirm the
    /// block actually matured; opaque to the core.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_confirmation_data: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

/// Coin-agnostic snapshot of daemon-reported chain state (spec §3), refreshed by the
/// [`JobManager`](crate::job::manager::JobManager) on each `updateJob` poll.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct BlockchainStats {
    pub block_height: u64,
    pub network_difficulty: f64,
    pub network_hashrate: f64,
    pub connected_peers: u32,
    pub is_synced: bool,
}
