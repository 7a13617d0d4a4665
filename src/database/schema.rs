use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted view of one miner, keyed by payout address (spec §3/§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinerRecord {
    pub address: String,
    pub worker_name: String,
    pub shares_submitted: u64,
    pub shares_valid: u64,
    pub last_share_time: DateTime<Utc>,
    pub total_difficulty: f64,
    pub registration_time: DateTime<Utc>,
    pub is_active: bool,
}

impl MinerRecord {
    pub fn new(address: String, worker_name: String) -> Self {
        let now = Utc::now();
        Self {
            address,
            worker_name,
            shares_submitted: 0,
            shares_valid: 0,
            last_share_time: now,
            total_difficulty: 0.0,
            registration_time: now,
            is_active: true,
        }
    }
}

/// Persisted record of one accepted share, mirroring [`crate::shares::Share`] plus a
/// generated id for Redis key uniqueness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareRecord {
    pub id: String,
    pub pool_id: String,
    pub miner_address: String,
    pub worker: String,
    pub job_id: String,
    pub difficulty: f64,
    pub network_difficulty: f64,
    pub timestamp: DateTime<Utc>,
    pub is_block: bool,
    pub block_hash: Option<String>,
}

/// Queued PPLNS-style payout distribution for one reward-window close (spec §6, kept from the
/// teacher's payout accounting shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutQueue {
    pub pending_payouts: Vec<PendingPayout>,
    pub last_payout_time: DateTime<Utc>,
    pub total_paid: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingPayout {
    pub miner_address: String,
    pub amount: u64,
    pub shares_window: (DateTime<Utc>, DateTime<Utc>),
    pub share_count: u64,
}

/// Aggregated pool-wide stats served over the stats/metrics HTTP surface (spec §6/§10.4).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PoolStats {
    pub total_hashrate: f64,
    pub active_miners: u64,
    pub shares_per_second: f64,
    pub average_share_difficulty: f64,
    pub blocks_found_24h: u64,
    pub total_paid_24h: u64,
    pub pool_fee_percent: f64,
}
