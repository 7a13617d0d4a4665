use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::database::{PendingPayout, RedisStore};
use crate::error::Result;
use crate::job::PoolHandler;

/// PPLNS-style payout calculation over a share window, weighted by each share's difficulty
/// (kept from the teacher's `payout.rs` reward-unit accounting, generalized from
/// reward-units-per-share to raw difficulty since this spec has no analogous unit).
pub struct PayoutManager<H: PoolHandler> {
    redis: Arc<RwLock<RedisStore>>,
    handler: Arc<H>,
    pool_fee_percent: f64,
}

impl<H: PoolHandler> PayoutManager<H> {
    pub fn new(redis: Arc<RwLock<RedisStore>>, handler: Arc<H>, pool_fee_percent: f64) -> Self {
        Self {
            redis,
            handler,
            pool_fee_percent,
        }
    }

    pub async fn calculate_payouts(
        &self,
        block_reward: u64,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<Vec<PendingPayout>> {
        let mut redis = self.redis.write().await;
        let shares = redis.get_shares_in_window(window_start, window_end).await?;

        let total_difficulty: f64 = shares.iter().map(|s| s.difficulty).sum();
        if total_difficulty <= 0.0 {
            return Ok(Vec::new());
        }

        let pool_fee = (block_reward as f64 * self.pool_fee_percent / 100.0) as u64;
        let distributable_reward = block_reward.saturating_sub(pool_fee);

        let mut miner_difficulty: HashMap<String, f64> = HashMap::new();
        let mut miner_share_count: HashMap<String, u64> = HashMap::new();

        for share in &shares {
            *miner_difficulty.entry(share.miner_address.clone()).or_insert(0.0) += share.difficulty;
            *miner_share_count.entry(share.miner_address.clone()).or_insert(0) += 1;
        }

        let payouts: Vec<PendingPayout> = miner_difficulty
            .into_iter()
            .filter_map(|(miner_address, difficulty)| {
                let amount = (distributable_reward as f64 * difficulty / total_difficulty) as u64;
                if amount == 0 {
                    return None;
                }
                Some(PendingPayout {
                    share_count: miner_share_count.get(&miner_address).copied().unwrap_or(0),
                    miner_address,
                    amount,
                    shares_window: (window_start, window_end),
                })
            })
            .collect();

        info!(
            miners = payouts.len(),
            distributable_reward, pool_fee, "calculated payouts for reward window"
        );

        Ok(payouts)
    }

    /// Render each payout amount in the coin's display format via the handler, for logging and
    /// downstream transaction construction.
    pub fn format_payouts(&self, payouts: &[PendingPayout]) -> Vec<(String, String)> {
        payouts
            .iter()
            .map(|p| (p.miner_address.clone(), self.handler.format_amount(p.amount)))
            .collect()
    }

    pub async fn run_maintenance(&self) -> Result<()> {
        let cutoff = Utc::now() - Duration::hours(48);
        let mut redis = self.redis.write().await;
        let removed = redis.cleanup_old_shares(cutoff).await?;
        if removed > 0 {
            debug!("cleaned up {} old shares", removed);
        }
        Ok(())
    }
}
