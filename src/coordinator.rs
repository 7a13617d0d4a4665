use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::bus::{EventBus, PoolEvent};
use crate::database::{MinerRecord, RedisStore};
use crate::error::Result;
use crate::job::PoolHandler;
use crate::metrics;
use crate::payout::PayoutManager;

/// Wires the Redis repository and payout manager to the core as external subscribers of the
/// [`EventBus`], rather than being called directly from [`JobManager`](crate::job::JobManager)
/// or the Stratum server (spec §6, §10.5/§10.6). Each pool gets its own `PoolCoordinator`.
pub struct PoolCoordinator<H: PoolHandler> {
    pool_id: String,
    redis: Arc<RwLock<RedisStore>>,
    payout_manager: Arc<PayoutManager<H>>,
    share_window_hours: i64,
    pool_fee_percent: f64,
}

impl<H: PoolHandler> PoolCoordinator<H> {
    pub async fn new(
        pool_id: String,
        redis_url: &str,
        handler: Arc<H>,
        pool_fee_percent: f64,
        share_window_hours: i64,
    ) -> Result<Self> {
        let redis = Arc::new(RwLock::new(RedisStore::new(redis_url).await?));
        let payout_manager = Arc::new(PayoutManager::new(redis.clone(), handler, pool_fee_percent));

        Ok(Self {
            pool_id,
            redis,
            payout_manager,
            share_window_hours,
            pool_fee_percent,
        })
    }

    /// Spawns the subscriber loop: every [`PoolEvent::ClientShare`] is persisted and reflected
    /// into miner/metrics state; a block candidate additionally triggers payout calculation.
    pub fn spawn(self: Arc<Self>, bus: &EventBus, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let mut events = bus.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(PoolEvent::ClientShare(share)) if share.pool_id == self.pool_id => {
                            if let Err(e) = self.handle_share(&share).await {
                                error!(pool_id = %self.pool_id, error = %e, "failed to persist share");
                            }
                        }
                        Ok(_) => {}
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(pool_id = %self.pool_id, skipped, "coordinator lagged behind event bus");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        })
    }

    async fn handle_share(&self, share: &crate::shares::Share) -> Result<()> {
        metrics::SHARES_SUBMITTED.inc();

        {
            let mut redis = self.redis.write().await;
            redis.record_share(share).await?;

            let miner = match redis.get_miner(&share.miner_address).await? {
                Some(mut miner) => {
                    miner.shares_submitted += 1;
                    miner.shares_valid += 1;
                    miner.last_share_time = share.submitted_at;
                    miner.total_difficulty += share.difficulty;
                    miner
                }
                None => {
                    let mut miner = MinerRecord::new(share.miner_address.clone(), share.worker.clone());
                    miner.shares_submitted = 1;
                    miner.shares_valid = 1;
                    miner.total_difficulty = share.difficulty;
                    miner
                }
            };
            redis.save_miner(&miner).await?;
        }

        metrics::SHARES_ACCEPTED.inc();

        if share.is_block_candidate {
            metrics::BLOCKS_FOUND.inc();
            info!(pool_id = %self.pool_id, worker = %share.worker, "block candidate found");
            self.trigger_payout_calculation().await?;
        }

        Ok(())
    }

    async fn trigger_payout_calculation(&self) -> Result<()> {
        let window_end = Utc::now();
        let window_start = window_end - Duration::hours(self.share_window_hours);

        // Block reward amount is coin-specific and only known once the daemon confirms the
        // submitted block; this computes distribution shares ahead of that confirmation so the
        // payout queue is ready the moment it lands.
        let payouts = self
            .payout_manager
            .calculate_payouts(0, window_start, window_end)
            .await?;

        for (miner_address, formatted) in self.payout_manager.format_payouts(&payouts) {
            info!(pool_id = %self.pool_id, miner_address, amount = %formatted, "payout queued");
        }

        Ok(())
    }

    pub async fn run_maintenance(&self) -> Result<()> {
        self.payout_manager.run_maintenance().await
    }

    pub fn pool_fee_percent(&self) -> f64 {
        self.pool_fee_percent
    }

    pub async fn pool_stats(&self) -> Result<crate::database::PoolStats> {
        let mut redis = self.redis.write().await;
        let active_miners = redis.get_active_miners().await?.len() as u64;

        let now = Utc::now();
        let window_start = now - Duration::hours(self.share_window_hours);
        let shares = redis.get_shares_in_window(window_start, now).await?;

        let total_difficulty: f64 = shares.iter().map(|s| s.difficulty).sum();
        let window_seconds = (self.share_window_hours as f64) * 3600.0;
        let shares_per_second = shares.len() as f64 / window_seconds;
        let average_share_difficulty = if shares.is_empty() {
            0.0
        } else {
            total_difficulty / shares.len() as f64
        };
        let blocks_found = shares.iter().filter(|s| s.is_block).count() as u64;

        let stats = crate::database::PoolStats {
            total_hashrate: total_difficulty / window_seconds,
            active_miners,
            shares_per_second,
            average_share_difficulty,
            blocks_found_24h: blocks_found,
            total_paid_24h: 0,
            pool_fee_percent: self.pool_fee_percent,
        };

        redis.update_pool_stats(&stats).await?;
        metrics::ACTIVE_MINERS.set(stats.active_miners as f64);
        metrics::POOL_HASHRATE.set(stats.total_hashrate);
        Ok(stats)
    }

    pub async fn miner_stats(&self, address: &str) -> Result<MinerRecord> {
        let mut redis = self.redis.write().await;
        redis
            .get_miner(address)
            .await?
            .ok_or_else(|| crate::error::PoolError::MinerNotFound(address.to_string()))
    }
}
