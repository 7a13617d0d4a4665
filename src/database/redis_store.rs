use std::sync::Arc;

use chrono::{DateTime, Utc};
use redis::{aio::ConnectionManager, AsyncCommands};
use tracing::debug;

use super::schema::*;
use crate::error::Result;
use crate::shares::Share;

/// Redis-backed repository for miner records, accepted shares, and pool stats. An external
/// sink subscribed to the [`EventBus`](crate::bus::EventBus), never called directly by the
/// core Stratum/job-manager path (spec §6, §10.6).
#[derive(Clone)]
pub struct RedisStore {
    #[allow(dead_code)]
    client: Arc<redis::Client>,
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = Arc::new(redis::Client::open(redis_url)?);
        let conn = ConnectionManager::new(client.clone()).await?;

        Ok(Self { client, conn })
    }

    pub async fn get_miner(&mut self, address: &str) -> Result<Option<MinerRecord>> {
        let key = format!("miner:{address}");
        let data: Option<String> = self.conn.get(&key).await?;
        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn save_miner(&mut self, miner: &MinerRecord) -> Result<()> {
        let key = format!("miner:{}", miner.address);
        let json = serde_json::to_string(miner)?;
        self.conn.set::<_, _, ()>(&key, json).await?;
        self.conn.sadd::<_, _, ()>("miners:active", &miner.address).await?;
        Ok(())
    }

    pub async fn get_active_miners(&mut self) -> Result<Vec<String>> {
        Ok(self.conn.smembers("miners:active").await?)
    }

    /// Persist one accepted share. This is a defense-in-depth duplicate check at the storage
    /// layer; the authoritative duplicate-submission rejection already happened in
    /// [`crate::job::manager::JobManager`] before the share reached the event bus.
    pub async fn record_share(&mut self, share: &Share) -> Result<()> {
        let record = ShareRecord {
            id: uuid::Uuid::new_v4().to_string(),
            pool_id: share.pool_id.clone(),
            miner_address: share.miner_address.clone(),
            worker: share.worker.clone(),
            job_id: share.job_id.clone(),
            difficulty: share.difficulty,
            network_difficulty: share.network_difficulty,
            timestamp: share.submitted_at,
            is_block: share.is_block_candidate,
            block_hash: share.block_hash.clone(),
        };

        let key = format!("share:{}", record.id);
        let json = serde_json::to_string(&record)?;
        self.conn.set_ex::<_, _, ()>(&key, json, 86400).await?;

        let miner_shares_key = format!("miner:{}:shares", record.miner_address);
        self.conn
            .zadd::<_, _, _, ()>(&miner_shares_key, &record.id, record.timestamp.timestamp())
            .await?;
        self.conn
            .zadd::<_, _, _, ()>("shares:window", &record.id, record.timestamp.timestamp())
            .await?;

        Ok(())
    }

    pub async fn get_shares_in_window(
        &mut self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ShareRecord>> {
        let ids: Vec<String> = self
            .conn
            .zrangebyscore("shares:window", start.timestamp(), end.timestamp())
            .await?;

        let mut shares = Vec::with_capacity(ids.len());
        for id in ids {
            let key = format!("share:{id}");
            let data: Option<String> = self.conn.get(&key).await?;
            if let Some(json) = data {
                shares.push(serde_json::from_str(&json)?);
            }
        }
        Ok(shares)
    }

    pub async fn update_pool_stats(&mut self, stats: &PoolStats) -> Result<()> {
        let json = serde_json::to_string(stats)?;
        self.conn.set::<_, _, ()>("pool:stats", json).await?;
        Ok(())
    }

    pub async fn get_pool_stats(&mut self) -> Result<Option<PoolStats>> {
        let data: Option<String> = self.conn.get("pool:stats").await?;
        match data {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    pub async fn cleanup_old_shares(&mut self, before: DateTime<Utc>) -> Result<u64> {
        let removed: u64 = self
            .conn
            .zremrangebyscore("shares:window", 0, before.timestamp())
            .await?;
        debug!("cleaned up {} old shares", removed);
        Ok(removed)
    }
}
