pub mod redis_store;
pub mod schema;

pub use redis_store::RedisStore;
pub use schema::{MinerRecord, PayoutQueue, PendingPayout, PoolStats, ShareRecord};
