pub mod types;

pub use types::{BlockchainStats, Share};
