//! A minimal Bitcoin-family [`PoolHandler`] wired into the demonstration binary so the crate
//! is runnable end to end (spec §10.3). Coin-specific hashing and job construction are named
//! external collaborators in spec §1 ("a pluggable HashAlgorithm interface", "a JobBuilder per
//! coin family"); this is a reference implementation of that interface, not part of the core.
//!
//! It speaks the shape of Bitcoin Core's `getblocktemplate`/`submitblock` and builds a
//! single-transaction block (coinbase only), so merkle root reduction is the identity and no
//! merkle branch is needed. That keeps the demo self-contained without a transaction-selection
//! or serialization layer, which is out of scope for what this binary needs to prove.

use serde::Deserialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use miningcore_rs::error::{PoolError, Result};
use miningcore_rs::job::{Job, PoolHandler, ShareOutcome, SubmitParams};

/// Shape of a Bitcoin Core `getblocktemplate` response, trimmed to the fields this demo
/// actually consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct BitcoinTemplate {
    pub previousblockhash: String,
    pub height: u64,
    pub curtime: u32,
    /// Compact-form network target ("nBits"), hex-encoded without a `0x` prefix.
    pub bits: String,
    #[serde(default = "default_version")]
    pub version: i64,
    pub coinbasevalue: u64,
}

fn default_version() -> i64 {
    0x2000_0000
}

pub struct BitcoinFamilyHandler {
    pub network: &'static str,
}

impl BitcoinFamilyHandler {
    pub fn new() -> Self {
        Self { network: "main" }
    }
}

/// `diff1`, the network-wide difficulty-1 target, used to normalize a hash into a difficulty
/// value (spec §4.3 `shareDiff = diff1 / hash`). Matches Bitcoin's conventional truncated
/// 256-bit target for difficulty 1.
const DIFF1_LEADING_ZERO_BYTES: usize = 3;
const DIFF1_MSB: f64 = 0x0000_ffff as f64;

/// Expand a compact "nBits" target into 32 big-endian bytes.
fn bits_to_target(bits: &str) -> Result<[u8; 32]> {
    let raw = u32::from_str_radix(bits, 16)
        .map_err(|_| PoolError::StratumProtocol("invalid nBits".into()))?;
    let exponent = (raw >> 24) as usize;
    let mantissa = raw & 0x00ff_ffff;

    let mut target = [0u8; 32];
    if exponent <= 3 {
        let shifted = mantissa >> (8 * (3 - exponent));
        target[29..32].copy_from_slice(&shifted.to_be_bytes()[1..4]);
    } else {
        let offset = 32 - exponent;
        if offset + 3 <= 32 {
            target[offset..offset + 3].copy_from_slice(&mantissa.to_be_bytes()[1..4]);
        }
    }
    Ok(target)
}

/// Approximate `diff1 / hash` for a big-endian 32-byte hash, via leading-zero-byte count plus
/// the next significant bytes — sufficient precision for VarDiff retargeting and the ≥0.99
/// acceptance check without a full bignum dependency.
fn hash_to_difficulty(hash: &[u8; 32]) -> f64 {
    let leading_zeros = hash.iter().take_while(|&&b| b == 0).count();
    if leading_zeros >= 32 {
        return f64::MAX;
    }
    let mut window = [0u8; 4];
    let start = leading_zeros;
    for (i, b) in hash[start..(start + 4).min(32)].iter().enumerate() {
        window[i] = *b;
    }
    let significant = u32::from_be_bytes(window) as f64;
    if significant == 0.0 {
        return f64::MAX;
    }
    let zero_byte_shift = leading_zeros.saturating_sub(DIFF1_LEADING_ZERO_BYTES);
    DIFF1_MSB / significant * 2f64.powi(8 * zero_byte_shift as i32)
}

fn hash_le_target(hash: &[u8; 32], target: &[u8; 32]) -> bool {
    hash <= target
}

fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    second.into()
}

impl Default for BitcoinFamilyHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolHandler for BitcoinFamilyHandler {
    type Template = BitcoinTemplate;

    fn template_fingerprint(&self, template: &Self::Template) -> String {
        format!("{}:{}", template.previousblockhash, template.height)
    }

    fn template_height(&self, template: &Self::Template) -> u64 {
        template.height
    }

    fn template_network_difficulty(&self, template: &Self::Template) -> f64 {
        bits_to_target(&template.bits)
            .map(|target| hash_to_difficulty(&target))
            .unwrap_or(1.0)
    }

    fn build_job(&self, template: Self::Template, job_id: String) -> Result<Job<Self::Template>> {
        // Stratum v1 mining.notify params; the job manager overwrites the trailing element
        // with the real clean_jobs flag on every broadcast (see JobManager::fan_out_notify).
        let notify_params = json!([
            job_id.clone(),
            template.previousblockhash,
            format!("{:016x}", template.coinbasevalue),
            "",
            Vec::<String>::new(),
            format!("{:08x}", template.version),
            template.bits,
            format!("{:08x}", template.curtime),
            false,
        ]);
        Ok(Job::new(job_id, template, notify_params))
    }

    fn process_share(
        &self,
        job: &Job<Self::Template>,
        params: &SubmitParams,
        min_diff: f64,
    ) -> Result<ShareOutcome> {
        let template = &job.template;

        let window_start = template.curtime.saturating_sub(7200);
        let window_end = params.n_time.saturating_add(7200);
        if params.n_time < window_start || params.n_time > window_end {
            return Err(PoolError::StratumProtocol("nTime out of acceptable window".into()));
        }

        // Demo coinbase: a single-input, single-output placeholder keyed on the job and the
        // miner's extranonces. A real JobBuilder would serialize an actual Bitcoin transaction
        // here; this binary only needs something the pool and the (simulated) miner agree on.
        let coinbase = format!(
            "{}:{}:{}:{}",
            job.job_id, params.extra_nonce1, params.extra_nonce2, template.height
        );
        // Single-transaction block: the merkle root is the coinbase txid itself.
        let merkle_root = sha256d(coinbase.as_bytes());

        let mut header = Vec::with_capacity(80);
        header.extend_from_slice(&(template.version as u32).to_le_bytes());
        header.extend_from_slice(
            &hex::decode(&template.previousblockhash)
                .map_err(|_| PoolError::StratumProtocol("invalid previous block hash".into()))?,
        );
        header.extend_from_slice(&merkle_root);
        header.extend_from_slice(&params.n_time.to_le_bytes());
        header.extend_from_slice(
            &u32::from_str_radix(&template.bits, 16)
                .map_err(|_| PoolError::StratumProtocol("invalid nBits".into()))?
                .to_le_bytes(),
        );
        header.extend_from_slice(&params.nonce.to_le_bytes());

        let mut hash = sha256d(&header);
        hash.reverse(); // display/compare in big-endian order, per convention

        let network_target = bits_to_target(&template.bits)?;
        let share_diff = hash_to_difficulty(&hash);

        if hash_le_target(&hash, &network_target) {
            return Ok(ShareOutcome {
                share_diff,
                is_block_candidate: true,
                block_hash: Some(hex::encode(hash)),
                block_hex: Some(hex::encode(&header)),
            });
        }

        if share_diff / min_diff < 0.99 {
            return Err(PoolError::LowDifficultyShare(share_diff));
        }

        Ok(ShareOutcome {
            share_diff,
            is_block_candidate: false,
            block_hash: None,
            block_hex: None,
        })
    }

    fn validate_address(&self, address: &str) -> Result<()> {
        if address.len() < 26 || address.len() > 90 {
            return Err(PoolError::Configuration(format!(
                "implausible {} payout address length: {}",
                self.network,
                address.len()
            )));
        }
        Ok(())
    }

    fn format_amount(&self, amount: u64) -> String {
        format!("{:.8} BTC", amount as f64 / 100_000_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_bits_expand_to_target_bytes() {
        // 0x1d00ffff is Bitcoin mainnet's genesis difficulty-1 target.
        let target = bits_to_target("1d00ffff").unwrap();
        assert_eq!(target[3], 0x00);
        assert_eq!(target[4], 0xff);
        assert_eq!(target[5], 0xff);
    }

    #[test]
    fn all_zero_hash_meets_any_target() {
        let hash = [0u8; 32];
        let target = bits_to_target("1d00ffff").unwrap();
        assert!(hash_le_target(&hash, &target));
    }

    #[test]
    fn difficulty_increases_as_hash_shrinks() {
        let mut low_zeros = [0xffu8; 32];
        low_zeros[0] = 0x00;
        let mut high_zeros = [0xffu8; 32];
        high_zeros[0] = 0x00;
        high_zeros[1] = 0x00;
        high_zeros[2] = 0x00;

        assert!(hash_to_difficulty(&high_zeros) > hash_to_difficulty(&low_zeros));
    }

    #[test]
    fn format_amount_renders_satoshis_as_btc() {
        let handler = BitcoinFamilyHandler::new();
        assert_eq!(handler.format_amount(150_000_000), "1.50000000 BTC");
    }
}
