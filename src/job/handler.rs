use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::Result;
use crate::job::job::Job;

/// One `mining.submit` request, already shaped into the fields every coin family shares
/// (worker name, job id, the extranonce2/nTime/nonce the miner iterated) plus the raw
/// params array for family-specific extensions (e.g. Ethereum's different submit shape).
#[derive(Debug, Clone)]
pub struct SubmitParams {
    pub worker: String,
    pub job_id: String,
    /// The pool-assigned extraNonce1 for the submitting connection (spec §4.3
    /// `Job.processShare(extraNonce1, extraNonce2, nTime, nonce, minDiff)`), needed alongside
    /// `extra_nonce2` to reconstruct the coinbase transaction the miner actually hashed.
    pub extra_nonce1: String,
    pub extra_nonce2: String,
    pub n_time: u32,
    pub nonce: u32,
    pub raw: Value,
}

/// Result of `PoolHandler::process_share`, covering everything coin-specific about one
/// share: its normalized difficulty and, if it met the network target, the serialized block.
#[derive(Debug, Clone)]
pub struct ShareOutcome {
    pub share_diff: f64,
    pub is_block_candidate: bool,
    pub block_hash: Option<String>,
    pub block_hex: Option<String>,
}

/// Coin-specific job construction and share validation, injected into the [`JobManager`].
///
/// The core only relies on the operations named here (spec §4.3); coinbase assembly, merkle
/// roots, header encoding, and the hash algorithm itself are the implementation's business.
/// One `PoolHandler` implementation exists per coin family; the pool is parameterized on the
/// handler at construction rather than dispatching on a runtime coin tag.
///
/// [`JobManager`]: crate::job::manager::JobManager
pub trait PoolHandler: Send + Sync + 'static {
    /// Opaque per-coin block template, threaded through the core without interpretation.
    /// `DeserializeOwned` lets [`JobManager`] decode it directly from a daemon RPC response.
    type Template: Clone + Send + Sync + DeserializeOwned + 'static;

    /// An opaque identity for a template (e.g. its previous-block hash) the core can compare
    /// across polls to tell a genuinely new template apart from an unchanged daemon response,
    /// without interpreting the template itself.
    fn template_fingerprint(&self, template: &Self::Template) -> String;

    /// The chain height this template builds on top of. `Share.block_height` (spec §3,
    /// §8 invariant 2: `blockHeight > 0`) is stamped from this, not from an internal
    /// tip-generation counter, since a share's height is meaningful payout/display data the
    /// core itself has no way to derive from an opaque template.
    fn template_height(&self, template: &Self::Template) -> u64;

    /// The chain-global difficulty this template's target implies. Refreshed into
    /// `JobManager`'s `BlockchainStats` on every new tip; used both to stamp
    /// `Share.network_difficulty` and to cap `min_diff`/VarDiff's clamp so testnet/regtest
    /// chains (where the network target can be looser than a miner's stratum target) are
    /// handled correctly (spec §4.3 step 3).
    fn template_network_difficulty(&self, template: &Self::Template) -> f64;

    /// Build the next job from a freshly fetched block template.
    fn build_job(&self, template: Self::Template, job_id: String) -> Result<Job<Self::Template>>;

    /// Validate one submitted share against `job` at `min_diff`.
    ///
    /// Implementations perform the nTime-window check, header reconstruction, hashing, and
    /// target comparison described in spec §4.3 step 4. Duplicate-submission detection is a
    /// core responsibility and happens in [`JobManager`] before this is called.
    ///
    /// [`JobManager`]: crate::job::manager::JobManager
    fn process_share(
        &self,
        job: &Job<Self::Template>,
        params: &SubmitParams,
        min_diff: f64,
    ) -> Result<ShareOutcome>;

    /// Validate a configured pool payout address against the coin's address format.
    fn validate_address(&self, address: &str) -> Result<()>;

    /// Render a raw integer amount (smallest unit) in the coin's display format.
    fn format_amount(&self, amount: u64) -> String;
}
