use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, PoolEvent};
use crate::daemon::DaemonClient;
use crate::error::{PoolError, Result};
use crate::metrics;
use crate::job::handler::{PoolHandler, ShareOutcome, SubmitParams as HandlerSubmitParams};
use crate::job::job::{EvictionPolicy, Job, JobIdGenerator, JobRegistry};
use crate::shares::Share;
use crate::stratum::connection::{mark_authorized, ConnectionHandle, ConnectionState, RequestDispatcher};
use crate::stratum::protocol::StratumError;
use crate::stratum::vardiff::{VarDiffConfig, VarDiffContext};

/// One entry on the `Jobs` stream (spec §9 design note: "reactive observable for job stream →
/// broadcast channel"). `clean_jobs` tells connections whether to discard in-flight work.
#[derive(Debug, Clone)]
pub struct JobBroadcast {
    pub job_id: String,
    pub clean_jobs: bool,
    pub notify_params: Value,
}

fn diff_bits(diff: f64) -> u64 {
    diff.to_bits()
}

fn diff_from_bits(bits: u64) -> f64 {
    f64::from_bits(bits)
}

/// Error codes coin daemons use to flag "not synched yet" on `getblocktemplate` (spec §4.3
/// step 3): -10 for Bitcoin Core, -9 for Monero's daemon.
const NOT_SYNCHED_ERROR_CODES: [i32; 2] = [-10, -9];

/// Owns one pool's job lifecycle: polling the daemon fan-out for fresh templates, handing
/// them to the coin-specific [`PoolHandler`], tracking per-connection VarDiff state, and
/// validating submitted shares (spec §4.3). Parameterized on `H` so the coin family is fixed
/// at construction rather than dispatched at runtime (spec §9).
pub struct JobManager<H: PoolHandler> {
    pool_id: String,
    handler: Arc<H>,
    daemon: Arc<DaemonClient>,
    registry: Mutex<JobRegistry<H::Template>>,
    job_ids: JobIdGenerator,
    last_fingerprint: Mutex<Option<String>>,
    current_height: AtomicU64,
    network_difficulty_bits: AtomicU64,
    connections: Mutex<HashMap<String, Arc<ConnectionHandle>>>,
    vardiff_contexts: Mutex<HashMap<String, VarDiffContext>>,
    var_diff_config: VarDiffConfig,
    bus: EventBus,
    jobs_tx: broadcast::Sender<JobBroadcast>,
    /// Fast daemon-poll cadence (spec §4.3 `setupJobStream`: "blockRefreshInterval, typically
    /// 300-1000 ms"). Every tick calls `update_job(false)` — a genuinely new tip broadcasts
    /// immediately; an unchanged template is a no-op.
    poll_interval: Duration,
    /// The job rebroadcast watchdog's timeout (spec §4.3 `jobRebroadcastTimeout`): how long a
    /// tip may go unchanged before the current job is force-rebroadcast (clean_jobs=false) so
    /// connections mid-job don't time out waiting for a fresh `mining.notify`.
    rebroadcast_timeout: Duration,
    /// Wall-clock time of the last *new-tip* detection, independent of `poll_interval`'s cadence
    /// — the watchdog measures elapsed time against this, not ticks.
    last_new_tip_at: Mutex<Instant>,
    client_connection_timeout: Duration,
}

impl<H: PoolHandler> JobManager<H> {
    pub fn new(
        pool_id: String,
        handler: Arc<H>,
        daemon: Arc<DaemonClient>,
        eviction_policy: EvictionPolicy,
        var_diff_config: VarDiffConfig,
        bus: EventBus,
        poll_interval: Duration,
        rebroadcast_timeout: Duration,
        client_connection_timeout: Duration,
    ) -> Self {
        let (jobs_tx, _) = broadcast::channel(256);
        Self {
            pool_id,
            handler,
            daemon,
            registry: Mutex::new(JobRegistry::new(eviction_policy)),
            job_ids: JobIdGenerator::new(),
            last_fingerprint: Mutex::new(None),
            current_height: AtomicU64::new(0),
            network_difficulty_bits: AtomicU64::new(diff_bits(1.0)),
            connections: Mutex::new(HashMap::new()),
            vardiff_contexts: Mutex::new(HashMap::new()),
            var_diff_config,
            bus,
            jobs_tx,
            poll_interval,
            rebroadcast_timeout,
            last_new_tip_at: Mutex::new(Instant::now()),
            client_connection_timeout,
        }
    }

    pub fn jobs_stream(&self) -> broadcast::Receiver<JobBroadcast> {
        self.jobs_tx.subscribe()
    }

    pub fn network_difficulty(&self) -> f64 {
        diff_from_bits(self.network_difficulty_bits.load(Ordering::Relaxed))
    }

    /// Poll `getinfo` until every configured endpoint answers without error, per spec §4.3
    /// step 1 ("repeat executeAll(getInfo) until all endpoints respond without error").
    pub async fn wait_daemon_healthy(&self, cancel: &CancellationToken) -> Result<()> {
        loop {
            let responses: Vec<crate::daemon::DaemonResponse<Value>> =
                self.daemon.execute_all("getinfo", serde_json::json!([]), Some(cancel)).await;
            if !responses.is_empty() && responses.iter().all(crate::daemon::DaemonResponse::is_success) {
                return Ok(());
            }
            warn!(pool_id = %self.pool_id, "daemon not yet healthy, retrying");
            if wait_or_cancelled(cancel, Duration::from_secs(5)).await {
                return Err(PoolError::Daemon("startup cancelled while waiting for daemon health".into()));
            }
        }
    }

    /// Poll until at least one daemon reports an active peer connection.
    pub async fn wait_daemon_connected(&self, cancel: &CancellationToken) -> Result<()> {
        loop {
            let resp: crate::daemon::DaemonResponse<Vec<Value>> =
                self.daemon.execute_any("getpeerinfo", serde_json::json!([]), Some(cancel)).await;
            if resp.result.map(|peers| !peers.is_empty()).unwrap_or(false) {
                return Ok(());
            }
            warn!(pool_id = %self.pool_id, "daemon has no peers yet, retrying");
            if wait_or_cancelled(cancel, Duration::from_secs(5)).await {
                return Err(PoolError::Daemon("startup cancelled while waiting for peers".into()));
            }
        }
    }

    /// Poll `getblocktemplate` until the daemon stops reporting one of the coin-family's
    /// distinguished "not synched" error codes (spec §4.3 step 3 / scenario 6): -10 for
    /// Bitcoin Core, -9 for Monero's daemon. A daemon that returns anything else — a
    /// successful template, or an unrelated error (e.g. the method isn't supported at all) —
    /// is treated as synced; sync gating is a best-effort courtesy, not a hard requirement for
    /// coin families without an equivalent check.
    pub async fn wait_daemon_synched(&self, cancel: &CancellationToken) -> Result<()> {
        loop {
            let resp: crate::daemon::DaemonResponse<Value> = self
                .daemon
                .execute_any("getblocktemplate", serde_json::json!([]), Some(cancel))
                .await;

            match resp.error {
                Some(err) if NOT_SYNCHED_ERROR_CODES.contains(&err.code) => {
                    warn!(pool_id = %self.pool_id, code = err.code, "daemon still syncing, retrying");
                }
                _ => return Ok(()),
            }

            if wait_or_cancelled(cancel, Duration::from_secs(5)).await {
                return Err(PoolError::Daemon("startup cancelled while waiting for sync".into()));
            }
        }
    }

    /// One-time priming after the daemon gating above passes: fetch and broadcast the first job.
    pub async fn post_start_init(&self) -> Result<()> {
        self.update_job(true).await?;
        Ok(())
    }

    /// Spawns two concurrent timers (spec §4.3). A fast `poll_interval` ticker polls the daemon
    /// for a new template on every tick (`update_job(false)`, a no-op unless the tip actually
    /// changed) and runs an idle VarDiff pass. A separate rebroadcast-watchdog ticker, firing
    /// every `rebroadcast_timeout`, force-rebroadcasts the current job unchanged
    /// (`update_job(true)`, `clean_jobs=false`) once that long has elapsed since the last new
    /// tip, so connections mid-job don't time out waiting for `mining.notify`.
    pub fn setup_job_stream(self: &Arc<Self>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        let poll_interval = self.poll_interval;
        let rebroadcast_timeout = self.rebroadcast_timeout;
        tokio::spawn(async move {
            let mut poll_ticker = tokio::time::interval(poll_interval);
            let mut watchdog_ticker = tokio::time::interval(rebroadcast_timeout);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = poll_ticker.tick() => {
                        if let Err(e) = manager.update_job(false).await {
                            warn!(pool_id = %manager.pool_id, error = %e, "job update failed");
                        }
                        manager.tick_vardiff();
                    }
                    _ = watchdog_ticker.tick() => {
                        let elapsed = manager
                            .last_new_tip_at
                            .lock()
                            .expect("last new tip mutex poisoned")
                            .elapsed();
                        if elapsed >= rebroadcast_timeout {
                            if let Err(e) = manager.update_job(true).await {
                                warn!(pool_id = %manager.pool_id, error = %e, "job rebroadcast watchdog failed");
                            }
                        }
                    }
                }
            }
        })
    }

    /// Fetch a template, decide whether it represents a new tip, and broadcast if so (or if
    /// `force_update` is set regardless). Returns whether a broadcast happened.
    pub async fn update_job(&self, force_update: bool) -> Result<bool> {
        let resp: crate::daemon::DaemonResponse<H::Template> = self
            .daemon
            .execute_any("getblocktemplate", serde_json::json!([]), None)
            .await;

        let template = match resp.result {
            Some(t) => t,
            None => {
                let message = resp
                    .error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no successful daemon response".to_string());
                warn!(pool_id = %self.pool_id, error = %message, "failed to fetch block template");
                return Ok(false);
            }
        };

        let fingerprint = self.handler.template_fingerprint(&template);
        let is_new_tip = {
            let mut last = self.last_fingerprint.lock().expect("fingerprint mutex poisoned");
            let changed = last.as_deref() != Some(fingerprint.as_str());
            *last = Some(fingerprint);
            changed
        };

        if is_new_tip {
            *self.last_new_tip_at.lock().expect("last new tip mutex poisoned") = Instant::now();
        }

        if !is_new_tip && !force_update {
            return Ok(false);
        }

        let height = self.handler.template_height(&template);
        let network_difficulty = self.handler.template_network_difficulty(&template);
        let job_id = self.job_ids.next();
        let job = self.handler.build_job(template, job_id.clone())?;
        let notify_params = job.notify_params.clone();

        {
            let mut registry = self.registry.lock().expect("job registry mutex poisoned");
            if is_new_tip {
                registry.begin_generation();
                self.current_height.store(height, Ordering::Relaxed);
                self.network_difficulty_bits
                    .store(diff_bits(network_difficulty), Ordering::Relaxed);
            }
            registry.insert(job);
        }

        info!(pool_id = %self.pool_id, job_id = %job_id, clean_jobs = is_new_tip, "broadcasting job");
        let _ = self.jobs_tx.send(JobBroadcast {
            job_id: job_id.clone(),
            clean_jobs: is_new_tip,
            notify_params: notify_params.clone(),
        });
        self.bus.publish(PoolEvent::JobBroadcast {
            pool_id: self.pool_id.clone(),
            job_id,
            clean_jobs: is_new_tip,
        });

        if is_new_tip {
            self.bus.publish(PoolEvent::TelemetryEvent {
                pool_id: self.pool_id.clone(),
                stats: crate::shares::BlockchainStats {
                    block_height: height,
                    network_difficulty,
                    network_hashrate: 0.0,
                    connected_peers: 0,
                    is_synced: true,
                },
            });
        }

        self.fan_out_notify(&notify_params, is_new_tip);
        Ok(true)
    }

    fn fan_out_notify(&self, notify_params: &Value, clean_jobs: bool) {
        self.evict_idle_connections();

        let connections = self.connections.lock().expect("connections mutex poisoned");
        for conn in connections.values() {
            if conn.state() != ConnectionState::Authorized {
                continue;
            }
            if let Some(new_diff) = conn.apply_pending_difficulty() {
                let _ = conn.notify("mining.set_difficulty", serde_json::json!([new_diff]));
            }
            let mut params = notify_params.clone();
            if let Some(array) = params.as_array_mut() {
                if let Some(last) = array.last_mut() {
                    *last = Value::Bool(clean_jobs);
                }
            }
            let _ = conn.notify("mining.notify", params);
        }
    }

    /// Evict any connection idle longer than `client_connection_timeout` ("zombie worker",
    /// spec §5), checked at job-broadcast time rather than on its own timer. A no-op when
    /// `client_connection_timeout` is zero (disabled).
    fn evict_idle_connections(&self) {
        if self.client_connection_timeout.is_zero() {
            return;
        }
        let stale: Vec<String> = {
            let connections = self.connections.lock().expect("connections mutex poisoned");
            connections
                .values()
                .filter(|conn| conn.idle_for() > self.client_connection_timeout)
                .map(|conn| conn.id.clone())
                .collect()
        };
        if stale.is_empty() {
            return;
        }
        let mut connections = self.connections.lock().expect("connections mutex poisoned");
        let mut contexts = self.vardiff_contexts.lock().expect("vardiff mutex poisoned");
        for id in stale {
            if let Some(conn) = connections.remove(&id) {
                warn!(pool_id = %self.pool_id, connection = %id, "evicting idle zombie worker");
                conn.disconnect();
            }
            contexts.remove(&id);
        }
    }

    /// Validate one `mining.submit`. Duplicate-submission detection (keyed on
    /// extraNonce1/extraNonce2/nTime/nonce) is a core responsibility performed here, before
    /// [`PoolHandler::process_share`] ever runs (spec §3 invariants).
    pub async fn submit_share(&self, conn: &ConnectionHandle, submit: SubmitRequest) -> Result<Share> {
        let worker = conn.worker_name().ok_or(PoolError::UnauthorizedWorker)?;

        let job = {
            let registry = self.registry.lock().expect("job registry mutex poisoned");
            registry
                .get(&submit.job_id)
                .ok_or_else(|| PoolError::JobNotFound(submit.job_id.clone()))?
        };

        let n_time = u32::from_str_radix(&submit.n_time, 16)
            .map_err(|_| PoolError::StratumProtocol("invalid nTime".into()))?;
        let nonce = u32::from_str_radix(&submit.nonce, 16)
            .map_err(|_| PoolError::StratumProtocol("invalid nonce".into()))?;

        let key = (conn.extra_nonce1.clone(), submit.extra_nonce2.clone(), n_time, nonce);
        if job.register_share(key) {
            return Err(PoolError::DuplicateShare);
        }

        let network_difficulty = self.network_difficulty();
        let min_diff = network_difficulty.min(conn.current_difficulty());

        let handler_params = HandlerSubmitParams {
            worker: worker.clone(),
            job_id: submit.job_id.clone(),
            extra_nonce1: conn.extra_nonce1.clone(),
            extra_nonce2: submit.extra_nonce2.clone(),
            n_time,
            nonce,
            raw: submit.raw.clone(),
        };

        // Hashing is CPU-bound (spec §5: "share validation... may execute on a worker thread
        // pool"); run it on tokio's blocking pool rather than inline on this connection's async
        // task, so one expensive share never stalls every other connection sharing the runtime.
        let validation_timer = metrics::SHARE_VALIDATION_TIME.start_timer();
        let blocking_handler = self.handler.clone();
        let blocking_job = job.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            blocking_handler.process_share(&blocking_job, &handler_params, min_diff)
        })
        .await
        .map_err(|e| PoolError::Other(format!("share validation task panicked: {e}")))?;
        validation_timer.observe_duration();
        let outcome: ShareOutcome = outcome?;

        let mut is_block_candidate = outcome.is_block_candidate;
        let mut transaction_confirmation_data = None;

        if is_block_candidate {
            match self.submit_block(&outcome).await {
                Ok((true, coinbase_tx_hash)) => {
                    transaction_confirmation_data = coinbase_tx_hash;
                }
                Ok((false, _)) => {
                    warn!(pool_id = %self.pool_id, "block submission not confirmed by daemon");
                    is_block_candidate = false;
                }
                Err(e) => {
                    warn!(pool_id = %self.pool_id, error = %e, "block submission failed");
                    is_block_candidate = false;
                }
            }
        }

        let miner_address = worker.split('.').next().unwrap_or(&worker).to_string();

        let share = Share {
            pool_id: self.pool_id.clone(),
            job_id: submit.job_id.clone(),
            worker,
            miner_address,
            ip_address: conn.peer_addr.ip().to_string(),
            difficulty: outcome.share_diff,
            network_difficulty,
            block_height: self.current_height.load(Ordering::Relaxed),
            is_block_candidate,
            block_hash: outcome.block_hash,
            block_hex: outcome.block_hex,
            transaction_confirmation_data,
            submitted_at: Utc::now(),
        };

        self.bus.publish(PoolEvent::ClientShare(Arc::new(share.clone())));

        if let Some(new_diff) = self.record_vardiff_share(&conn.id, network_difficulty) {
            conn.enqueue_new_difficulty(new_diff);
        }

        Ok(share)
    }

    fn record_vardiff_share(&self, connection_id: &str, network_difficulty: f64) -> Option<f64> {
        let mut contexts = self.vardiff_contexts.lock().expect("vardiff mutex poisoned");
        contexts.get_mut(connection_id)?.record_share(network_difficulty)
    }

    /// Periodic, non-share-triggered VarDiff pass (spec §4.2: VarDiff runs "on every share
    /// submission and periodically") so a miner sitting idle still has their difficulty
    /// retargeted down rather than only ever retargeting up on fresh shares.
    fn tick_vardiff(&self) {
        let network_difficulty = self.network_difficulty();
        let connections = self.connections.lock().expect("connections mutex poisoned");
        let mut contexts = self.vardiff_contexts.lock().expect("vardiff mutex poisoned");
        for (id, conn) in connections.iter() {
            if let Some(ctx) = contexts.get_mut(id) {
                if let Some(new_diff) = ctx.record_tick(network_difficulty) {
                    conn.enqueue_new_difficulty(new_diff);
                }
            }
        }
    }

    /// `submitblock` first, falling back to `getblocktemplate` in submit mode for daemons that
    /// don't support the dedicated call, followed by a confirming `getblock` lookup (spec
    /// §4.3 step 5). Acceptance is gated on `getblock` actually returning the submitted hash,
    /// not on `submitblock` itself succeeding — some daemons return an error for a block they
    /// already accepted, so the confirming lookup is the source of truth. Returns
    /// `(accepted, coinbase_tx_hash)`.
    async fn submit_block(&self, outcome: &ShareOutcome) -> Result<(bool, Option<String>)> {
        let Some(block_hex) = &outcome.block_hex else {
            return Err(PoolError::Other("block candidate missing serialized block".into()));
        };
        let Some(block_hash) = &outcome.block_hash else {
            return Err(PoolError::Other("block candidate missing block hash".into()));
        };

        let resp: crate::daemon::DaemonResponse<Value> = self
            .daemon
            .execute_any("submitblock", serde_json::json!([block_hex]), None)
            .await;

        if !resp.is_success() {
            let resp: crate::daemon::DaemonResponse<Value> = self
                .daemon
                .execute_any(
                    "getblocktemplate",
                    serde_json::json!([{"mode": "submit", "data": block_hex}]),
                    None,
                )
                .await;
            if !resp.is_success() {
                warn!(pool_id = %self.pool_id, error = ?resp.error, "block submission rejected by daemon");
            }
        }

        let confirm: crate::daemon::DaemonResponse<Value> =
            self.daemon.execute_any("getblock", serde_json::json!([block_hash]), None).await;

        let accepted = confirm
            .result
            .as_ref()
            .and_then(|v| v.get("hash"))
            .and_then(Value::as_str)
            .map(|confirmed_hash| confirmed_hash.eq_ignore_ascii_case(block_hash))
            .unwrap_or(false);

        if !accepted {
            warn!(pool_id = %self.pool_id, block_hash = %block_hash, "block not confirmed by daemon");
            return Ok((false, None));
        }

        let coinbase_tx_hash = confirm
            .result
            .as_ref()
            .and_then(|v| v.get("tx"))
            .and_then(Value::as_array)
            .and_then(|txs| txs.first())
            .and_then(Value::as_str)
            .map(String::from);

        info!(pool_id = %self.pool_id, block_hash = %block_hash, "block confirmed by daemon");
        Ok((accepted, coinbase_tx_hash))
    }

    pub fn register_connection(&self, conn: Arc<ConnectionHandle>) {
        let initial_diff = conn.current_difficulty();
        let mut contexts = self.vardiff_contexts.lock().expect("vardiff mutex poisoned");
        contexts.insert(conn.id.clone(), VarDiffContext::new(self.var_diff_config, initial_diff));
        let mut connections = self.connections.lock().expect("connections mutex poisoned");
        connections.insert(conn.id.clone(), conn);
    }

    pub fn current_job_notify(&self) -> Option<Value> {
        let registry = self.registry.lock().expect("job registry mutex poisoned");
        registry.current().map(|job| job.notify_params.clone())
    }

    pub fn var_diff_config(&self) -> VarDiffConfig {
        self.var_diff_config
    }
}

/// A decoded `mining.submit`, ready for [`JobManager::submit_share`].
#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub job_id: String,
    pub extra_nonce2: String,
    pub n_time: String,
    pub nonce: String,
    pub raw: Value,
}

async fn wait_or_cancelled(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = cancel.cancelled() => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::DaemonClient;
    use std::net::SocketAddr;
    use tokio::sync::mpsc;

    struct FakeHandler;

    impl PoolHandler for FakeHandler {
        type Template = Value;

        fn template_fingerprint(&self, template: &Value) -> String {
            template.to_string()
        }

        fn template_height(&self, _template: &Value) -> u64 {
            0
        }

        fn template_network_difficulty(&self, _template: &Value) -> f64 {
            1.0
        }

        fn build_job(&self, template: Value, job_id: String) -> Result<Job<Value>> {
            Ok(Job::new(job_id.clone(), template, serde_json::json!([job_id, false])))
        }

        fn process_share(
            &self,
            _job: &Job<Value>,
            _params: &HandlerSubmitParams,
            min_diff: f64,
        ) -> Result<ShareOutcome> {
            Ok(ShareOutcome {
                share_diff: min_diff.max(1.0),
                is_block_candidate: false,
                block_hash: None,
                block_hex: None,
            })
        }

        fn validate_address(&self, _address: &str) -> Result<()> {
            Ok(())
        }

        fn format_amount(&self, amount: u64) -> String {
            amount.to_string()
        }
    }

    fn var_diff_config() -> VarDiffConfig {
        VarDiffConfig {
            min_diff: 1.0,
            max_diff: Some(1000.0),
            target_time_secs: 15.0,
            retarget_time_secs: 90.0,
            variance_percent: 30.0,
        }
    }

    fn make_manager() -> JobManager<FakeHandler> {
        let daemon = Arc::new(DaemonClient::new(vec![]));
        JobManager::new(
            "test".into(),
            Arc::new(FakeHandler),
            daemon,
            EvictionPolicy::ClearOnNewTip,
            var_diff_config(),
            EventBus::default(),
            Duration::from_millis(500),
            Duration::from_secs(60),
            Duration::ZERO,
        )
    }

    fn make_connection(diff: f64) -> Arc<ConnectionHandle> {
        let (tx, _rx) = mpsc::unbounded_channel();
        Arc::new(ConnectionHandle::new(
            "conn-1".into(),
            "127.0.0.1:1".parse::<SocketAddr>().expect("static address parses"),
            "ab".into(),
            tx,
            diff,
        ))
    }

    fn sample_submit(job_id: &str) -> SubmitRequest {
        SubmitRequest {
            job_id: job_id.to_string(),
            extra_nonce2: "00000001".into(),
            n_time: "00000001".into(),
            nonce: "00000001".into(),
            raw: serde_json::json!([]),
        }
    }

    #[tokio::test]
    async fn submit_share_fails_job_not_found_when_registry_empty() {
        let manager = make_manager();
        let conn = make_connection(16.0);
        mark_authorized(&conn, "alice.worker1".into());
        manager.register_connection(conn.clone());

        let err = manager.submit_share(&conn, sample_submit("missing")).await.unwrap_err();
        assert!(matches!(err, PoolError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn submit_share_fails_job_not_found_on_empty_job_id() {
        let manager = make_manager();
        let conn = make_connection(16.0);
        mark_authorized(&conn, "alice.worker1".into());
        manager.register_connection(conn.clone());

        let err = manager.submit_share(&conn, sample_submit("")).await.unwrap_err();
        assert!(matches!(err, PoolError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn submit_share_detects_duplicate_on_second_submission() {
        let manager = make_manager();
        let conn = make_connection(16.0);
        mark_authorized(&conn, "alice.worker1".into());
        manager.register_connection(conn.clone());

        {
            let mut registry = manager.registry.lock().expect("job registry mutex poisoned");
            registry.begin_generation();
            registry.insert(Job::new("1".into(), serde_json::json!({}), serde_json::json!(["1", false])));
        }

        manager.submit_share(&conn, sample_submit("1")).await.expect("first submission accepted");
        let err = manager.submit_share(&conn, sample_submit("1")).await.unwrap_err();
        assert!(matches!(err, PoolError::DuplicateShare));
    }

    #[tokio::test]
    async fn submit_share_populates_block_height_and_network_difficulty() {
        let manager = make_manager();
        let conn = make_connection(16.0);
        mark_authorized(&conn, "alice.worker1".into());
        manager.register_connection(conn.clone());

        {
            let mut registry = manager.registry.lock().expect("job registry mutex poisoned");
            registry.begin_generation();
            manager.current_height.store(800_000, Ordering::Relaxed);
            registry.insert(Job::new("1".into(), serde_json::json!({}), serde_json::json!(["1", false])));
        }

        let share = manager.submit_share(&conn, sample_submit("1")).await.expect("accepted");
        assert_eq!(share.block_height, 800_000);
        assert!(share.network_difficulty > 0.0);
        assert!(!share.is_block_candidate);
    }
}

#[async_trait]
impl<H: PoolHandler> RequestDispatcher for JobManager<H> {
    async fn on_configure(&self, conn: &Arc<ConnectionHandle>, id: Value, _extensions: &[String]) -> Result<()> {
        conn.respond(id, serde_json::json!({}))
    }

    async fn on_subscribe(&self, conn: &Arc<ConnectionHandle>, id: Value, user_agent: Option<String>) -> Result<()> {
        debug!(connection = %conn.id, user_agent = ?user_agent, "subscribe");
        self.register_connection(conn.clone());
        // A subscription id is just an opaque handle the client echoes back on resubscribe;
        // it's unrelated to connectionId, so mint it independently rather than reusing one.
        let subscription_id = format!("{:x}", rand::random::<u64>());
        conn.respond(
            id,
            serde_json::json!([
                [["mining.set_difficulty", &subscription_id], ["mining.notify", &subscription_id]],
                conn.extra_nonce1,
                4,
            ]),
        )
    }

    async fn on_authorize(
        &self,
        conn: &Arc<ConnectionHandle>,
        id: Value,
        worker_name: String,
        _password: Option<String>,
    ) -> Result<()> {
        let address = worker_name.split('.').next().unwrap_or(&worker_name);
        if let Err(e) = self.handler.validate_address(address) {
            conn.respond_error(id, StratumError::new(crate::error::StratumErrorCode::UnauthorizedWorker))?;
            return Err(e);
        }

        mark_authorized(conn, worker_name);
        conn.respond(id, serde_json::json!(true))?;

        conn.notify("mining.set_difficulty", serde_json::json!([conn.current_difficulty()]))?;
        if let Some(params) = self.current_job_notify() {
            conn.notify("mining.notify", params)?;
        }
        Ok(())
    }

    async fn on_submit(
        &self,
        conn: &Arc<ConnectionHandle>,
        id: Value,
        job_id: String,
        extra_nonce2: String,
        n_time: String,
        nonce: String,
    ) -> Result<()> {
        match conn.state() {
            ConnectionState::Authorized => {}
            ConnectionState::New => {
                conn.respond_error(id, StratumError::new(crate::error::StratumErrorCode::NotSubscribed))?;
                return Ok(());
            }
            ConnectionState::Subscribed | ConnectionState::Closed => {
                conn.respond_error(id, StratumError::new(crate::error::StratumErrorCode::UnauthorizedWorker))?;
                return Ok(());
            }
        }

        let raw = serde_json::json!([conn.worker_name(), job_id, extra_nonce2, n_time, nonce]);
        let submit = SubmitRequest {
            job_id,
            extra_nonce2,
            n_time,
            nonce,
            raw,
        };

        match self.submit_share(conn, submit).await {
            Ok(_share) => conn.respond(id, serde_json::json!(true)),
            Err(e) => {
                metrics::SHARES_REJECTED.inc();
                let code = e
                    .stratum_code()
                    .unwrap_or(crate::error::StratumErrorCode::Other);
                conn.respond_error(
                    id,
                    StratumError {
                        code: code.code(),
                        message: e.to_string(),
                        data: None,
                    },
                )?;
                Ok(())
            }
        }
    }

    async fn on_disconnect(&self, conn: &Arc<ConnectionHandle>) {
        self.connections.lock().expect("connections mutex poisoned").remove(&conn.id);
        self.vardiff_contexts.lock().expect("vardiff mutex poisoned").remove(&conn.id);
    }
}
