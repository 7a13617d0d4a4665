use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, warn};

use super::protocol::{StratumError, StratumMessage, StratumResponse};
use crate::ban::BanManager;
use crate::error::{PoolError, Result};

/// A connection's position in the `NEW -> SUBSCRIBED -> AUTHORIZED -> CLOSED` state machine
/// (spec §4.2). Transitions only move forward; `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Subscribed,
    Authorized,
    Closed,
}

fn diff_to_bits(diff: f64) -> u64 {
    diff.to_bits()
}

fn bits_to_diff(bits: u64) -> f64 {
    f64::from_bits(bits)
}

/// Shared, cheaply-clonable handle to one miner connection, owned directly by the connection
/// task and handed out to the [`JobManager`](crate::job::manager::JobManager) for broadcast
/// fan-out. Replaces a weak-keyed external context table with fields the connection itself
/// owns (spec §9 design note).
pub struct ConnectionHandle {
    pub id: String,
    pub peer_addr: SocketAddr,
    pub extra_nonce1: String,
    outbound: mpsc::UnboundedSender<String>,
    state: Mutex<ConnectionState>,
    worker_name: Mutex<Option<String>>,
    current_diff_bits: AtomicU64,
    pending_diff_bits: AtomicU64,
    has_pending_diff: AtomicBool,
    last_activity: Mutex<Instant>,
}

impl ConnectionHandle {
    pub(crate) fn new(
        id: String,
        peer_addr: SocketAddr,
        extra_nonce1: String,
        outbound: mpsc::UnboundedSender<String>,
        initial_diff: f64,
    ) -> Self {
        Self {
            id,
            peer_addr,
            extra_nonce1,
            outbound,
            state: Mutex::new(ConnectionState::New),
            worker_name: Mutex::new(None),
            current_diff_bits: AtomicU64::new(diff_to_bits(initial_diff)),
            pending_diff_bits: AtomicU64::new(diff_to_bits(initial_diff)),
            has_pending_diff: AtomicBool::new(false),
            last_activity: Mutex::new(Instant::now()),
        }
    }

    /// Stamp `lastActivity` to now; called on every inbound line (spec §3 data model).
    pub fn touch(&self) {
        *self.last_activity.lock().expect("last activity mutex poisoned") = Instant::now();
    }

    /// How long since the last inbound line from this connection ("zombie worker" eviction,
    /// spec §5).
    pub fn idle_for(&self) -> std::time::Duration {
        self.last_activity
            .lock()
            .expect("last activity mutex poisoned")
            .elapsed()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().expect("connection state mutex poisoned")
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().expect("connection state mutex poisoned") = state;
    }

    pub fn worker_name(&self) -> Option<String> {
        self.worker_name.lock().expect("worker name mutex poisoned").clone()
    }

    fn set_worker_name(&self, name: String) {
        *self.worker_name.lock().expect("worker name mutex poisoned") = Some(name);
    }

    pub fn current_difficulty(&self) -> f64 {
        bits_to_diff(self.current_diff_bits.load(Ordering::Relaxed))
    }

    /// Queue a difficulty change to take effect on the next job notification, rather than
    /// mid-job (spec §4.2 `enqueueNewDifficulty`).
    pub fn enqueue_new_difficulty(&self, diff: f64) {
        self.pending_diff_bits.store(diff_to_bits(diff), Ordering::Relaxed);
        self.has_pending_diff.store(true, Ordering::Relaxed);
    }

    /// Apply a previously enqueued difficulty, returning it if one was pending. Called by the
    /// connection task immediately before forwarding a `mining.notify` (spec §4.2
    /// `applyPendingDifficulty`).
    pub fn apply_pending_difficulty(&self) -> Option<f64> {
        if self.has_pending_diff.swap(false, Ordering::Relaxed) {
            let diff = bits_to_diff(self.pending_diff_bits.load(Ordering::Relaxed));
            self.current_diff_bits.store(diff_to_bits(diff), Ordering::Relaxed);
            Some(diff)
        } else {
            None
        }
    }

    pub fn respond(&self, id: Value, result: Value) -> Result<()> {
        self.send(&StratumResponse::Result { id, result })
    }

    pub fn respond_error(&self, id: Value, error: StratumError) -> Result<()> {
        self.send(&StratumResponse::Error { id, error })
    }

    pub fn notify(&self, method: impl Into<String>, params: Value) -> Result<()> {
        self.send(&StratumResponse::Notification {
            method: method.into(),
            params,
        })
    }

    pub fn disconnect(&self) {
        self.set_state(ConnectionState::Closed);
        let _ = self.outbound.send(String::new());
    }

    fn send(&self, response: &StratumResponse) -> Result<()> {
        let line = response
            .to_line()
            .map_err(|e| PoolError::StratumProtocol(format!("failed to encode response: {e}")))?;
        self.outbound
            .send(line)
            .map_err(|_| PoolError::StratumProtocol("connection outbound channel closed".into()))
    }
}

/// Dispatches one decoded request and drives the resulting state transition. Implemented by
/// the Stratum server per spec §4.2/§4.3; kept separate from [`ConnectionHandle`] so the
/// connection task and the job manager can share one trait object without a cyclic dependency.
#[async_trait::async_trait]
pub trait RequestDispatcher: Send + Sync {
    async fn on_configure(&self, conn: &std::sync::Arc<ConnectionHandle>, id: Value, extensions: &[String]) -> Result<()>;
    async fn on_subscribe(&self, conn: &std::sync::Arc<ConnectionHandle>, id: Value, user_agent: Option<String>) -> Result<()>;
    async fn on_authorize(
        &self,
        conn: &std::sync::Arc<ConnectionHandle>,
        id: Value,
        worker_name: String,
        password: Option<String>,
    ) -> Result<()>;
    async fn on_submit(
        &self,
        conn: &std::sync::Arc<ConnectionHandle>,
        id: Value,
        job_id: String,
        extra_nonce2: String,
        n_time: String,
        nonce: String,
    ) -> Result<()>;
    async fn on_disconnect(&self, conn: &std::sync::Arc<ConnectionHandle>);
}

/// Runs one miner connection to completion: splits the socket into a line-framed reader and
/// writer, spawns a writer task fed by an unbounded channel (so slow writers never block the
/// reader or other connections), and dispatches every decoded line until the socket closes,
/// the dispatcher disconnects it, or `shutdown` fires.
///
/// Grounded on the parasitepool Stratum connection loop's `FramedRead`/`FramedWrite` +
/// `tokio::select!` shape, adapted from a single-job-stream receiver to a generic dispatcher.
pub async fn run_connection<R, W>(
    id: String,
    peer_addr: SocketAddr,
    extra_nonce1: String,
    initial_diff: f64,
    reader: R,
    writer: W,
    dispatcher: std::sync::Arc<dyn RequestDispatcher>,
    ban_manager: std::sync::Arc<dyn BanManager>,
    ban_on_junk: bool,
    mut shutdown: tokio_util::sync::CancellationToken,
) where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
    let conn = std::sync::Arc::new(ConnectionHandle::new(
        id.clone(),
        peer_addr,
        extra_nonce1,
        outbound_tx,
        initial_diff,
    ));

    let mut framed_writer = FramedWrite::new(writer, LinesCodec::new());
    let writer_task = tokio::spawn(async move {
        use futures::SinkExt;
        while let Some(line) = outbound_rx.recv().await {
            if line.is_empty() {
                break;
            }
            if let Err(e) = framed_writer.send(line).await {
                warn!(connection = %id, error = %e, "stratum write failed");
                break;
            }
        }
    });

    let mut framed_reader = FramedRead::new(reader, LinesCodec::new());

    loop {
        use futures::StreamExt;
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!(connection = %conn.id, "connection shut down by server");
                break;
            }
            line = framed_reader.next() => {
                match line {
                    Some(Ok(line)) => {
                        conn.touch();
                        if let Err(e) = dispatch_line(&conn, &dispatcher, &line).await {
                            warn!(connection = %conn.id, error = %e, "error dispatching stratum request");
                            if is_junk_error(&e) {
                                if ban_on_junk {
                                    ban_manager.ban(peer_addr.ip());
                                    debug!(connection = %conn.id, addr = %peer_addr, "banned peer for malformed stratum line");
                                }
                                break;
                            }
                        }
                        if conn.state() == ConnectionState::Closed {
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        warn!(connection = %conn.id, error = %e, "stratum line decode error");
                        break;
                    }
                    None => {
                        debug!(connection = %conn.id, "connection closed by peer");
                        break;
                    }
                }
            }
        }
    }

    dispatcher.on_disconnect(&conn).await;
    conn.disconnect();
    writer_task.abort();
}

/// True for the one dispatch failure spec §4.2 calls a protocol violation deserving a ban: a
/// line that isn't valid JSON at all. A recognized method with bad params still gets a normal
/// stratum error response rather than a ban.
fn is_junk_error(err: &PoolError) -> bool {
    matches!(err, PoolError::StratumProtocol(msg) if msg.starts_with("malformed json"))
}

async fn dispatch_line(
    conn: &std::sync::Arc<ConnectionHandle>,
    dispatcher: &std::sync::Arc<dyn RequestDispatcher>,
    line: &str,
) -> Result<()> {
    let message: StratumMessage = match serde_json::from_str(line) {
        Ok(m) => m,
        Err(e) => {
            return Err(PoolError::StratumProtocol(format!("malformed json: {e}")));
        }
    };

    let request = match message.parse_request() {
        Ok(r) => r,
        Err(err) => {
            if let Some(id) = message.id {
                conn.respond_error(id, err)?;
            }
            return Ok(());
        }
    };

    use super::protocol::StratumRequest;
    match request {
        StratumRequest::Configure { id, extensions, .. } => {
            dispatcher.on_configure(conn, id, &extensions).await
        }
        StratumRequest::Subscribe { id, user_agent, .. } => {
            conn_set_state_if_new(conn);
            dispatcher.on_subscribe(conn, id, user_agent).await
        }
        StratumRequest::Authorize {
            id,
            worker_name,
            password,
        } => dispatcher.on_authorize(conn, id, worker_name, password).await,
        StratumRequest::Submit {
            id,
            job_id,
            extra_nonce2,
            n_time,
            nonce,
            ..
        } => {
            dispatcher
                .on_submit(conn, id, job_id, extra_nonce2, n_time, nonce)
                .await
        }
        StratumRequest::ExtraNonceSubscribe { id } => conn.respond(id, serde_json::json!(true)),
    }
}

fn conn_set_state_if_new(conn: &ConnectionHandle) {
    if conn.state() == ConnectionState::New {
        conn.set_state(ConnectionState::Subscribed);
    }
}

/// Marks a connection authorized; called by the dispatcher once credentials validate.
pub fn mark_authorized(conn: &ConnectionHandle, worker_name: String) {
    conn.set_worker_name(worker_name);
    conn.set_state(ConnectionState::Authorized);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_difficulty_applies_once() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = ConnectionHandle::new("c1".into(), "127.0.0.1:1".parse().unwrap(), "ab".into(), tx, 64.0);
        assert_eq!(conn.apply_pending_difficulty(), None);
        conn.enqueue_new_difficulty(128.0);
        assert_eq!(conn.apply_pending_difficulty(), Some(128.0));
        assert_eq!(conn.current_difficulty(), 128.0);
        assert_eq!(conn.apply_pending_difficulty(), None);
    }

    #[test]
    fn state_transitions_forward_only() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = ConnectionHandle::new("c1".into(), "127.0.0.1:1".parse().unwrap(), "ab".into(), tx, 64.0);
        assert_eq!(conn.state(), ConnectionState::New);
        conn_set_state_if_new(&conn);
        assert_eq!(conn.state(), ConnectionState::Subscribed);
        mark_authorized(&conn, "alice.worker1".into());
        assert_eq!(conn.state(), ConnectionState::Authorized);
        assert_eq!(conn.worker_name().as_deref(), Some("alice.worker1"));
    }
}
