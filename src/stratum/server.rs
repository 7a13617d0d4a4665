use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ban::BanManager;
use crate::job::{JobManager, PoolHandler};
use crate::stratum::connection::run_connection;

/// Raw-TCP Stratum listener for one pool. Accepts connections, rejects banned peers before a
/// socket is even split into a reader/writer, and hands every admitted connection its own
/// task running the line-framed protocol loop against the pool's [`JobManager`] (spec §4.4/§5).
///
/// TLS is intentionally not wired up here: the teacher and the rest of the retrieval pack only
/// use TLS client-side (`reqwest`'s `rustls-tls` feature, for talking to coin daemons), never
/// for accepting inbound connections, so there is no grounded crate for an inbound TLS
/// handshake in this corpus. See `DESIGN.md` for this Open Question's resolution.
pub struct StratumServer<H: PoolHandler> {
    pool_id: String,
    bind_addr: SocketAddr,
    manager: Arc<JobManager<H>>,
    ban_manager: Arc<dyn BanManager>,
    initial_diff: f64,
    ban_on_junk_receive: bool,
    next_extra_nonce: std::sync::atomic::AtomicU64,
}

impl<H: PoolHandler> StratumServer<H> {
    pub fn new(
        pool_id: String,
        bind_addr: SocketAddr,
        manager: Arc<JobManager<H>>,
        ban_manager: Arc<dyn BanManager>,
        initial_diff: f64,
        ban_on_junk_receive: bool,
    ) -> Self {
        Self {
            pool_id,
            bind_addr,
            manager,
            ban_manager,
            initial_diff,
            ban_on_junk_receive,
            next_extra_nonce: std::sync::atomic::AtomicU64::new(1),
        }
    }

    /// Runs the accept loop until `shutdown` fires. Each accepted connection is handed to its
    /// own task; the loop itself never blocks on a single connection's lifetime.
    pub async fn run(&self, shutdown: CancellationToken) -> io::Result<()> {
        let listener = TcpListener::bind(self.bind_addr).await?;
        info!(pool_id = %self.pool_id, addr = %self.bind_addr, "stratum listener bound");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(pool_id = %self.pool_id, "stratum listener shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.admit(stream, addr, shutdown.clone()),
                        Err(e) if is_ignorable_accept_error(&e) => {
                            warn!(pool_id = %self.pool_id, error = %e, "ignoring transient accept error");
                        }
                        Err(e) => {
                            warn!(pool_id = %self.pool_id, error = %e, "accept error");
                            return Err(e);
                        }
                    }
                }
            }
        }
    }

    fn admit(&self, stream: tokio::net::TcpStream, addr: SocketAddr, shutdown: CancellationToken) {
        if self.ban_manager.is_banned(addr.ip()) {
            return;
        }
        let _ = stream.set_nodelay(true);

        let id = Uuid::new_v4().to_string();
        let extra_nonce1 = format!(
            "{:08x}",
            self.next_extra_nonce.fetch_add(1, std::sync::atomic::Ordering::Relaxed)
        );
        let manager = self.manager.clone();
        let initial_diff = self.initial_diff;
        let ban_manager = self.ban_manager.clone();
        let ban_on_junk = self.ban_on_junk_receive;

        tokio::spawn(async move {
            let (read_half, write_half) = stream.into_split();
            run_connection(
                id,
                addr,
                extra_nonce1,
                initial_diff,
                read_half,
                write_half,
                manager,
                ban_manager,
                ban_on_junk,
                shutdown,
            )
            .await;
        });
    }
}

/// Accept-loop errors that should not bring the listener down: transient resource exhaustion
/// or a peer that reset the connection before the OS finished handing it off. The exact
/// `raw_os_error` codes are platform-specific; this table covers Linux/BSD/Windows equivalents
/// for the handful of errnos that show up under real connection floods.
fn is_ignorable_accept_error(e: &io::Error) -> bool {
    match e.kind() {
        io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::Interrupted => true,
        _ => match e.raw_os_error() {
            // EMFILE / ENFILE (too many open files) on Unix, WSAEMFILE on Windows.
            Some(24) | Some(23) | Some(10024) => true,
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_reset_is_ignorable() {
        let e = io::Error::from(io::ErrorKind::ConnectionReset);
        assert!(is_ignorable_accept_error(&e));
    }

    #[test]
    fn permission_denied_is_fatal() {
        let e = io::Error::from(io::ErrorKind::PermissionDenied);
        assert!(!is_ignorable_accept_error(&e));
    }
}
