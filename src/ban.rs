use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How long a misbehaving IP is refused new connections after a JSON parse failure or TLS
/// handshake error (spec §7): three minutes.
pub const BAN_DURATION: Duration = Duration::from_secs(180);

/// Tracks banned IPs for the Stratum listener's accept loop. A ban is checked once per
/// `accept()`, not per message, so it is cheap even under a connection flood.
pub trait BanManager: Send + Sync {
    fn ban(&self, addr: IpAddr);
    fn is_banned(&self, addr: IpAddr) -> bool;
}

/// Default in-memory ban table: one mutex-guarded map of banned IP to ban expiry.
///
/// Grounded on the parasitepool "bouncer" pattern (ban/idle-drop heuristics keyed on peer
/// address), narrowed to this spec's single ban trigger: malformed JSON or a failed TLS
/// handshake.
#[derive(Default)]
pub struct InMemoryBanManager {
    banned: Mutex<HashMap<IpAddr, Instant>>,
}

impl InMemoryBanManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BanManager for InMemoryBanManager {
    fn ban(&self, addr: IpAddr) {
        let mut banned = self.banned.lock().expect("ban table mutex poisoned");
        banned.insert(addr, Instant::now() + BAN_DURATION);
    }

    fn is_banned(&self, addr: IpAddr) -> bool {
        let mut banned = self.banned.lock().expect("ban table mutex poisoned");
        match banned.get(&addr) {
            Some(expiry) if *expiry > Instant::now() => true,
            Some(_) => {
                banned.remove(&addr);
                false
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn banned_ip_is_rejected_until_expiry() {
        let manager = InMemoryBanManager::new();
        let addr: IpAddr = "127.0.0.1".parse().unwrap();
        assert!(!manager.is_banned(addr));
        manager.ban(addr);
        assert!(manager.is_banned(addr));
    }

    #[test]
    fn distinct_ips_are_independent() {
        let manager = InMemoryBanManager::new();
        let a: IpAddr = "127.0.0.1".parse().unwrap();
        let b: IpAddr = "127.0.0.2".parse().unwrap();
        manager.ban(a);
        assert!(manager.is_banned(a));
        assert!(!manager.is_banned(b));
    }
}
