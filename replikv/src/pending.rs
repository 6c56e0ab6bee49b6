use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Mutex;

/// A read that could not be answered because the serving node was not yet
/// fresh enough. Resolved by the next write to the key, which pushes the
/// result to `callback` over a new connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRead {
    pub key: String,
    pub client_timestamp: u64,
    pub callback: SocketAddr,
}

/// Registry of parked reads, keyed by the key they wait on.
///
/// Registration and drain are individually atomic; the GET handler combines
/// them with a store re-check so no waiter survives the write that should
/// have satisfied it. Entries have no expiry: only a write removes them.
#[derive(Default)]
pub struct PendingReads {
    entries: Mutex<HashMap<String, Vec<PendingRead>>>,
}

impl PendingReads {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, entry: PendingRead) {
        self.entries
            .lock()
            .unwrap()
            .entry(entry.key.clone())
            .or_default()
            .push(entry);
    }

    /// Removes and returns every waiter for `key`.
    pub fn drain(&self, key: &str) -> Vec<PendingRead> {
        self.entries.lock().unwrap().remove(key).unwrap_or_default()
    }

    /// Removes one occurrence of `entry`, returning whether it was still
    /// registered. `false` means a concurrent drain already claimed it and
    /// its push is on the way.
    pub fn remove(&self, entry: &PendingRead) -> bool {
        let mut entries = self.entries.lock().unwrap();
        let Some(waiters) = entries.get_mut(&entry.key) else {
            return false;
        };
        let Some(position) = waiters.iter().position(|w| w == entry) else {
            return false;
        };
        waiters.swap_remove(position);
        if waiters.is_empty() {
            entries.remove(&entry.key);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(key: &str, client_timestamp: u64, port: u16) -> PendingRead {
        PendingRead {
            key: key.into(),
            client_timestamp,
            callback: format!("127.0.0.1:{port}").parse().unwrap(),
        }
    }

    #[test]
    fn drain_returns_all_waiters_for_the_key_once() {
        let pending = PendingReads::new();
        pending.register(entry("a", 1, 20001));
        pending.register(entry("a", 2, 20002));
        pending.register(entry("b", 1, 20003));

        let drained = pending.drain("a");
        assert_eq!(drained.len(), 2);
        assert!(drained.iter().all(|w| w.key == "a"));

        // A second drain finds nothing; "b" is untouched.
        assert!(pending.drain("a").is_empty());
        assert_eq!(pending.drain("b").len(), 1);
    }

    #[test]
    fn remove_claims_an_entry_exactly_once() {
        let pending = PendingReads::new();
        let waiter = entry("a", 5, 20001);
        pending.register(waiter.clone());

        assert!(pending.remove(&waiter));
        assert!(!pending.remove(&waiter));
        assert!(pending.drain("a").is_empty());
    }

    #[test]
    fn remove_after_drain_reports_already_claimed() {
        let pending = PendingReads::new();
        let waiter = entry("a", 5, 20001);
        pending.register(waiter.clone());

        assert_eq!(pending.drain("a").len(), 1);
        assert!(!pending.remove(&waiter));
    }

    #[test]
    fn duplicate_registrations_are_kept_apart() {
        let pending = PendingReads::new();
        let waiter = entry("a", 5, 20001);
        pending.register(waiter.clone());
        pending.register(waiter.clone());

        assert!(pending.remove(&waiter));
        assert_eq!(pending.drain("a").len(), 1);
    }
}
