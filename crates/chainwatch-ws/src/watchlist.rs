//! Mempool watchlist: unconfirmed txids observed per address, pending
//! confirmation on the next block.

use std::collections::{HashMap, HashSet};

#[derive(Default)]
pub struct Watchlist {
    entries: HashMap<String, HashSet<String>>,
}

impl Watchlist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an unconfirmed `txid` seen for `address_key`. Returns `true`
    /// if this is a new entry for that address (caller should emit `update`
    /// with no checkpoint).
    pub fn track(&mut self, address_key: &str, txid: &str) -> bool {
        let set = self.entries.entry(address_key.to_string()).or_default();
        set.insert(txid.to_string())
    }

    /// Drop `txid` from `address_key`'s set once it confirms. Returns `true`
    /// if the txid was present and removed. When the address's set becomes
    /// empty, the entry itself is removed.
    pub fn confirm(&mut self, address_key: &str, txid: &str) -> bool {
        let Some(set) = self.entries.get_mut(address_key) else {
            return false;
        };
        let removed = set.remove(txid);
        if set.is_empty() {
            self.entries.remove(address_key);
        }
        removed
    }

    pub fn is_watching(&self, address_key: &str) -> bool {
        self.entries.contains_key(address_key)
    }

    /// All addresses with at least one pending unconfirmed tx.
    pub fn watched_addresses(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn remove_address(&mut self, address_key: &str) {
        self.entries.remove(address_key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_track_reports_new() {
        let mut w = Watchlist::new();
        assert!(w.track("addr1", "tx1"));
        assert!(!w.track("addr1", "tx1"));
        assert!(w.track("addr1", "tx2"));
    }

    #[test]
    fn confirm_clears_entry_when_set_empties() {
        let mut w = Watchlist::new();
        w.track("addr1", "tx1");
        assert!(w.is_watching("addr1"));
        assert!(w.confirm("addr1", "tx1"));
        assert!(!w.is_watching("addr1"));
    }

    #[test]
    fn confirm_unknown_txid_is_noop() {
        let mut w = Watchlist::new();
        w.track("addr1", "tx1");
        assert!(!w.confirm("addr1", "tx-other"));
        assert!(w.is_watching("addr1"));
    }
}
