//! Per-plugin subscriber index: the bidirectional `{address ↔ set<connection>}`
//! map described in §3 Data Model, plus its inverse. One instance lives per
//! plugin, guarded by a single lock (§5: "a single mutex per plugin or an
//! actor") so the two maps are always mutated together.

use std::collections::{HashMap, HashSet};

use chainwatch_core::ConnectionId;

/// Pure data structure: no I/O, no upstream awareness. The hub decides what
/// to do with the `bool`/`Vec<String>` results (calling the adapter,
/// emitting metrics); this type only keeps the index consistent.
#[derive(Debug, Default)]
pub struct SubscriptionState {
    address_to_conns: HashMap<String, HashSet<ConnectionId>>,
    conn_to_addrs: HashMap<ConnectionId, HashSet<String>>,
}

impl SubscriptionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `conn` is subscribed to `addr_key`. Returns `true` iff
    /// `conn` is the first subscriber for this address (caller should call
    /// `adapter.subscribe`). Idempotent: a second `track` from the same
    /// connection for the same address is a no-op that returns `false`.
    pub fn track(&mut self, conn: ConnectionId, addr_key: &str) -> bool {
        let conns = self.address_to_conns.entry(addr_key.to_string()).or_default();
        let is_first = conns.is_empty();
        conns.insert(conn.clone());
        self.conn_to_addrs.entry(conn).or_default().insert(addr_key.to_string());
        is_first
    }

    /// Remove `conn`'s subscription to `addr_key`. Returns `true` iff that
    /// was the last subscriber for the address (caller should call
    /// `adapter.unsubscribe`). A no-op on a missing subscription returns
    /// `false`.
    pub fn untrack(&mut self, conn: &ConnectionId, addr_key: &str) -> bool {
        let mut was_last = false;
        if let Some(conns) = self.address_to_conns.get_mut(addr_key) {
            conns.remove(conn);
            if conns.is_empty() {
                self.address_to_conns.remove(addr_key);
                was_last = true;
            }
        }
        if let Some(addrs) = self.conn_to_addrs.get_mut(conn) {
            addrs.remove(addr_key);
            if addrs.is_empty() {
                self.conn_to_addrs.remove(conn);
            }
        }
        was_last
    }

    /// Remove every subscription `conn` held. Returns the address keys whose
    /// subscriber set became empty as a result — those are the ones the
    /// caller must upstream-unsubscribe.
    pub fn cleanup(&mut self, conn: &ConnectionId) -> Vec<String> {
        let Some(addrs) = self.conn_to_addrs.remove(conn) else {
            return Vec::new();
        };
        let mut drained = Vec::new();
        for addr_key in addrs {
            if let Some(conns) = self.address_to_conns.get_mut(&addr_key) {
                conns.remove(conn);
                if conns.is_empty() {
                    self.address_to_conns.remove(&addr_key);
                    drained.push(addr_key);
                }
            }
        }
        drained
    }

    /// Current subscribers of `addr_key`, for fan-out.
    pub fn subscribers(&self, addr_key: &str) -> Vec<ConnectionId> {
        self.address_to_conns
            .get(addr_key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop every subscriber of `addr_key` from the index without touching
    /// upstream — used after a `subLost`, so a stale `update` that still
    /// arrives for a forgotten address reaches nobody.
    pub fn remove_address(&mut self, addr_key: &str) {
        if let Some(conns) = self.address_to_conns.remove(addr_key) {
            for conn in conns {
                if let Some(addrs) = self.conn_to_addrs.get_mut(&conn) {
                    addrs.remove(addr_key);
                }
            }
        }
    }

    /// Number of addresses with at least one live subscriber — the
    /// `chainwatch_subscriptions_active` gauge's value for this plugin.
    pub fn address_count(&self) -> usize {
        self.address_to_conns.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(id: &str) -> ConnectionId {
        ConnectionId(id.to_string())
    }

    #[test]
    fn first_subscriber_is_reported() {
        let mut s = SubscriptionState::new();
        assert!(s.track(conn("aaaaaa"), "addr1"));
        assert!(!s.track(conn("bbbbbb"), "addr1"));
    }

    #[test]
    fn repeated_track_from_same_connection_is_idempotent() {
        let mut s = SubscriptionState::new();
        assert!(s.track(conn("aaaaaa"), "addr1"));
        assert!(!s.track(conn("aaaaaa"), "addr1"));
        assert_eq!(s.subscribers("addr1").len(), 1);
    }

    #[test]
    fn last_unsubscribe_is_reported() {
        let mut s = SubscriptionState::new();
        s.track(conn("aaaaaa"), "addr1");
        s.track(conn("bbbbbb"), "addr1");
        assert!(!s.untrack(&conn("aaaaaa"), "addr1"));
        assert!(s.untrack(&conn("bbbbbb"), "addr1"));
    }

    #[test]
    fn untrack_of_missing_subscription_is_noop() {
        let mut s = SubscriptionState::new();
        assert!(!s.untrack(&conn("aaaaaa"), "addr1"));
    }

    #[test]
    fn cleanup_drains_every_address_for_connection() {
        let mut s = SubscriptionState::new();
        s.track(conn("aaaaaa"), "addr1");
        s.track(conn("aaaaaa"), "addr2");
        s.track(conn("bbbbbb"), "addr2");

        let mut drained = s.cleanup(&conn("aaaaaa"));
        drained.sort();
        assert_eq!(drained, vec!["addr1".to_string()]);
        assert_eq!(s.subscribers("addr2"), vec![conn("bbbbbb")]);
        assert!(s.subscribers("addr1").is_empty());
    }

    #[test]
    fn cleanup_of_unknown_connection_is_noop() {
        let mut s = SubscriptionState::new();
        assert!(s.cleanup(&conn("ffffff")).is_empty());
    }

    #[test]
    fn maps_stay_mutual_inverses() {
        let mut s = SubscriptionState::new();
        s.track(conn("aaaaaa"), "addr1");
        s.track(conn("aaaaaa"), "addr2");
        s.track(conn("bbbbbb"), "addr1");
        s.untrack(&conn("aaaaaa"), "addr1");

        for (addr_key, conns) in &s.address_to_conns {
            for c in conns {
                assert!(s.conn_to_addrs[c].contains(addr_key));
            }
        }
        for (c, addrs) in &s.conn_to_addrs {
            for addr_key in addrs {
                assert!(s.address_to_conns[addr_key].contains(c));
            }
        }
    }

    #[test]
    fn remove_address_forgets_every_subscriber() {
        let mut s = SubscriptionState::new();
        s.track(conn("aaaaaa"), "addr1");
        s.track(conn("bbbbbb"), "addr1");
        s.remove_address("addr1");
        assert!(s.subscribers("addr1").is_empty());
        assert!(s.cleanup(&conn("aaaaaa")).is_empty());
    }
}
