//! Client connection identifiers.

use rand::Rng;
use std::collections::HashSet;

/// A 6-hex-character connection identifier, unique among currently open connections.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub String);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ConnectionId {
    /// Generate a fresh id by rejection-sampling against `existing` until unique.
    pub fn generate(existing: &HashSet<ConnectionId>) -> Self {
        let mut rng = rand::thread_rng();
        loop {
            let candidate: u32 = rng.gen_range(0..=0xFF_FFFF);
            let id = ConnectionId(format!("{candidate:06x}"));
            if !existing.contains(&id) {
                return id;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_id_is_six_hex_chars() {
        let id = ConnectionId::generate(&HashSet::new());
        assert_eq!(id.0.len(), 6);
        assert!(id.0.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn generated_id_avoids_collisions() {
        let mut existing = HashSet::new();
        for _ in 0..100 {
            let id = ConnectionId::generate(&existing);
            assert!(!existing.contains(&id));
            existing.insert(id);
        }
    }
}
