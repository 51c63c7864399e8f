//! The hub's core vocabulary: plugin identifiers, addresses, and checkpoints.

use serde::{Deserialize, Serialize};

/// A configured adapter instance, e.g. `"bitcoin"` or `"ethereum"`. Opaque to the hub.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PluginId(pub String);

impl From<&str> for PluginId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for PluginId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for PluginId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a plugin's addresses are normalized (EVM, lower-cased) or used verbatim (UTXO).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainKind {
    /// EVM-style chains: addresses are normalized to lower-case before use as a key.
    Evm,
    /// UTXO-style chains (Bitcoin, Litecoin, …): addresses are used as-is.
    Utxo,
}

/// A chain-specific address.
///
/// `original` is exactly what the client sent and is what callbacks echo
/// back; `key()` is what the subscription-state maps index by. For
/// [`ChainKind::Evm`] plugins the key is lower-cased; for [`ChainKind::Utxo`]
/// plugins `key() == original`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    original: String,
    key: String,
}

impl Address {
    /// Build an `Address`, normalizing the key according to `kind`.
    pub fn new(original: impl Into<String>, kind: ChainKind) -> Self {
        let original = original.into();
        let key = match kind {
            ChainKind::Evm => original.to_lowercase(),
            ChainKind::Utxo => original.clone(),
        };
        Self { original, key }
    }

    /// The original-case address as supplied by the client.
    pub fn original(&self) -> &str {
        &self.original
    }

    /// The normalized key used to index subscription-state maps.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.original)
    }
}

/// An opaque client-supplied position (block height, usually). `None` means
/// "the client has no prior knowledge" — a scan in that state must answer
/// "changed".
pub type Checkpoint = Option<String>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evm_address_normalizes_key_but_keeps_original() {
        let a = Address::new("0xAbCdEf0000000000000000000000000000000000", ChainKind::Evm);
        assert_eq!(a.key(), "0xabcdef0000000000000000000000000000000000");
        assert_eq!(a.original(), "0xAbCdEf0000000000000000000000000000000000");
    }

    #[test]
    fn utxo_address_is_unnormalized() {
        let a = Address::new("bc1qMixedCaseBech32", ChainKind::Utxo);
        assert_eq!(a.key(), "bc1qMixedCaseBech32");
        assert_eq!(a.original(), "bc1qMixedCaseBech32");
    }

    #[test]
    fn plugin_id_display() {
        let p: PluginId = "ethereum".into();
        assert_eq!(p.to_string(), "ethereum");
    }
}
