//! On-disk plugin configuration shapes.

use serde::{Deserialize, Serialize};

use crate::address::ChainKind;

/// One configured adapter instance as loaded from the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    pub plugin_id: String,
    #[serde(flatten)]
    pub variant: PluginVariant,
}

/// The three upstream source families.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PluginVariant {
    /// Direct WebSocket (Blockbook family) — UTXO chains, no address normalization.
    DirectWs {
        urls: Vec<String>,
        #[serde(default)]
        explorer_urls: Vec<String>,
    },
    /// Block-polling RPC (EVM-RPC family).
    BlockPoller {
        chain_id: u64,
        urls: Vec<String>,
        #[serde(default = "default_true")]
        track_internal_transfers: bool,
        #[serde(default)]
        scan_urls: Vec<String>,
    },
    /// Webhook-driven (Alchemy family).
    Webhook {
        network: String,
        chain_id: u64,
    },
}

fn default_true() -> bool {
    true
}

impl PluginVariant {
    /// EVM variants normalize addresses; the direct-WS (UTXO/Blockbook) family does not.
    pub fn chain_kind(&self) -> ChainKind {
        match self {
            PluginVariant::DirectWs { .. } => ChainKind::Utxo,
            PluginVariant::BlockPoller { .. } | PluginVariant::Webhook { .. } => ChainKind::Evm,
        }
    }

    /// Validate the variant-specific shape, returning a human-readable reason on failure.
    /// Called at config-load time so a malformed plugin fails server startup (exit 1)
    /// rather than at first use.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            PluginVariant::DirectWs { urls, .. } if urls.is_empty() => {
                Err("direct_ws plugin requires at least one url".into())
            }
            PluginVariant::BlockPoller { urls, .. } if urls.is_empty() => {
                Err("block_poller plugin requires at least one url".into())
            }
            PluginVariant::Webhook { network, .. } if network.is_empty() => {
                Err("webhook plugin requires a non-empty network".into())
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_ws_is_utxo_kind() {
        let v = PluginVariant::DirectWs {
            urls: vec!["wss://x".into()],
            explorer_urls: vec![],
        };
        assert_eq!(v.chain_kind(), ChainKind::Utxo);
    }

    #[test]
    fn block_poller_is_evm_kind() {
        let v = PluginVariant::BlockPoller {
            chain_id: 1,
            urls: vec!["https://x".into()],
            track_internal_transfers: true,
            scan_urls: vec![],
        };
        assert_eq!(v.chain_kind(), ChainKind::Evm);
    }

    #[test]
    fn empty_urls_fail_validation() {
        let v = PluginVariant::DirectWs {
            urls: vec![],
            explorer_urls: vec![],
        };
        assert!(v.validate().is_err());
    }

    #[test]
    fn deserializes_tagged_variant() {
        let json = r#"{"plugin_id":"ethereum","kind":"block_poller","chain_id":1,"urls":["https://rpc"]}"#;
        let cfg: PluginConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.plugin_id, "ethereum");
        matches!(cfg.variant, PluginVariant::BlockPoller { .. });
    }
}
