//! chainwatch-scan — historical activity scan backend.
//!
//! A [`ScanBackend`] answers, for one `(address, checkpoint)` pair, "has this
//! address seen activity after `checkpoint`?" against an Etherscan-compatible
//! explorer HTTP API. Used only at subscribe time, to decide whether a
//! reconnecting client missed anything while it was offline.

pub mod etherscan;
pub mod global;

pub use etherscan::{EtherscanBackend, EtherscanConfig, EtherscanVersion};
pub use global::ScanBackendGlobal;

use async_trait::async_trait;
use chainwatch_core::HubError;

/// A pluggable `(address, checkpoint) → bool` historical-activity check.
#[async_trait]
pub trait ScanBackend: Send + Sync {
    /// Returns `true` if `address` has activity strictly after `checkpoint`,
    /// or `true` unconditionally if `checkpoint` is `None` — an absent
    /// checkpoint means the client has no prior knowledge to compare against.
    async fn scan(&self, address: &str, checkpoint: Option<&str>) -> Result<bool, HubError>;
}
