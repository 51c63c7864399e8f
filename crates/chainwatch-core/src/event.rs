//! Events upstream adapters emit toward the hub. Adapters push these over an
//! owned channel rather than calling back into hub code directly.

use crate::address::Checkpoint;

/// An event an [`crate`]-level adapter pushes toward the hub's inbox.
///
/// Adapters never call back into the hub directly; they send one of these
/// over an owned `mpsc` channel and the hub's event loop does the fan-out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterEvent {
    /// `addr` was touched on-chain, optionally as of `checkpoint`.
    Update {
        address_key: String,
        address_original: String,
        checkpoint: Checkpoint,
    },
    /// The adapter lost its upstream subscription for every address in
    /// `address_keys` (e.g. a data connection closed). Clients must
    /// re-subscribe; the hub removes these from subscription state so a
    /// later `update` for an already-forgotten address is silently dropped.
    SubLost { address_keys: Vec<String> },
}
