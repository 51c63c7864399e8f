//! The unified interface every upstream adapter variant implements.

use async_trait::async_trait;

use crate::address::{Address, PluginId};
use crate::error::HubError;

/// One upstream data source: Direct WebSocket, block-polling RPC, or webhook.
///
/// Adapters never call back into hub code directly. Construction takes an
/// owned `mpsc::Sender<AdapterEvent>` (or equivalent) that the adapter holds
/// and pushes [`crate::event::AdapterEvent`] values into; the hub's event
/// loop does all the fan-out.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// The plugin id this adapter instance serves.
    fn plugin_id(&self) -> &PluginId;

    /// Start tracking `addr` upstream. Returns `false` if the upstream
    /// refused (e.g. rejected the subscribe call).
    async fn subscribe(&self, addr: &Address) -> Result<bool, HubError>;

    /// Stop tracking `addr` upstream.
    async fn unsubscribe(&self, addr: &Address) -> Result<(), HubError>;

    /// Ask whether `addr` has seen activity since `checkpoint`.
    ///
    /// `None` means this adapter variant has no scan capability at all
    /// (the caller should treat that the same as "changed"); `Some(Err(_))`
    /// means the scan attempt failed and should also fail open.
    async fn scan(&self, addr: &Address, checkpoint: Option<&str>) -> Option<Result<bool, HubError>>;

    /// Release every resource this adapter holds (connections, timers).
    async fn destroy(&self);
}
