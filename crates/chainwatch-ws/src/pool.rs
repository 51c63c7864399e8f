//! Connection pool for Blockbook address subscriptions: up to 100 addresses
//! share one WebSocket connection before a new one is opened.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use chainwatch_codec::MethodRegistry;
use chainwatch_core::HubError;

use crate::connection::{DataConnId, DataConnection};

const MAX_ADDRESSES_PER_CONNECTION: usize = 100;

pub struct ConnectionPool {
    url: String,
    connections: Mutex<Vec<Arc<DataConnection>>>,
    /// Which connection currently owns each address, by normalized key.
    owners: Mutex<HashMap<String, DataConnId>>,
    closed_tx: mpsc::UnboundedSender<DataConnId>,
    methods: Arc<dyn Fn() -> MethodRegistry + Send + Sync>,
}

impl ConnectionPool {
    pub fn new(
        url: impl Into<String>,
        closed_tx: mpsc::UnboundedSender<DataConnId>,
        methods: Arc<dyn Fn() -> MethodRegistry + Send + Sync>,
    ) -> Self {
        Self {
            url: url.into(),
            connections: Mutex::new(Vec::new()),
            owners: Mutex::new(HashMap::new()),
            closed_tx,
            methods,
        }
    }

    /// Add `address_key` to the tail connection, opening a new one if the
    /// tail is at capacity or none exists yet.
    pub async fn subscribe(&self, address_key: &str) -> Result<(), HubError> {
        let mut conns = self.connections.lock().await;
        let needs_new = conns
            .last()
            .map(|c| c.address_count() >= MAX_ADDRESSES_PER_CONNECTION)
            .unwrap_or(true);

        if needs_new {
            let conn = DataConnection::connect(&self.url, (self.methods)(), self.closed_tx.clone()).await?;
            conns.push(Arc::new(conn));
        }

        let conn = conns.last().unwrap().clone();
        let mut addrs = conn.addresses();
        addrs.push(address_key.to_string());
        conn.set_addresses(addrs).await?;

        self.owners
            .lock()
            .await
            .insert(address_key.to_string(), conn.id);
        Ok(())
    }

    /// Remove `address_key` from whichever connection owns it; closes the
    /// connection if it becomes empty.
    pub async fn unsubscribe(&self, address_key: &str) -> Result<(), HubError> {
        let owner = self.owners.lock().await.remove(address_key);
        let Some(owner) = owner else {
            return Ok(());
        };

        let mut conns = self.connections.lock().await;
        let Some(idx) = conns.iter().position(|c| c.id == owner) else {
            return Ok(());
        };
        let conn = conns[idx].clone();
        let remaining: Vec<String> = conn
            .addresses()
            .into_iter()
            .filter(|a| a != address_key)
            .collect();

        if remaining.is_empty() {
            conns.remove(idx);
            // the connection's background task notices the drop only if
            // all `Arc` clones go away; the pool is the sole owner here.
        } else {
            conn.set_addresses(remaining).await?;
        }
        Ok(())
    }

    /// Drop bookkeeping for a connection that closed on its own (remote
    /// close, transport error). Returns the address keys it owned so the
    /// caller can emit `subLost`.
    pub async fn forget_closed(&self, id: DataConnId) -> Vec<String> {
        let mut conns = self.connections.lock().await;
        let Some(idx) = conns.iter().position(|c| c.id == id) else {
            return Vec::new();
        };
        let conn = conns.remove(idx);
        let owned = conn.addresses();

        let mut owners = self.owners.lock().await;
        owners.retain(|_, owner| *owner != id);
        owned
    }

    pub async fn connection_for(&self, address_key: &str) -> Option<Arc<DataConnection>> {
        let owner = *self.owners.lock().await.get(address_key)?;
        self.connections
            .lock()
            .await
            .iter()
            .find(|c| c.id == owner)
            .cloned()
    }

    pub async fn all_connections(&self) -> Vec<Arc<DataConnection>> {
        self.connections.lock().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::MAX_ADDRESSES_PER_CONNECTION;

    #[test]
    fn cap_matches_protocol_limit() {
        assert_eq!(MAX_ADDRESSES_PER_CONNECTION, 100);
    }
}
