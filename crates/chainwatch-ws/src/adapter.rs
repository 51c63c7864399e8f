//! The Direct WebSocket (Blockbook-family) upstream adapter.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};

use chainwatch_codec::{FnMethod, MethodRegistry};
use chainwatch_core::{Adapter, Address, AdapterEvent, HubError, PluginId, StepBackoff, StepBackoffConfig};

use crate::connection::{DataConnId, DataConnection};
use crate::pool::ConnectionPool;
use crate::watchlist::Watchlist;

const PING_INTERVAL: Duration = Duration::from_secs(50);

struct AdapterState {
    watchlist: Watchlist,
}

/// Owns N data connections (via [`ConnectionPool`]) plus one block
/// notification connection, all to the same Blockbook-family node.
pub struct DirectWsAdapter {
    plugin_id: PluginId,
    url: String,
    events: mpsc::UnboundedSender<AdapterEvent>,
    pool: Arc<ConnectionPool>,
    state: Arc<Mutex<AdapterState>>,
    block_conn: Arc<Mutex<Option<Arc<DataConnection>>>>,
    shutdown: mpsc::UnboundedSender<()>,
}

impl DirectWsAdapter {
    pub async fn new(
        plugin_id: PluginId,
        url: impl Into<String>,
        events: mpsc::UnboundedSender<AdapterEvent>,
    ) -> Self {
        let url = url.into();
        let state = Arc::new(Mutex::new(AdapterState {
            watchlist: Watchlist::new(),
        }));

        let (closed_tx, mut closed_rx) = mpsc::unbounded_channel::<DataConnId>();
        let data_methods: Arc<dyn Fn() -> MethodRegistry + Send + Sync> = {
            let events = events.clone();
            let state = state.clone();
            Arc::new(move || push_registry_for_data_connection(events.clone(), state.clone()))
        };
        let pool = Arc::new(ConnectionPool::new(url.clone(), closed_tx, data_methods));

        // Reap connections that close on their own (not via explicit unsubscribe)
        // and translate their owned addresses into a `subLost`.
        {
            let pool = pool.clone();
            let events = events.clone();
            let state = state.clone();
            tokio::spawn(async move {
                while let Some(id) = closed_rx.recv().await {
                    let owned = pool.forget_closed(id).await;
                    if owned.is_empty() {
                        continue;
                    }
                    let mut guard = state.lock().await;
                    for addr in &owned {
                        guard.watchlist.remove_address(addr);
                    }
                    drop(guard);
                    let _ = events.send(AdapterEvent::SubLost { address_keys: owned });
                }
            });
        }

        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel::<()>();
        let adapter = Self {
            plugin_id,
            url: url.clone(),
            events: events.clone(),
            pool,
            state: state.clone(),
            block_conn: Arc::new(Mutex::new(None)),
            shutdown: shutdown_tx,
        };

        adapter.spawn_block_loop(shutdown_rx);
        adapter.spawn_ping_loop();
        adapter
    }

    fn spawn_block_loop(&self, mut shutdown_rx: mpsc::UnboundedReceiver<()>) {
        let url = self.url.clone();
        let events = self.events.clone();
        let state = self.state.clone();
        let block_conn = self.block_conn.clone();

        tokio::spawn(async move {
            let mut backoff = StepBackoff::new(StepBackoffConfig::default());
            loop {
                let connected_at = Instant::now();
                let (closed_tx, mut closed_rx) = mpsc::unbounded_channel::<DataConnId>();
                let registry = push_registry_for_block_connection(events.clone(), state.clone(), url.clone());

                match DataConnection::connect(&url, registry, closed_tx).await {
                    Ok(conn) => {
                        let conn = Arc::new(conn);
                        *block_conn.lock().await = Some(conn.clone());

                        tokio::select! {
                            _ = closed_rx.recv() => {}
                            _ = shutdown_rx.recv() => {
                                *block_conn.lock().await = None;
                                return;
                            }
                        }
                        *block_conn.lock().await = None;
                    }
                    Err(e) => {
                        tracing::warn!(url = %url, error = %e, "block connection failed");
                    }
                }

                let delay = backoff.next(connected_at.elapsed());
                tracing::warn!(url = %url, delay = ?delay, "reconnecting block connection");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown_rx.recv() => return,
                }
            }
        });
    }

    fn spawn_ping_loop(&self) {
        let pool = self.pool.clone();
        let block_conn = self.block_conn.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PING_INTERVAL);
            loop {
                ticker.tick().await;
                for conn in pool.all_connections().await {
                    conn.ping().await;
                }
                if let Some(conn) = block_conn.lock().await.as_ref() {
                    conn.ping().await;
                }
            }
        });
    }
}

#[async_trait]
impl Adapter for DirectWsAdapter {
    fn plugin_id(&self) -> &PluginId {
        &self.plugin_id
    }

    async fn subscribe(&self, addr: &Address) -> Result<bool, HubError> {
        self.pool.subscribe(addr.key()).await?;
        Ok(true)
    }

    async fn unsubscribe(&self, addr: &Address) -> Result<(), HubError> {
        self.pool.unsubscribe(addr.key()).await?;
        let mut guard = self.state.lock().await;
        guard.watchlist.remove_address(addr.key());
        Ok(())
    }

    async fn scan(&self, addr: &Address, checkpoint: Option<&str>) -> Option<Result<bool, HubError>> {
        let conn = self.pool.connection_for(addr.key()).await?;
        let info = match conn.get_account_info(addr.key(), "txs", checkpoint).await {
            Ok(info) => info,
            Err(e) => return Some(Err(e)),
        };

        let unconfirmed = info
            .get("unconfirmedTxs")
            .and_then(|v| v.as_i64())
            .unwrap_or(0);

        let txs = info.get("transactions").and_then(|t| t.as_array());
        let has_txs = txs.map(|a| !a.is_empty()).unwrap_or(false);

        // A negative confirmation count means the tx is still in the mempool;
        // track it so the block connection's confirmation probe picks it up.
        if let Some(txs) = txs {
            let mut guard = self.state.lock().await;
            for tx in txs {
                let confirmations = tx.get("confirmations").and_then(|v| v.as_i64()).unwrap_or(0);
                if confirmations < 0 {
                    if let Some(txid) = tx.get("txid").and_then(|v| v.as_str()) {
                        guard.watchlist.track(addr.key(), txid);
                    }
                }
            }
        }

        Some(Ok(unconfirmed > 0 || has_txs))
    }

    async fn destroy(&self) {
        let _ = self.shutdown.send(());
    }
}

/// Push handlers registered on every address (data) connection's codec.
fn push_registry_for_data_connection(
    events: mpsc::UnboundedSender<AdapterEvent>,
    state: Arc<Mutex<AdapterState>>,
) -> MethodRegistry {
    let mut reg = MethodRegistry::new();
    reg.register(
        "subscribeAddresses",
        Arc::new(FnMethod(move |params: Value| {
            let events = events.clone();
            let state = state.clone();
            async move {
                let Some(address) = params.get("address").and_then(|v| v.as_str()) else {
                    return Ok(Value::Null);
                };
                let Some(txid) = params
                    .get("tx")
                    .and_then(|t| t.get("txid"))
                    .and_then(|v| v.as_str())
                else {
                    return Ok(Value::Null);
                };
                let is_new = state.lock().await.watchlist.track(address, txid);
                if is_new {
                    let _ = events.send(AdapterEvent::Update {
                        address_key: address.to_string(),
                        address_original: address.to_string(),
                        checkpoint: None,
                    });
                }
                Ok(Value::Null)
            }
        })),
    );
    reg
}

/// Push handlers registered on the block-notification connection's codec.
fn push_registry_for_block_connection(
    events: mpsc::UnboundedSender<AdapterEvent>,
    state: Arc<Mutex<AdapterState>>,
    url: String,
) -> MethodRegistry {
    let mut reg = MethodRegistry::new();
    reg.register(
        "subscribeNewBlock",
        Arc::new(FnMethod(move |params: Value| {
            let events = events.clone();
            let state = state.clone();
            let url = url.clone();
            async move {
                let height = params.get("height").and_then(|v| v.as_u64());
                let watched = state.lock().await.watchlist.watched_addresses();
                if watched.is_empty() {
                    return Ok(Value::Null);
                }

                // A short-lived connection dedicated to resolving confirmations;
                // the block connection itself only delivers the notification.
                let (tmp_closed_tx, _tmp_closed_rx) = mpsc::unbounded_channel();
                let Ok(probe) = DataConnection::connect(&url, MethodRegistry::new(), tmp_closed_tx).await else {
                    return Ok(Value::Null);
                };

                for address in watched {
                    let Ok(info) = probe.get_account_info(&address, "txslight", None).await else {
                        continue;
                    };
                    let mut any_confirmed = false;
                    if let Some(txs) = info.get("transactions").and_then(|t| t.as_array()) {
                        for tx in txs {
                            let confirmations = tx.get("confirmations").and_then(|v| v.as_i64()).unwrap_or(0);
                            let txid = tx.get("txid").and_then(|v| v.as_str()).unwrap_or_default();
                            if confirmations > 0 {
                                let mut guard = state.lock().await;
                                if guard.watchlist.confirm(&address, txid) {
                                    any_confirmed = true;
                                }
                            }
                        }
                    }
                    if any_confirmed {
                        let _ = events.send(AdapterEvent::Update {
                            address_key: address.clone(),
                            address_original: address,
                            checkpoint: height.map(|h| h.to_string()),
                        });
                    }
                }
                Ok(Value::Null)
            }
        })),
    );
    reg
}
