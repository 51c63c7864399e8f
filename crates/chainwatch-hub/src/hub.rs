//! The top-level multiplexer (§4.5): one [`AddressHub`] per worker, owning
//! every plugin's adapter and subscription state plus the set of connected
//! clients. Implements the client-facing `subscribe`/`unsubscribe` RPC
//! methods and fans out adapter events to the clients that care.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, Mutex};

use chainwatch_codec::{codes, FnMethod, JsonRpcError, MessageSink, MethodRegistry, RpcCodec};
use chainwatch_core::{Adapter, Address, AdapterEvent, ChainKind, ConnectionId, PluginId};

use crate::metrics::Metrics;
use crate::subscription::SubscriptionState;

/// Result codes for the client-facing `subscribe` method (§4.5, §8).
pub mod result_code {
    pub const UNKNOWN_PLUGIN: i32 = -1;
    pub const ADAPTER_REFUSED: i32 = 0;
    pub const NO_CHANGE: i32 = 1;
    pub const CHANGED: i32 = 2;
}

/// One configured plugin as the hub sees it: its adapter, its subscriber
/// index, and how it normalizes addresses.
pub struct PluginHandle {
    pub adapter: Arc<dyn Adapter>,
    pub chain_kind: ChainKind,
    state: Mutex<SubscriptionState>,
}

impl PluginHandle {
    pub fn new(adapter: Arc<dyn Adapter>, chain_kind: ChainKind) -> Self {
        Self {
            adapter,
            chain_kind,
            state: Mutex::new(SubscriptionState::new()),
        }
    }
}

struct ConnectionInfo<S: MessageSink> {
    codec: Arc<RpcCodec<S>>,
}

/// The subscription multiplexer. Generic over the transport's
/// [`MessageSink`] so the same hub logic serves real WebSocket clients and
/// in-memory test transports alike.
pub struct AddressHub<S: MessageSink> {
    plugins: HashMap<PluginId, PluginHandle>,
    connections: Mutex<HashMap<ConnectionId, ConnectionInfo<S>>>,
    metrics: Arc<Metrics>,
}

impl<S: MessageSink + 'static> AddressHub<S> {
    pub fn new(plugins: HashMap<PluginId, PluginHandle>, metrics: Arc<Metrics>) -> Arc<Self> {
        Arc::new(Self {
            plugins,
            connections: Mutex::new(HashMap::new()),
            metrics,
        })
    }

    pub fn plugin_ids(&self) -> Vec<PluginId> {
        self.plugins.keys().cloned().collect()
    }

    /// Spawn the fan-out loop that drains one plugin's adapter-event channel
    /// for the lifetime of the hub.
    pub fn spawn_fanout(self: &Arc<Self>, plugin_id: PluginId, mut events: mpsc::UnboundedReceiver<AdapterEvent>) {
        let hub = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                hub.handle_adapter_event(&plugin_id, event).await;
            }
        });
    }

    async fn handle_adapter_event(&self, plugin_id: &PluginId, event: AdapterEvent) {
        let Some(plugin) = self.plugins.get(plugin_id) else {
            return;
        };
        match event {
            AdapterEvent::Update {
                address_key,
                address_original,
                checkpoint,
            } => {
                let subscribers = plugin.state.lock().await.subscribers(&address_key);
                if subscribers.is_empty() {
                    return;
                }
                let params = serde_json::json!([plugin_id.0, address_original, checkpoint]);
                self.notify_many(&subscribers, "update", params).await;
                self.metrics.change_event(plugin_id);
            }
            AdapterEvent::SubLost { address_keys } => {
                for address_key in &address_keys {
                    let subscribers = plugin.state.lock().await.subscribers(address_key);
                    let params = serde_json::json!([plugin_id.0, address_key]);
                    self.notify_many(&subscribers, "subLost", params).await;
                }
                let mut state = plugin.state.lock().await;
                for address_key in &address_keys {
                    state.remove_address(address_key);
                }
                self.metrics.set_subscriptions(plugin_id, state.address_count());
            }
        }
    }

    async fn notify_many(&self, subscribers: &[ConnectionId], method: &str, params: Value) {
        let connections = self.connections.lock().await;
        for conn_id in subscribers {
            if let Some(info) = connections.get(conn_id) {
                if let Err(e) = info.codec.notify(method, params.clone()).await {
                    tracing::debug!(connection_id = %conn_id, error = %e, "fan-out notify failed, connection likely closing");
                }
            }
        }
    }

    /// Reserve a fresh connection id. Call before building the connection's
    /// codec, since the method registry needs the id as a closure capture.
    pub async fn reserve_connection_id(&self) -> ConnectionId {
        let existing = self.connections.lock().await.keys().cloned().collect();
        ConnectionId::generate(&existing)
    }

    /// Build the `subscribe`/`unsubscribe` method registry for one
    /// connection. The connection isn't live in the hub until
    /// [`Self::finish_connection`] is called with the resulting codec.
    pub fn client_methods(self: &Arc<Self>, conn_id: ConnectionId) -> MethodRegistry {
        let mut registry = MethodRegistry::new();

        let hub = self.clone();
        let sub_conn = conn_id.clone();
        registry.register(
            "subscribe",
            Arc::new(FnMethod(move |params: Value| {
                let hub = hub.clone();
                let conn_id = sub_conn.clone();
                async move {
                    let items = parse_subscribe_params(params)?;
                    let codes = hub.subscribe(&conn_id, items).await;
                    Ok(serde_json::json!(codes))
                }
            })),
        );

        let hub = self.clone();
        registry.register(
            "unsubscribe",
            Arc::new(FnMethod(move |params: Value| {
                let hub = hub.clone();
                let conn_id = conn_id.clone();
                async move {
                    let items = parse_unsubscribe_params(params)?;
                    hub.unsubscribe(&conn_id, items).await;
                    Ok(Value::Null)
                }
            })),
        );

        registry
    }

    /// Register a connection as live: from this point it is eligible for
    /// fan-out and appears in the `connections_active` gauge.
    pub async fn finish_connection(self: &Arc<Self>, conn_id: ConnectionId, remote_ip: &str, codec: Arc<RpcCodec<S>>) {
        self.connections
            .lock()
            .await
            .insert(conn_id.clone(), ConnectionInfo { codec });
        self.metrics.connection_opened();
        tracing::info!(connection_id = %conn_id, remote_ip, "client connected");
    }

    /// Subscribe `conn_id` to every `(plugin, address, checkpoint?)` tuple,
    /// preserving input order in the returned result codes even though the
    /// tuples are processed concurrently (§4.5, §8 invariant preserved via
    /// index-tagged futures).
    pub async fn subscribe(&self, conn_id: &ConnectionId, items: Vec<(PluginId, String, Option<String>)>) -> Vec<i32> {
        let futures = items
            .into_iter()
            .enumerate()
            .map(|(index, (plugin_id, address, checkpoint))| async move {
                (index, self.subscribe_one(conn_id, plugin_id, address, checkpoint).await)
            });
        let mut results = futures::future::join_all(futures).await;
        results.sort_by_key(|(index, _)| *index);
        results.into_iter().map(|(_, code)| code).collect()
    }

    async fn subscribe_one(
        &self,
        conn_id: &ConnectionId,
        plugin_id: PluginId,
        address_raw: String,
        checkpoint: Option<String>,
    ) -> i32 {
        let Some(plugin) = self.plugins.get(&plugin_id) else {
            return result_code::UNKNOWN_PLUGIN;
        };
        let address = Address::new(address_raw, plugin.chain_kind);
        let key = address.key().to_string();

        let is_first = plugin.state.lock().await.track(conn_id.clone(), &key);
        if is_first {
            let ok = plugin.adapter.subscribe(&address).await.unwrap_or(false);
            if !ok {
                let mut state = plugin.state.lock().await;
                state.untrack(conn_id, &key);
                self.metrics.set_subscriptions(&plugin_id, state.address_count());
                return result_code::ADAPTER_REFUSED;
            }
            self.metrics
                .set_subscriptions(&plugin_id, plugin.state.lock().await.address_count());
        }

        match checkpoint.as_deref() {
            // No checkpoint means "client has no prior knowledge"; treat as changed
            // without even asking the scan backend (§3 Data Model).
            None => result_code::CHANGED,
            Some(cp) => match plugin.adapter.scan(&address, Some(cp)).await {
                Some(Ok(true)) | Some(Err(_)) | None => result_code::CHANGED,
                Some(Ok(false)) => result_code::NO_CHANGE,
            },
        }
    }

    /// Unsubscribe `conn_id` from every `(plugin, address)` pair. Errors
    /// from the upstream adapter are logged, never surfaced to the client
    /// (§4.5).
    pub async fn unsubscribe(&self, conn_id: &ConnectionId, items: Vec<(PluginId, String)>) {
        let futures = items.into_iter().map(|(plugin_id, address_raw)| async move {
            let Some(plugin) = self.plugins.get(&plugin_id) else {
                return;
            };
            let address = Address::new(address_raw, plugin.chain_kind);
            let key = address.key().to_string();

            let is_last = plugin.state.lock().await.untrack(conn_id, &key);
            self.metrics
                .set_subscriptions(&plugin_id, plugin.state.lock().await.address_count());
            if is_last {
                if let Err(e) = plugin.adapter.unsubscribe(&address).await {
                    tracing::warn!(plugin = %plugin_id, address = %address, error = %e, "upstream unsubscribe failed");
                }
            }
        });
        futures::future::join_all(futures).await;
    }

    /// A client transport closed: drop every subscription it held, issuing
    /// the upstream unsubscribes that made the last reference disappear,
    /// then remove the connection itself (§4.5, §8 invariant 5).
    pub async fn close_connection(&self, conn_id: &ConnectionId) {
        for (plugin_id, plugin) in &self.plugins {
            let drained = plugin.state.lock().await.cleanup(conn_id);
            self.metrics
                .set_subscriptions(plugin_id, plugin.state.lock().await.address_count());
            for address_key in drained {
                let address = Address::new(address_key, plugin.chain_kind);
                if let Err(e) = plugin.adapter.unsubscribe(&address).await {
                    tracing::warn!(plugin = %plugin_id, address = %address, error = %e, "upstream unsubscribe on close failed");
                }
            }
        }
        self.connections.lock().await.remove(conn_id);
        self.metrics.connection_closed();
        tracing::info!(connection_id = %conn_id, "client connection closed");
    }

    /// Destroy every adapter: reconnect/backoff loops exit, in-flight HTTP
    /// calls are left to complete (§5 Cancellation).
    pub async fn destroy(&self) {
        for plugin in self.plugins.values() {
            plugin.adapter.destroy().await;
        }
    }
}

fn parse_subscribe_params(params: Value) -> Result<Vec<(PluginId, String, Option<String>)>, JsonRpcError> {
    let invalid = || JsonRpcError::new(codes::INVALID_PARAMS, "subscribe expects an array of [pluginId, address, checkpoint?]");
    let tuples = params.as_array().ok_or_else(invalid)?;
    tuples
        .iter()
        .map(|tuple| {
            let arr = tuple.as_array().ok_or_else(invalid)?;
            let plugin_id = arr.first().and_then(|v| v.as_str()).ok_or_else(invalid)?;
            let address = arr.get(1).and_then(|v| v.as_str()).ok_or_else(invalid)?;
            let checkpoint = arr.get(2).and_then(|v| v.as_str()).map(str::to_string);
            Ok((PluginId::from(plugin_id), address.to_string(), checkpoint))
        })
        .collect()
}

fn parse_unsubscribe_params(params: Value) -> Result<Vec<(PluginId, String)>, JsonRpcError> {
    let invalid = || JsonRpcError::new(codes::INVALID_PARAMS, "unsubscribe expects an array of [pluginId, address]");
    let tuples = params.as_array().ok_or_else(invalid)?;
    tuples
        .iter()
        .map(|tuple| {
            let arr = tuple.as_array().ok_or_else(invalid)?;
            let plugin_id = arr.first().and_then(|v| v.as_str()).ok_or_else(invalid)?;
            let address = arr.get(1).and_then(|v| v.as_str()).ok_or_else(invalid)?;
            Ok((PluginId::from(plugin_id), address.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chainwatch_core::HubError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Clone, Default)]
    struct RecordingSink {
        sent: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn handle_send(&self, text: String) -> Result<(), chainwatch_codec::SendError> {
            self.sent.lock().unwrap().push(text);
            Ok(())
        }
    }

    struct StubAdapter {
        plugin_id: PluginId,
        subscribe_calls: AtomicUsize,
        unsubscribe_calls: AtomicUsize,
        refuse: bool,
        scan_result: Option<bool>,
    }

    #[async_trait]
    impl Adapter for StubAdapter {
        fn plugin_id(&self) -> &PluginId {
            &self.plugin_id
        }
        async fn subscribe(&self, _addr: &Address) -> Result<bool, HubError> {
            self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
            Ok(!self.refuse)
        }
        async fn unsubscribe(&self, _addr: &Address) -> Result<(), HubError> {
            self.unsubscribe_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn scan(&self, _addr: &Address, checkpoint: Option<&str>) -> Option<Result<bool, HubError>> {
            checkpoint?;
            self.scan_result.map(Ok)
        }
        async fn destroy(&self) {}
    }

    fn hub_with(adapter: StubAdapter) -> (Arc<AddressHub<RecordingSink>>, Arc<StubAdapter>) {
        let adapter = Arc::new(adapter);
        let mut plugins = HashMap::new();
        plugins.insert(
            adapter.plugin_id.clone(),
            PluginHandle::new(adapter.clone(), ChainKind::Utxo),
        );
        (AddressHub::new(plugins, Arc::new(Metrics::new(1))), adapter)
    }

    #[tokio::test]
    async fn s1_scan_returns_no_change() {
        let (hub, _adapter) = hub_with(StubAdapter {
            plugin_id: "scan".into(),
            subscribe_calls: AtomicUsize::new(0),
            unsubscribe_calls: AtomicUsize::new(0),
            refuse: false,
            scan_result: Some(false),
        });
        let conn = ConnectionId("aaaaaa".into());
        let codes = hub
            .subscribe(&conn, vec![("scan".into(), "addr1".into(), Some("999999999".into()))])
            .await;
        assert_eq!(codes, vec![result_code::NO_CHANGE]);
    }

    #[tokio::test]
    async fn s2_unknown_plugin() {
        let (hub, _adapter) = hub_with(StubAdapter {
            plugin_id: "scan".into(),
            subscribe_calls: AtomicUsize::new(0),
            unsubscribe_calls: AtomicUsize::new(0),
            refuse: false,
            scan_result: Some(false),
        });
        let conn = ConnectionId("aaaaaa".into());
        let codes = hub.subscribe(&conn, vec![("nope".into(), "addr1".into(), None)]).await;
        assert_eq!(codes, vec![result_code::UNKNOWN_PLUGIN]);
    }

    #[tokio::test]
    async fn s3_no_scan_plugin_reports_changed() {
        let (hub, _adapter) = hub_with(StubAdapter {
            plugin_id: "noscan".into(),
            subscribe_calls: AtomicUsize::new(0),
            unsubscribe_calls: AtomicUsize::new(0),
            refuse: false,
            scan_result: None,
        });
        let conn = ConnectionId("aaaaaa".into());
        let codes = hub.subscribe(&conn, vec![("noscan".into(), "addr1".into(), None)]).await;
        assert_eq!(codes, vec![result_code::CHANGED]);
    }

    #[tokio::test]
    async fn adapter_refusal_undoes_track_and_reports_zero() {
        let (hub, adapter) = hub_with(StubAdapter {
            plugin_id: "p".into(),
            subscribe_calls: AtomicUsize::new(0),
            unsubscribe_calls: AtomicUsize::new(0),
            refuse: true,
            scan_result: None,
        });
        let conn = ConnectionId("aaaaaa".into());
        let codes = hub.subscribe(&conn, vec![("p".into(), "addr1".into(), None)]).await;
        assert_eq!(codes, vec![result_code::ADAPTER_REFUSED]);
        assert_eq!(adapter.subscribe_calls.load(Ordering::SeqCst), 1);

        // A second client subscribing to the same refused address tries again.
        let conn2 = ConnectionId("bbbbbb".into());
        let codes2 = hub.subscribe(&conn2, vec![("p".into(), "addr1".into(), None)]).await;
        assert_eq!(codes2, vec![result_code::ADAPTER_REFUSED]);
        assert_eq!(adapter.subscribe_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn s7_fail_open_when_scan_errors() {
        struct ErroringAdapter(PluginId);
        #[async_trait]
        impl Adapter for ErroringAdapter {
            fn plugin_id(&self) -> &PluginId {
                &self.0
            }
            async fn subscribe(&self, _addr: &Address) -> Result<bool, HubError> {
                Ok(true)
            }
            async fn unsubscribe(&self, _addr: &Address) -> Result<(), HubError> {
                Ok(())
            }
            async fn scan(&self, _addr: &Address, _checkpoint: Option<&str>) -> Option<Result<bool, HubError>> {
                Some(Err(HubError::ScanRateLimited { attempts: 10 }))
            }
            async fn destroy(&self) {}
        }
        let adapter = Arc::new(ErroringAdapter("p".into()));
        let mut plugins = HashMap::new();
        plugins.insert("p".into(), PluginHandle::new(adapter, ChainKind::Evm));
        let hub: Arc<AddressHub<RecordingSink>> = AddressHub::new(plugins, Arc::new(Metrics::new(1)));

        let conn = ConnectionId("aaaaaa".into());
        let codes = hub
            .subscribe(&conn, vec![("p".into(), "0xabc".into(), Some("10".into()))])
            .await;
        assert_eq!(codes, vec![result_code::CHANGED]);
    }

    #[tokio::test]
    async fn s4_shared_upstream_subscribes_once_and_unsubscribes_on_last_close() {
        let (hub, adapter) = hub_with(StubAdapter {
            plugin_id: "p".into(),
            subscribe_calls: AtomicUsize::new(0),
            unsubscribe_calls: AtomicUsize::new(0),
            refuse: false,
            scan_result: None,
        });
        let c1 = ConnectionId("aaaaaa".into());
        let c2 = ConnectionId("bbbbbb".into());
        hub.subscribe(&c1, vec![("p".into(), "addr1".into(), None)]).await;
        hub.subscribe(&c2, vec![("p".into(), "addr1".into(), None)]).await;
        assert_eq!(adapter.subscribe_calls.load(Ordering::SeqCst), 1);

        hub.close_connection(&c1).await;
        assert_eq!(adapter.unsubscribe_calls.load(Ordering::SeqCst), 0);

        hub.close_connection(&c2).await;
        assert_eq!(adapter.unsubscribe_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn s5_sub_lost_then_forgotten_address_reaches_nobody() {
        let (hub, _adapter) = hub_with(StubAdapter {
            plugin_id: "p".into(),
            subscribe_calls: AtomicUsize::new(0),
            unsubscribe_calls: AtomicUsize::new(0),
            refuse: false,
            scan_result: None,
        });
        let conn_id = hub.reserve_connection_id().await;
        let registry = hub.client_methods(conn_id.clone());
        let sink = RecordingSink::default();
        let codec = Arc::new(RpcCodec::new(sink.clone(), chainwatch_codec::Dialect::Standard, registry));
        hub.finish_connection(conn_id.clone(), "127.0.0.1", codec).await;

        hub.subscribe(&conn_id, vec![("p".into(), "addr1".into(), None)]).await;

        let (tx, rx) = mpsc::unbounded_channel();
        hub.spawn_fanout("p".into(), rx);
        tx.send(AdapterEvent::SubLost {
            address_keys: vec!["addr1".to_string()],
        })
        .unwrap();
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        {
            let sent = sink.sent.lock().unwrap();
            assert!(sent.iter().any(|m| m.contains("subLost")));
        }

        tx.send(AdapterEvent::Update {
            address_key: "addr1".to_string(),
            address_original: "addr1".to_string(),
            checkpoint: Some("1".to_string()),
        })
        .unwrap();
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let sent = sink.sent.lock().unwrap();
        assert!(!sent.iter().any(|m| m.contains("\"update\"")));
    }
}
