//! One worker process (§4.9): owns a hub, a client listener, and all
//! upstream adapters for every configured plugin. Talks to the primary only
//! over the IPC socket — webhook-activity relay out, relay-from-peers in,
//! and a periodic metrics push.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use chainwatch_hub::{AddressHub, Metrics};
use chainwatch_scan::ScanBackendGlobal;
use chainwatch_webhook::WebhookAdapterGlobal;

use crate::config::AppConfig;
use crate::ipc::{self, IpcMessage};
use crate::ws::WsSink;
use crate::{app, plugins};

const METRICS_PUSH_INTERVAL: Duration = Duration::from_secs(5);

pub async fn run(app_config: AppConfig, worker_id: u32, ipc_path: std::path::PathBuf) -> anyhow::Result<()> {
    let scan_global = Arc::new(ScanBackendGlobal::new());
    let webhook_global = Arc::new(WebhookAdapterGlobal::new(
        app_config.alchemy_auth_token.clone(),
        app_config.public_uri.clone(),
    ));

    let (built, receivers) = plugins::build(&app_config, &scan_global, &webhook_global).await;
    let plugin_count = built.handles.len();
    let metrics = Arc::new(Metrics::new(plugin_count));
    let hub: Arc<AddressHub<WsSink>> = AddressHub::new(built.handles, metrics.clone());

    for (plugin_id, rx) in receivers {
        hub.spawn_fanout(plugin_id, rx);
    }

    let stream = ipc::connect_with_retry(&ipc_path, 25).await?;
    let (read_half, mut write_half) = stream.into_split();
    ipc::send(&mut write_half, &IpcMessage::Hello { worker_id }).await?;

    let (relay_tx, mut relay_rx) = mpsc::unbounded_channel::<chainwatch_webhook::WebhookActivityRelay>();

    // Forward locally-dispatched webhook activity to the primary for
    // rebroadcast to peer workers (§4.2.c, §4.9).
    let relay_write = write_half;
    let relay_write = Arc::new(tokio::sync::Mutex::new(relay_write));
    {
        let relay_write = relay_write.clone();
        tokio::spawn(async move {
            while let Some(relay) = relay_rx.recv().await {
                let mut guard = relay_write.lock().await;
                let msg = IpcMessage::WebhookActivity { worker_id, relay };
                if ipc::send(&mut *guard, &msg).await.is_err() {
                    break;
                }
            }
        });
    }

    // Apply peer-relayed webhook activity to our own subscription state,
    // without rebroadcasting it again (§4.9 "does not re-broadcast").
    {
        let webhook_adapters = built.webhook_adapters.clone();
        tokio::spawn(async move {
            let mut reader = ipc::reader(read_half);
            loop {
                match ipc::recv(&mut reader).await {
                    Ok(Some(IpcMessage::WebhookActivity { worker_id: from, relay })) if from != worker_id => {
                        let key: chainwatch_core::PluginId = relay.plugin_id.as_str().into();
                        if let Some(adapter) = webhook_adapters.get(&key) {
                            chainwatch_webhook::dispatch_activity(adapter, &relay.activity).await;
                        }
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "ipc read error, reconnecting loop exits");
                        break;
                    }
                }
            }
        });
    }

    // Periodic metrics push (§4.8).
    {
        let relay_write = relay_write.clone();
        let metrics = metrics.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(METRICS_PUSH_INTERVAL);
            loop {
                ticker.tick().await;
                let msg = IpcMessage::MetricsReport {
                    worker_id,
                    snapshot: metrics.snapshot(),
                };
                let mut guard = relay_write.lock().await;
                if ipc::send(&mut *guard, &msg).await.is_err() {
                    break;
                }
            }
        });
    }

    let listen_port = app_config.listen_port + worker_id as u16;
    let metrics_port = app_config.metrics_port + worker_id as u16;

    let client_router = app::client_router(
        hub.clone(),
        built.webhook_adapters,
        webhook_global,
        Some(relay_tx),
    );
    let metrics_router = app::metrics_router(move || metrics.render());

    let client_listener = tokio::net::TcpListener::bind((app_config.listen_host.as_str(), listen_port)).await?;
    let metrics_listener = tokio::net::TcpListener::bind((app_config.metrics_host.as_str(), metrics_port)).await?;

    tracing::info!(worker_id, listen_port, metrics_port, "worker listening");

    let client_server = axum::serve(
        client_listener,
        client_router.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    );
    let metrics_server = axum::serve(metrics_listener, metrics_router.into_make_service());

    tokio::select! {
        res = client_server => res.map_err(Into::into),
        res = metrics_server => res.map_err(Into::into),
    }
}
