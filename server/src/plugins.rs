//! Builds one worker's [`chainwatch_hub::PluginHandle`] map from the
//! process-wide [`AppConfig`] (§4.2, §4.7).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use chainwatch_core::{Adapter, AdapterEvent, PluginId, PluginVariant};
use chainwatch_evm::{BlockPollerAdapter, FallbackRpcClient};
use chainwatch_hub::PluginHandle;
use chainwatch_scan::{EtherscanBackend, EtherscanConfig, EtherscanVersion, ScanBackend, ScanBackendGlobal};
use chainwatch_webhook::{WebhookAdapter, WebhookAdapterGlobal};
use chainwatch_ws::DirectWsAdapter;

use crate::config::AppConfig;

/// Everything one worker needs to serve its plugins: the hub's plugin map,
/// and the webhook adapters keyed the same way (the HTTP route needs typed
/// access to `WebhookAdapter`, which the hub only sees as `dyn Adapter`).
pub struct BuiltPlugins {
    pub handles: HashMap<PluginId, PluginHandle>,
    pub webhook_adapters: HashMap<PluginId, WebhookAdapter>,
}

/// Construct every configured plugin's adapter and fan its events into a
/// fresh per-plugin channel; the caller wires each receiver into the hub via
/// `AddressHub::spawn_fanout` once the hub itself exists.
pub async fn build(
    app: &AppConfig,
    scan_global: &Arc<ScanBackendGlobal>,
    webhook_global: &Arc<WebhookAdapterGlobal>,
) -> (BuiltPlugins, Vec<(PluginId, mpsc::UnboundedReceiver<AdapterEvent>)>) {
    let mut handles = HashMap::new();
    let mut webhook_adapters = HashMap::new();
    let mut receivers = Vec::new();

    for plugin_cfg in &app.plugins {
        let plugin_id: PluginId = plugin_cfg.plugin_id.as_str().into();
        let chain_kind = plugin_cfg.variant.chain_kind();
        let (tx, rx) = mpsc::unbounded_channel::<AdapterEvent>();

        let adapter: Arc<dyn Adapter> = match &plugin_cfg.variant {
            PluginVariant::DirectWs { urls, .. } => {
                let Some(url) = urls.first() else {
                    tracing::error!(plugin = %plugin_id, "direct_ws plugin has no urls, skipping");
                    continue;
                };
                let url = app.service_key_url_params.substitute(url);
                Arc::new(DirectWsAdapter::new(plugin_id.clone(), url, tx).await)
            }
            PluginVariant::BlockPoller {
                chain_id,
                urls,
                track_internal_transfers,
                scan_urls,
            } => {
                let rpc = FallbackRpcClient::new(urls.clone(), &app.service_key_url_params);
                let scan_backends: Vec<Arc<dyn ScanBackend>> = scan_urls
                    .iter()
                    .map(|base_url| {
                        let config = EtherscanConfig {
                            base_url: base_url.clone(),
                            version: EtherscanVersion::V2 { chain_id: *chain_id },
                        };
                        Arc::new(EtherscanBackend::new(
                            config,
                            app.service_keys.clone(),
                            app.service_key_url_params.clone(),
                            scan_global.clone(),
                        )) as Arc<dyn ScanBackend>
                    })
                    .collect();
                Arc::new(BlockPollerAdapter::new(
                    plugin_id.clone(),
                    rpc,
                    scan_backends,
                    *track_internal_transfers,
                    tx,
                ))
            }
            PluginVariant::Webhook { network, .. } => {
                let adapter = WebhookAdapter::new(plugin_id.clone(), network.clone(), webhook_global.clone(), tx).await;
                webhook_adapters.insert(plugin_id.clone(), adapter.clone());
                Arc::new(adapter)
            }
        };

        handles.insert(plugin_id.clone(), PluginHandle::new(adapter, chain_kind));
        receivers.push((plugin_id, rx));
    }

    (
        BuiltPlugins {
            handles,
            webhook_adapters,
        },
        receivers,
    )
}
