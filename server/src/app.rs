//! Axum app wiring for one worker process (§6 External Interfaces): the
//! client WebSocket endpoint, `/metrics`, and the webhook receiver routes.

use std::collections::HashMap;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use chainwatch_core::PluginId;
use chainwatch_hub::AddressHub;
use chainwatch_webhook::{WebhookAdapter, WebhookAdapterGlobal, WebhookRouteState};

use crate::ws::WsSink;

/// Build the router this worker serves on its client-listener port: the
/// WebSocket endpoint and the webhook endpoint each keep their own `State`,
/// merged into one router rather than forced into an artificial combined
/// state struct that most handlers wouldn't need.
pub fn client_router(
    hub: Arc<AddressHub<WsSink>>,
    webhook_adapters: HashMap<PluginId, WebhookAdapter>,
    webhook_global: Arc<WebhookAdapterGlobal>,
    relay: Option<tokio::sync::mpsc::UnboundedSender<chainwatch_webhook::WebhookActivityRelay>>,
) -> Router {
    let webhook_state = WebhookRouteState {
        adapters: Arc::new(webhook_adapters),
        global: webhook_global,
        relay,
    };

    let ws_routes = Router::new().route("/", get(crate::ws::handler)).with_state(hub);

    let webhook_routes = Router::new()
        .route(
            "/webhook/alchemy/:plugin_id",
            post(chainwatch_webhook::handle_webhook).get(chainwatch_webhook::liveness),
        )
        .with_state(webhook_state);

    ws_routes.merge(webhook_routes)
}

/// The metrics endpoint, served on a separate port (§4.8) so it can be
/// firewalled off from the public client listener independently.
pub fn metrics_router<F>(render: F) -> Router
where
    F: Fn() -> String + Send + Sync + 'static,
{
    let render = Arc::new(render);
    Router::new().route(
        "/metrics",
        get(move || {
            let render = render.clone();
            async move { render() }
        }),
    )
}
