//! HTTP receiver for Alchemy address-activity webhooks (§4.2.c).
//!
//! `POST /webhook/alchemy/{pluginId}` — raw body, required
//! `x-alchemy-signature` header. Authentication (HMAC verification) always
//! runs before any authorization decision, so an unauthenticated caller
//! learns nothing about which networks this server serves.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use chainwatch_core::PluginId;

use crate::adapter::WebhookAdapter;
use crate::global::WebhookAdapterGlobal;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER: &str = "x-alchemy-signature";

#[derive(Clone)]
pub struct WebhookRouteState {
    pub adapters: Arc<HashMap<PluginId, WebhookAdapter>>,
    pub global: Arc<WebhookAdapterGlobal>,
    /// Forward parsed activity to peer workers (§4.9 "webhook-activity relay").
    /// `None` in single-worker mode.
    pub relay: Option<tokio::sync::mpsc::UnboundedSender<WebhookActivityRelay>>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WebhookActivityRelay {
    pub plugin_id: String,
    pub activity: Vec<ActivityEntry>,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
struct WebhookBody {
    #[serde(rename = "webhookId")]
    webhook_id: String,
    #[serde(rename = "type")]
    kind: String,
    event: ActivityEvent,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
struct ActivityEvent {
    #[serde(rename = "network")]
    network: String,
    activity: Vec<ActivityEntry>,
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct ActivityEntry {
    #[serde(rename = "fromAddress")]
    pub from_address: Option<String>,
    #[serde(rename = "toAddress")]
    pub to_address: Option<String>,
    #[serde(rename = "blockNum")]
    pub block_num: Option<String>,
}

/// `POST /webhook/alchemy/:plugin_id`
pub async fn handle_webhook(
    State(state): State<WebhookRouteState>,
    Path(plugin_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let Some(signature) = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok()) else {
        return unauthenticated();
    };

    let Ok(parsed) = serde_json::from_slice::<WebhookBody>(&body) else {
        return unauthenticated();
    };

    let Some(signing_key) = state.global.signing_key_for(&parsed.webhook_id).await else {
        return unauthenticated();
    };

    if !verify_signature(signing_key.as_bytes(), &body, signature) {
        return unauthenticated();
    }

    let Some(adapter) = state.adapters.get(&PluginId::from(plugin_id.as_str())) else {
        return unauthenticated();
    };
    if adapter.webhook_id().await.as_deref() != Some(parsed.webhook_id.as_str()) {
        return unauthenticated();
    }
    if parsed.event.network != adapter.network() {
        return bad_request();
    }

    dispatch_activity(adapter, &parsed.event.activity).await;

    if let Some(relay) = &state.relay {
        let _ = relay.send(WebhookActivityRelay {
            plugin_id: plugin_id.clone(),
            activity: parsed.event.activity,
        });
    }

    StatusCode::OK.into_response()
}

/// `GET`/`HEAD /webhook/*` liveness probe.
pub async fn liveness() -> impl IntoResponse {
    StatusCode::OK
}

/// Apply an already-authenticated activity batch to one adapter, matching
/// each entry's `from`/`to` against the subscribed-address map and emitting
/// `update{address, checkpoint}` per match. `checkpoint` is the max parsed
/// block number across the whole batch (§4.2.c "Activity dispatch").
pub async fn dispatch_activity(adapter: &WebhookAdapter, activity: &[ActivityEntry]) {
    let checkpoint = activity
        .iter()
        .filter_map(|a| a.block_num.as_deref())
        .filter_map(parse_hex)
        .max();
    let checkpoint = checkpoint.map(|n| n.to_string());

    let mut seen = std::collections::HashSet::new();
    for entry in activity {
        for addr in [entry.from_address.as_deref(), entry.to_address.as_deref()].into_iter().flatten() {
            let key = addr.to_lowercase();
            if seen.insert(key.clone()) {
                adapter.dispatch_if_subscribed(&key, checkpoint.clone()).await;
            }
        }
    }
}

fn parse_hex(s: &str) -> Option<u64> {
    u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
}

fn verify_signature(key: &[u8], body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected_bytes) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(key) else {
        return false;
    };
    mac.update(body);
    let computed = mac.finalize().into_bytes();
    computed.ct_eq(&expected_bytes[..]).into()
}

fn unauthenticated() -> axum::response::Response {
    (StatusCode::UNAUTHORIZED, "unauthorized").into_response()
}

fn bad_request() -> axum::response::Response {
    (StatusCode::BAD_REQUEST, "network mismatch").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_matches_known_hmac() {
        let key = b"test-signing-key";
        let body = b"{\"webhookId\":\"wh_1\"}";
        let mut mac = HmacSha256::new_from_slice(key).unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());
        assert!(verify_signature(key, body, &sig));
    }

    #[test]
    fn tampered_body_fails_verification() {
        let key = b"test-signing-key";
        let mut mac = HmacSha256::new_from_slice(key).unwrap();
        mac.update(b"original");
        let sig = hex::encode(mac.finalize().into_bytes());
        assert!(!verify_signature(key, b"tampered", &sig));
    }

    #[test]
    fn invalid_hex_signature_is_rejected() {
        assert!(!verify_signature(b"key", b"body", "not-hex"));
    }

    #[test]
    fn activity_event_parses_network_field() {
        let body = serde_json::json!({
            "webhookId": "wh_1",
            "type": "ADDRESS_ACTIVITY",
            "event": {
                "network": "ETH_MAINNET",
                "activity": [],
            },
        });
        let parsed: WebhookBody = serde_json::from_value(body).unwrap();
        assert_eq!(parsed.event.network, "ETH_MAINNET");
    }

    #[test]
    fn max_checkpoint_is_taken_across_batch() {
        let entries = vec![
            ActivityEntry { from_address: None, to_address: None, block_num: Some("0x10".into()) },
            ActivityEntry { from_address: None, to_address: None, block_num: Some("0x20".into()) },
        ];
        let max = entries.iter().filter_map(|a| a.block_num.as_deref()).filter_map(parse_hex).max();
        assert_eq!(max, Some(32));
    }
}
