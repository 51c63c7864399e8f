//! Alchemy-family webhook upstream adapter: address-list batching over
//! HTTP, HMAC-authenticated activity ingestion, and the process-wide
//! signing-key/team-webhooks state the adapter family shares (§4.2.c).

mod adapter;
mod global;
mod route;

pub use adapter::WebhookAdapter;
pub use global::{AlchemyWebhook, ResolvedWebhook, WebhookAdapterGlobal};
pub use route::{dispatch_activity, handle_webhook, liveness, ActivityEntry, WebhookActivityRelay, WebhookRouteState};
