//! chainwatch-hub — the subscription multiplexer (C4/C5/C6).
//!
//! [`hub::AddressHub`] is the top-level fan-in/fan-out engine: it owns one
//! [`hub::PluginHandle`] (adapter + [`subscription::SubscriptionState`]) per
//! configured chain and the set of connected clients, and implements the
//! client-facing `subscribe`/`unsubscribe` RPC methods described in §4.5 of
//! the design. [`metrics::Metrics`] is the Prometheus registry updated
//! inline as that state mutates.

pub mod hub;
pub mod metrics;
pub mod subscription;

pub use hub::{result_code, AddressHub, PluginHandle};
pub use metrics::{render_snapshot, Metrics, MetricsSnapshot};
pub use subscription::SubscriptionState;
