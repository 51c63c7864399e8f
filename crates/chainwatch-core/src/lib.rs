//! chainwatch-core — foundation types for the ChainWatch address-activity hub.
//!
//! # Overview
//!
//! ChainWatch multiplexes many client subscriptions to `(chain, address)`
//! pairs behind a small number of upstream connections per chain. This crate
//! defines the vocabulary every other crate builds on:
//!
//! - [`Address`] / [`PluginId`] / [`Checkpoint`] — the data model
//! - [`HubError`] — the structured error taxonomy
//! - [`AdapterEvent`] — the `update` / `subLost` events adapters emit
//! - [`servicekeys`] — the longest-suffix-match API key matcher and
//!   `{{name}}` URL parameter substitution
//! - [`plugin`] — the on-disk plugin configuration shapes

pub mod adapter;
pub mod address;
pub mod backoff;
pub mod connection;
pub mod error;
pub mod event;
pub mod plugin;
pub mod servicekeys;

pub use adapter::Adapter;
pub use address::{Address, ChainKind, Checkpoint, PluginId};
pub use backoff::{StepBackoff, StepBackoffConfig};
pub use connection::ConnectionId;
pub use error::HubError;
pub use event::AdapterEvent;
pub use plugin::{PluginConfig, PluginVariant};
pub use servicekeys::{ServiceKeyUrlParams, ServiceKeys};
