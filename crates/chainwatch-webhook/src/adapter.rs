//! The Alchemy-family webhook adapter (§4.2.c): no persistent connection,
//! just a remotely-held address list mutated over HTTP and a debounced
//! batching layer so a burst of subscribe/unsubscribe calls becomes one
//! API round trip.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use chainwatch_core::{Adapter, Address, AdapterEvent, HubError, PluginId};

use crate::global::WebhookAdapterGlobal;

const DEBOUNCE: Duration = Duration::from_secs(1);
const RETRY_BASE: Duration = Duration::from_secs(1);
const RETRY_MAX: Duration = Duration::from_secs(60);

#[derive(Default)]
struct PendingQueues {
    to_add: Vec<String>,
    to_remove: Vec<String>,
}

impl PendingQueues {
    /// Enqueue `key` for the given op, cancelling any opposite entry
    /// already pending so the same address never sits in both queues.
    fn enqueue(&mut self, key: &str, add: bool) {
        let (mine, theirs) = if add {
            (&mut self.to_add, &mut self.to_remove)
        } else {
            (&mut self.to_remove, &mut self.to_add)
        };
        if let Some(pos) = theirs.iter().position(|k| k == key) {
            theirs.remove(pos);
            return;
        }
        if !mine.iter().any(|k| k == key) {
            mine.push(key.to_string());
        }
    }

    fn drain(&mut self) -> (Vec<String>, Vec<String>) {
        (std::mem::take(&mut self.to_add), std::mem::take(&mut self.to_remove))
    }

    fn restore(&mut self, add: Vec<String>, remove: Vec<String>) {
        for key in add {
            if !self.to_add.contains(&key) {
                self.to_add.push(key);
            }
        }
        for key in remove {
            if !self.to_remove.contains(&key) {
                self.to_remove.push(key);
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

struct Inner {
    plugin_id: PluginId,
    network: String,
    global: Arc<WebhookAdapterGlobal>,
    /// normalized key -> original-case address, everything currently subscribed.
    subscribed: Mutex<HashMap<String, String>>,
    webhook_id: Mutex<Option<String>>,
    queues: Mutex<PendingQueues>,
    debounce_handle: Mutex<Option<JoinHandle<()>>>,
    retry: AtomicU32,
    destroyed: AtomicBool,
    events: mpsc::UnboundedSender<AdapterEvent>,
}

/// Cheap to clone: wraps a single `Arc<Inner>`.
#[derive(Clone)]
pub struct WebhookAdapter(Arc<Inner>);

impl WebhookAdapter {
    pub async fn new(
        plugin_id: PluginId,
        network: String,
        global: Arc<WebhookAdapterGlobal>,
        events: mpsc::UnboundedSender<AdapterEvent>,
    ) -> Self {
        let resolved = global
            .resolve_webhook(&plugin_id.0, &network)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(plugin = %plugin_id, error = %e, "initial webhook resolution failed");
                crate::global::ResolvedWebhook { id: None, signing_key: None }
            });

        Self(Arc::new(Inner {
            plugin_id,
            network,
            global,
            subscribed: Mutex::new(HashMap::new()),
            webhook_id: Mutex::new(resolved.id),
            queues: Mutex::new(PendingQueues::default()),
            debounce_handle: Mutex::new(None),
            retry: AtomicU32::new(0),
            destroyed: AtomicBool::new(false),
            events,
        }))
    }

    pub async fn webhook_id(&self) -> Option<String> {
        self.0.webhook_id.lock().await.clone()
    }

    pub fn network(&self) -> &str {
        &self.0.network
    }

    /// Look up the address this webhook tracks for `key`, and emit an
    /// `update` if it's found. Used by the HTTP route's activity dispatch.
    pub async fn dispatch_if_subscribed(&self, key: &str, checkpoint: Option<String>) {
        let original = self.0.subscribed.lock().await.get(key).cloned();
        if let Some(original) = original {
            let _ = self.0.events.send(AdapterEvent::Update {
                address_key: key.to_string(),
                address_original: original,
                checkpoint,
            });
        }
    }

    /// (Re)schedule the debounce flush, aborting any timer already pending
    /// so only the last-scheduled one ever fires (§4.2.c "Timers").
    async fn reschedule(&self) {
        let mut handle = self.0.debounce_handle.lock().await;
        if let Some(old) = handle.take() {
            old.abort();
        }
        let this = self.clone();
        *handle = Some(tokio::spawn(async move {
            tokio::time::sleep(DEBOUNCE).await;
            this.flush().await;
        }));
    }

    async fn flush(&self) {
        if self.0.destroyed.load(Ordering::SeqCst) {
            return;
        }
        let (add, remove) = self.0.queues.lock().await.drain();
        if add.is_empty() && remove.is_empty() {
            return;
        }

        let result = self.apply(&add, &remove).await;

        if self.0.destroyed.load(Ordering::SeqCst) {
            // destroy() fired mid-call: drop the delta, nothing to requeue.
            return;
        }

        match result {
            Ok(()) => {
                self.0.retry.store(0, Ordering::SeqCst);
            }
            Err(e) => {
                tracing::warn!(plugin = %self.0.plugin_id, error = %e, "webhook mutation failed, requeueing");
                self.0.queues.lock().await.restore(add, remove);
                let retry = self.0.retry.fetch_add(1, Ordering::SeqCst) + 1;
                let delay = (RETRY_BASE * 2u32.saturating_pow(retry.min(6))).min(RETRY_MAX);
                let this = self.clone();
                let mut handle = self.0.debounce_handle.lock().await;
                *handle = Some(tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    this.flush().await;
                }));
            }
        }
    }

    async fn apply(&self, add: &[String], remove: &[String]) -> Result<(), HubError> {
        let mut webhook_id = self.0.webhook_id.lock().await;

        if webhook_id.is_none() && !add.is_empty() {
            let (id, _signing_key) = self
                .0
                .global
                .create_webhook(&self.0.plugin_id.0, &self.0.network, add)
                .await?;
            *webhook_id = Some(id);
        } else if let Some(id) = webhook_id.clone() {
            if !add.is_empty() || !remove.is_empty() {
                self.0.global.patch_addresses(&id, add, remove).await?;
            }
        }

        let subscribed_empty = self.0.subscribed.lock().await.is_empty();
        if subscribed_empty {
            if let Some(id) = webhook_id.take() {
                self.0.global.delete_webhook(&id).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Adapter for WebhookAdapter {
    fn plugin_id(&self) -> &PluginId {
        &self.0.plugin_id
    }

    async fn subscribe(&self, addr: &Address) -> Result<bool, HubError> {
        self.0
            .subscribed
            .lock()
            .await
            .insert(addr.key().to_string(), addr.original().to_string());
        self.0.queues.lock().await.enqueue(addr.key(), true);
        self.reschedule().await;
        Ok(true)
    }

    async fn unsubscribe(&self, addr: &Address) -> Result<(), HubError> {
        self.0.subscribed.lock().await.remove(addr.key());
        self.0.queues.lock().await.enqueue(addr.key(), false);
        self.reschedule().await;
        Ok(())
    }

    async fn scan(&self, _addr: &Address, _checkpoint: Option<&str>) -> Option<Result<bool, HubError>> {
        None
    }

    async fn destroy(&self) {
        self.0.destroyed.store(true, Ordering::SeqCst);
        if let Some(handle) = self.0.debounce_handle.lock().await.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opposite_enqueue_cancels_pending_entry() {
        let mut q = PendingQueues::default();
        q.enqueue("0xabc", true);
        assert_eq!(q.to_add, vec!["0xabc".to_string()]);
        q.enqueue("0xabc", false);
        assert!(q.is_empty());
    }

    #[test]
    fn duplicate_enqueue_is_idempotent() {
        let mut q = PendingQueues::default();
        q.enqueue("0xabc", true);
        q.enqueue("0xabc", true);
        assert_eq!(q.to_add.len(), 1);
    }

    #[test]
    fn restore_does_not_duplicate_already_pending_entries() {
        let mut q = PendingQueues::default();
        q.enqueue("0xabc", true);
        q.restore(vec!["0xabc".to_string()], vec![]);
        assert_eq!(q.to_add.len(), 1);
    }
}
