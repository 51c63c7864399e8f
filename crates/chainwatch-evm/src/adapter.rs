//! Block-polling EVM-RPC upstream adapter (§4.2.b).
//!
//! `subscribe`/`unsubscribe` are pure in-memory mutations of the normalized
//! address map; a single block-watch loop — always running — walks each new
//! block's transactions, ERC-20 transfer logs, and (optionally) internal
//! transfers, marking every address it sees touched.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};

use chainwatch_core::{Adapter, Address, AdapterEvent, HubError, PluginId};
use chainwatch_scan::ScanBackend;

use crate::rpc::{parse_hex_u64, FallbackRpcClient};
use crate::scan::MultiScanBackend;

const BLOCK_POLL_INTERVAL: Duration = Duration::from_secs(12);
const GET_LOGS_MAX_RETRIES: u32 = 10;
const GET_LOGS_RETRY_DELAY: Duration = Duration::from_millis(250);
/// `keccak256("Transfer(address,address,uint256)")`.
const ERC20_TRANSFER_TOPIC: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

pub struct BlockPollerAdapter {
    plugin_id: PluginId,
    rpc: Arc<FallbackRpcClient>,
    /// normalized (lower-case) address -> original-case address, as seen
    /// from whichever client first subscribed it.
    subscribed: Arc<RwLock<HashMap<String, String>>>,
    scan: Arc<MultiScanBackend>,
    destroyed: Arc<AtomicBool>,
    track_internal_transfers: bool,
}

impl BlockPollerAdapter {
    pub fn new(
        plugin_id: PluginId,
        rpc: FallbackRpcClient,
        scan_backends: Vec<Arc<dyn ScanBackend>>,
        track_internal_transfers: bool,
        events: mpsc::UnboundedSender<AdapterEvent>,
    ) -> Self {
        let rpc = Arc::new(rpc);
        let subscribed = Arc::new(RwLock::new(HashMap::new()));
        let destroyed = Arc::new(AtomicBool::new(false));

        let watch_rpc = rpc.clone();
        let watch_subscribed = subscribed.clone();
        let watch_destroyed = destroyed.clone();
        tokio::spawn(block_watch_loop(
            watch_rpc,
            watch_subscribed,
            watch_destroyed,
            track_internal_transfers,
            events,
        ));

        Self {
            plugin_id,
            rpc,
            subscribed,
            scan: Arc::new(MultiScanBackend::new(scan_backends)),
            destroyed,
            track_internal_transfers,
        }
    }
}

#[async_trait]
impl Adapter for BlockPollerAdapter {
    fn plugin_id(&self) -> &PluginId {
        &self.plugin_id
    }

    async fn subscribe(&self, addr: &Address) -> Result<bool, HubError> {
        self.subscribed
            .write()
            .await
            .insert(addr.key().to_string(), addr.original().to_string());
        Ok(true)
    }

    async fn unsubscribe(&self, addr: &Address) -> Result<(), HubError> {
        self.subscribed.write().await.remove(addr.key());
        Ok(())
    }

    async fn scan(&self, addr: &Address, checkpoint: Option<&str>) -> Option<Result<bool, HubError>> {
        if self.scan.is_empty() {
            return None;
        }
        Some(self.scan.scan(addr.key(), checkpoint).await)
    }

    async fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
    }
}

async fn block_watch_loop(
    rpc: Arc<FallbackRpcClient>,
    subscribed: Arc<RwLock<HashMap<String, String>>>,
    destroyed: Arc<AtomicBool>,
    track_internal_transfers: bool,
    events: mpsc::UnboundedSender<AdapterEvent>,
) {
    let mut last_seen: Option<u64> = None;
    let mut ticker = tokio::time::interval(BLOCK_POLL_INTERVAL);
    loop {
        ticker.tick().await;
        if destroyed.load(Ordering::SeqCst) {
            return;
        }

        let head = match rpc.call("eth_blockNumber", Value::Array(vec![])).await {
            Ok(v) => match parse_hex_u64(&v) {
                Some(n) => n,
                None => continue,
            },
            Err(e) => {
                tracing::warn!(error = %e, "failed to poll block number");
                continue;
            }
        };

        let from = last_seen.map(|n| n + 1).unwrap_or(head);
        if from > head {
            continue;
        }

        for block_num in from..=head {
            if destroyed.load(Ordering::SeqCst) {
                return;
            }
            if let Err(e) = process_block(&rpc, &subscribed, track_internal_transfers, block_num, &events).await {
                tracing::warn!(block_num, error = %e, "failed to process block");
            }
        }
        last_seen = Some(head);
    }
}

async fn process_block(
    rpc: &FallbackRpcClient,
    subscribed: &RwLock<HashMap<String, String>>,
    track_internal_transfers: bool,
    block_num: u64,
    events: &mpsc::UnboundedSender<AdapterEvent>,
) -> Result<(), HubError> {
    let block_hex = format!("0x{block_num:x}");
    let block = rpc
        .call("eth_getBlockByNumber", serde_json::json!([block_hex, true]))
        .await?;

    let mut touched: HashMap<String, String> = HashMap::new();
    {
        let subs = subscribed.read().await;
        if let Some(txs) = block.get("transactions").and_then(|t| t.as_array()) {
            for tx in txs {
                mark_if_subscribed(&subs, tx.get("from"), &mut touched);
                mark_if_subscribed(&subs, tx.get("to"), &mut touched);
            }
        }
    }

    let block_hash = block.get("hash").and_then(|v| v.as_str()).map(str::to_string);
    if let Some(block_hash) = &block_hash {
        if let Ok(logs) = rpc
            .call_with_retry(
                "eth_getLogs",
                serde_json::json!([{ "blockHash": block_hash, "topics": [ERC20_TRANSFER_TOPIC] }]),
                GET_LOGS_MAX_RETRIES,
                GET_LOGS_RETRY_DELAY,
            )
            .await
        {
            let subs = subscribed.read().await;
            if let Some(entries) = logs.as_array() {
                for log in entries {
                    if let Some(topics) = log.get("topics").and_then(|t| t.as_array()) {
                        if let Some(from) = topics.get(1) {
                            mark_if_subscribed(&subs, Some(from), &mut touched);
                        }
                        if let Some(to) = topics.get(2) {
                            mark_if_subscribed(&subs, Some(to), &mut touched);
                        }
                    }
                }
            }
        }

        if track_internal_transfers {
            collect_internal_transfers(rpc, block_hash, block.get("transactions"), &subscribed.read().await, &mut touched).await;
        }
    }

    for (_, original) in touched {
        let key = original.to_lowercase();
        let _ = events.send(AdapterEvent::Update {
            address_key: key,
            address_original: original,
            checkpoint: Some(block_num.to_string()),
        });
    }
    Ok(())
}

fn mark_if_subscribed(subs: &HashMap<String, String>, value: Option<&Value>, touched: &mut HashMap<String, String>) {
    let Some(raw) = value.and_then(|v| v.as_str()) else {
        return;
    };
    // `getLogs` topics are 32-byte left-padded addresses; tx from/to are
    // already plain 20-byte addresses. Normalize both to a bare address.
    let candidate = topic_to_address(raw).unwrap_or_else(|| raw.to_string());
    let key = candidate.to_lowercase();
    if let Some(original) = subs.get(&key) {
        touched.insert(key, original.clone());
    }
}

fn topic_to_address(topic: &str) -> Option<String> {
    let hex = topic.strip_prefix("0x")?;
    if hex.len() != 64 {
        return None;
    }
    Some(format!("0x{}", &hex[24..]))
}

/// Best-effort internal-transfer walk: try `trace_block` once; on any
/// failure fall back to per-transaction `debug_traceTransaction`. Either
/// path walks the nested call tree matching `from`/`to` at every node
/// (§4.2.b step 3).
async fn collect_internal_transfers(
    rpc: &FallbackRpcClient,
    block_hash: &str,
    transactions: Option<&Value>,
    subs: &HashMap<String, String>,
    touched: &mut HashMap<String, String>,
) {
    let trace_block = rpc
        .call("trace_block", serde_json::json!([block_hash]))
        .await;

    if let Ok(traces) = trace_block {
        if let Some(entries) = traces.as_array() {
            for entry in entries {
                walk_parity_trace(entry, subs, touched);
            }
            return;
        }
    }

    let Some(txs) = transactions.and_then(|t| t.as_array()) else {
        return;
    };
    for tx in txs {
        let Some(tx_hash) = tx.get("hash").and_then(|v| v.as_str()) else {
            continue;
        };
        if let Ok(trace) = rpc
            .call(
                "debug_traceTransaction",
                serde_json::json!([tx_hash, { "tracer": "callTracer" }]),
            )
            .await
        {
            walk_call_tree(&trace, subs, touched);
        }
    }
}

fn walk_parity_trace(entry: &Value, subs: &HashMap<String, String>, touched: &mut HashMap<String, String>) {
    if let Some(action) = entry.get("action") {
        mark_if_subscribed(subs, action.get("from"), touched);
        mark_if_subscribed(subs, action.get("to"), touched);
    }
}

fn walk_call_tree(node: &Value, subs: &HashMap<String, String>, touched: &mut HashMap<String, String>) {
    mark_if_subscribed(subs, node.get("from"), touched);
    mark_if_subscribed(subs, node.get("to"), touched);
    if let Some(calls) = node.get("calls").and_then(|c| c.as_array()) {
        for call in calls {
            walk_call_tree(call, subs, touched);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_unpacks_left_padded_address() {
        let topic = "0x000000000000000000000000ab5801a7d398351b8be11c439e05c5b3259aec9";
        assert_eq!(
            topic_to_address(topic),
            Some("0xab5801a7d398351b8be11c439e05c5b3259aec9".to_string())
        );
    }

    #[test]
    fn short_value_is_not_a_topic() {
        assert_eq!(topic_to_address("0xabc"), None);
    }

    #[test]
    fn walk_call_tree_finds_nested_matches() {
        let subs: HashMap<String, String> = [("0xdeadbeef00000000000000000000000000dead".to_string(), "0xDeadBeef00000000000000000000000000DEAD".to_string())]
            .into_iter()
            .collect();
        let tree = serde_json::json!({
            "from": "0xtop",
            "to": "0xalso-not-it",
            "calls": [
                { "from": "0xnested", "to": "0xDeadBeef00000000000000000000000000DEAD" }
            ]
        });
        let mut touched = HashMap::new();
        walk_call_tree(&tree, &subs, &mut touched);
        assert_eq!(touched.len(), 1);
    }
}
