//! A single Blockbook WebSocket connection: wire-level framing plus a
//! background task that owns the socket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use chainwatch_codec::{CallError, Dialect, MessageSink, MethodRegistry, RpcCodec, SendError};
use chainwatch_core::HubError;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one data connection within a pool, independent of address
/// content so it stays stable across `subscribeAddresses` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DataConnId(pub u64);

struct OutboundSink {
    tx: mpsc::UnboundedSender<Message>,
}

#[async_trait]
impl MessageSink for OutboundSink {
    async fn handle_send(&self, text: String) -> Result<(), SendError> {
        self.tx
            .send(Message::Text(text.into()))
            .map_err(|_| SendError("connection closed".into()))
    }
}

/// One live WebSocket connection to a Blockbook-family node, with its own
/// request/response codec.
pub struct DataConnection {
    pub id: DataConnId,
    codec: Arc<RpcCodec<OutboundSink>>,
    addresses: std::sync::Mutex<Vec<String>>,
}

impl DataConnection {
    /// Open a connection and start its background read/write task.
    ///
    /// `on_closed` fires once, carrying this connection's id, when the
    /// socket is dropped for any reason (remote close, error, or explicit
    /// shutdown via [`Self::close`]).
    pub async fn connect(
        url: &str,
        methods: MethodRegistry,
        on_closed: mpsc::UnboundedSender<DataConnId>,
    ) -> Result<Self, HubError> {
        let id = DataConnId(NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed));
        let (ws_stream, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| HubError::Transport {
                url: url.to_string(),
                source: e.into(),
            })?;

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (mut sink, mut stream) = ws_stream.split();
        let codec = Arc::new(RpcCodec::new(
            OutboundSink { tx: out_tx },
            Dialect::Blockbook,
            methods,
        ));
        let codec_task = codec.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outbound = out_rx.recv() => {
                        match outbound {
                            Some(msg) => {
                                if sink.send(msg).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                    incoming = stream.next() => {
                        match incoming {
                            Some(Ok(Message::Text(text))) => {
                                codec_task.handle_message(text.as_str()).await;
                            }
                            Some(Ok(Message::Close(_))) | None => break,
                            Some(Err(e)) => {
                                tracing::warn!(error = %e, "blockbook ws receive error");
                                break;
                            }
                            _ => {}
                        }
                    }
                }
            }
            codec_task.handle_close();
            let _ = on_closed.send(id);
        });

        Ok(Self {
            id,
            codec,
            addresses: std::sync::Mutex::new(Vec::new()),
        })
    }

    pub fn address_count(&self) -> usize {
        self.addresses.lock().unwrap().len()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.addresses.lock().unwrap().clone()
    }

    /// Push the full address list to the node and record it locally.
    pub async fn set_addresses(&self, addrs: Vec<String>) -> Result<(), HubError> {
        let params = serde_json::json!({ "addresses": addrs });
        self.codec
            .call("subscribeAddresses", params)
            .await
            .map_err(call_error_to_hub)?;
        *self.addresses.lock().unwrap() = addrs;
        Ok(())
    }

    pub async fn get_account_info(&self, address: &str, details: &str, from: Option<&str>) -> Result<Value, HubError> {
        let mut params = serde_json::json!({ "descriptor": address, "details": details });
        if let Some(from) = from {
            params["from"] = Value::String(from.to_string());
        }
        self.codec
            .call("getAccountInfo", params)
            .await
            .map_err(call_error_to_hub)
    }

    pub async fn ping(&self) {
        if let Err(e) = self.codec.notify("ping", Value::Null).await {
            tracing::debug!(error = %e, "ping send failed");
        }
    }
}

fn call_error_to_hub(e: CallError) -> HubError {
    match e {
        CallError::Rpc(rpc) => HubError::AdapterRefused {
            plugin: "chainwatch-ws".into(),
            reason: rpc.message,
        },
        CallError::Send(send) => HubError::Transport {
            url: "blockbook".into(),
            source: anyhow::anyhow!(send.to_string()),
        },
        CallError::ChannelClosed => HubError::Transport {
            url: "blockbook".into(),
            source: anyhow::anyhow!("connection closed before a reply arrived"),
        },
    }
}
