//! The bidirectional codec: request dispatch, response correlation, and
//! outbound call/notify bindings.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::oneshot;

use crate::method::MethodRegistry;
use crate::wire::{codes, parse_incoming, serialize_response, Dialect, Incoming, JsonRpcError, RequestFrame, ResponseFrame};

/// User-supplied outbound transport for a codec instance.
///
/// The codec never knows whether it's writing to a WebSocket, a Unix socket,
/// or a test in-memory channel; it just hands raw text to this sink.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn handle_send(&self, text: String) -> Result<(), SendError>;
}

#[derive(Debug, thiserror::Error)]
#[error("transport send failed: {0}")]
pub struct SendError(pub String);

/// Error returned to a caller of [`RpcCodec::call`] when the transport closes
/// before (or instead of) a reply arriving.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("channel closed before a reply arrived")]
    ChannelClosed,
    #[error(transparent)]
    Rpc(#[from] JsonRpcError),
    #[error(transparent)]
    Send(#[from] SendError),
}

type PendingMap = Mutex<HashMap<u64, oneshot::Sender<Result<Value, JsonRpcError>>>>;

/// A bidirectional RPC codec bound to one transport.
///
/// One instance serves both roles a connection needs: it dispatches
/// inbound requests against its [`MethodRegistry`] (the "server codec" role)
/// and tracks outbound calls by id so responses can be correlated back to
/// their caller (the "client codec" role). A connection that only ever plays
/// one role simply leaves the other empty (e.g. the hub's per-client codec
/// has a non-empty registry but only ever sends *notifications* out, never
/// calls; an upstream adapter's codec typically has an empty registry but
/// makes many outbound calls).
pub struct RpcCodec<S: MessageSink> {
    sink: S,
    dialect: Dialect,
    methods: MethodRegistry,
    next_id: AtomicU64,
    pending: PendingMap,
}

impl<S: MessageSink> RpcCodec<S> {
    pub fn new(sink: S, dialect: Dialect, methods: MethodRegistry) -> Self {
        Self {
            sink,
            dialect,
            methods,
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Handle one inbound text frame: route it to a request or response path.
    pub async fn handle_message(&self, text: &str) {
        match parse_incoming(text, self.dialect) {
            Incoming::Request(req) => self.handle_request(req).await,
            Incoming::Response(resp) => self.handle_response(resp),
            Incoming::Malformed => {
                let frame = ResponseFrame::err(
                    Value::Null,
                    JsonRpcError::new(codes::INVALID_REQUEST, "invalid request"),
                );
                let _ = self
                    .sink
                    .handle_send(serialize_response(&frame, self.dialect))
                    .await;
            }
        }
    }

    async fn handle_request(&self, req: RequestFrame) {
        let is_call = req.id.is_some();

        let Some(method) = self.methods.get(&req.method) else {
            if is_call {
                self.reply_error(req.id.unwrap(), codes::METHOD_NOT_FOUND, "method not found")
                    .await;
            }
            // Notification for an unknown method: nothing to reply to.
            return;
        };

        let result = method.call(req.params).await;

        let Some(id) = req.id else {
            // It was a notification; no reply regardless of outcome.
            return;
        };

        let frame = match result {
            Ok(value) => ResponseFrame::ok(id, value),
            Err(e) => ResponseFrame::err(id, e),
        };
        let _ = self
            .sink
            .handle_send(serialize_response(&frame, self.dialect))
            .await;
    }

    fn handle_response(&self, resp: ResponseFrame) {
        let Some(id) = as_u64(&resp.id) else {
            return;
        };
        let sender = self.pending.lock().unwrap().remove(&id);
        let Some(sender) = sender else {
            // No pending call for this id — logged, not escalated; the
            // caller already dropped the future (e.g. after a close).
            tracing::debug!(id, "response for unknown pending call id");
            return;
        };
        let outcome = match resp.error {
            Some(e) => Err(e),
            None => Ok(resp.result.unwrap_or(Value::Null)),
        };
        let _ = sender.send(outcome);
    }

    async fn reply_error(&self, id: Value, code: i64, message: &str) {
        let frame = ResponseFrame::err(id, JsonRpcError::new(code, message));
        let _ = self
            .sink
            .handle_send(serialize_response(&frame, self.dialect))
            .await;
    }

    /// Initiate an outbound call and await its reply.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, CallError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);

        let frame = RequestFrame {
            jsonrpc: "2.0".into(),
            method: method.to_string(),
            params,
            id: Some(Value::from(id)),
        };
        let text = serde_json::to_string(&frame).unwrap_or_default();
        if let Err(e) = self.sink.handle_send(text).await {
            self.pending.lock().unwrap().remove(&id);
            return Err(e.into());
        }

        match rx.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(CallError::ChannelClosed),
        }
    }

    /// Send a one-way notification (no id, no reply expected) — used for the
    /// hub's `update`/`subLost` pushes to clients.
    pub async fn notify(&self, method: &str, params: Value) -> Result<(), SendError> {
        let frame = RequestFrame {
            jsonrpc: "2.0".into(),
            method: method.to_string(),
            params,
            id: None,
        };
        let text = serde_json::to_string(&frame).unwrap_or_default();
        self.sink.handle_send(text).await
    }

    /// The transport closed: reject every pending call with "channel closed".
    pub fn handle_close(&self) {
        let mut pending = self.pending.lock().unwrap();
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(JsonRpcError::new(
                codes::UNKNOWN_RESPONSE_ID,
                "channel closed",
            )));
        }
    }
}

fn as_u64(id: &Value) -> Option<u64> {
    id.as_u64().or_else(|| id.as_str().and_then(|s| s.parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::{FnMethod, LocalMethod};
    use std::sync::{Arc, Mutex as StdMutex};

    #[derive(Clone, Default)]
    struct RecordingSink {
        sent: Arc<StdMutex<Vec<String>>>,
    }

    #[async_trait]
    impl MessageSink for RecordingSink {
        async fn handle_send(&self, text: String) -> Result<(), SendError> {
            self.sent.lock().unwrap().push(text);
            Ok(())
        }
    }

    fn registry_with_echo() -> MethodRegistry {
        let mut reg = MethodRegistry::new();
        reg.register(
            "echo",
            Arc::new(FnMethod(|params: Value| async move { Ok(params) })),
        );
        reg
    }

    #[tokio::test]
    async fn request_dispatches_to_registered_method_and_replies() {
        let sink = RecordingSink::default();
        let codec = RpcCodec::new(sink.clone(), Dialect::Standard, registry_with_echo());

        codec
            .handle_message(r#"{"jsonrpc":"2.0","method":"echo","params":"hi","id":1}"#)
            .await;

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("\"result\":\"hi\""));
        assert!(sent[0].contains("\"id\":1"));
    }

    #[tokio::test]
    async fn unknown_method_call_gets_method_not_found() {
        let sink = RecordingSink::default();
        let codec = RpcCodec::new(sink.clone(), Dialect::Standard, MethodRegistry::new());

        codec
            .handle_message(r#"{"jsonrpc":"2.0","method":"nope","params":[],"id":7}"#)
            .await;

        let sent = sink.sent.lock().unwrap();
        assert!(sent[0].contains("-32601"));
    }

    #[tokio::test]
    async fn unknown_method_notification_gets_no_reply() {
        let sink = RecordingSink::default();
        let codec = RpcCodec::new(sink.clone(), Dialect::Standard, MethodRegistry::new());

        codec
            .handle_message(r#"{"jsonrpc":"2.0","method":"nope","params":[]}"#)
            .await;

        assert!(sink.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_frame_gets_invalid_request() {
        let sink = RecordingSink::default();
        let codec = RpcCodec::new(sink.clone(), Dialect::Standard, MethodRegistry::new());

        codec.handle_message("not json").await;

        let sent = sink.sent.lock().unwrap();
        assert!(sent[0].contains("-32600"));
        assert!(sent[0].contains("\"id\":null"));
    }

    #[tokio::test]
    async fn outbound_call_resolves_on_matching_response() {
        let sink = RecordingSink::default();
        let codec = Arc::new(RpcCodec::new(sink.clone(), Dialect::Standard, MethodRegistry::new()));

        let codec2 = codec.clone();
        let handle = tokio::spawn(async move { codec2.call("ping", Value::Null).await });

        // Give the call a moment to register as pending, then feed back a response.
        tokio::task::yield_now().await;
        let sent_id: u64 = {
            let sent = sink.sent.lock().unwrap();
            let v: Value = serde_json::from_str(&sent[0]).unwrap();
            v["id"].as_u64().unwrap()
        };
        codec
            .handle_message(&format!(r#"{{"jsonrpc":"2.0","id":{sent_id},"result":"pong"}}"#))
            .await;

        let result = handle.await.unwrap().unwrap();
        assert_eq!(result, Value::String("pong".into()));
    }

    #[tokio::test]
    async fn close_rejects_all_pending_calls() {
        let sink = RecordingSink::default();
        let codec = Arc::new(RpcCodec::new(sink, Dialect::Standard, MethodRegistry::new()));

        let codec2 = codec.clone();
        let handle = tokio::spawn(async move { codec2.call("ping", Value::Null).await });
        tokio::task::yield_now().await;

        codec.handle_close();
        let result = handle.await.unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn notify_sends_without_id() {
        let sink = RecordingSink::default();
        let codec = RpcCodec::new(sink.clone(), Dialect::Standard, MethodRegistry::new());

        codec.notify("update", serde_json::json!(["eth", "0xabc", "100"])).await.unwrap();

        let sent = sink.sent.lock().unwrap();
        assert!(!sent[0].contains("\"id\""));
        assert!(sent[0].contains("\"method\":\"update\""));
    }
}
