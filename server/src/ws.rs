//! Client-facing WebSocket transport (§4.6 Client Session, §6 "Client wire
//! protocol"): bridges an axum WebSocket to a [`chainwatch_codec::RpcCodec`]
//! bound to the worker's [`AddressHub`].

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use chainwatch_codec::{Dialect, MessageSink, RpcCodec, SendError};
use chainwatch_hub::AddressHub;

/// Hands outbound codec frames to the axum socket's write half. The codec
/// never touches the socket directly — see [`chainwatch_codec::MessageSink`].
pub struct WsSink {
    outbound: mpsc::UnboundedSender<Message>,
}

#[async_trait]
impl MessageSink for WsSink {
    async fn handle_send(&self, text: String) -> Result<(), SendError> {
        self.outbound
            .send(Message::Text(text))
            .map_err(|e| SendError(e.to_string()))
    }
}

pub async fn handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<std::net::SocketAddr>,
    State(hub): State<Arc<AddressHub<WsSink>>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve(socket, remote.ip().to_string(), hub))
}

async fn serve(socket: WebSocket, remote_ip: String, hub: Arc<AddressHub<WsSink>>) {
    let (mut write, mut read) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            if write.send(msg).await.is_err() {
                break;
            }
        }
    });

    let conn_id = hub.reserve_connection_id().await;
    let registry = hub.client_methods(conn_id.clone());
    let sink = WsSink { outbound: outbound_tx };
    let codec = Arc::new(RpcCodec::new(sink, Dialect::Standard, registry));
    hub.finish_connection(conn_id.clone(), &remote_ip, codec.clone()).await;

    while let Some(Ok(msg)) = read.next().await {
        match msg {
            Message::Text(text) => {
                codec.handle_message(&text).await;
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    codec.handle_close();
    hub.close_connection(&conn_id).await;
    writer.abort();
}
