//! Primary/worker IPC (§4.9): a Unix-domain socket per process group carries
//! the webhook-activity relay and the cluster-metrics protocol. A stale
//! socket file from a previous run is removed before bind, since whatever
//! process owned it is gone by the time a new primary starts.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use chainwatch_hub::MetricsSnapshot;
use chainwatch_webhook::WebhookActivityRelay;

/// One frame on the primary/worker socket. Newline-delimited JSON: simple,
/// and every message here is small and infrequent enough that framing
/// overhead doesn't matter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum IpcMessage {
    /// First frame a worker sends after connecting.
    Hello { worker_id: u32 },
    /// A worker relays a locally-dispatched webhook activity batch so peer
    /// workers holding client subscriptions for the same addresses see it.
    WebhookActivity {
        worker_id: u32,
        #[serde(flatten)]
        relay: WebhookActivityRelay,
    },
    /// A worker's periodic metrics push (§4.8).
    MetricsReport { worker_id: u32, snapshot: MetricsSnapshot },
}

pub fn socket_path(base_dir: &str) -> PathBuf {
    PathBuf::from(base_dir).join("chainwatch.sock")
}

/// Bind the primary's listener, removing a stale socket file from a previous
/// run first (the process that owned it is gone by the time we get here).
pub fn bind(path: &PathBuf) -> std::io::Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    UnixListener::bind(path)
}

pub async fn connect_with_retry(path: &PathBuf, attempts: u32) -> std::io::Result<UnixStream> {
    let mut last_err = None;
    for _ in 0..attempts {
        match UnixStream::connect(path).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                last_err = Some(e);
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            }
        }
    }
    Err(last_err.unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "ipc socket never appeared")))
}

pub async fn send(stream: &mut (impl AsyncWriteExt + Unpin), msg: &IpcMessage) -> std::io::Result<()> {
    let mut line = serde_json::to_string(msg).unwrap_or_default();
    line.push('\n');
    stream.write_all(line.as_bytes()).await
}

/// Read one newline-delimited JSON frame, or `None` on clean EOF.
pub async fn recv(reader: &mut (impl AsyncBufReadExt + Unpin)) -> std::io::Result<Option<IpcMessage>> {
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Ok(None);
    }
    match serde_json::from_str(line.trim_end()) {
        Ok(msg) => Ok(Some(msg)),
        Err(e) => {
            tracing::warn!(error = %e, "malformed ipc frame, dropping");
            Ok(None)
        }
    }
}

pub fn reader(stream: tokio::net::unix::OwnedReadHalf) -> BufReader<tokio::net::unix::OwnedReadHalf> {
    BufReader::new(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainwatch_webhook::ActivityEntry;
    use tokio::io::BufReader as TokioBufReader;

    #[tokio::test]
    async fn hello_frame_round_trips() {
        let (mut a, b) = tokio::io::duplex(4096);
        let mut b_reader = TokioBufReader::new(b);

        send(&mut a, &IpcMessage::Hello { worker_id: 3 }).await.unwrap();
        let msg = recv(&mut b_reader).await.unwrap().unwrap();
        match msg {
            IpcMessage::Hello { worker_id } => assert_eq!(worker_id, 3),
            _ => panic!("expected Hello"),
        }
    }

    #[tokio::test]
    async fn webhook_activity_frame_round_trips() {
        let (mut a, b) = tokio::io::duplex(4096);
        let mut b_reader = TokioBufReader::new(b);

        let relay = WebhookActivityRelay {
            plugin_id: "ethereum".to_string(),
            activity: vec![ActivityEntry {
                from_address: Some("0xabc".into()),
                to_address: Some("0xdef".into()),
                block_num: Some("0x10".into()),
            }],
        };
        send(&mut a, &IpcMessage::WebhookActivity { worker_id: 1, relay: relay.clone() })
            .await
            .unwrap();

        match recv(&mut b_reader).await.unwrap().unwrap() {
            IpcMessage::WebhookActivity { worker_id, relay: got } => {
                assert_eq!(worker_id, 1);
                assert_eq!(got.plugin_id, relay.plugin_id);
                assert_eq!(got.activity.len(), 1);
            }
            _ => panic!("expected WebhookActivity"),
        }
    }

    #[tokio::test]
    async fn clean_eof_yields_none() {
        let (a, b) = tokio::io::duplex(64);
        drop(a);
        let mut b_reader = TokioBufReader::new(b);
        assert!(recv(&mut b_reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped_not_errored() {
        let (mut a, b) = tokio::io::duplex(4096);
        let mut b_reader = TokioBufReader::new(b);
        a.write_all(b"not json\n").await.unwrap();
        assert!(recv(&mut b_reader).await.unwrap().is_none());
    }
}
