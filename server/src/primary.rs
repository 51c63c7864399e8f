//! The primary process (§4.9): spawns and supervises worker processes, owns
//! the IPC listener, relays webhook activity between workers so a deposit
//! seen by one worker's upstream reaches clients subscribed on any worker,
//! and aggregates per-worker metrics pushes into its own `/metrics`. Does no
//! data-plane work of its own — no hub, no client listener, no adapters.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::net::unix::OwnedWriteHalf;
use tokio::process::Command;

use chainwatch_core::backoff::{StepBackoff, StepBackoffConfig};
use chainwatch_hub::{render_snapshot, MetricsSnapshot};
use chainwatch_webhook::WebhookActivityRelay;

use crate::app;
use crate::config::AppConfig;
use crate::ipc::{self, IpcMessage};

const METRICS_PUSH_INTERVAL: Duration = Duration::from_secs(5);
/// A worker that hasn't pushed a metrics report within two push intervals is
/// treated as gone and dropped from the aggregate rather than leaving a
/// permanently-stuck count in the cluster total.
const METRICS_STALE_AFTER: Duration = Duration::from_secs(10);

struct WorkerConn {
    write: Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
    last_metrics: Option<(Instant, MetricsSnapshot)>,
}

type Workers = Arc<Mutex<HashMap<u32, WorkerConn>>>;

pub async fn run(app_config: AppConfig, ipc_path: PathBuf) -> anyhow::Result<()> {
    let workers: Workers = Arc::new(Mutex::new(HashMap::new()));

    let listener = ipc::bind(&ipc_path)?;
    {
        let workers = workers.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _addr)) => {
                        tokio::spawn(handle_connection(stream, workers.clone()));
                    }
                    Err(e) => tracing::warn!(error = %e, "ipc accept error"),
                }
            }
        });
    }

    for worker_id in 1..=app_config.instance_count as u32 {
        tokio::spawn(supervise_worker(worker_id, ipc_path.clone()));
    }

    let render_workers = workers.clone();
    let metrics_router = app::metrics_router(move || render_aggregate(&render_workers));

    let metrics_listener =
        tokio::net::TcpListener::bind((app_config.metrics_host.as_str(), app_config.metrics_port)).await?;
    tracing::info!(
        instances = app_config.instance_count,
        metrics_port = app_config.metrics_port,
        "primary supervising workers"
    );

    axum::serve(metrics_listener, metrics_router.into_make_service())
        .await
        .map_err(Into::into)
}

fn render_aggregate(workers: &Workers) -> String {
    let guard = workers.lock().unwrap();
    let now = Instant::now();
    let mut merged = MetricsSnapshot::default();
    for (worker_id, conn) in guard.iter() {
        match &conn.last_metrics {
            Some((seen, snapshot)) if now.duration_since(*seen) <= METRICS_STALE_AFTER => {
                merged.merge(snapshot);
            }
            Some(_) => tracing::debug!(worker_id, "excluding stale worker from aggregate metrics"),
            None => {}
        }
    }
    render_snapshot(&merged)
}

async fn handle_connection(stream: tokio::net::UnixStream, workers: Workers) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = ipc::reader(read_half);

    let worker_id = match ipc::recv(&mut reader).await {
        Ok(Some(IpcMessage::Hello { worker_id })) => worker_id,
        Ok(_) => {
            tracing::warn!("ipc connection dropped before sending hello");
            return;
        }
        Err(e) => {
            tracing::warn!(error = %e, "ipc connection failed before hello");
            return;
        }
    };

    let write = Arc::new(tokio::sync::Mutex::new(write_half));
    workers.lock().unwrap().insert(
        worker_id,
        WorkerConn {
            write: write.clone(),
            last_metrics: None,
        },
    );
    tracing::info!(worker_id, "worker connected over ipc");

    loop {
        match ipc::recv(&mut reader).await {
            Ok(Some(IpcMessage::WebhookActivity { worker_id: from, relay })) => {
                relay_to_peers(&workers, from, &relay).await;
            }
            Ok(Some(IpcMessage::MetricsReport { worker_id: from, snapshot })) => {
                if let Some(conn) = workers.lock().unwrap().get_mut(&from) {
                    conn.last_metrics = Some((Instant::now(), snapshot));
                }
            }
            Ok(Some(IpcMessage::Hello { .. })) => {}
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(worker_id, error = %e, "ipc read error");
                break;
            }
        }
    }

    workers.lock().unwrap().remove(&worker_id);
    tracing::warn!(worker_id, "worker disconnected over ipc");
}

/// Forward a worker's locally-dispatched webhook activity to every other
/// connected worker. The receiving worker applies it and does not
/// rebroadcast (§4.9), so this fan-out never needs to happen more than once
/// per original event.
async fn relay_to_peers(workers: &Workers, from: u32, relay: &WebhookActivityRelay) {
    let targets: Vec<_> = {
        let guard = workers.lock().unwrap();
        guard
            .iter()
            .filter(|(id, _)| **id != from)
            .map(|(_, conn)| conn.write.clone())
            .collect()
    };

    let msg = IpcMessage::WebhookActivity {
        worker_id: from,
        relay: relay.clone(),
    };
    for write in targets {
        let mut guard = write.lock().await;
        let _ = ipc::send(&mut *guard, &msg).await;
    }
}

/// Keep worker `worker_id` running: spawn it, wait for it to exit, and
/// restart it after a step-off backoff (§4.9, same shape as the Direct WS
/// block-connection reconnect) unless it exited cleanly. A re-exec'd worker
/// re-parses its own config from `--config` and picks up its role from the
/// `CHAINWATCH_WORKER_ID`/`CHAINWATCH_IPC_PATH` env vars this sets.
async fn supervise_worker(worker_id: u32, ipc_path: PathBuf) {
    let mut backoff = StepBackoff::new(StepBackoffConfig::default());
    loop {
        let started = Instant::now();
        match spawn_worker(worker_id, &ipc_path) {
            Ok(mut child) => match child.wait().await {
                Ok(status) if status.success() => {
                    tracing::info!(worker_id, "worker exited cleanly, not restarting");
                    return;
                }
                Ok(status) => tracing::error!(worker_id, %status, "worker exited with failure"),
                Err(e) => tracing::error!(worker_id, error = %e, "failed to wait on worker process"),
            },
            Err(e) => tracing::error!(worker_id, error = %e, "failed to spawn worker process"),
        }

        let delay = backoff.next(started.elapsed());
        tracing::warn!(worker_id, delay_secs = delay.as_secs(), "restarting worker after backoff");
        tokio::time::sleep(delay).await;
    }
}

fn spawn_worker(worker_id: u32, ipc_path: &PathBuf) -> std::io::Result<tokio::process::Child> {
    let exe = std::env::current_exe()?;
    Command::new(exe)
        .args(std::env::args().skip(1))
        .env("CHAINWATCH_WORKER_ID", worker_id.to_string())
        .env("CHAINWATCH_IPC_PATH", ipc_path)
        .kill_on_drop(true)
        .spawn()
}
