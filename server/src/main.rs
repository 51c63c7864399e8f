//! Entrypoint (§6.1): one binary plays both roles. With no
//! `CHAINWATCH_WORKER_ID` in its environment it is the primary, which loads
//! and validates configuration, then re-execs itself once per
//! `instanceCount` to become a worker. A worker re-parses the same `--config`
//! and picks up its id and the primary's IPC socket path from the env vars
//! the primary set when it spawned the child (§4.9).
//!
//! [Rust note] every process — primary and worker alike — runs a
//! single-threaded `current_thread` runtime (§5): the primary is pure I/O
//! glue and a worker's concurrency is already expressed as one task per
//! connection/adapter, so neither needs a thread pool.

mod app;
mod cli;
mod config;
mod ipc;
mod logging;
mod plugins;
mod primary;
mod worker;
mod ws;

use clap::Parser;

fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    logging::init(cli.log_format, cli.verbose);

    let app_config = match config::load(&cli.config) {
        Ok(app_config) => app_config,
        Err(e) => {
            tracing::error!(error = %e, config = %cli.config, "failed to load configuration");
            std::process::exit(1);
        }
    };

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;

    let result = runtime.block_on(async move {
        match std::env::var("CHAINWATCH_WORKER_ID") {
            Ok(worker_id) => {
                let worker_id: u32 = worker_id
                    .parse()
                    .map_err(|e| anyhow::anyhow!("CHAINWATCH_WORKER_ID is not a valid worker id: {e}"))?;
                let ipc_path = std::env::var("CHAINWATCH_IPC_PATH")
                    .map_err(|_| anyhow::anyhow!("CHAINWATCH_IPC_PATH must be set for a worker process"))?;
                worker::run(app_config, worker_id, std::path::PathBuf::from(ipc_path)).await
            }
            Err(_) => {
                let ipc_path = ipc::socket_path(&std::env::temp_dir().to_string_lossy());
                primary::run(app_config, ipc_path).await
            }
        }
    });

    if let Err(e) = &result {
        tracing::error!(error = %e, "fatal error, exiting");
        std::process::exit(1);
    }
    result
}
