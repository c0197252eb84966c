//! Listener topology daemon.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────┐
//!                 │                  LISTENER TOPOLOGY                   │
//!                 │                                                      │
//!   config.toml ──┼─▶ config ──▶ ListenerManager ──▶ topology            │
//!                 │                    │              │                  │
//!                 │                    │     per-loop │ dedicated thread │
//!                 │                    ▼              ▼                  │
//!   Client ───────┼──────────▶ TcpServer (accept) ──▶ worker loop ──▶ cb │
//!                 │                                                      │
//!   SIGHUP / cert ┼─▶ lifecycle::signals ──▶ reload_ssl_files            │
//!   SIGTERM ──────┼─▶ lifecycle::signals ──▶ stop_listening              │
//!                 └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use listener_topology::config::watcher::CertWatcher;
use listener_topology::config::load_config;
use listener_topology::lifecycle::{ControlEvent, ControlEvents};
use listener_topology::listener::{ListenerManager, ListenerSpec};
use listener_topology::net::event_loop::default_loop_count;
use listener_topology::net::{EventLoopThreadPool, ListenerCallbacks};
use listener_topology::observability::logging;

const DEFAULT_CONFIG_PATH: &str = "listener-topology.toml";

#[derive(Parser, Debug)]
#[command(name = "listener-topology", version, about = "Multi-loop TCP/TLS listener daemon")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log filter, overrides RUST_LOG and the config file
    #[arg(long)]
    log_level: Option<String>,
}

fn main() -> ExitCode {
    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&args.config)
        .map_err(|e| format!("failed to load {}: {e}", args.config.display()))?;

    let env_filter = std::env::var("RUST_LOG").ok();
    let filter = logging::resolve_filter(
        args.log_level.as_deref(),
        env_filter.as_deref(),
        &config.observability.log_level,
    );
    logging::init(&filter, config.observability.log_format)
        .map_err(|e| format!("failed to initialize logging: {e}"))?;

    tracing::info!(
        config = %args.config.display(),
        listeners = config.listener.len(),
        "listener-topology v{} starting",
        env!("CARGO_PKG_VERSION")
    );

    let worker_count = match config.runtime.worker_threads {
        0 => default_loop_count(),
        n => n,
    };
    let mut pool = EventLoopThreadPool::new(worker_count, "worker")?;

    let mut manager = ListenerManager::new(config.runtime.topology_options());
    for listener in &config.listener {
        manager.add_listener(ListenerSpec::from(listener))?;
    }

    let callbacks = ListenerCallbacks::new()
        .with_after_accept(|socket| {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
            }
        })
        .with_connection(|conn| {
            tracing::info!(
                connection_id = %conn.id(),
                peer = %conn.peer_addr(),
                local = %conn.local_addr(),
                loop_name = %conn.loop_name(),
                tls = conn.is_tls(),
                "Connection established"
            );
        });

    if let Err(e) = manager.create_listeners(&config.tls.global(), &pool.loops(), callbacks) {
        tracing::error!(error = %e, "Failed to create listeners");
        pool.stop();
        return Err(e.into());
    }
    if let Err(e) = manager.start_listening() {
        tracing::error!(error = %e, "Failed to start listeners");
        pool.stop();
        return Err(e.into());
    }

    for address in manager.get_listeners() {
        tracing::info!(address = %address, "Listening");
    }

    let control = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    control.block_on(async {
        let mut events = ControlEvents::new()?;

        // Kept alive for the duration of the loop; dropping it stops watching.
        let _watcher = if config.tls.watch_files {
            let (watcher, reloads) = CertWatcher::new(CertWatcher::tls_files(&config));
            events = events.with_reloads(reloads);
            Some(watcher.run()?)
        } else {
            None
        };

        loop {
            match events.recv().await {
                ControlEvent::Reload => {
                    let report = manager.reload_ssl_files();
                    if !report.is_success() {
                        tracing::warn!(
                            failed = report.failed.len(),
                            "Some listeners kept their previous certificates"
                        );
                    }
                }
                ControlEvent::Shutdown => break,
            }
        }
        Ok::<(), Box<dyn std::error::Error>>(())
    })?;

    tracing::info!("Shutting down");
    manager.stop_listening();
    pool.stop();

    tracing::info!("Shutdown complete");
    Ok(())
}
