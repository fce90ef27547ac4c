//! fibd entry point.
//!
//! Loads the configuration, registers one mock pipeline per configured port,
//! attaches the ports' monitoring sockets and runs the coordinator until
//! SIGINT.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use switch_fibd::config::DEFAULT_CONFIG_PATH;
use switch_fibd::{
    FibCoordinator, FibError, FibdConfig, MockPipeline, SharedPipelines, UnixSocketAttacher,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// L2 FIB coordinator for a software bridge
#[derive(Parser, Debug)]
#[command(name = "fibd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Directory holding the per-port monitoring sockets
    #[arg(long)]
    socket_dir: Option<PathBuf>,

    /// Forwarding table name
    #[arg(long)]
    fib_name: Option<String>,

    /// Aging cutoff in seconds
    #[arg(long)]
    aging_secs: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Additional ports to attach
    ports: Vec<String>,
}

impl Args {
    fn apply(self, config: &mut FibdConfig) {
        if let Some(dir) = self.socket_dir {
            config.socket_dir = dir;
        }
        if let Some(name) = self.fib_name {
            config.fib_name = name;
        }
        if let Some(secs) = self.aging_secs {
            config.aging_secs = secs;
        }
        for port in self.ports {
            if !config.ports.contains(&port) {
                config.ports.push(port);
            }
        }
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let mut config = FibdConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    args.apply(&mut config);
    config.validate().context("invalid configuration")?;

    info!(
        fib = %config.fib_name,
        socket_dir = %config.socket_dir.display(),
        aging_secs = config.aging_secs,
        ports = config.ports.len(),
        "Starting fibd"
    );

    if let Err(e) = std::fs::create_dir_all(&config.socket_dir) {
        warn!(path = %config.socket_dir.display(), error = %e, "Could not create socket directory");
    }

    let pipelines = SharedPipelines::default();
    for port in &config.ports {
        pipelines.add_pipeline(Box::new(MockPipeline::new(port.as_str())));
    }
    info!(pipelines = ?pipelines.lock().ids(), "Registered pipelines");

    let attacher = Arc::new(UnixSocketAttacher::new(&config.socket_dir));
    let (mut coordinator, control) = FibCoordinator::new(
        config.fib_name.as_str(),
        config.coordinator_settings(),
        pipelines,
        attacher,
    );

    let token = CancellationToken::new();
    let shutdown = token.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received SIGINT, shutting down");
            shutdown.cancel();
        }
    });

    // The control channel is bounded, so startup commands are fed from a
    // task while the coordinator drains them.
    let ports = config.ports.clone();
    let static_entries = config.static_entries.clone();
    let startup = control.clone();
    let feeder = tokio::spawn(async move {
        for port in ports {
            startup.add_port(port).await?;
        }
        for entry in static_entries {
            startup.add_static(entry.mac, entry.port).await?;
        }
        Ok::<_, FibError>(())
    });

    coordinator.run_until(token).await;
    coordinator.shutdown();
    feeder.abort();
    drop(control);

    let snapshot = serde_json::to_string(&coordinator.snapshot())?;
    info!(
        entries = coordinator.len(),
        stats = %serde_json::to_string(coordinator.stats())?,
        "FIB at exit: {}",
        snapshot
    );

    info!("fibd: Graceful shutdown complete");
    Ok(())
}
