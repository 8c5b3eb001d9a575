//! Shared Canvas Node
//!
//! One physical display of the shared canvas:
//! - Heartbeats on `<prefix>/heartbeat` and tracks who else is alive
//! - Drives the simulation while it holds the lowest live id
//! - Draws its own slice of the canvas from the replicated state
//!
//! Runs until Ctrl-C. Transport faults are retried by the supervisor; a
//! panic in the node task restarts it after the same backoff.

mod cli;
mod zenoh_transport;

use anyhow::Result;
use canvas_core::{NodeConfig, Renderer, Supervisor, TerminalRenderer};
use canvas_env::TokioContext;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use cli::Args;
use zenoh_transport::ZenohTransport;

fn make_renderer(args: &Args, config: &NodeConfig) -> Result<Box<dyn Renderer>> {
    #[cfg(feature = "dashboard")]
    {
        if args.dashboard {
            let dashboard = canvas_core::dashboard::DashboardRenderer::new(
                config.node_id,
                config.slice_width,
                config.slice_height,
            )?;
            return Ok(Box::new(dashboard));
        }
    }

    #[cfg(not(feature = "dashboard"))]
    {
        if args.dashboard {
            anyhow::bail!("dashboard support not compiled in; rebuild with --features dashboard");
        }
    }

    Ok(Box::new(TerminalRenderer::stdout(
        config.node_id,
        config.slice_width,
        config.slice_height,
    )))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging (stderr, so stdout stays the canvas)
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = cli::load_config(&args)?;
    let zenoh_config = cli::zenoh_config(&args)?;
    info!(
        node = %config.node_id,
        slice = %format!("{}x{}", config.slice_width, config.slice_height),
        prefix = %config.topic_prefix,
        "starting canvas node"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    let context = TokioContext::shared();
    loop {
        let renderer = make_renderer(&args, &config)?;
        let session_config = zenoh_config.clone();
        let factory = move || ZenohTransport::new(session_config.clone());
        let supervisor = Supervisor::new(config.clone(), context.clone(), factory, renderer)?;

        match tokio::spawn(supervisor.run(shutdown_rx.clone())).await {
            Ok(Ok(report)) => {
                info!(restarts = report.restarts, "canvas node stopped");
                return Ok(());
            }
            Ok(Err(e)) => return Err(e.into()),
            Err(e) if e.is_panic() => {
                error!(error = %e, "node task panicked, restarting after backoff");
                if *shutdown_rx.borrow() {
                    return Ok(());
                }
                tokio::time::sleep(config.restart_backoff()).await;
            }
            Err(e) => return Err(e.into()),
        }
    }
}
