use clap::Parser;
use ingestd::config::Config;
use ingestd::metrics::Metrics;
use ingestd::peer::{Directory, InProcessTransport};
use ingestd::segment::InMemorySegmentLog;
use ingestd::Coordinator;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("ingestd starting, role={}", config.role);

    // The segment log is an external collaborator (see segment::SegmentLog);
    // the in-memory log stands in until a durable implementation is wired.
    let segment_log = Arc::new(InMemorySegmentLog::empty());
    let metrics = Arc::new(Metrics::new());

    // Likewise the gossip transport: InProcessTransport runs single-node,
    // which is all this binary promises without a real membership transport
    // plugged in. The transport assigns this node's cluster-unique name.
    let transport = Arc::new(InProcessTransport::new(Uuid::new_v4().to_string()));
    let directory = Arc::new(
        Directory::join(
            transport,
            &config.seeds,
            config.role,
            config.http_addr.to_string(),
            config.http_port,
            metrics.clone(),
        )
        .await?,
    );
    info!("joined directory as {}", directory.name());

    let coordinator = Coordinator::spawn(
        segment_log,
        config.lease_timeout(),
        config.sweep_interval(),
        directory.clone(),
        metrics,
    );
    let app = coordinator.router();

    let addr = SocketAddr::from((config.http_addr, config.http_port));
    let listener = TcpListener::bind(addr).await?;
    info!("listening on {addr}");

    let shutdown_coordinator = coordinator.clone();
    let shutdown_directory = directory.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("shutdown signal received, draining pending leases");
            shutdown_coordinator.stop().await;
            if let Err(err) = shutdown_directory.leave(std::time::Duration::from_secs(5)).await {
                error!("error leaving directory: {err}");
            }
        })
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
