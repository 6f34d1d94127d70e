use anyhow::Context;
use clap::Parser;
use routegate::api::{ApiServer, PKG_NAME, VERSION};
use routegate::config::{Cli, Config};
use routegate::docker::DockerRuntime;
use routegate::reconciler::Reconciler;
use routegate::runtime::ProcessRuntime;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("routegate=info".parse().expect("valid log directive")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_cli(&cli).map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;

    print_startup_banner(&config);

    let docker = DockerRuntime::connect(&config.docker)
        .with_context(|| format!("error connecting to Docker at {}", config.docker.endpoint))?;
    if let Err(e) = docker.ping().await {
        warn!(error = %e, "Docker daemon is not responding; reloads will fail until it is");
    }
    let runtime: Arc<dyn ProcessRuntime> = Arc::new(docker);

    let reconciler = Reconciler::from_config(&config.reconciler, runtime)
        .context("error initializing reconciler")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut server = ApiServer::new(config.listen_addr()?, Arc::new(reconciler), shutdown_rx);
    if let (Some(cert), Some(key)) = (&config.server.tls_cert, &config.server.tls_key) {
        let acceptor = routegate::tls::acceptor(cert, key)?;
        info!(cert = %cert.display(), key = %key.display(), "TLS enabled");
        server = server.with_tls(acceptor);
    }

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "API server error");
        }
    });

    wait_for_shutdown().await;

    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(5), server_handle).await;

    info!("Shutdown complete");
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received SIGINT (Ctrl+C), shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, shutting down...");
    }
}

fn print_startup_banner(config: &Config) {
    info!(name = PKG_NAME, version = VERSION, "Starting configuration reconciler");
    info!(
        listen_addr = %config.server.listen_addr,
        tls = config.server.tls_enabled(),
        "Server configuration"
    );
    info!(
        config_dir = %config.reconciler.config_dir.display(),
        template = %config.reconciler.template.display(),
        name_pattern = %config.reconciler.name_pattern,
        "Reconciler settings"
    );
    if config.reconciler.name_pattern.is_empty() {
        warn!("No container name pattern configured; every running container will be signaled");
    }
    info!(
        endpoint = %config.docker.endpoint,
        signal = %config.docker.signal,
        timeout_secs = config.docker.timeout_secs,
        "Docker settings"
    );
}
