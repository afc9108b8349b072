use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use coverd::api;
use coverd::format_diagnostics;
use coverd::Config;
use coverd::Engine;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser)]
#[command(name = "coverd", version, about = "Drive cover position and tilt from two on/off controls")]
struct Cli {
    /// Config files, merged in order; later files may not redefine earlier fields
    #[arg(default_value = "coverd.toml")]
    configs: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (config, diagnostics) = match Config::from_files(&cli.configs) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };

    // Logging is not set up yet
    if !diagnostics.is_empty() {
        eprint!("{}", format_diagnostics(&diagnostics));
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(config.logging.filter())
        .init();

    tracing::info!("coverd starting");
    tracing::info!("Loaded config from: {:?}", cli.configs);

    let engine = Arc::new(Engine::new());
    let mut integrations = engine.start_integrations(&config).await;
    tracing::info!("{} integration(s) running", integrations.len());

    let api = if config.api.enabled {
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        let handle = tokio::spawn(api::serve(
            config.api.listen.clone(),
            config.api.port,
            engine.clone(),
            shutdown_rx,
        ));
        Some((shutdown_tx, handle))
    } else {
        tracing::info!("HTTP API disabled");
        None
    };

    tracing::info!("Press Ctrl+C to exit");

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received shutdown signal");
        }
        Err(e) => {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
    }

    // Consumers first, then the integrations that own the entities
    for integration in integrations.iter_mut().rev() {
        tracing::info!("Stopping integration '{}'", integration.name());
        if let Err(e) = integration.shutdown().await {
            tracing::error!("Error stopping integration '{}': {}", integration.name(), e);
        }
    }

    if let Some((shutdown_tx, handle)) = api {
        let _ = shutdown_tx.send(());
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!("HTTP API server error: {:#}", e),
            Err(e) => tracing::error!("HTTP API server task failed: {}", e),
        }
    }

    tracing::info!("coverd shutdown complete");

    Ok(())
}
