#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod args;
mod output;

use args::Args;
use atelier_config::Config;
use clap::Parser;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    atelier_telemetry::init(&config.telemetry, args.log_filter.as_deref())?;

    if args.list_models {
        for model_id in atelier_imagegen::supported_models() {
            println!("{model_id}");
        }
        return Ok(());
    }

    let server = atelier_imagegen::build_server(&config)?;

    // Cancels the in-flight call on Ctrl+C or SIGTERM
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        cancel_clone.cancel();
    });

    let request = args.request(cancel)?;
    let model = args.model.as_deref().unwrap_or_default();

    tracing::info!(model, out = %args.out.display(), "starting generation");

    let result = server.generate(model, &request).await?;
    let written = output::write_images(&args.out, &result).await?;

    for path in &written {
        println!("{}", path.display());
    }

    tracing::info!(
        model,
        images = written.len(),
        warnings = result.warnings.len(),
        "generation finished"
    );
    Ok(())
}

/// Wait for a shutdown signal (`SIGINT` or `SIGTERM`)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    tracing::info!("shutdown signal received, cancelling");
}
