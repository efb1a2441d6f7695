//! Long-running server with background change detection.

use super::load_service;
use crate::server;
use anyhow::{Context, Result};
use slider_core::{ChangeWatcher, Config};
use std::sync::Arc;
use tokio::net::TcpListener;

pub async fn serve(config: Config, service_mode: bool) -> Result<()> {
    let service = Arc::new(load_service(&config)?);
    tracing::info!(
        decks = service.catalog().len(),
        bib_entries = service.bibliography().len(),
        "slides loaded"
    );

    let watcher = ChangeWatcher::new(Arc::clone(&service), config.bibliography_path())
        .with_config(&config.watch)
        .spawn()
        .context("Failed to initialize file watcher")?;

    let app = server::router(Arc::clone(&service));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    tracing::info!(%addr, "slider listening");

    if !service_mode {
        let url = browse_url(&config.server.host, config.server.port);
        println!("\nServing {} decks at {}", service.catalog().len(), url);
        println!("   Press Ctrl+C to stop\n");
        if let Err(err) = open::that(&url) {
            tracing::warn!("Failed to open browser: {}", err);
        }
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    drop(watcher);
    tracing::info!(cache = %service.cache().stats(), "shut down");
    Ok(())
}

fn browse_url(host: &str, port: u16) -> String {
    let host = match host {
        "0.0.0.0" | "::" | "[::]" => "localhost",
        other => other,
    };
    format!("http://{}:{}/", host, port)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Ctrl+C received, shutting down"),
        _ = terminate => tracing::info!("SIGTERM received, shutting down"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unspecified_host_browses_localhost() {
        assert_eq!(browse_url("0.0.0.0", 29548), "http://localhost:29548/");
        assert_eq!(browse_url("127.0.0.1", 8080), "http://127.0.0.1:8080/");
    }
}
