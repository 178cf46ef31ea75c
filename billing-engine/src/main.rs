//! Billing engine entry point.

use billing_engine::config::EngineConfig;
use billing_engine::startup::Application;

use service_core::observability::init_tracing;
use tokio::signal;

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = EngineConfig::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        otlp_endpoint = ?config.otlp_endpoint,
        "Starting billing-engine"
    );

    tracing::info!(
        service_name = %config.service_name,
        http_port = %config.common.port,
        database = if config.database.url.is_some() { "postgres" } else { "memory" },
        db_max_connections = %config.database.max_connections,
        subscription_tax_percentage = %config.pricing.subscription_tax_percentage,
        scheduler_enabled = config.scheduler.enabled,
        "Configuration loaded"
    );

    let app = Application::build(config).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to build application");
        std::io::Error::other(format!("Application build error: {}", e))
    })?;
    let shutdown = app.shutdown_token();

    let server = tokio::spawn(app.run_until_stopped());
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            match result {
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Application error");
                    return Err(e);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Server task panicked");
                    return Err(std::io::Error::other(e.to_string()));
                }
                Ok(Ok(())) => {}
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("Graceful shutdown initiated");
            shutdown.cancel();
            if let Ok(Err(e)) = server.await {
                tracing::error!(error = %e, "Error while draining connections");
            }
        }
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}
