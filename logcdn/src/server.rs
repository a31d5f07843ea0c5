//! Server lifecycle management
//!
//! Starts the background loops and the HTTP server, then waits for a
//! shutdown signal and stops everything through one cancellation token.

use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use logcdn_api::{create_router, AppState};
use logcdn_core::{bootstrap::Services, Config};

/// Upper bound on waiting for background loops after shutdown
const BACKGROUND_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub struct LogCdnServer {
    config: Config,
    services: Services,
    shutdown: CancellationToken,
}

impl LogCdnServer {
    pub fn new(config: Config, services: Services) -> Self {
        Self {
            config,
            services,
            shutdown: CancellationToken::new(),
        }
    }

    /// Start all components and wait for shutdown signal
    pub async fn start(self) -> anyhow::Result<()> {
        let mut background = self.services.gc.start(&self.shutdown);
        info!("Garbage collector started");

        if self.config.replication.enabled {
            background.push(self.services.replication.start(&self.shutdown));
            info!("Replication worker started");
        } else {
            info!("Replication worker disabled");
        }

        let http_handle = self.start_http_server().await?;

        tokio::select! {
            _ = http_handle => {
                error!("HTTP server stopped unexpectedly");
            }
            () = shutdown_signal() => {
                info!("Shutdown signal received, starting graceful shutdown...");
            }
        }

        // Stops GC loops, replication and open live streams
        self.shutdown.cancel();

        let drain = join_background(background);
        if tokio::time::timeout(BACKGROUND_DRAIN_TIMEOUT, drain).await.is_err() {
            warn!("Background tasks did not stop within {:?}", BACKGROUND_DRAIN_TIMEOUT);
        }

        info!("logcdn server stopped");
        Ok(())
    }

    /// Bind the listener and serve until the shutdown token fires
    async fn start_http_server(&self) -> anyhow::Result<JoinHandle<()>> {
        let http_address = self.config.http_address();
        let state = AppState::new(&self.services, self.shutdown.clone());
        let router = create_router(state);

        let listener = tokio::net::TcpListener::bind(&http_address)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind HTTP address {http_address}: {e}"))?;
        info!("HTTP server listening on {}", http_address);

        let shutdown = self.shutdown.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
            {
                error!("HTTP server error: {}", e);
            }

            info!("HTTP server shut down gracefully");
        });

        Ok(handle)
    }
}

async fn join_background(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if let Err(e) = handle.await {
            error!("Background task panicked: {}", e);
        }
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}
