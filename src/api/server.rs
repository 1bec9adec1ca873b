//! API Server
//!
//! Serves the REST router until the shared shutdown token fires.

use super::rest::RestRouter;
use crate::error::{Error, Result};
use std::net::SocketAddr;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Configuration for the API server
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Bind address for probes, metrics and the REST API
    pub addr: SocketAddr,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

/// HTTP server for health, metrics and controller listing
pub struct ApiServer {
    config: ApiServerConfig,
    router: RestRouter,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, router: RestRouter) -> Self {
        Self { config, router }
    }

    /// Run until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let addr = self.config.addr;
        let app = self.router.build();

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Internal(format!("Failed to bind API server on {}: {}", addr, e)))?;
        info!("API server listening on {}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
                info!("API server shutting down");
            })
            .await
            .map_err(|e| Error::Internal(format!("API server error: {}", e)))?;

        Ok(())
    }
}
