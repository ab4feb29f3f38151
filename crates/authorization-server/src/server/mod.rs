//! HTTP surface of the authorization server.
//!
//! [`transport::HttpState`] is the composition root: it wires the client
//! registry, key manager, stores, issuer and validator together once, and
//! every handler borrows it through axum's `State`.

pub mod oauth;
pub mod resource;
pub mod transport;

use std::net::SocketAddr;
use std::sync::Arc;

use transport::HttpState;

/// OAuth 2.1 / OpenID Connect authorization server.
pub struct AuthorizationServer {
    state: Arc<HttpState>,
}

impl AuthorizationServer {
    #[must_use]
    pub fn new(state: HttpState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    /// Run the server in HTTP mode.
    ///
    /// # Errors
    ///
    /// Returns error on bind or server failure.
    pub async fn run_http(self, port: u16) -> anyhow::Result<()> {
        tracing::info!(
            issuer = %self.state.config.issuer,
            kid = %self.state.keys.active_kid(),
            "Starting authorization server on port {}",
            port
        );

        Arc::clone(&self.state).start_cleanup_task();
        let router = transport::create_router(Arc::clone(&self.state));
        let addr = SocketAddr::from(([0, 0, 0, 0], port));

        tracing::info!("HTTP server listening on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

        tracing::info!("HTTP server shut down");
        Ok(())
    }

    #[must_use]
    pub fn state(&self) -> &Arc<HttpState> {
        &self.state
    }
}

impl std::fmt::Debug for AuthorizationServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationServer")
            .field("issuer", &self.state.config.issuer)
            .finish()
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for CTRL+C; shutting down");
        return;
    }
    tracing::info!("Received shutdown signal");
}
