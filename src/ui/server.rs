//! Web status server
//!
//! Runs on its own thread with a small tokio runtime so the main loop
//! stays synchronous.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;

use crate::config::UiConfig;
use crate::ui::handlers;
use crate::ui::status::StatusBoard;

/// Shared handler state
pub struct AppState {
    pub status: Arc<StatusBoard>,
}

pub struct WebServer {
    config: UiConfig,
    state: Arc<AppState>,
}

impl WebServer {
    pub fn new(config: UiConfig, status: Arc<StatusBoard>) -> Self {
        Self {
            config,
            state: Arc::new(AppState { status }),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/status", get(handlers::get_status))
            .route("/api/devices", get(handlers::get_devices))
            .route("/api/button", post(handlers::press_button))
            .fallback(handlers::not_found)
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    pub fn address(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.config.bind_address, self.config.http_port).parse()
    }

    /// Serve from a background thread
    pub fn start_background(self) -> std::io::Result<JoinHandle<()>> {
        let addr = self
            .address()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let app = self.router();

        thread::Builder::new()
            .name("web-ui".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(1)
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        tracing::error!("Failed to start web UI runtime: {}", e);
                        return;
                    }
                };

                runtime.block_on(async move {
                    let listener = match tokio::net::TcpListener::bind(addr).await {
                        Ok(listener) => listener,
                        Err(e) => {
                            tracing::error!("Failed to bind web UI to {}: {}", addr, e);
                            return;
                        }
                    };
                    tracing::info!("Web UI listening on http://{}", addr);
                    if let Err(e) = axum::serve(listener, app).await {
                        tracing::error!("Web UI server stopped: {}", e);
                    }
                });
            })
    }
}
