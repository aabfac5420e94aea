//! Development template server
//!
//! Browser UI for editing templates and their sample data with live
//! preview. Writes go straight to the template directory and evict the
//! registry cache, so the running consumer picks them up on the next send.
//! Only started in development.

mod error;
mod handlers;
mod samples;

pub use error::{DevServerError, ErrorResponse};
pub use samples::SampleStore;

use crate::templates::TemplateRegistry;
use axum::{
    Router,
    http::Method,
    routing::{get, post},
};
use core_config::server::ServerConfig;
use serde::Serialize;
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

const UPDATES_CAPACITY: usize = 64;

/// Pushed to every WebSocket client after a write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdateEvent {
    TemplateUpdated {
        #[serde(rename = "templateName")]
        template_name: String,
    },
    SampleUpdated {
        #[serde(rename = "sampleName")]
        sample_name: String,
    },
}

#[derive(Clone)]
pub struct DevServerState {
    registry: Arc<TemplateRegistry>,
    samples: SampleStore,
    updates: broadcast::Sender<String>,
}

impl DevServerState {
    pub fn new(registry: Arc<TemplateRegistry>, samples_dir: impl Into<PathBuf>) -> Self {
        let (updates, _) = broadcast::channel(UPDATES_CAPACITY);
        Self {
            registry,
            samples: SampleStore::new(samples_dir),
            updates,
        }
    }

    /// Receive serialized [`UpdateEvent`]s
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.updates.subscribe()
    }

    fn broadcast(&self, event: UpdateEvent) {
        match serde_json::to_string(&event) {
            // No subscribers is fine
            Ok(frame) => {
                let receivers = self.updates.send(frame).unwrap_or(0);
                debug!(?event, receivers, "Broadcast update");
            }
            Err(e) => tracing::error!(error = %e, "Failed to serialize update event"),
        }
    }
}

pub fn router(state: DevServerState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::index))
        .route("/health", get(handlers::health))
        .route("/api/templates", get(handlers::list_templates))
        .route(
            "/api/templates/{name}",
            get(handlers::get_template).put(handlers::update_template),
        )
        .route("/api/templates/preview/{name}", post(handlers::preview_template))
        .route("/api/samples", get(handlers::list_samples))
        .route(
            "/api/samples/{name}",
            get(handlers::get_sample).put(handlers::update_sample),
        )
        .route("/ws", get(handlers::websocket))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve<F>(state: DevServerState, config: &ServerConfig, shutdown: F) -> io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(config.address()).await?;
    info!(
        addr = %listener.local_addr()?,
        "Starting template management server (development only)"
    );

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .inspect_err(|e| tracing::error!("Dev server encountered an error: {:?}", e))
}
