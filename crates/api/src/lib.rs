mod auth;
pub mod routes;

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use activity::ActivitySimulator;
use axum::Router;
use campaigns::{DispatcherSpawner, MessageStore};
use fingerprint::FingerprintRegistry;
use quarantine::QuarantineManager;
use risk::RiskEngine;
use tokio::sync::{broadcast, Mutex};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Ring buffer that keeps recent log lines so new clients get history.
#[derive(Clone)]
pub struct LogBuffer {
    inner: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub async fn push(&self, line: String) {
        let mut buf = self.inner.lock().await;
        if buf.len() >= self.capacity {
            buf.pop_front();
        }
        buf.push_back(line);
    }

    pub async fn snapshot(&self) -> Vec<String> {
        self.inner.lock().await.iter().cloned().collect()
    }
}

/// Shared application state injected into every route handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MessageStore>,
    pub risk: Arc<RiskEngine>,
    pub quarantine: Arc<QuarantineManager>,
    pub fingerprints: Arc<FingerprintRegistry>,
    pub activity: Arc<ActivitySimulator>,
    pub spawner: Arc<dyn DispatcherSpawner>,
    pub api_token: String,
    /// Broadcast channel for streaming log lines to WebSocket clients.
    pub log_tx: broadcast::Sender<String>,
    /// Recent log history for new clients.
    pub log_buffer: LogBuffer,
}

/// Build and run the Axum API server.
pub async fn serve(state: AppState, port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods(Any);

    let app = Router::new()
        .merge(routes::api_router(state.clone()))
        .merge(routes::ws_router())
        .merge(routes::health_router())
        .with_state(state)
        .layer(cors);

    info!(%addr, "fleet control API listening");
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
