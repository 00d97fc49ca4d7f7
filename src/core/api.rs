//! HTTP + WebSocket API
//!
//! Endpoints:
//! - GET /health - Health check
//! - GET /window - Current window (or idle with the previous baseline)
//! - GET /history - History view
//! - POST /test - Trigger a test window (409 when rejected)
//! - WS /ws - Live window updates, closes and the shutdown marker

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::core::engine::WindowUpdate;
use crate::core::export::WindowSink;
use crate::core::supervisor::{SharedEngine, TestTrigger};
use crate::error::{ExportError, SupervisorError};
use crate::types::{ClosedWindow, HistoryView, RenderedWindow};

/// Message pushed to WebSocket clients
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum LiveMessage {
    Window(Box<WindowUpdate>),
    Closed(ClosedWindow),
    /// Engine shut down; no further messages follow
    Terminated(RenderedWindow),
}

/// App state
pub struct AppState {
    pub engine: SharedEngine,
    pub trigger: TestTrigger,
    pub live_tx: broadcast::Sender<LiveMessage>,
}

/// Health response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub state: String,
    pub test_running: bool,
    pub history_entries: usize,
}

/// Test trigger response
#[derive(Debug, Serialize)]
pub struct TestResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Sink that fans engine updates out to WebSocket clients
#[derive(Debug, Clone)]
pub struct ApiSink {
    tx: broadcast::Sender<LiveMessage>,
}

impl ApiSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn sender(&self) -> broadcast::Sender<LiveMessage> {
        self.tx.clone()
    }
}

#[async_trait]
impl WindowSink for ApiSink {
    fn name(&self) -> &'static str {
        "api"
    }

    async fn window_updated(&self, update: &WindowUpdate) -> Result<(), ExportError> {
        // No subscribers is not an error
        let _ = self.tx.send(LiveMessage::Window(Box::new(update.clone())));
        Ok(())
    }

    async fn window_closed(&self, closed: &ClosedWindow) -> Result<(), ExportError> {
        let _ = self.tx.send(LiveMessage::Closed(closed.clone()));
        Ok(())
    }

    async fn terminated(&self, rendered: &RenderedWindow) -> Result<(), ExportError> {
        let _ = self.tx.send(LiveMessage::Terminated(rendered.clone()));
        Ok(())
    }
}

/// Create the API router
pub fn create_router(engine: SharedEngine, trigger: TestTrigger, live_tx: broadcast::Sender<LiveMessage>) -> Router {
    let state = Arc::new(AppState {
        engine,
        trigger,
        live_tx,
    });

    Router::new()
        .route("/health", get(health))
        .route("/window", get(window))
        .route("/history", get(history))
        .route("/test", post(trigger_test))
        .route("/ws", get(websocket_handler))
        .with_state(state)
}

/// Health check endpoint
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let engine = state.engine.read().await;
    Json(HealthResponse {
        status: "ok".to_string(),
        version: crate::VERSION.to_string(),
        state: engine.state().to_string(),
        test_running: engine.test_running(),
        history_entries: engine.history_len(),
    })
}

/// Current window projection
async fn window(State(state): State<Arc<AppState>>) -> Json<WindowUpdate> {
    Json(state.engine.read().await.snapshot())
}

/// History view
async fn history(State(state): State<Arc<AppState>>) -> Json<HistoryView> {
    Json(state.engine.read().await.history_view())
}

/// Queue a test window and wait for the poll loop to answer
async fn trigger_test(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.trigger.trigger().await {
        Some(Ok(())) => (
            StatusCode::ACCEPTED,
            Json(TestResponse {
                accepted: true,
                reason: None,
            }),
        ),
        Some(Err(rejection)) => (
            StatusCode::CONFLICT,
            Json(TestResponse {
                accepted: false,
                reason: Some(rejection.to_string()),
            }),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(TestResponse {
                accepted: false,
                reason: Some("poll loop not running".to_string()),
            }),
        ),
    }
}

/// WebSocket handler for live updates
async fn websocket_handler(State(state): State<Arc<AppState>>, ws: WebSocketUpgrade) -> impl IntoResponse {
    let rx = state.live_tx.subscribe();
    let current = LiveMessage::Window(Box::new(state.engine.read().await.snapshot()));
    ws.on_upgrade(move |socket| handle_websocket(socket, current, rx))
}

/// Send the current state, then every update until either side goes away
async fn handle_websocket(socket: WebSocket, current: LiveMessage, mut rx: broadcast::Receiver<LiveMessage>) {
    let (mut sender, mut receiver) = socket.split();

    let mut send_task = tokio::spawn(async move {
        let mut next = Some(current);
        loop {
            let message = match next.take() {
                Some(m) => m,
                None => match rx.recv().await {
                    Ok(m) => m,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "websocket client lagging, updates dropped");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };
            let last = matches!(message, LiveMessage::Terminated(_));
            let json = serde_json::to_string(&message).unwrap_or_default();
            if sender.send(Message::Text(json)).await.is_err() || last {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

/// Run the API server
pub async fn run_server(addr: &str, router: Router) -> Result<(), SupervisorError> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("🚨 RedAlert API running on {}", addr);
    println!("  GET  /health   - Health check");
    println!("  GET  /window   - Current alert window");
    println!("  GET  /history  - Alert history");
    println!("  POST /test     - Trigger test alert");
    println!("  WS   /ws       - Live updates");
    axum::serve(listener, router).await?;
    Ok(())
}
