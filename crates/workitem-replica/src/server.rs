//! HTTP transport for the RPC boundary.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/rpc` | One request frame in, one response frame out |
//! | `GET`  | `/events` | Push frames as server-sent events |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Every SSE `data:` line carries a `[null, topic, payload]` frame. A
//! subscriber that falls behind skips the events it missed.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so a browser extension
//! can talk to a local server.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, Stream};
use serde::Serialize;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::{Any, CorsLayer};

use crate::context::AppContext;
use crate::rpc::{push_frame, RpcRouter};

pub fn router(ctx: Arc<AppContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/rpc", post(handle_rpc))
        .route("/events", get(handle_events))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(RpcRouter::new(ctx))
}

/// Serve until the process is terminated.
pub async fn run_server(ctx: Arc<AppContext>, bind_addr: &str) -> anyhow::Result<()> {
    let app = router(ctx);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    tracing::info!("RPC server listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn handle_rpc(State(router): State<RpcRouter>, Json(frame): Json<Value>) -> Json<Value> {
    Json(router.handle_frame(frame).await)
}

async fn handle_events(
    State(router): State<RpcRouter>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = router.context().events.subscribe();

    let events = stream::unfold(receiver, |mut receiver| async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let data = push_frame(&event).to_string();
                    return Some((Ok(Event::default().data(data)), receiver));
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
