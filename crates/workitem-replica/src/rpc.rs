//! Request/response router for the RPC boundary.
//!
//! Frames are JSON arrays:
//!
//! | Direction | Shape |
//! |-----------|-------|
//! | request | `[correlationId, route, payload]` |
//! | response | `[correlationId, route, response]` |
//! | push | `[null, topic, payload]` |
//!
//! # Routes
//!
//! | Route | Payload | Response |
//! |-------|---------|----------|
//! | `sync` | `{rebuildIndex?}` | `{addedIds, updatedIds, deletedIds, skipped}` |
//! | `sync-metadata` | none | `{typeCount, newFetchCount}` |
//! | `search` | `{query}` | `{items}` |
//! | `recent-items` | none | `{items}` |
//! | `reset` | none | `{}` |
//! | `test-connection` | `{config?}` | `{status, message}` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "unknown_route", "message": "No route named 'x'" } }
//! ```
//!
//! Codes: `bad_request` (malformed frame or payload), `unknown_route`,
//! `internal` (handler failure). Sync failures are not errors here: they
//! arrive as `error` updates on `sync-progress` with an empty summary.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use workitem_replica_core::models::SyncSummary;

use crate::ado::AdoClient;
use crate::config::{normalize_area_path, RemoteConfig};
use crate::context::{test_connection, AppContext};
use crate::events::PushEvent;
use crate::search::{recent, search, ItemsResponse, SearchRequest};
use crate::sync::SyncRequest;

pub mod route {
    pub const SYNC: &str = "sync";
    pub const SYNC_METADATA: &str = "sync-metadata";
    pub const SEARCH: &str = "search";
    pub const RECENT_ITEMS: &str = "recent-items";
    pub const RESET: &str = "reset";
    pub const TEST_CONNECTION: &str = "test-connection";
}

/// A decoded request frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestFrame {
    pub id: Value,
    pub route: String,
    pub payload: Value,
}

impl RequestFrame {
    /// Decode `[id, route]` or `[id, route, payload]`.
    pub fn from_value(value: Value) -> Result<Self, RpcError> {
        let Value::Array(mut parts) = value else {
            return Err(RpcError::bad_request("Frame must be a JSON array"));
        };
        if !(2..=3).contains(&parts.len()) {
            return Err(RpcError::bad_request("Frame must have 2 or 3 elements"));
        }
        let payload = if parts.len() == 3 {
            parts.pop().unwrap_or(Value::Null)
        } else {
            Value::Null
        };
        let route = match parts.pop() {
            Some(Value::String(route)) => route,
            _ => return Err(RpcError::bad_request("Route must be a string")),
        };
        let id = parts.pop().unwrap_or(Value::Null);
        Ok(Self { id, route, payload })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RpcError {
    pub code: &'static str,
    pub message: String,
}

impl RpcError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            code: "bad_request",
            message: message.into(),
        }
    }

    pub fn unknown_route(route: &str) -> Self {
        Self {
            code: "unknown_route",
            message: format!("No route named '{}'", route),
        }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self {
            code: "internal",
            message: format!("{:#}", err),
        }
    }

    pub fn to_value(&self) -> Value {
        json!({ "error": self })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    #[serde(flatten)]
    pub summary: SyncSummary,
    pub skipped: bool,
}

#[derive(Debug, Default, Deserialize)]
struct TestConnectionRequest {
    #[serde(default)]
    config: Option<RemoteConfig>,
}

fn decode<T: for<'de> Deserialize<'de> + Default>(payload: Value) -> Result<T, RpcError> {
    if payload.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(payload).map_err(|e| RpcError::bad_request(e.to_string()))
}

fn encode<T: Serialize>(value: &T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::internal(e.into()))
}

/// Push frame for an event: `[null, topic, payload]`.
pub fn push_frame(event: &PushEvent) -> Value {
    json!([Value::Null, event.topic, event.payload])
}

#[derive(Clone)]
pub struct RpcRouter {
    ctx: Arc<AppContext>,
}

impl RpcRouter {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<AppContext> {
        &self.ctx
    }

    /// Dispatch one call. Errors are encoded as `{error: {code, message}}`.
    pub async fn call(&self, route: &str, payload: Value) -> Value {
        match self.dispatch(route, payload).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(route, code = err.code, "RPC error: {}", err.message);
                err.to_value()
            }
        }
    }

    /// Handle a raw request frame and produce the response frame.
    pub async fn handle_frame(&self, frame: Value) -> Value {
        match RequestFrame::from_value(frame) {
            Ok(frame) => {
                let response = self.call(&frame.route, frame.payload).await;
                json!([frame.id, frame.route, response])
            }
            Err(err) => json!([Value::Null, Value::Null, err.to_value()]),
        }
    }

    async fn dispatch(&self, route: &str, payload: Value) -> Result<Value, RpcError> {
        let ctx = &self.ctx;
        match route {
            route::SYNC => {
                let request: SyncRequest = decode(payload)?;
                let response = match ctx.sync.sync(request).await {
                    Some(summary) => SyncResponse {
                        summary,
                        skipped: false,
                    },
                    None => SyncResponse {
                        summary: SyncSummary::default(),
                        skipped: true,
                    },
                };
                encode(&response)
            }
            route::SYNC_METADATA => {
                let summary = ctx
                    .metadata
                    .sync_metadata(ctx.remote.as_ref())
                    .await
                    .unwrap_or_default();
                encode(&summary)
            }
            route::SEARCH => {
                let request: SearchRequest = serde_json::from_value(payload)
                    .map_err(|e| RpcError::bad_request(e.to_string()))?;
                let items = search(
                    &ctx.index,
                    ctx.replica.as_ref(),
                    &ctx.metadata.map(),
                    &request.query,
                    ctx.search_limit,
                )
                .await
                .map_err(RpcError::internal)?;
                encode(&ItemsResponse { items })
            }
            route::RECENT_ITEMS => {
                let items = recent(ctx.replica.as_ref())
                    .await
                    .map_err(RpcError::internal)?;
                encode(&ItemsResponse { items })
            }
            route::RESET => {
                ctx.index.reset().await.map_err(RpcError::internal)?;
                ctx.metadata.reset().await.map_err(RpcError::internal)?;
                tracing::info!("Reset index snapshot and metadata");
                Ok(json!({}))
            }
            route::TEST_CONNECTION => {
                let request: TestConnectionRequest = decode(payload)?;
                let status = match request.config {
                    Some(mut config) => {
                        config.area_path = normalize_area_path(&config.area_path);
                        let client = AdoClient::new(&config).map_err(RpcError::internal)?;
                        test_connection(&client).await
                    }
                    None => test_connection(ctx.remote.as_ref()).await,
                };
                encode(&status)
            }
            other => Err(RpcError::unknown_route(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_frames() {
        let frame = RequestFrame::from_value(json!([7, "search", { "query": "bug" }])).unwrap();
        assert_eq!(frame.id, json!(7));
        assert_eq!(frame.route, "search");
        assert_eq!(frame.payload["query"], "bug");

        let frame = RequestFrame::from_value(json!(["a", "reset"])).unwrap();
        assert_eq!(frame.payload, Value::Null);
    }

    #[test]
    fn rejects_malformed_frames() {
        assert_eq!(
            RequestFrame::from_value(json!({ "route": "sync" })).unwrap_err().code,
            "bad_request"
        );
        assert!(RequestFrame::from_value(json!([1])).is_err());
        assert!(RequestFrame::from_value(json!([1, 2, 3])).is_err());
    }

    #[test]
    fn push_frame_has_null_id() {
        let event = PushEvent {
            topic: "index-changed".to_string(),
            payload: json!({ "rev": 3 }),
        };
        assert_eq!(push_frame(&event), json!([null, "index-changed", { "rev": 3 }]));
    }

    #[test]
    fn sync_response_is_flat() {
        let value = serde_json::to_value(SyncResponse {
            summary: SyncSummary::default(),
            skipped: true,
        })
        .unwrap();
        assert_eq!(value["skipped"], true);
        assert!(value["addedIds"].as_array().unwrap().is_empty());
    }
}
