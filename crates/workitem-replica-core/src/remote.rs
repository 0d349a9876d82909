//! Remote source contract.
//!
//! The sync engine talks to the remote work-item store exclusively through
//! [`RemoteSource`]; icon downloads go through [`IconFetcher`]. Both are
//! object-safe (`Arc<dyn RemoteSource>`) so tests can script them.
//!
//! Id listings are expected newest-changed first. The incremental sync's
//! early exit depends on that ordering, and the orchestrator checks it.

use async_trait::async_trait;

use crate::models::{ItemId, ItemTypeDefinition, RemoteItem};

/// Failure talking to the remote.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// HTTP 401. Credentials are missing or rejected.
    #[error("Authentication error")]
    Unauthorized,
    /// Any other non-success HTTP status.
    #[error("Status code: {status}")]
    Http { status: u16 },
    /// The request never produced a response (DNS, TLS, timeout, ...).
    #[error("Transport error: {0}")]
    Transport(String),
    /// The response body did not match the expected shape.
    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Map an HTTP status to the matching error kind.
    pub fn from_status(status: u16) -> Self {
        if status == 401 {
            Self::Unauthorized
        } else {
            Self::Http { status }
        }
    }
}

/// Paginated, revisioned work-item collection.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Ids of live items, most recently changed first. `limit` caps the count.
    async fn list_active_ids(&self, limit: Option<usize>) -> Result<Vec<ItemId>, RemoteError>;

    /// Ids of deleted items, most recently changed first.
    async fn list_deleted_ids(&self, limit: Option<usize>) -> Result<Vec<ItemId>, RemoteError>;

    /// Batch fetch of the given ids, restricted to `fields`.
    ///
    /// At most one remote batch ceiling worth of ids (200) per call.
    async fn get_items(
        &self,
        fields: &[&str],
        ids: &[ItemId],
    ) -> Result<Vec<RemoteItem>, RemoteError>;

    /// Item type definitions with icon URLs and valid states.
    async fn list_types(&self) -> Result<Vec<ItemTypeDefinition>, RemoteError>;
}

/// Downloads icon bytes by URL.
#[async_trait]
pub trait IconFetcher: Send + Sync {
    async fn fetch_icon(&self, url: &str) -> Result<Vec<u8>, RemoteError>;
}
