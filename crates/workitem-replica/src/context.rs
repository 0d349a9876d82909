//! Process-wide application context.
//!
//! Built once at start and shared (`Arc<AppContext>`) by the RPC router,
//! the HTTP transport, the poller, and the CLI. There is no global state:
//! every component receives its collaborators from here.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;

use workitem_replica_core::remote::{IconFetcher, RemoteSource};
use workitem_replica_core::store::{MetadataStore, ReplicaStore, SnapshotStore};

use crate::ado::AdoClient;
use crate::config::Config;
use crate::db;
use crate::events::{Emitter, EventBus};
use crate::export::ExportTiming;
use crate::index_manager::IndexManager;
use crate::metadata::MetadataManager;
use crate::migrate;
use crate::sqlite_store::SqliteStore;
use crate::sync::SyncOrchestrator;

/// Tunables taken from `[sync]` and `[index]`.
#[derive(Debug, Clone, Copy)]
pub struct ContextOptions {
    pub page_size: usize,
    pub search_limit: usize,
    pub export: ExportTiming,
}

impl From<&Config> for ContextOptions {
    fn from(config: &Config) -> Self {
        Self {
            page_size: config.sync.page_size,
            search_limit: config.index.search_limit,
            export: ExportTiming::from(&config.index),
        }
    }
}

pub struct AppContext {
    pub events: EventBus,
    pub replica: Arc<dyn ReplicaStore>,
    pub remote: Arc<dyn RemoteSource>,
    pub index: Arc<IndexManager>,
    pub metadata: Arc<MetadataManager>,
    pub sync: Arc<SyncOrchestrator>,
    pub search_limit: usize,
}

/// Result of the `test-connection` route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub status: &'static str,
    pub message: String,
}

impl AppContext {
    /// Wire every component over one store and one remote.
    pub async fn assemble<S, R>(store: Arc<S>, remote: Arc<R>, options: ContextOptions) -> Result<Self>
    where
        S: ReplicaStore + SnapshotStore + MetadataStore + 'static,
        R: RemoteSource + IconFetcher + 'static,
    {
        let events = EventBus::new();
        let emitter: Arc<dyn Emitter> = Arc::new(events.clone());
        let replica: Arc<dyn ReplicaStore> = store.clone();

        let index = Arc::new(IndexManager::new(
            replica.clone(),
            store.clone(),
            emitter.clone(),
            options.export,
        ));
        let metadata =
            Arc::new(MetadataManager::load(store, remote.clone(), emitter.clone()).await?);
        let remote: Arc<dyn RemoteSource> = remote;
        let sync = Arc::new(SyncOrchestrator::new(
            remote.clone(),
            replica.clone(),
            index.clone(),
            emitter,
            options.page_size,
        ));

        Ok(Self {
            events,
            replica,
            remote,
            index,
            metadata,
            sync,
            search_limit: options.search_limit,
        })
    }

    /// Open the configured database, run migrations, and connect the remote.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;
        let store = Arc::new(SqliteStore::new(pool));
        let remote = Arc::new(AdoClient::new(&config.remote)?);
        Self::assemble(store, remote, ContextOptions::from(config)).await
    }
}

/// List active ids once and describe the outcome.
pub async fn test_connection(remote: &dyn RemoteSource) -> ConnectionStatus {
    match remote.list_active_ids(None).await {
        Ok(ids) => ConnectionStatus {
            status: "success",
            message: format!("Connecting to Azure DevOps... Success! ({} items found)", ids.len()),
        },
        Err(e) => ConnectionStatus {
            status: "error",
            message: format!("Connection to Azure DevOps... Failed! ({})", e),
        },
    }
}
