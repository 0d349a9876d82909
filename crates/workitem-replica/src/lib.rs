//! # Workitem Replica
//!
//! **A local, searchable replica of a remote work-item store, kept fresh by polling.**
//!
//! Work items are mirrored into SQLite, indexed for fuzzy full-text search,
//! and served to a UI over a small request/response + push-event contract.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────┐
//! │ Remote (ADO) │──▶│ Sync         │──▶│  SQLite   │
//! │ ids / batch  │   │ Orchestrator │   │  replica  │
//! └──────┬───────┘   └──────┬───────┘   └─────┬─────┘
//!        │ types/icons      │ summary         │ records
//!        ▼                  ▼                 ▼
//! ┌──────────────┐   ┌──────────────┐   ┌───────────┐
//! │ Metadata     │   │ Index        │◀──│ snapshot  │
//! │ Manager      │   │ Manager      │──▶│ side table│
//! └──────┬───────┘   └──────┬───────┘   └───────────┘
//!        └────────┬─────────┘
//!                 ▼
//!        ┌─────────────────┐
//!        │ RPC router      │── POST /rpc, GET /events
//!        └─────────────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. The **poller** ([`poller`]) asks the **sync orchestrator** ([`sync`]) to run.
//! 2. The orchestrator pages through remote ids ([`ado`]), classifies each
//!    page, and writes the replica ([`sqlite_store`]).
//! 3. The resulting summary drives a rebuild or an incremental update of the
//!    search index ([`index_manager`]), which announces `index-changed`.
//! 4. Searches ([`search`]) read the current index, hydrate from the replica,
//!    and order hits using the type metadata ([`metadata`]).
//!
//! ## Quick Start
//!
//! ```bash
//! wir init                     # create database
//! wir sync --rebuild-index     # first sync
//! wir search "login bug"
//! wir serve                    # RPC server + background polling
//! ```

pub mod ado;
pub mod config;
pub mod context;
pub mod db;
pub mod events;
pub mod export;
pub mod index_manager;
pub mod metadata;
pub mod migrate;
pub mod poller;
pub mod progress;
pub mod rpc;
pub mod search;
pub mod server;
pub mod sqlite_store;
pub mod sync;
