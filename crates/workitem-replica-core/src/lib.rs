//! # Workitem Replica Core
//!
//! Runtime-agnostic logic for Workitem Replica: data models, the page diff
//! classifier, the remote source and storage traits, the fuzzy index engine,
//! and state-based result ordering.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. The native
//! crate supplies the SQLite store, the HTTP remote, and the async
//! orchestration on top of these pieces.

pub mod diff;
pub mod index;
pub mod models;
pub mod remote;
pub mod search;
pub mod store;
