//! # Statement Store Module
//!
//! Owns the local mirror of compliance control statements and the
//! conflict-detection logic that keeps it honest.
//!
//! ## Overview
//!
//! This crate manages:
//! - The `Statement` data model and its sync-state machine
//! - SQLite persistence with per-statement write serialization
//! - The pure merge-policy and resolution logic (`resolver`)
//!
//! The store is a pure data layer: it performs no network I/O. The pull and
//! push engines in `core-sync` drive it.

pub mod db;
pub mod error;
pub mod models;
pub mod resolver;
pub mod store;

pub use db::{create_pool, create_test_pool, DatabaseConfig};
pub use error::{Result, StatementError};
pub use models::{ConflictResolution, Statement, StatementId, SyncState};
pub use resolver::{classify_remote_merge, plan_resolution, MergeOutcome, ResolutionPlan};
pub use store::{RemoteVersion, SqliteStatementStore, StatementStore};
