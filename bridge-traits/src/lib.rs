//! # Collaborator Bridge Traits
//!
//! Contracts between the sync core and the external systems it talks to.
//!
//! ## Overview
//!
//! This crate defines the traits that must be implemented by whatever hosts
//! the sync core: the remote GRC service adapters and the audit pipeline.
//! The core never speaks HTTP itself; it consumes these traits and leaves
//! transport, authentication, and retry-at-the-wire concerns to the adapter.
//!
//! ## Traits
//!
//! - [`GrcContentSource`](grc::GrcContentSource) - discovery and retrieval of
//!   control statements for a system (pull side)
//! - [`GrcWriteSink`](grc::GrcWriteSink) - write-back of statement content
//!   (push side)
//! - [`AuditSink`](audit::AuditSink) - consumer of structured audit records
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Adapters should
//! map their transport-level failures onto the taxonomy the engines react to:
//! `Unavailable` and `Timeout` become per-item soft errors during a job,
//! `NotFound` means the remote entity does not exist, and `WriteRejected`
//! carries the remote's reason for refusing an update.
//!
//! ## Thread Safety
//!
//! All traits require `Send + Sync`; implementations are shared across
//! background job tasks behind `Arc`.

pub mod audit;
pub mod error;
pub mod grc;

pub use error::BridgeError;

// Re-export commonly used types
pub use audit::{AuditRecord, AuditSink, AuditStatus};
pub use grc::{GrcContentSource, GrcWriteSink, RemoteStatement};
