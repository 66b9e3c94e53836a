//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the statement sync core:
//! - Logging and tracing infrastructure
//! - Event bus system
//! - Audit record emission
//!
//! ## Overview
//!
//! This crate contains the runtime utilities the sync engine crates depend
//! on. It establishes the logging conventions, event broadcasting, and
//! fire-and-forget audit emission used throughout the system.

pub mod audit;
pub mod error;
pub mod events;
pub mod logging;

pub use audit::AuditEmitter;
pub use error::{Error, Result};
pub use events::{CoreEvent, EventBus, StatementEvent, SyncEvent};
