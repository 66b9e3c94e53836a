//! # Audit Emission
//!
//! Fire-and-forget delivery of [`AuditRecord`]s to the configured
//! [`AuditSink`].
//!
//! Audit failures must never fail the sync operation that produced the
//! record: delivery runs on a detached task and a sink error is logged
//! and dropped. Without a configured sink, emission is a no-op.

use bridge_traits::audit::{AuditRecord, AuditSink};
use std::sync::Arc;
use tracing::warn;

/// Hands audit records off to the external sink without blocking the caller.
#[derive(Clone, Default)]
pub struct AuditEmitter {
    sink: Option<Arc<dyn AuditSink>>,
}

impl AuditEmitter {
    /// Create an emitter delivering to the given sink.
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink: Some(sink) }
    }

    /// Create an emitter that discards all records.
    pub fn disabled() -> Self {
        Self { sink: None }
    }

    /// Emit one record.
    ///
    /// Returns immediately; delivery happens on a background task. Sink
    /// failures are logged at `warn` and otherwise ignored.
    pub fn record(&self, record: AuditRecord) {
        let Some(sink) = self.sink.clone() else {
            return;
        };

        tokio::spawn(async move {
            if let Err(e) = sink.record(record.clone()).await {
                warn!(
                    event_type = %record.event_type,
                    entity_id = %record.entity_id,
                    error = %e,
                    "Failed to deliver audit record"
                );
            }
        });
    }
}

impl std::fmt::Debug for AuditEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditEmitter")
            .field("enabled", &self.sink.is_some())
            .finish()
    }
}
