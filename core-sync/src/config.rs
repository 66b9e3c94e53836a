//! Sync engine configuration

/// Tuning knobs shared by the pull and push engines.
///
/// Per-call timeouts are not configured here: each remote collaborator
/// supplies its own bound via `call_timeout()`, and a breach is a per-item
/// soft error. The job timeout below is the outer safety net that turns a
/// wedged run into a `Failed` job.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Upper bound for an entire job run (seconds).
    pub job_timeout_secs: u64,

    /// Emit a progress event every N processed push statements.
    ///
    /// Pull jobs report once per system regardless. The final item always
    /// emits.
    pub progress_event_stride: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            job_timeout_secs: 3600, // 1 hour
            progress_event_stride: 10,
        }
    }
}

impl SyncConfig {
    /// Set the whole-job timeout
    pub fn job_timeout_secs(mut self, secs: u64) -> Self {
        self.job_timeout_secs = secs;
        self
    }

    /// Set the push progress event stride
    pub fn progress_event_stride(mut self, stride: u64) -> Self {
        self.progress_event_stride = stride.max(1);
        self
    }
}
