//! Job lifecycle events for the notification channel.
//!
//! Orchestrator components emit typed events via a sink abstraction. The
//! scheduler doesn't know how events are consumed—this follows the "emit,
//! don't present" pattern: the real-time notification channel, metrics, and
//! dashboards all hang off sink implementations supplied by the embedder.
//!
//! Events are fire-and-forget: no acknowledgment is required and a slow sink
//! must not block scheduling decisions.
//!
//! # Example
//!
//! ```ignore
//! use docstream::events::{EventSink, JobEvent};
//!
//! struct WebsocketSink { /* ... */ }
//!
//! impl EventSink for WebsocketSink {
//!     fn emit(&self, event: JobEvent) {
//!         // push to the caller's channel, keyed by owner_id
//!     }
//! }
//! ```

use crate::job::JobId;
use crate::queue::Tier;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Events
// =============================================================================

/// Events emitted during job scheduling and execution.
///
/// Job-scoped events carry the submitting caller's `owner_id` so consumers
/// can route them. `SystemAlert`/`SystemRecovery` are broadcast-style and
/// carry no owner.
#[derive(Clone, Debug)]
pub enum JobEvent {
    // -------------------------------------------------------------------------
    // Job Lifecycle Events
    // -------------------------------------------------------------------------
    /// A job entered its tier backlog.
    JobQueued {
        job_id: JobId,
        owner_id: String,
        tier: Tier,
    },

    /// A job began executing on a worker.
    JobStarted {
        job_id: JobId,
        owner_id: String,
        worker_id: String,
    },

    /// Progress note for a still-active job (including retries in flight:
    /// a retrying job surfaces as stalled progress, never as failure).
    JobProgress {
        job_id: JobId,
        owner_id: String,
        note: String,
    },

    /// A job finished successfully.
    JobCompleted {
        job_id: JobId,
        owner_id: String,
        duration: Duration,
    },

    /// A job exhausted its retry budget; this is terminal.
    JobFailed {
        job_id: JobId,
        owner_id: String,
        reason: String,
        retry_count: u32,
    },

    // -------------------------------------------------------------------------
    // System Events (broadcast)
    // -------------------------------------------------------------------------
    /// The system degraded (memory pressure, worker loss).
    SystemAlert { reason: String },

    /// The system returned to normal operation.
    SystemRecovery { reason: String },
}

impl JobEvent {
    /// Returns the job ID associated with this event, if any.
    pub fn job_id(&self) -> Option<&JobId> {
        match self {
            Self::JobQueued { job_id, .. }
            | Self::JobStarted { job_id, .. }
            | Self::JobProgress { job_id, .. }
            | Self::JobCompleted { job_id, .. }
            | Self::JobFailed { job_id, .. } => Some(job_id),
            Self::SystemAlert { .. } | Self::SystemRecovery { .. } => None,
        }
    }

    /// Returns the owner this event should be routed to, if any.
    pub fn owner_id(&self) -> Option<&str> {
        match self {
            Self::JobQueued { owner_id, .. }
            | Self::JobStarted { owner_id, .. }
            | Self::JobProgress { owner_id, .. }
            | Self::JobCompleted { owner_id, .. }
            | Self::JobFailed { owner_id, .. } => Some(owner_id),
            Self::SystemAlert { .. } | Self::SystemRecovery { .. } => None,
        }
    }

    /// Returns a short name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::JobQueued { .. } => "job-queued",
            Self::JobStarted { .. } => "job-started",
            Self::JobProgress { .. } => "job-progress",
            Self::JobCompleted { .. } => "job-completed",
            Self::JobFailed { .. } => "job-failed",
            Self::SystemAlert { .. } => "system-alert",
            Self::SystemRecovery { .. } => "system-recovery",
        }
    }
}

// =============================================================================
// Event Sink Trait
// =============================================================================

/// Sink for job lifecycle events.
///
/// Implement this trait to receive events from the orchestrator. Common
/// implementations include the real-time notification channel, metrics
/// collection, and logging.
///
/// # Thread Safety
///
/// Implementations must be thread-safe (`Send + Sync`) as events may be
/// emitted from multiple tasks concurrently.
pub trait EventSink: Send + Sync {
    /// Called when an event occurs.
    ///
    /// This method should be fast and non-blocking. For expensive operations
    /// (e.g., network calls), buffer events or hand off to a channel.
    fn emit(&self, event: JobEvent);
}

// =============================================================================
// Built-in Sink Implementations
// =============================================================================

/// No-op sink for when notifications are disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _event: JobEvent) {
        // Intentionally empty
    }
}

/// Sink that logs events using the `tracing` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: JobEvent) {
        match &event {
            JobEvent::JobQueued {
                job_id,
                owner_id,
                tier,
            } => {
                tracing::debug!(
                    job_id = %job_id,
                    owner = %owner_id,
                    tier = %tier,
                    "Job queued"
                );
            }
            JobEvent::JobStarted {
                job_id,
                owner_id,
                worker_id,
            } => {
                tracing::debug!(
                    job_id = %job_id,
                    owner = %owner_id,
                    worker = %worker_id,
                    "Job started"
                );
            }
            JobEvent::JobProgress {
                job_id,
                owner_id,
                note,
            } => {
                tracing::trace!(
                    job_id = %job_id,
                    owner = %owner_id,
                    note = %note,
                    "Job progress"
                );
            }
            JobEvent::JobCompleted {
                job_id,
                owner_id,
                duration,
            } => {
                tracing::debug!(
                    job_id = %job_id,
                    owner = %owner_id,
                    duration_ms = duration.as_millis(),
                    "Job completed"
                );
            }
            JobEvent::JobFailed {
                job_id,
                owner_id,
                reason,
                retry_count,
            } => {
                tracing::warn!(
                    job_id = %job_id,
                    owner = %owner_id,
                    reason = %reason,
                    retry_count = retry_count,
                    "Job permanently failed"
                );
            }
            JobEvent::SystemAlert { reason } => {
                tracing::warn!(reason = %reason, "System alert");
            }
            JobEvent::SystemRecovery { reason } => {
                tracing::info!(reason = %reason, "System recovery");
            }
        }
    }
}

/// Sink that forwards events to multiple sinks.
pub struct MultiplexEventSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl MultiplexEventSink {
    /// Creates a new multiplex sink with the given sinks.
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    /// Adds a sink to the multiplex.
    pub fn add_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }
}

impl EventSink for MultiplexEventSink {
    fn emit(&self, event: JobEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

impl std::fmt::Debug for MultiplexEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiplexEventSink")
            .field("sink_count", &self.sinks.len())
            .finish()
    }
}
