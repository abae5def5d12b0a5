//! Background memory monitor daemon.

use super::state::{MemorySample, MemoryState, PressureLevel};
use crate::events::{EventSink, JobEvent};
use std::io;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Source of memory usage samples.
///
/// Abstracted so tests can inject synthetic pressure without touching the
/// real process footprint.
pub trait MemorySampler: Send + Sync {
    /// Returns the process memory currently in use, in megabytes.
    fn sample_used_mb(&self) -> io::Result<u64>;
}

/// Sampler reading resident set size from `/proc/self/status`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcStatusSampler;

impl MemorySampler for ProcStatusSampler {
    #[cfg(target_os = "linux")]
    fn sample_used_mb(&self) -> io::Result<u64> {
        let status = std::fs::read_to_string("/proc/self/status")?;
        for line in status.lines() {
            if let Some(rest) = line.strip_prefix("VmRSS:") {
                let kb: u64 = rest
                    .trim()
                    .trim_end_matches("kB")
                    .trim()
                    .parse()
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                return Ok(kb / 1024);
            }
        }
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            "VmRSS not found in /proc/self/status",
        ))
    }

    #[cfg(not(target_os = "linux"))]
    fn sample_used_mb(&self) -> io::Result<u64> {
        // No portable RSS source; report zero usage (pressure stays normal).
        Ok(0)
    }
}

/// Samples memory on an interval and broadcasts pressure transitions.
///
/// Single writer of the pressure `watch` channel; the resource pool holds
/// the receiving end and pauses/resumes intake on transitions.
pub struct MemoryMonitor {
    sampler: Box<dyn MemorySampler>,
    budget_mb: u64,
    interval: Duration,
    level_tx: watch::Sender<PressureLevel>,
    state: Mutex<MemoryState>,
    events: std::sync::Arc<dyn EventSink>,
}

impl MemoryMonitor {
    /// Creates a monitor using the `/proc` sampler.
    pub fn new(budget_mb: u64, interval: Duration, events: std::sync::Arc<dyn EventSink>) -> Self {
        Self::with_sampler(Box::new(ProcStatusSampler), budget_mb, interval, events)
    }

    /// Creates a monitor with a custom sampler.
    pub fn with_sampler(
        sampler: Box<dyn MemorySampler>,
        budget_mb: u64,
        interval: Duration,
        events: std::sync::Arc<dyn EventSink>,
    ) -> Self {
        let (level_tx, _) = watch::channel(PressureLevel::Normal);
        Self {
            sampler,
            budget_mb,
            interval,
            level_tx,
            state: Mutex::new(MemoryState::default()),
            events,
        }
    }

    /// Returns a receiver for pressure level transitions.
    pub fn subscribe(&self) -> watch::Receiver<PressureLevel> {
        self.level_tx.subscribe()
    }

    /// Returns the current pressure level.
    pub fn current_level(&self) -> PressureLevel {
        *self.level_tx.borrow()
    }

    /// Returns a copy of the current memory state.
    pub fn snapshot(&self) -> MemoryState {
        self.lock().clone()
    }

    /// Processes one usage observation.
    ///
    /// Split out from the sampling loop so tests can drive transitions
    /// deterministically.
    pub fn observe(&self, used_mb: u64) {
        let ratio = if self.budget_mb == 0 {
            0.0
        } else {
            used_mb as f64 / self.budget_mb as f64
        };
        let level = PressureLevel::from_ratio(ratio);

        let previous = {
            let mut state = self.lock();
            let previous = state.level;
            state.level = level;
            state.push_sample(MemorySample {
                used_mb,
                budget_mb: self.budget_mb,
                ratio,
                at: Instant::now(),
            });
            if level > previous && level >= PressureLevel::Critical {
                state.alerts_raised += 1;
            }
            previous
        };

        if level != previous {
            self.on_transition(previous, level, used_mb, ratio);
            // send_replace updates the value even with no subscribers yet.
            self.level_tx.send_replace(level);
        }
    }

    fn on_transition(&self, from: PressureLevel, to: PressureLevel, used_mb: u64, ratio: f64) {
        if to > from {
            match to {
                PressureLevel::Warning => {
                    debug!(used_mb, ratio, "Memory pressure rising");
                }
                PressureLevel::Critical | PressureLevel::Emergency => {
                    warn!(
                        used_mb,
                        budget_mb = self.budget_mb,
                        level = %to,
                        "Memory pressure {}",
                        to
                    );
                    self.events.emit(JobEvent::SystemAlert {
                        reason: format!(
                            "memory pressure {}: {}MB of {}MB budget in use",
                            to, used_mb, self.budget_mb
                        ),
                    });
                }
                PressureLevel::Normal => {}
            }
        } else if to == PressureLevel::Normal && from >= PressureLevel::Critical {
            info!(used_mb, "Memory pressure recovered");
            self.events.emit(JobEvent::SystemRecovery {
                reason: format!("memory pressure back to normal ({}MB in use)", used_mb),
            });
        }
    }

    /// Runs the sampling loop until cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            budget_mb = self.budget_mb,
            interval_ms = self.interval.as_millis() as u64,
            "Memory monitor started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    match self.sampler.sample_used_mb() {
                        Ok(used_mb) => self.observe(used_mb),
                        Err(e) => warn!(error = %e, "Memory sample failed"),
                    }
                }
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for MemoryMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryMonitor")
            .field("budget_mb", &self.budget_mb)
            .field("level", &self.current_level())
            .finish()
    }
}
