//! Memory pressure levels and the process-wide memory state.

use std::collections::VecDeque;
use std::time::Instant;

/// Usage ratio at which pressure becomes `Warning`.
///
/// This is also the resume threshold: intake paused at emergency resumes
/// only once usage drops back below this ratio (i.e. to `Normal`).
pub const WARNING_RATIO: f64 = 0.70;

/// Usage ratio at which pressure becomes `Critical`.
pub const CRITICAL_RATIO: f64 = 0.80;

/// Usage ratio at which pressure becomes `Emergency` and intake pauses.
pub const EMERGENCY_RATIO: f64 = 0.90;

/// Trailing samples retained for diagnostics.
pub const MAX_SAMPLE_HISTORY: usize = 60;

/// Memory pressure classification.
///
/// Ordered by severity so transitions can be compared directly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PressureLevel {
    /// Usage below the warning ratio.
    Normal,
    /// Usage between the warning and critical ratios.
    Warning,
    /// Usage between the critical and emergency ratios.
    Critical,
    /// Usage at or above the emergency ratio; no new admissions.
    Emergency,
}

impl PressureLevel {
    /// Classifies a usage ratio (used / budget) into a pressure level.
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio >= EMERGENCY_RATIO {
            Self::Emergency
        } else if ratio >= CRITICAL_RATIO {
            Self::Critical
        } else if ratio >= WARNING_RATIO {
            Self::Warning
        } else {
            Self::Normal
        }
    }

    /// Returns a string representation of the level.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Emergency => "emergency",
        }
    }
}

impl std::fmt::Display for PressureLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One memory usage observation.
#[derive(Clone, Copy, Debug)]
pub struct MemorySample {
    /// Process memory in use, in megabytes.
    pub used_mb: u64,
    /// Configured budget, in megabytes.
    pub budget_mb: u64,
    /// Usage ratio (used / budget).
    pub ratio: f64,
    /// When the sample was taken.
    pub at: Instant,
}

/// Process-wide memory state: current level, trailing history, alert count.
///
/// Reset only on process restart.
#[derive(Clone, Debug)]
pub struct MemoryState {
    /// Current pressure level.
    pub level: PressureLevel,
    /// Trailing samples, newest last.
    pub history: VecDeque<MemorySample>,
    /// Alerts raised since startup.
    pub alerts_raised: u64,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            level: PressureLevel::Normal,
            history: VecDeque::with_capacity(MAX_SAMPLE_HISTORY),
            alerts_raised: 0,
        }
    }
}

impl MemoryState {
    /// Records a sample, trimming history to [`MAX_SAMPLE_HISTORY`].
    pub fn push_sample(&mut self, sample: MemorySample) {
        if self.history.len() == MAX_SAMPLE_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(sample);
    }

    /// Returns the most recent sample, if any.
    pub fn latest(&self) -> Option<&MemorySample> {
        self.history.back()
    }
}
