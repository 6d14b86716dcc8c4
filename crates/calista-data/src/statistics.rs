//! Statistics value types: emitted points, per-point metadata and the
//! persisted checkpoint that makes imports idempotent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── StatisticPoint ────────────────────────────────────────────────────────────

/// One emitted long-term statistics record.
///
/// `state` mirrors the raw (possibly reset) counter value at `start`;
/// `sum` is the monotonically non-decreasing running total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticPoint {
    /// Period start (the reading's timestamp).
    pub start: DateTime<Utc>,
    /// Raw counter value at this instant.
    pub state: f64,
    /// Running sum of consumption since the first import.
    pub sum: f64,
    /// When the counter last restarted from zero, if known.
    #[serde(default)]
    pub last_reset: Option<DateTime<Utc>>,
}

// ── StatisticMetadata ─────────────────────────────────────────────────────────

/// Descriptive metadata handed to the sink alongside every append.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatisticMetadata {
    /// Stable statistic identifier, e.g. `calista:12345_water`.
    pub statistic_id: String,
    /// Unit of measurement (passthrough from the device kind).
    pub unit: Option<String>,
    /// Human-readable name, e.g. `"Kitchen Hot Water"`.
    pub display_name: String,
}

// ── StatisticsCheckpoint ──────────────────────────────────────────────────────

/// The last persisted cumulative state for a metering point.
///
/// Read back from the sink before each import and never held in memory
/// across cycles; it is the sole source of idempotence. A default (empty)
/// checkpoint means the metering point has never been imported.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatisticsCheckpoint {
    /// Timestamp of the last processed reading; only readings strictly
    /// after this instant are imported.
    pub last_processed_end: Option<DateTime<Utc>>,
    /// Running sum as of the last emitted point.
    pub running_sum: f64,
    /// Raw counter value of the last emitted point.
    pub last_counter_state: Option<f64>,
    /// `last_reset` carried by the last emitted point.
    pub last_reset: Option<DateTime<Utc>>,
}

impl StatisticsCheckpoint {
    /// The checkpoint implied by an emitted point: the next cycle resumes
    /// from the tail of this cycle's output.
    pub fn from_point(point: &StatisticPoint) -> Self {
        Self {
            last_processed_end: Some(point.start),
            running_sum: point.sum,
            last_counter_state: Some(point.state),
            last_reset: point.last_reset,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
