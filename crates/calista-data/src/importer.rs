//! Cumulative statistics importer.
//!
//! Converts a device's merged reading history plus its persisted checkpoint
//! into an ordered sequence of new statistic points, detecting meter resets
//! and advancing the running sum. Pure computation; the caller persists the
//! output and the next cycle's checkpoint is implicitly the tail of it.

use calista_core::models::Reading;
use calista_core::util::round4;
use tracing::debug;

use crate::statistics::{StatisticPoint, StatisticsCheckpoint};

/// Derive new statistic points from `history` given the last persisted
/// `checkpoint`.
///
/// Only readings with a present value and a timestamp strictly after
/// `checkpoint.last_processed_end` participate; absent values are sensor
/// gaps and are skipped without touching the accumulation. When
/// `checkpoint.last_counter_state` is absent this is a genuine first import
/// and the first reading establishes the baseline, contributing zero to the
/// sum.
///
/// A counter value below its predecessor (strictly, with no tolerance band)
/// is a meter reset: the new value itself is the contribution and
/// `last_reset` moves to that reading's timestamp. The running sum is
/// rounded to 4 decimal digits after each accumulation and floored at zero.
///
/// Running the importer again with a checkpoint equal to the tail of a
/// previous run's output yields no new points.
pub fn import_statistics(
    history: &[Reading],
    checkpoint: &StatisticsCheckpoint,
) -> Vec<StatisticPoint> {
    let candidates: Vec<&Reading> = history
        .iter()
        .filter(|reading| reading.value.is_some())
        .filter(|reading| {
            checkpoint
                .last_processed_end
                .map_or(true, |end| reading.timestamp > end)
        })
        .collect();

    if candidates.is_empty() {
        return Vec::new();
    }

    let mut previous_value = checkpoint.last_counter_state;
    let mut running_sum = checkpoint.running_sum;
    let mut last_reset = checkpoint.last_reset.or(Some(candidates[0].timestamp));

    let mut points = Vec::with_capacity(candidates.len());

    for reading in candidates {
        let Some(value) = reading.value else {
            continue;
        };

        match previous_value {
            // First point of a genuine first import: establishes the
            // baseline, not an increase.
            None => {}
            Some(prev) => {
                let delta = value - prev;
                if delta < 0.0 {
                    debug!(
                        current = value,
                        previous = prev,
                        at = %reading.timestamp,
                        "meter reset detected"
                    );
                    running_sum += value;
                    last_reset = Some(reading.timestamp);
                } else {
                    running_sum += delta;
                }
            }
        }

        running_sum = round4(running_sum).max(0.0);

        points.push(StatisticPoint {
            start: reading.timestamp,
            state: value,
            sum: running_sum,
            last_reset,
        });

        previous_value = Some(value);
    }

    points
}

// ── Tests ─────────────────────────────────────────────────────────────────────
