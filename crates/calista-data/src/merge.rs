//! Incremental history merge engine.
//!
//! Reconciles the previous device snapshot with a freshly fetched one into a
//! new canonical [`DeviceSet`]. The fetched side is authoritative for which
//! devices exist and for kind/location metadata; histories are unioned by
//! timestamp with the fetched side winning on collisions.

use std::cmp::Ordering;

use calista_core::models::{DeviceSet, Reading};
use tracing::{debug, info};

// ── Public types ──────────────────────────────────────────────────────────────

/// Counters describing what a merge changed, for cycle logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeSummary {
    /// Readings present in the fetched data at timestamps the previous
    /// snapshot did not know about.
    pub new_readings: usize,
    /// Devices discovered for the first time.
    pub new_devices: usize,
    /// Devices present previously but absent from the fetched data.
    pub removed_devices: usize,
}

/// Output of [`merge`]: the new snapshot plus change counters.
#[derive(Debug, Clone)]
pub struct MergeResult {
    /// The new canonical device snapshot.
    pub devices: DeviceSet,
    /// What changed relative to `previous`.
    pub summary: MergeSummary,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Merge a freshly fetched device map into the previously known one.
///
/// - A serial only in `fetched` is a newly discovered device; its history is
///   taken as-is.
/// - A serial in both keeps its accumulated history: the two histories are
///   unioned by timestamp in a single pass, entries from `fetched` replacing
///   entries from `previous` at the same timestamp. Kind and location are
///   refreshed from the fetched side.
/// - A serial only in `previous` is dropped; the remote account is
///   authoritative for device existence. Persisted statistics for dropped
///   devices are never touched here.
///
/// The caller decides what an empty `fetched` means (see the orchestrator's
/// empty-incremental-fetch guard); this function is pure union/override.
pub fn merge(previous: &DeviceSet, fetched: DeviceSet) -> MergeResult {
    let mut devices = DeviceSet::with_capacity(fetched.len());
    let mut summary = MergeSummary::default();

    for (serial, mut device) in fetched {
        device.history = normalize_history(std::mem::take(&mut device.history));

        match previous.get(&serial) {
            Some(existing) => {
                let (merged, new_count) = merge_histories(&existing.history, &device.history);
                if new_count > 0 {
                    debug!(serial = %serial, new_readings = new_count, "merged device history");
                }
                summary.new_readings += new_count;
                device.history = merged;
            }
            None => {
                info!(serial = %serial, readings = device.history.len(), "discovered new device");
                summary.new_devices += 1;
                summary.new_readings += device.history.len();
            }
        }

        devices.insert(serial, device);
    }

    summary.removed_devices = previous
        .keys()
        .filter(|serial| !devices.contains_key(*serial))
        .count();
    if summary.removed_devices > 0 {
        info!(
            removed = summary.removed_devices,
            "dropped devices no longer present in the account"
        );
    }

    MergeResult { devices, summary }
}

// ── Internal helpers ──────────────────────────────────────────────────────────

/// Single-pass union of two sorted histories.
///
/// `fetched` wins at equal timestamps. Returns the merged history plus the
/// number of fetched timestamps that were not present in `previous`.
fn merge_histories(previous: &[Reading], fetched: &[Reading]) -> (Vec<Reading>, usize) {
    let mut merged = Vec::with_capacity(previous.len() + fetched.len());
    let mut new_count = 0;
    let (mut i, mut j) = (0, 0);

    while i < previous.len() && j < fetched.len() {
        match previous[i].timestamp.cmp(&fetched[j].timestamp) {
            Ordering::Less => {
                merged.push(previous[i].clone());
                i += 1;
            }
            Ordering::Greater => {
                merged.push(fetched[j].clone());
                new_count += 1;
                j += 1;
            }
            Ordering::Equal => {
                merged.push(fetched[j].clone());
                i += 1;
                j += 1;
            }
        }
    }

    merged.extend(previous[i..].iter().cloned());
    new_count += fetched.len() - j;
    merged.extend(fetched[j..].iter().cloned());

    (merged, new_count)
}

/// Restore the sorted/unique-timestamp invariant on a history that may have
/// arrived unsorted or with duplicates. Upstream data is not under our
/// control, so violations are normalized rather than raised; the last entry
/// wins on duplicate timestamps.
fn normalize_history(history: Vec<Reading>) -> Vec<Reading> {
    let already_valid = history
        .windows(2)
        .all(|pair| pair[0].timestamp < pair[1].timestamp);
    if already_valid {
        return history;
    }

    let mut sorted = history;
    sorted.sort_by_key(|r| r.timestamp);

    let mut out: Vec<Reading> = Vec::with_capacity(sorted.len());
    for reading in sorted {
        match out.last_mut() {
            Some(last) if last.timestamp == reading.timestamp => *last = reading,
            _ => out.push(reading),
        }
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────
