//! Statistics sinks: the append-only store the importer feeds.
//!
//! The [`StatisticsSink`] trait is the only side-effect boundary of the
//! import pipeline. It is deliberately narrow: append points, read back the
//! tail checkpoint. [`MemorySink`] backs tests and dry runs; [`JsonlSink`]
//! persists one append-only JSONL file per statistic id.

use std::collections::HashMap;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use calista_core::{CalistaError, Result};
use tokio::sync::Mutex;
use tracing::debug;

use crate::statistics::{StatisticMetadata, StatisticPoint, StatisticsCheckpoint};

// ── StatisticsSink ────────────────────────────────────────────────────────────

/// An append-only statistics store keyed by stable statistic identifier.
///
/// Implementations must deduplicate appends by `start` timestamp (replayed
/// ranges are dropped, not duplicated) and must surface checkpoint read
/// failures as errors — continuing an import against a wrong checkpoint
/// would silently corrupt cumulative sums.
#[async_trait]
pub trait StatisticsSink: Send + Sync {
    /// Append `points` (ascending by `start`) for `metadata.statistic_id`.
    async fn append(&self, metadata: &StatisticMetadata, points: &[StatisticPoint]) -> Result<()>;

    /// The checkpoint implied by the last stored point, or `None` when the
    /// statistic has never been written.
    async fn last(&self, statistic_id: &str) -> Result<Option<StatisticsCheckpoint>>;
}

// ── MemorySink ────────────────────────────────────────────────────────────────

/// In-process sink for tests and dry runs.
#[derive(Default)]
pub struct MemorySink {
    series: Mutex<HashMap<String, Vec<StatisticPoint>>>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// All stored points for a statistic id, in append order.
    pub async fn points(&self, statistic_id: &str) -> Vec<StatisticPoint> {
        self.series
            .lock()
            .await
            .get(statistic_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl StatisticsSink for MemorySink {
    async fn append(&self, metadata: &StatisticMetadata, points: &[StatisticPoint]) -> Result<()> {
        let mut series = self.series.lock().await;
        let stored = series.entry(metadata.statistic_id.clone()).or_default();

        for point in points {
            match stored.last() {
                Some(tail) if point.start <= tail.start => {
                    debug!(
                        statistic_id = %metadata.statistic_id,
                        start = %point.start,
                        "dropping duplicate statistic point"
                    );
                }
                _ => stored.push(point.clone()),
            }
        }
        Ok(())
    }

    async fn last(&self, statistic_id: &str) -> Result<Option<StatisticsCheckpoint>> {
        let series = self.series.lock().await;
        Ok(series
            .get(statistic_id)
            .and_then(|points| points.last())
            .map(StatisticsCheckpoint::from_point))
    }
}

// ── JsonlSink ─────────────────────────────────────────────────────────────────

/// Durable sink: one append-only `<statistic_id>.jsonl` file per metering
/// point under a data directory, one JSON point per line. `last()` scans to
/// the final line; appends at-or-before the stored tail are dropped.
pub struct JsonlSink {
    dir: PathBuf,
}

impl JsonlSink {
    /// Create the sink, creating `dir` (and parents) if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn file_path(&self, statistic_id: &str) -> PathBuf {
        // `:` is awkward in file names on some filesystems.
        let file_name = format!("{}.jsonl", statistic_id.replace(':', "_"));
        self.dir.join(file_name)
    }

    /// Read the final point of a statistic file.
    fn read_tail(path: &Path, statistic_id: &str) -> Result<Option<StatisticPoint>> {
        let file = match std::fs::File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(CalistaError::Checkpoint {
                    statistic_id: statistic_id.to_string(),
                    reason: err.to_string(),
                })
            }
        };

        let mut tail: Option<String> = None;
        for line in std::io::BufReader::new(file).lines() {
            let line = line.map_err(|err| CalistaError::Checkpoint {
                statistic_id: statistic_id.to_string(),
                reason: err.to_string(),
            })?;
            if !line.trim().is_empty() {
                tail = Some(line);
            }
        }

        match tail {
            None => Ok(None),
            Some(line) => serde_json::from_str::<StatisticPoint>(&line)
                .map(Some)
                .map_err(|err| CalistaError::Checkpoint {
                    statistic_id: statistic_id.to_string(),
                    reason: format!("corrupt tail record: {err}"),
                }),
        }
    }
}

#[async_trait]
impl StatisticsSink for JsonlSink {
    async fn append(&self, metadata: &StatisticMetadata, points: &[StatisticPoint]) -> Result<()> {
        let path = self.file_path(&metadata.statistic_id);
        let tail_start = Self::read_tail(&path, &metadata.statistic_id)?.map(|p| p.start);

        let fresh: Vec<&StatisticPoint> = points
            .iter()
            .filter(|point| tail_start.map_or(true, |tail| point.start > tail))
            .collect();
        if fresh.is_empty() {
            return Ok(());
        }

        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|err| CalistaError::Sink {
                statistic_id: metadata.statistic_id.clone(),
                reason: err.to_string(),
            })?;

        for point in &fresh {
            let line = serde_json::to_string(point)?;
            writeln!(file, "{line}").map_err(|err| CalistaError::Sink {
                statistic_id: metadata.statistic_id.clone(),
                reason: err.to_string(),
            })?;
        }

        debug!(
            statistic_id = %metadata.statistic_id,
            appended = fresh.len(),
            "persisted statistic points"
        );
        Ok(())
    }

    async fn last(&self, statistic_id: &str) -> Result<Option<StatisticsCheckpoint>> {
        let path = self.file_path(statistic_id);
        Ok(Self::read_tail(&path, statistic_id)?
            .as_ref()
            .map(StatisticsCheckpoint::from_point))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
