//! Ingestion cycle orchestrator.
//!
//! Drives serialized fetch → merge → import cycles in a tokio task, sending
//! per-cycle [`CycleOutcome`] summaries through an `mpsc` channel so callers
//! can observe progress without sharing mutable state. The first cycle uses
//! the wide backfill window; later cycles fetch a bounded trailing window to
//! catch delayed server-side reporting.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use calista_core::models::{DeviceSet, Reading};
use calista_core::util::statistic_id;
use calista_core::{CalistaError, Result};
use calista_data::importer::import_statistics;
use calista_data::merge::merge;
use calista_data::sink::StatisticsSink;
use calista_data::statistics::StatisticMetadata;
use chrono::{NaiveDate, Utc};
use tokio::sync::{mpsc, Mutex};
use tokio::time;
use tracing::{debug, info, warn};

use crate::fetcher::HistoryFetcher;

// ── Constants ─────────────────────────────────────────────────────────────────

/// Bounded wait for a metering point's import lock; on timeout the point is
/// skipped for the cycle and retried on the next one.
const IMPORT_LOCK_WAIT: Duration = Duration::from_secs(10);

// ── Public types ──────────────────────────────────────────────────────────────

/// Scheduling parameters for the ingestion loop.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Backfill start date; no fetch window ever begins before this.
    pub offset_date: NaiveDate,
    /// Trailing window, in days, for incremental cycles.
    pub window_days: u32,
    /// Time between cycles.
    pub update_interval: Duration,
}

/// What a single completed cycle did.
#[derive(Debug, Clone)]
pub struct CycleSummary {
    /// Fetch window used for this cycle.
    pub window: (NaiveDate, NaiveDate),
    /// Devices in the snapshot after the merge.
    pub devices: usize,
    /// Newly discovered devices.
    pub new_devices: usize,
    /// Readings not previously known.
    pub new_readings: usize,
    /// Devices dropped because the account no longer lists them.
    pub removed_devices: usize,
    /// Statistic points appended to the sink.
    pub imported_points: usize,
    /// Metering points skipped this cycle (lock timeout, checkpoint or
    /// append failure); retried next cycle.
    pub skipped_points: usize,
}

/// One entry on the outcome channel: a finished cycle or a failed one.
#[derive(Debug, Clone)]
pub struct CycleOutcome {
    /// Summary of the cycle, when it ran to completion.
    pub summary: Option<CycleSummary>,
    /// Error message, when the cycle failed.
    pub error: Option<String>,
    /// `true` when the loop stopped because of the error (authentication);
    /// transient failures leave the loop running.
    pub fatal: bool,
}

// ── IngestOrchestrator ────────────────────────────────────────────────────────

/// Background ingestion coordinator.
///
/// Call [`IngestOrchestrator::start`] to spin the cycle loop up in a
/// dedicated tokio task, or [`IngestOrchestrator::run_cycle`] directly for
/// one-shot operation.
pub struct IngestOrchestrator {
    fetcher: Arc<dyn HistoryFetcher>,
    sink: Arc<dyn StatisticsSink>,
    config: IngestConfig,
    /// Device snapshot, replaced wholesale by each cycle. Holding this lock
    /// for the length of a cycle is the mutual-exclusion gate that keeps
    /// cycles serialized.
    devices: Mutex<DeviceSet>,
    /// Per-metering-point import locks, keyed by statistic id.
    import_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IngestOrchestrator {
    /// Create a new orchestrator over the given collaborators.
    pub fn new(
        fetcher: Arc<dyn HistoryFetcher>,
        sink: Arc<dyn StatisticsSink>,
        config: IngestConfig,
    ) -> Self {
        Self {
            fetcher,
            sink,
            config,
            devices: Mutex::new(DeviceSet::new()),
            import_locks: Mutex::new(HashMap::new()),
        }
    }

    // ── Public API ────────────────────────────────────────────────────────

    /// Clone of the current device snapshot, for presentation layers.
    pub async fn snapshot(&self) -> DeviceSet {
        self.devices.lock().await.clone()
    }

    /// Run one full fetch → merge → import cycle.
    ///
    /// On fetch failure the previous snapshot and all checkpoints are left
    /// untouched and the error is returned; nothing is merged or imported
    /// from partial data.
    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        // Cycle gate: one ingestion cycle at a time per account.
        let mut devices = self.devices.lock().await;

        let initial = devices.is_empty();
        let today = Utc::now().date_naive();
        let start = if initial {
            self.config.offset_date
        } else {
            let trailing = today - chrono::Duration::days(i64::from(self.config.window_days));
            trailing.max(self.config.offset_date)
        };
        debug!(%start, %today, initial, "starting ingestion cycle");

        let fetched = self.fetcher.fetch(start, today).await?;

        if fetched.is_empty() {
            if initial {
                warn!("no devices found during initial fetch; account may be new");
            } else {
                // A transient empty response during an incremental window
                // must not erase accumulated history.
                warn!("incremental fetch returned no devices; keeping previous snapshot");
            }
            return Ok(CycleSummary {
                window: (start, today),
                devices: devices.len(),
                new_devices: 0,
                new_readings: 0,
                removed_devices: 0,
                imported_points: 0,
                skipped_points: 0,
            });
        }

        let merged = merge(&devices, fetched);
        *devices = merged.devices;

        let (imported_points, skipped_points) = self.import_all(&devices).await;

        let summary = CycleSummary {
            window: (start, today),
            devices: devices.len(),
            new_devices: merged.summary.new_devices,
            new_readings: merged.summary.new_readings,
            removed_devices: merged.summary.removed_devices,
            imported_points,
            skipped_points,
        };
        info!(
            devices = summary.devices,
            new_readings = summary.new_readings,
            imported_points = summary.imported_points,
            skipped_points = summary.skipped_points,
            "ingestion cycle complete"
        );
        Ok(summary)
    }

    /// Start the ingestion loop.
    ///
    /// Runs an immediate cycle, then repeats on `update_interval`. Returns
    /// the outcome channel and a handle that aborts the loop. The loop ends
    /// on its own after an authentication failure (fresh credentials are
    /// required) or when the receiver is dropped.
    pub fn start(self) -> (mpsc::Receiver<CycleOutcome>, IngestHandle) {
        let (tx, rx) = mpsc::channel(16);
        let interval = self.config.update_interval;

        let handle = tokio::spawn(async move {
            self.ingest_loop(tx, interval).await;
        });

        (rx, IngestHandle { handle })
    }

    // ── Private implementation ────────────────────────────────────────────

    async fn ingest_loop(self, tx: mpsc::Sender<CycleOutcome>, interval: Duration) {
        let mut ticker = time::interval(interval);
        // The first tick fires immediately; use it for the initial cycle.
        ticker.tick().await;

        loop {
            let outcome = match self.run_cycle().await {
                Ok(summary) => CycleOutcome {
                    summary: Some(summary),
                    error: None,
                    fatal: false,
                },
                Err(err) => {
                    let fatal = matches!(err, CalistaError::Auth(_));
                    if fatal {
                        warn!(error = %err, "authentication failed; stopping ingestion loop");
                    } else {
                        warn!(error = %err, "cycle failed; previous state kept, retrying next tick");
                    }
                    CycleOutcome {
                        summary: None,
                        error: Some(err.to_string()),
                        fatal,
                    }
                }
            };

            let fatal = outcome.fatal;
            if tx.send(outcome).await.is_err() {
                debug!("outcome channel closed; exiting ingestion loop");
                break;
            }
            if fatal {
                break;
            }

            ticker.tick().await;
            if tx.is_closed() {
                debug!("outcome channel closed; exiting ingestion loop");
                break;
            }
        }
    }

    /// Import statistics for every eligible metering point in the snapshot.
    ///
    /// Imports run concurrently across metering points; each point's
    /// checkpoint-read-then-append span is guarded by its own lock.
    /// Returns `(imported_points, skipped_points)`.
    async fn import_all(&self, devices: &DeviceSet) -> (usize, usize) {
        let mut tasks = Vec::new();

        for device in devices.values() {
            if !device.kind.generates_statistics() {
                debug!(serial = %device.serial, "kind not statistics-eligible; skipping");
                continue;
            }

            let id = statistic_id(&device.serial, device.kind.key());
            let metadata = StatisticMetadata {
                statistic_id: id.clone(),
                unit: device.kind.unit().map(str::to_string),
                display_name: format!("{} {}", device.display_name(), device.kind.display_label()),
            };
            let history = device.history.clone();
            let sink = Arc::clone(&self.sink);
            let lock = self.import_lock(&id).await;

            tasks.push(tokio::spawn(async move {
                import_metering_point(id, metadata, history, sink, lock).await
            }));
        }

        let mut imported = 0;
        let mut skipped = 0;
        for task in tasks {
            match task.await {
                Ok(Ok(points)) => imported += points,
                Ok(Err(err)) => {
                    warn!(error = %err, "metering point import skipped");
                    skipped += 1;
                }
                Err(err) => {
                    warn!(error = %err, "metering point import task failed");
                    skipped += 1;
                }
            }
        }
        (imported, skipped)
    }

    async fn import_lock(&self, statistic_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.import_locks.lock().await;
        Arc::clone(
            locks
                .entry(statistic_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }
}

/// Import one metering point: checkpoint read, derivation, sink append,
/// all under the point's lock with a bounded wait.
async fn import_metering_point(
    statistic_id: String,
    metadata: StatisticMetadata,
    history: Vec<Reading>,
    sink: Arc<dyn StatisticsSink>,
    lock: Arc<Mutex<()>>,
) -> Result<usize> {
    let _guard = time::timeout(IMPORT_LOCK_WAIT, lock.lock())
        .await
        .map_err(|_| CalistaError::LockTimeout(statistic_id.clone()))?;

    let checkpoint = sink.last(&statistic_id).await?.unwrap_or_default();
    let points = import_statistics(&history, &checkpoint);
    if points.is_empty() {
        debug!(statistic_id = %statistic_id, "no new readings to import");
        return Ok(0);
    }

    sink.append(&metadata, &points).await?;
    info!(
        statistic_id = %statistic_id,
        points = points.len(),
        "imported statistics"
    );
    Ok(points.len())
}

// ── IngestHandle ──────────────────────────────────────────────────────────────

/// A handle to the background ingestion task.
///
/// Aborting mid-cycle is safe: appends already committed to the sink stand,
/// and the next run re-derives from whatever checkpoints the sink reflects.
pub struct IngestHandle {
    handle: tokio::task::JoinHandle<()>,
}

impl IngestHandle {
    /// Immediately abort the ingestion loop.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use calista_core::models::{Device, DeviceKind, Reading};
    use calista_data::sink::MemorySink;
    use chrono::TimeZone;
    use std::collections::VecDeque;

    // ── helpers ───────────────────────────────────────────────────────────

    /// Fetcher returning queued responses and recording requested windows.
    struct MockFetcher {
        responses: Mutex<VecDeque<Result<DeviceSet>>>,
        windows: Mutex<Vec<(NaiveDate, NaiveDate)>>,
    }

    impl MockFetcher {
        fn new(responses: Vec<Result<DeviceSet>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                windows: Mutex::new(Vec::new()),
            })
        }

        async fn windows(&self) -> Vec<(NaiveDate, NaiveDate)> {
            self.windows.lock().await.clone()
        }
    }

    #[async_trait]
    impl HistoryFetcher for MockFetcher {
        async fn fetch(&self, start: NaiveDate, end: NaiveDate) -> Result<DeviceSet> {
            self.windows.lock().await.push((start, end));
            self.responses
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Ok(DeviceSet::new()))
        }
    }

    fn ts(day: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()
    }

    fn water_device(serial: &str, readings: &[(u32, f64)]) -> Device {
        let mut device = Device::new(serial, DeviceKind::ColdWater, None);
        for &(day, value) in readings {
            device.add_reading(Reading::new(ts(day), Some(value)));
        }
        device
    }

    fn set(devices: Vec<Device>) -> DeviceSet {
        devices.into_iter().map(|d| (d.serial.clone(), d)).collect()
    }

    fn config() -> IngestConfig {
        IngestConfig {
            offset_date: Utc::now().date_naive() - chrono::Duration::days(365),
            window_days: 30,
            update_interval: Duration::from_secs(3600),
        }
    }

    fn orchestrator(
        fetcher: Arc<MockFetcher>,
        sink: Arc<MemorySink>,
    ) -> IngestOrchestrator {
        IngestOrchestrator::new(fetcher, sink, config())
    }

    // ── run_cycle ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_initial_cycle_imports_statistics() {
        let fetcher = MockFetcher::new(vec![Ok(set(vec![water_device(
            "100",
            &[(1, 1000.0), (2, 1050.5)],
        )]))]);
        let sink = Arc::new(MemorySink::new());
        let orch = orchestrator(Arc::clone(&fetcher), Arc::clone(&sink));

        let summary = orch.run_cycle().await.unwrap();

        assert_eq!(summary.devices, 1);
        assert_eq!(summary.new_devices, 1);
        assert_eq!(summary.new_readings, 2);
        assert_eq!(summary.imported_points, 2);
        assert_eq!(summary.skipped_points, 0);

        let points = sink.points("calista:100_water").await;
        let sums: Vec<f64> = points.iter().map(|p| p.sum).collect();
        assert_eq!(sums, vec![0.0, 50.5]);
    }

    #[tokio::test]
    async fn test_second_cycle_is_idempotent() {
        let data = set(vec![water_device("100", &[(1, 1000.0), (2, 1050.5)])]);
        let fetcher = MockFetcher::new(vec![Ok(data.clone()), Ok(data)]);
        let sink = Arc::new(MemorySink::new());
        let orch = orchestrator(fetcher, Arc::clone(&sink));

        orch.run_cycle().await.unwrap();
        let second = orch.run_cycle().await.unwrap();

        assert_eq!(second.imported_points, 0);
        assert_eq!(sink.points("calista:100_water").await.len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_preserves_snapshot() {
        let fetcher = MockFetcher::new(vec![
            Ok(set(vec![water_device("100", &[(1, 10.0)])])),
            Err(CalistaError::Connectivity("connection reset".into())),
        ]);
        let sink = Arc::new(MemorySink::new());
        let orch = orchestrator(fetcher, sink);

        orch.run_cycle().await.unwrap();
        let err = orch.run_cycle().await.unwrap_err();

        assert!(err.is_transient());
        assert_eq!(orch.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_incremental_fetch_keeps_devices() {
        let fetcher = MockFetcher::new(vec![
            Ok(set(vec![water_device("100", &[(1, 10.0)])])),
            Ok(DeviceSet::new()),
        ]);
        let sink = Arc::new(MemorySink::new());
        let orch = orchestrator(fetcher, sink);

        orch.run_cycle().await.unwrap();
        let second = orch.run_cycle().await.unwrap();

        assert_eq!(second.devices, 1);
        assert_eq!(orch.snapshot().await.len(), 1);
    }

    #[tokio::test]
    async fn test_generic_devices_generate_no_statistics() {
        let mut generic = Device::new("999", DeviceKind::Generic, None);
        generic.add_reading(Reading::new(ts(1), Some(5.0)));

        let fetcher = MockFetcher::new(vec![Ok(set(vec![generic]))]);
        let sink = Arc::new(MemorySink::new());
        let orch = orchestrator(fetcher, Arc::clone(&sink));

        let summary = orch.run_cycle().await.unwrap();

        assert_eq!(summary.imported_points, 0);
        assert!(sink.points("calista:999_generic").await.is_empty());
    }

    #[tokio::test]
    async fn test_windows_backfill_then_trailing() {
        let data = set(vec![water_device("100", &[(1, 10.0)])]);
        let fetcher = MockFetcher::new(vec![Ok(data.clone()), Ok(data)]);
        let sink = Arc::new(MemorySink::new());
        let orch = orchestrator(Arc::clone(&fetcher), sink);

        orch.run_cycle().await.unwrap();
        orch.run_cycle().await.unwrap();

        let windows = fetcher.windows().await;
        let today = Utc::now().date_naive();
        assert_eq!(windows[0].0, today - chrono::Duration::days(365));
        assert_eq!(windows[1].0, today - chrono::Duration::days(30));
        assert_eq!(windows[1].1, today);
    }

    #[tokio::test]
    async fn test_device_removal_keeps_sink_data() {
        let fetcher = MockFetcher::new(vec![
            Ok(set(vec![
                water_device("100", &[(1, 10.0)]),
                water_device("200", &[(1, 20.0)]),
            ])),
            Ok(set(vec![water_device("100", &[(2, 11.0)])])),
        ]);
        let sink = Arc::new(MemorySink::new());
        let orch = orchestrator(fetcher, Arc::clone(&sink));

        orch.run_cycle().await.unwrap();
        let second = orch.run_cycle().await.unwrap();

        assert_eq!(second.removed_devices, 1);
        assert!(!orch.snapshot().await.contains_key("200"));
        // The dropped device's persisted statistics are untouched.
        assert_eq!(sink.points("calista:200_water").await.len(), 1);
    }

    // ── start / loop ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_start_delivers_initial_outcome() {
        let fetcher = MockFetcher::new(vec![Ok(set(vec![water_device(
            "100",
            &[(1, 10.0)],
        )]))]);
        let sink = Arc::new(MemorySink::new());
        let orch = orchestrator(fetcher, sink);

        let (mut rx, handle) = orch.start();

        let outcome = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for outcome")
            .expect("channel closed before first outcome");

        let summary = outcome.summary.expect("first cycle should succeed");
        assert_eq!(summary.devices, 1);
        assert!(!outcome.fatal);

        handle.abort();
    }

    #[tokio::test]
    async fn test_auth_failure_stops_loop() {
        let fetcher = MockFetcher::new(vec![Err(CalistaError::Auth("bad credentials".into()))]);
        let sink = Arc::new(MemorySink::new());
        let orch = orchestrator(fetcher, sink);

        let (mut rx, _handle) = orch.start();

        let outcome = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed");
        assert!(outcome.fatal);
        assert!(outcome.error.unwrap().contains("Authentication failed"));

        // Loop exits after the fatal outcome; the channel closes.
        let next = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for close");
        assert!(next.is_none());
    }
}
