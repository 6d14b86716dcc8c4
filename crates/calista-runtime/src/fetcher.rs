//! The consumed fetch interface.

use async_trait::async_trait;
use calista_core::models::DeviceSet;
use calista_core::Result;
use chrono::NaiveDate;

/// Fetches the latest known readings per device for a date range.
///
/// Implementations fail with [`CalistaError::Auth`] when credentials are
/// rejected (fatal until re-authenticated), [`CalistaError::Connectivity`]
/// on network trouble and [`CalistaError::Data`] on malformed payloads;
/// the latter two are transient and the cycle is retried on the next tick.
///
/// [`CalistaError::Auth`]: calista_core::CalistaError::Auth
/// [`CalistaError::Connectivity`]: calista_core::CalistaError::Connectivity
/// [`CalistaError::Data`]: calista_core::CalistaError::Data
#[async_trait]
pub trait HistoryFetcher: Send + Sync {
    /// Return every device visible in the account, each with the readings
    /// the portal reports for `[start, end]`.
    async fn fetch(&self, start: NaiveDate, end: NaiveDate) -> Result<DeviceSet>;
}
