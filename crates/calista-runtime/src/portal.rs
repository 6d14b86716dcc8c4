//! HTTP client for the Calista virtual-office portal.
//!
//! The portal has no JSON API; readings are obtained the way the web UI
//! does it: a form login that issues session cookies, a listing request
//! that primes the search for a date range, then a download of the listing
//! grid's CSV rendition, which is parsed into a [`DeviceSet`].

use std::collections::hash_map::Entry;

use async_trait::async_trait;
use calista_core::models::{Device, DeviceKind, DeviceSet, Reading};
use calista_core::{CalistaError, Result};
use chrono::{NaiveDate, NaiveTime};
use reqwest::{header, StatusCode};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::fetcher::HistoryFetcher;

// ── Constants ─────────────────────────────────────────────────────────────────

const DEFAULT_BASE_URL: &str = "https://oficina.ista.es";
const LOGIN_PATH: &str = "/GesCon/GestionOficinaVirtual.do";
const SEARCH_PATH: &str = "/GesCon/GestionLecturasBusqueda.do";
const EXPORT_PATH: &str = "/GesCon/GestionLecturas.do";

/// Query string selecting the CSV rendition of the readings grid.
const EXPORT_QUERY: &[(&str, &str)] = &[
    ("d-148657-e", "1"),
    ("metodo", "listadoLecturas"),
    ("6578706f7274", "1"),
];

const PORTAL_DATE_FORMAT: &str = "%d/%m/%Y";

// Export column indices (serial, type, location, reading id, date,
// incident, previous reading, current reading, consumption).
const COL_SERIAL: usize = 0;
const COL_TYPE: usize = 1;
const COL_LOCATION: usize = 2;
const COL_DATE: usize = 4;
const COL_CURRENT: usize = 7;

// ── PortalClient ──────────────────────────────────────────────────────────────

/// A logged-in session against the Calista portal.
///
/// Login is lazy: the first fetch (or any fetch after the session cookie was
/// invalidated) performs the login form post and captures the cookies the
/// portal issues.
pub struct PortalClient {
    base_url: String,
    email: String,
    password: String,
    client: reqwest::Client,
    /// `Cookie` header value for the current session, when logged in.
    session: Mutex<Option<String>>,
}

impl PortalClient {
    /// Create a client against the production portal.
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL, email, password)
    }

    /// Create a client against an alternative portal URL (used by tests).
    pub fn with_base_url(
        base_url: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|err| CalistaError::Connectivity(format!("failed to build HTTP client: {err}")))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            email: email.into(),
            password: password.into(),
            client,
            session: Mutex::new(None),
        })
    }

    // ── Session handling ──────────────────────────────────────────────────

    /// Post the login form and capture the session cookies.
    async fn login(&self) -> Result<String> {
        let url = format!("{}{}", self.base_url, LOGIN_PATH);
        debug!(email = %self.email, "logging in to portal");

        let response = self
            .client
            .post(&url)
            .form(&[
                ("metodo", "loginAbonado"),
                ("loginName", self.email.as_str()),
                ("password", self.password.as_str()),
            ])
            .send()
            .await
            .map_err(|err| CalistaError::Connectivity(format!("login request failed: {err}")))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(CalistaError::Auth("portal rejected the credentials".to_string()));
        }
        if !status.is_success() {
            return Err(CalistaError::Connectivity(format!(
                "login returned status {status}"
            )));
        }

        let cookies: Vec<String> = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| value.split(';').next())
            .map(|pair| pair.trim().to_string())
            .collect();

        if cookies.is_empty() {
            // The portal answers 200 with a re-rendered login page when the
            // credentials are wrong; no cookie means no session.
            return Err(CalistaError::Auth(
                "portal did not issue a session cookie".to_string(),
            ));
        }

        info!("portal login successful");
        Ok(cookies.join("; "))
    }

    /// Return the current session cookie, logging in if needed.
    async fn session_cookie(&self) -> Result<String> {
        let mut session = self.session.lock().await;
        if let Some(cookie) = session.as_ref() {
            return Ok(cookie.clone());
        }
        let cookie = self.login().await?;
        *session = Some(cookie.clone());
        Ok(cookie)
    }

    /// Drop the session so the next fetch logs in again.
    async fn invalidate_session(&self) {
        *self.session.lock().await = None;
    }

    // ── Readings download ─────────────────────────────────────────────────

    async fn download_export(&self, start: NaiveDate, end: NaiveDate) -> Result<String> {
        let cookie = self.session_cookie().await?;

        // Prime the listing search with the requested range; the export
        // endpoint renders whatever the session last searched for.
        let from = start.format(PORTAL_DATE_FORMAT).to_string();
        let until = end.format(PORTAL_DATE_FORMAT).to_string();
        let search_url = format!("{}{}", self.base_url, SEARCH_PATH);
        let search = self
            .client
            .get(&search_url)
            .query(&[
                ("metodo", "buscarLecturas"),
                ("fechaDesde", from.as_str()),
                ("fechaHasta", until.as_str()),
            ])
            .header(header::COOKIE, &cookie)
            .send()
            .await
            .map_err(|err| CalistaError::Connectivity(format!("search request failed: {err}")))?;
        self.check_status(search.status(), "search").await?;

        let export_url = format!("{}{}", self.base_url, EXPORT_PATH);
        let export = self
            .client
            .get(&export_url)
            .query(EXPORT_QUERY)
            .header(header::COOKIE, &cookie)
            .send()
            .await
            .map_err(|err| CalistaError::Connectivity(format!("export request failed: {err}")))?;
        self.check_status(export.status(), "export").await?;

        export
            .text()
            .await
            .map_err(|err| CalistaError::Connectivity(format!("export body read failed: {err}")))
    }

    async fn check_status(&self, status: StatusCode, what: &str) -> Result<()> {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            // Session expired; force a fresh login on the next fetch.
            self.invalidate_session().await;
            return Err(CalistaError::Auth(format!(
                "portal session rejected during {what}"
            )));
        }
        if !status.is_success() {
            return Err(CalistaError::Connectivity(format!(
                "{what} returned status {status}"
            )));
        }
        Ok(())
    }
}

// ── Export parsing ────────────────────────────────────────────────────────────

/// Parse the CSV rendition of the readings grid into a device map.
///
/// One row per reading. Rows with the `"-"` placeholder serial (grid footer)
/// are discarded, blank reading cells become `None` gaps, decimal commas are
/// tolerated, and rows outside `[start, end]` are ignored.
fn parse_export(body: &str, start: NaiveDate, end: NaiveDate) -> Result<DeviceSet> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(body.as_bytes());

    let mut devices = DeviceSet::new();

    for record in reader.records() {
        let record = record.map_err(|err| CalistaError::Data(format!("bad export row: {err}")))?;
        if record.len() <= COL_CURRENT {
            // Footer / summary rows are shorter than data rows.
            continue;
        }

        let serial = record.get(COL_SERIAL).unwrap_or("").trim();
        if serial.is_empty() || serial == "-" {
            continue;
        }

        let date_cell = record.get(COL_DATE).unwrap_or("").trim();
        let date = NaiveDate::parse_from_str(date_cell, PORTAL_DATE_FORMAT)
            .map_err(|err| CalistaError::Data(format!("bad reading date {date_cell:?}: {err}")))?;
        if date < start || date > end {
            continue;
        }

        let value_cell = record.get(COL_CURRENT).unwrap_or("").trim();
        let value = if value_cell.is_empty() || value_cell == "-" {
            None
        } else {
            let parsed = value_cell.replace(',', ".").parse::<f64>().map_err(|err| {
                CalistaError::Data(format!("bad reading value {value_cell:?}: {err}"))
            })?;
            Some(parsed)
        };

        let kind = DeviceKind::from_type_label(record.get(COL_TYPE).unwrap_or(""));
        let location = match record.get(COL_LOCATION).map(str::trim) {
            Some(cell) if !cell.is_empty() && cell != "-" => Some(cell.to_string()),
            _ => None,
        };

        let timestamp = date.and_time(NaiveTime::MIN).and_utc();
        match devices.entry(serial.to_string()) {
            Entry::Occupied(mut entry) => {
                let device = entry.get_mut();
                // Metadata from the latest row wins.
                device.kind = kind;
                device.location = location;
                device.add_reading(Reading::new(timestamp, value));
            }
            Entry::Vacant(entry) => {
                let mut device = Device::new(serial, kind, location);
                device.add_reading(Reading::new(timestamp, value));
                entry.insert(device);
            }
        }
    }

    Ok(devices)
}

// ── HistoryFetcher impl ───────────────────────────────────────────────────────

#[async_trait]
impl HistoryFetcher for PortalClient {
    async fn fetch(&self, start: NaiveDate, end: NaiveDate) -> Result<DeviceSet> {
        let body = self.download_export(start, end).await?;
        let devices = parse_export(&body, start, end)?;

        if devices.is_empty() {
            warn!(%start, %end, "portal export contained no device rows");
        } else {
            debug!(devices = devices.len(), %start, %end, "parsed portal export");
        }
        Ok(devices)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
