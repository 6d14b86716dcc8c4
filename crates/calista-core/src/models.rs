use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Reading ───────────────────────────────────────────────────────────────────

/// A single timestamped meter reading.
///
/// `value` is the raw cumulative counter value reported by the meter.
/// `None` marks a gap where the portal listed a reading row without a value;
/// gaps are kept in the history (they carry the timestamp) but are skipped by
/// the statistics importer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// UTC timestamp of the reading.
    pub timestamp: DateTime<Utc>,
    /// Cumulative counter value, or `None` for a sensor gap.
    pub value: Option<f64>,
}

impl Reading {
    /// Convenience constructor.
    pub fn new(timestamp: DateTime<Utc>, value: Option<f64>) -> Self {
        Self { timestamp, value }
    }
}

// ── DeviceKind ────────────────────────────────────────────────────────────────

/// The metering kind of a device.
///
/// A closed set of variants with a small lookup table per kind (unit,
/// statistics eligibility, model name) instead of one type per meter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Cold water volume meter.
    ColdWater,
    /// Hot water volume meter.
    HotWater,
    /// Heating energy meter (heat cost allocator or distributor).
    Heating,
    /// Unrecognised meter type; excluded from statistics generation.
    Generic,
}

impl DeviceKind {
    /// Stable key used in statistic identifiers and entity names.
    pub fn key(self) -> &'static str {
        match self {
            DeviceKind::ColdWater => "water",
            DeviceKind::HotWater => "hot_water",
            DeviceKind::Heating => "heating",
            DeviceKind::Generic => "generic",
        }
    }

    /// Unit of measurement reported to the statistics sink (passthrough,
    /// no conversion).
    pub fn unit(self) -> Option<&'static str> {
        match self {
            DeviceKind::ColdWater | DeviceKind::HotWater => Some("L"),
            DeviceKind::Heating => Some("kWh"),
            DeviceKind::Generic => None,
        }
    }

    /// Whether long-term statistics are generated for this kind.
    pub fn generates_statistics(self) -> bool {
        !matches!(self, DeviceKind::Generic)
    }

    /// Human-readable meter model name.
    pub fn model_name(self) -> &'static str {
        match self {
            DeviceKind::ColdWater => "Cold Water Meter",
            DeviceKind::HotWater => "Hot Water Meter",
            DeviceKind::Heating => "Heating Meter",
            DeviceKind::Generic => "Generic Meter",
        }
    }

    /// Display label used in statistic names, e.g. `"Hot Water"`.
    pub fn display_label(self) -> &'static str {
        match self {
            DeviceKind::ColdWater => "Water",
            DeviceKind::HotWater => "Hot Water",
            DeviceKind::Heating => "Heating",
            DeviceKind::Generic => "Meter",
        }
    }

    /// Classify a device from the portal's equipment-type column.
    ///
    /// The portal reports Spanish labels such as "Radio agua fría",
    /// "Radio agua caliente" or "Distribuidor de costes de calefacción".
    /// Matching is case-insensitive substring matching; anything
    /// unrecognised becomes [`DeviceKind::Generic`].
    pub fn from_type_label(label: &str) -> Self {
        let lower = label.to_lowercase();

        if lower.contains("caliente") {
            return DeviceKind::HotWater;
        }
        if lower.contains("fría") || lower.contains("fria") || lower.contains("agua") {
            return DeviceKind::ColdWater;
        }
        if lower.contains("calefacci") || lower.contains("distribuidor") {
            return DeviceKind::Heating;
        }

        DeviceKind::Generic
    }
}

// ── Device ────────────────────────────────────────────────────────────────────

/// A metering device with its accumulated reading history.
///
/// Identity is the `serial`; `kind` and `location` are refreshed from every
/// fetch, while `history` is cumulative and merge-only. Invariant: `history`
/// is sorted strictly ascending by timestamp with unique timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Stable serial number identifying the meter.
    pub serial: String,
    /// Metering kind of this device.
    pub kind: DeviceKind,
    /// Installation location reported by the portal, if any.
    #[serde(default)]
    pub location: Option<String>,
    /// Readings in ascending timestamp order, unique per timestamp.
    #[serde(default)]
    pub history: Vec<Reading>,
}

impl Device {
    /// Create a device with an empty history.
    pub fn new(serial: impl Into<String>, kind: DeviceKind, location: Option<String>) -> Self {
        Self {
            serial: serial.into(),
            kind,
            location,
            history: Vec::new(),
        }
    }

    /// Insert a reading, preserving the sorted/unique-timestamp invariant.
    ///
    /// A reading at an already-known timestamp overwrites the stored value
    /// (freshest data wins).
    pub fn add_reading(&mut self, reading: Reading) {
        match self
            .history
            .binary_search_by_key(&reading.timestamp, |r| r.timestamp)
        {
            Ok(idx) => self.history[idx] = reading,
            Err(idx) => self.history.insert(idx, reading),
        }
    }

    /// The most recent reading, if any.
    pub fn last_reading(&self) -> Option<&Reading> {
        self.history.last()
    }

    /// Friendly device name: the location when known, otherwise the meter
    /// model plus the last four characters of the serial.
    pub fn display_name(&self) -> String {
        match &self.location {
            Some(location) if !location.is_empty() => location.clone(),
            _ => {
                let tail_start = self.serial.len().saturating_sub(4);
                format!("{} {}", self.kind.model_name(), &self.serial[tail_start..])
            }
        }
    }
}

// ── DeviceSet ─────────────────────────────────────────────────────────────────

/// The full coordinator snapshot: serial → device.
///
/// Rebuilt wholesale by every merge; never mutated in place across cycles.
pub type DeviceSet = HashMap<String, Device>;

// ── Tests ─────────────────────────────────────────────────────────────────────
