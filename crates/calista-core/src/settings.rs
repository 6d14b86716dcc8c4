use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;

use crate::error::{CalistaError, Result};

// ── Settings (CLI) ─────────────────────────────────────────────────────────────

/// Long-term statistics ingestion for Calista utility meters
#[derive(Parser, Debug, Clone)]
#[command(
    name = "calista-ingest",
    about = "Ingest Calista utility-meter readings into long-term statistics",
    version
)]
pub struct Settings {
    /// Account email for the Calista virtual office
    #[arg(long, env = "CALISTA_EMAIL")]
    pub email: String,

    /// Account password
    #[arg(long, env = "CALISTA_PASSWORD", hide_env_values = true)]
    pub password: String,

    /// Backfill start date (YYYY-MM-DD); the first fetch covers this date to today
    #[arg(long)]
    pub offset_date: NaiveDate,

    /// Hours between ingestion cycles (1-168)
    #[arg(long, default_value = "24", value_parser = clap::value_parser!(u64).range(1..=168))]
    pub update_interval_hours: u64,

    /// Trailing fetch window in days for incremental cycles (1-365)
    #[arg(long, default_value = "30", value_parser = clap::value_parser!(u32).range(1..=365))]
    pub window_days: u32,

    /// Directory for the statistics store (defaults to ~/.calista-ingest/statistics)
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Logging level
    #[arg(long, default_value = "INFO", value_parser = ["DEBUG", "INFO", "WARNING", "ERROR"])]
    pub log_level: String,

    /// Log file path
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Run a single ingestion cycle and exit
    #[arg(long)]
    pub once: bool,
}

impl Settings {
    /// Resolve the statistics store directory.
    ///
    /// Uses `--data-dir` when given, otherwise
    /// `~/.calista-ingest/statistics`.
    pub fn statistics_dir(&self) -> PathBuf {
        match &self.data_dir {
            Some(dir) => dir.clone(),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".calista-ingest")
                .join("statistics"),
        }
    }

    /// Validate cross-field constraints that clap cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.email.trim().is_empty() || !self.email.contains('@') {
            return Err(CalistaError::Config(format!(
                "invalid account email: {:?}",
                self.email
            )));
        }
        if self.password.is_empty() {
            return Err(CalistaError::Config("account password is empty".to_string()));
        }

        let today = chrono::Utc::now().date_naive();
        if self.offset_date > today {
            return Err(CalistaError::Config(format!(
                "offset date {} is in the future",
                self.offset_date
            )));
        }

        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Settings {
        let mut full = vec!["calista-ingest"];
        full.extend_from_slice(args);
        Settings::try_parse_from(full).expect("settings parse")
    }

    fn base_args() -> Vec<&'static str> {
        vec![
            "--email",
            "user@example.com",
            "--password",
            "hunter2",
            "--offset-date",
            "2024-01-01",
        ]
    }

    // ── parsing ───────────────────────────────────────────────────────────

    #[test]
    fn test_defaults() {
        let settings = parse(&base_args());
        assert_eq!(settings.update_interval_hours, 24);
        assert_eq!(settings.window_days, 30);
        assert_eq!(settings.log_level, "INFO");
        assert!(!settings.once);
        assert!(settings.data_dir.is_none());
    }

    #[test]
    fn test_offset_date_parsed() {
        let settings = parse(&base_args());
        assert_eq!(
            settings.offset_date,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
        );
    }

    #[test]
    fn test_invalid_offset_date_rejected() {
        let mut args = vec!["calista-ingest", "--email", "a@b.c", "--password", "p"];
        args.extend_from_slice(&["--offset-date", "not-a-date"]);
        assert!(Settings::try_parse_from(args).is_err());
    }

    #[test]
    fn test_interval_range_enforced() {
        let mut args = base_args();
        args.extend_from_slice(&["--update-interval-hours", "0"]);
        let mut full = vec!["calista-ingest"];
        full.extend_from_slice(&args);
        assert!(Settings::try_parse_from(full).is_err());
    }

    // ── statistics_dir ────────────────────────────────────────────────────

    #[test]
    fn test_statistics_dir_override() {
        let mut args = base_args();
        args.extend_from_slice(&["--data-dir", "/tmp/stats"]);
        let settings = parse(&args);
        assert_eq!(settings.statistics_dir(), PathBuf::from("/tmp/stats"));
    }

    #[test]
    fn test_statistics_dir_default_under_home() {
        let settings = parse(&base_args());
        let dir = settings.statistics_dir();
        assert!(dir.ends_with(".calista-ingest/statistics"));
    }

    // ── validate ──────────────────────────────────────────────────────────

    #[test]
    fn test_validate_ok() {
        assert!(parse(&base_args()).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_email() {
        let mut settings = parse(&base_args());
        settings.email = "not-an-email".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_password() {
        let mut settings = parse(&base_args());
        settings.password = String::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_future_offset() {
        let mut settings = parse(&base_args());
        settings.offset_date = chrono::Utc::now().date_naive() + chrono::Duration::days(2);
        assert!(settings.validate().is_err());
    }
}
