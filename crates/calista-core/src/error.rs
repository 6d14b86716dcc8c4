use thiserror::Error;

/// All errors produced by the Calista ingestion crates.
#[derive(Error, Debug)]
pub enum CalistaError {
    /// The portal rejected the account credentials. Fatal to the cycle;
    /// not retried until fresh credentials are supplied.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// A network-level failure talking to the portal. Transient; the cycle
    /// is retried on the next scheduled tick.
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// The portal returned a payload that could not be parsed. Treated as
    /// transient, like a connectivity failure.
    #[error("Malformed portal data: {0}")]
    Data(String),

    /// The last persisted statistics state could not be read back from the
    /// sink. Aborts the affected metering point's import; continuing would
    /// silently produce wrong cumulative sums.
    #[error("Failed to read checkpoint for {statistic_id}: {reason}")]
    Checkpoint { statistic_id: String, reason: String },

    /// Appending statistics to the sink failed.
    #[error("Failed to append statistics for {statistic_id}: {reason}")]
    Sink { statistic_id: String, reason: String },

    /// The per-metering-point import lock could not be acquired within the
    /// bounded wait. The point is skipped for this cycle and retried on the
    /// next one.
    #[error("Timed out waiting for import lock on {0}")]
    LockTimeout(String),

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pass-through for raw I/O errors.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A JSON document could not be parsed.
    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Catch-all for errors from third-party crates via `anyhow`.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CalistaError {
    /// `true` when the error is transient and the cycle should simply be
    /// retried on the next tick (connectivity, malformed payload, lock
    /// timeout). Authentication failures are not transient.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CalistaError::Connectivity(_) | CalistaError::Data(_) | CalistaError::LockTimeout(_)
        )
    }
}

/// Convenience alias used throughout the calista crates.
pub type Result<T> = std::result::Result<T, CalistaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_auth() {
        let err = CalistaError::Auth("credentials rejected".to_string());
        assert_eq!(err.to_string(), "Authentication failed: credentials rejected");
    }

    #[test]
    fn test_error_display_checkpoint() {
        let err = CalistaError::Checkpoint {
            statistic_id: "calista:abc_water".to_string(),
            reason: "truncated file".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("calista:abc_water"));
        assert!(msg.contains("truncated file"));
    }

    #[test]
    fn test_error_display_lock_timeout() {
        let err = CalistaError::LockTimeout("calista:abc_water".to_string());
        assert_eq!(
            err.to_string(),
            "Timed out waiting for import lock on calista:abc_water"
        );
    }

    #[test]
    fn test_transient_classification() {
        assert!(CalistaError::Connectivity("reset".into()).is_transient());
        assert!(CalistaError::Data("bad row".into()).is_transient());
        assert!(CalistaError::LockTimeout("id".into()).is_transient());
        assert!(!CalistaError::Auth("nope".into()).is_transient());
        assert!(!CalistaError::Config("missing".into()).is_transient());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: CalistaError = io_err.into();
        assert!(err.to_string().contains("denied"));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{invalid}").unwrap_err();
        let err: CalistaError = json_err.into();
        assert!(err.to_string().contains("Failed to parse JSON"));
    }
}
