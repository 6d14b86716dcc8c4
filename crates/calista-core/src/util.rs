//! Small shared helpers: statistic identifiers and accumulation rounding.

use regex::Regex;

/// Source name under which statistics are persisted.
pub const STATISTIC_DOMAIN: &str = "calista";

/// Derive the stable statistic identifier for a metering point.
///
/// Format: `calista:<serial>_<kind-key>`, lowercased, with every run of
/// non-alphanumeric characters collapsed to a single underscore. The id is
/// derived from the serial only (never from location or display names) so it
/// survives device metadata changes.
///
/// # Examples
///
/// ```
/// use calista_core::util::statistic_id;
///
/// assert_eq!(statistic_id("ABC-123", "water"), "calista:abc_123_water");
/// assert_eq!(statistic_id("42", "hot_water"), "calista:42_hot_water");
/// ```
pub fn statistic_id(serial: &str, kind_key: &str) -> String {
    let re = Regex::new(r"[^a-z0-9]+").expect("regex is valid");
    let raw = format!("{}_{}", serial, kind_key).to_lowercase();
    let normalized = re.replace_all(&raw, "_");
    format!(
        "{}:{}",
        STATISTIC_DOMAIN,
        normalized.trim_matches('_')
    )
}

/// Round to 4 decimal digits.
///
/// Applied to the running sum after each accumulation to bound
/// floating-point drift across many import cycles.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── statistic_id ──────────────────────────────────────────────────────

    #[test]
    fn test_statistic_id_plain() {
        assert_eq!(statistic_id("12345", "water"), "calista:12345_water");
    }

    #[test]
    fn test_statistic_id_collapses_separators() {
        assert_eq!(
            statistic_id("AB--12 34", "hot_water"),
            "calista:ab_12_34_hot_water"
        );
    }

    #[test]
    fn test_statistic_id_trims_edges() {
        assert_eq!(statistic_id("-X1-", "heating"), "calista:x1_heating");
    }

    #[test]
    fn test_statistic_id_stable_across_metadata_changes() {
        // Only serial and kind participate; two calls always agree.
        assert_eq!(
            statistic_id("777", "water"),
            statistic_id("777", "water")
        );
    }

    // ── round4 ────────────────────────────────────────────────────────────

    #[test]
    fn test_round4_truncates_drift() {
        assert_eq!(round4(10.1 + 0.2), 10.3);
        assert_eq!(round4(0.12344), 0.1234);
    }

    #[test]
    fn test_round4_negative() {
        assert_eq!(round4(-0.00004), -0.0);
    }

    #[test]
    fn test_round4_passthrough() {
        assert_eq!(round4(1234.5678), 1234.5678);
    }
}
