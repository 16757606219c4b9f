//! # Duration Validation
//!
//! Handles parsing and validating Kubernetes duration strings.

use crate::observability::metrics;
use anyhow::Result;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

static DURATION_REGEX: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(?P<number>\d+)(?P<unit>[smhd])$").ok());

/// Parse Kubernetes duration string into std::time::Duration
/// Supports formats: "30s", "1m", "5m", "1h", "2h", "1d"
pub fn parse_kubernetes_duration(duration_str: &str) -> Result<Duration> {
    let duration_trimmed = duration_str.trim();

    if duration_trimmed.is_empty() {
        metrics::increment_duration_parsing_errors();
        return Err(anyhow::anyhow!("Duration string cannot be empty"));
    }

    let duration_regex = DURATION_REGEX
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("Failed to compile duration regex"))?;
    let interval_lower = duration_trimmed.to_lowercase();

    let Some(captures) = duration_regex.captures(&interval_lower) else {
        metrics::increment_duration_parsing_errors();
        return Err(anyhow::anyhow!(
            "Invalid duration format '{duration_trimmed}'. Expected format: <number><unit> (e.g., '30s', '5m', '1h')"
        ));
    };

    let number: u64 = captures["number"].parse().map_err(|e| {
        metrics::increment_duration_parsing_errors();
        anyhow::anyhow!("Invalid duration number in '{duration_trimmed}': {e}")
    })?;

    if number == 0 {
        metrics::increment_duration_parsing_errors();
        return Err(anyhow::anyhow!(
            "Duration number must be greater than 0, got '{duration_trimmed}'"
        ));
    }

    let multiplier = match &captures["unit"] {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        _ => 86400,
    };
    let seconds = number
        .checked_mul(multiplier)
        .ok_or_else(|| anyhow::anyhow!("Duration '{duration_trimmed}' is too large"))?;

    Ok(Duration::from_secs(seconds))
}

/// Validate duration interval format and minimum value
pub fn validate_duration_interval(interval: &str, field_name: &str, min_seconds: u64) -> Result<()> {
    let interval_trimmed = interval.trim();

    if interval_trimmed.is_empty() {
        return Err(anyhow::anyhow!("{field_name} cannot be empty"));
    }

    let duration = parse_kubernetes_duration(interval_trimmed)
        .map_err(|e| anyhow::anyhow!("{field_name}: {e}"))?;

    if duration.as_secs() < min_seconds {
        return Err(anyhow::anyhow!(
            "{field_name} '{}' must be at least {} seconds (got {} seconds)",
            interval_trimmed,
            min_seconds,
            duration.as_secs()
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_kubernetes_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_kubernetes_duration("3m").unwrap(), Duration::from_secs(180));
        assert_eq!(parse_kubernetes_duration(" 1H ").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_kubernetes_duration("1d").unwrap(), Duration::from_secs(86400));
    }

    #[test]
    fn test_parse_rejects_invalid() {
        for input in ["", "0s", "5", "m5", "1w", "1.5h", "-1m"] {
            assert!(parse_kubernetes_duration(input).is_err(), "{input}");
        }
    }

    #[test]
    fn test_validate_minimum() {
        assert!(validate_duration_interval("10s", "reconcileInterval", 10).is_ok());
        assert!(validate_duration_interval("9s", "reconcileInterval", 10).is_err());
    }
}
