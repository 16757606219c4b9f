//! Name and path validation.

use anyhow::Result;
use regex::Regex;
use std::path::{Component, Path};
use std::sync::LazyLock;

static DNS1123_LABEL: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").ok());

/// Validate a DNS-1123 label (application names, namespaces, environments)
/// Format: lowercase alphanumeric and hyphens, 1-63 characters,
/// cannot start or end with a hyphen
pub fn validate_dns1123_label(value: &str, field_name: &str) -> Result<()> {
    if value.is_empty() {
        return Err(anyhow::anyhow!("{field_name} cannot be empty"));
    }
    if value.len() > 63 {
        return Err(anyhow::anyhow!(
            "{field_name} '{value}' exceeds maximum length of 63 characters (got {})",
            value.len()
        ));
    }

    let regex = DNS1123_LABEL
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("Failed to compile DNS-1123 regex"))?;
    if !regex.is_match(value) {
        return Err(anyhow::anyhow!(
            "{field_name} '{value}' must be a DNS-1123 label (lowercase alphanumeric, hyphens; cannot start/end with hyphen)"
        ));
    }
    Ok(())
}

/// Validate a source path: relative and without `..` components
pub fn validate_source_path(path: &str) -> Result<()> {
    let trimmed = path.trim();
    if trimmed.is_empty() {
        return Err(anyhow::anyhow!("source.path cannot be empty"));
    }

    let parsed = Path::new(trimmed);
    if parsed.is_absolute() {
        return Err(anyhow::anyhow!(
            "source.path '{trimmed}' must be relative to the repository root"
        ));
    }
    if parsed.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(anyhow::anyhow!(
            "source.path '{trimmed}' must not contain '..'"
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dns1123_label() {
        assert!(validate_dns1123_label("demo", "name").is_ok());
        assert!(validate_dns1123_label("web-2", "name").is_ok());
        let too_long = "a".repeat(64);
        for invalid in ["", "-demo", "demo-", "Demo", "de.mo", "de_mo", too_long.as_str()] {
            assert!(validate_dns1123_label(invalid, "name").is_err(), "{invalid}");
        }
    }

    #[test]
    fn test_source_path() {
        assert!(validate_source_path("apps/demo").is_ok());
        assert!(validate_source_path("./apps/demo").is_ok());
        assert!(validate_source_path("/etc").is_err());
        assert!(validate_source_path("apps/../../etc").is_err());
        assert!(validate_source_path("").is_err());
    }
}
