//! Cluster software version gate

use crate::error::{ClsError, Result};

/// Lowest cluster version that accepts CLS fluent-bit overrides
pub const CLS_OVERRIDES_MIN_VERSION: &str = "1.20";

/// Prefixes of development builds, treated as newer than any release
const DEVELOPMENT_PREFIXES: &[&str] = &["PR-", "main-"];

fn parse(version: &str) -> Result<[u64; 3]> {
    let trimmed = version.trim();
    let numeric = trimmed.strip_prefix('v').unwrap_or(trimmed);
    let core = numeric
        .split(&['-', '+'][..])
        .next()
        .unwrap_or_default();

    let parts: Vec<&str> = core.split('.').collect();
    if core.is_empty() || parts.len() > 3 {
        return Err(ClsError::InvalidVersion(version.to_string()));
    }

    let mut parsed = [0u64; 3];
    for (slot, part) in parsed.iter_mut().zip(&parts) {
        *slot = part
            .parse()
            .map_err(|_| ClsError::InvalidVersion(version.to_string()))?;
    }
    Ok(parsed)
}

/// Check that `version` is at least `minimum`
///
/// Pre-release and build suffixes are ignored.
pub fn is_version_at_least(version: &str, minimum: &str) -> Result<bool> {
    if DEVELOPMENT_PREFIXES.iter().any(|p| version.starts_with(p)) {
        return Ok(true);
    }
    Ok(parse(version)? >= parse(minimum)?)
}
