//! Small shared helpers.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use std::path::Path;

/// Create a directory (and parents) if it does not exist yet.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)
            .with_context(|| format!("Failed to create directory: {}", path.display()))?;
    }
    Ok(())
}

/// Current time as a fixed-width RFC 3339 string (millisecond precision,
/// `Z` suffix). All timestamps are written through this so that plain TEXT
/// comparison in SQL orders chronologically.
pub fn now_rfc3339() -> String {
    to_rfc3339(Utc::now())
}

/// Format a timestamp the same way `now_rfc3339` does.
pub fn to_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored RFC 3339 timestamp back into a `DateTime<Utc>`.
pub fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp: {}", s))
}

/// Canonical form of an email address: trimmed and lower-cased.
/// Every lookup and every insert goes through this.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
