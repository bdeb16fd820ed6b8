//! Environment variable helpers used by configuration loaders.
//!
//! Blank values are treated as unset. Malformed values are errors naming the
//! variable, never silently replaced by defaults.

use crate::error::{Error, Result};

/// Reads a trimmed, non-empty environment variable.
#[must_use]
pub fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

/// Reads an environment variable as `u64`.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the value is set but not a `u64`.
pub fn env_u64(name: &str) -> Result<Option<u64>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u64>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u64: {e}")))
}

/// Reads an environment variable as `usize`.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] if the value is set but not a `usize`.
pub fn env_usize(name: &str) -> Result<Option<usize>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<usize>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a usize: {e}")))
}

/// Parses a boolean flag value.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] unless the value is one of
/// `true/false/1/0/yes/no/y/n` (case-insensitive).
pub fn parse_bool(name: &str, value: &str) -> Result<bool> {
    let value = value.trim().to_ascii_lowercase();
    match value.as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => Err(Error::InvalidInput(format!(
            "{name} must be a boolean (true/false/1/0)"
        ))),
    }
}

/// Reads an environment variable as a boolean flag.
///
/// # Errors
///
/// Returns an error if the value is set but not a recognised boolean.
pub fn env_bool(name: &str) -> Result<Option<bool>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    parse_bool(name, &v).map(Some)
}
