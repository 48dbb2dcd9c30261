//! Postal code normalization.
//!
//! Turns whatever the batch source hands us (`"4000,100"`, `" 4000 - 100 "`,
//! `"123456"`) into a [`CanonicalCode`], or rejects it before it can reach the
//! network.

use super::domain::{CanonicalCode, EnrichmentError};

/// Shortest accepted code; shorter inputs are zero-padded up to this.
pub const MIN_DIGITS: usize = 7;
/// Longest accepted code.
pub const MAX_DIGITS: usize = 8;

/// Normalize a raw token into canonical `PPPP-SSS` form.
///
/// A token with no digits left after stripping separators is rejected as
/// `InvalidFormat` rather than padded to `0000-000`; blank input is never a
/// real code and would otherwise reach the network.
pub fn normalize(raw: &str) -> Result<CanonicalCode, EnrichmentError> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',' && *c != '-')
        .collect();

    if cleaned.is_empty() {
        return Err(invalid(raw, "empty"));
    }
    if !cleaned.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid(raw, "contains non-digit characters"));
    }
    if cleaned.len() > MAX_DIGITS {
        return Err(invalid(raw, "too many digits"));
    }

    let digits = format!("{:0>width$}", cleaned, width = MIN_DIGITS);
    Ok(CanonicalCode::from_digits(&digits))
}

fn invalid(raw: &str, reason: &'static str) -> EnrichmentError {
    EnrichmentError::InvalidFormat {
        raw: raw.to_string(),
        reason,
    }
}
