//! Internal domain models for postal code enrichment.
//!
//! These types are OUR types - they don't change when the lookup API changes.
//! API responses get converted into these types via the CTT adapter.

use std::fmt;

/// A normalized postal code in `PPPP-SSS` form.
///
/// Only [`crate::enrichment::normalize`] constructs these from user input, so
/// holding one means the digits have already been validated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CanonicalCode(String);

impl CanonicalCode {
    /// Length of the prefix (the `PPPP` part).
    pub const PREFIX_LEN: usize = 4;

    /// Build from an already validated digit string (7 or 8 ASCII digits).
    pub(crate) fn from_digits(digits: &str) -> Self {
        let (prefix, suffix) = digits.split_at(Self::PREFIX_LEN);
        Self(format!("{prefix}-{suffix}"))
    }

    /// The 4-digit prefix.
    pub fn prefix(&self) -> &str {
        &self.0[..Self::PREFIX_LEN]
    }

    /// Everything after the separator.
    pub fn suffix(&self) -> &str {
        &self.0[Self::PREFIX_LEN + 1..]
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CanonicalCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Municipality and district a postal code belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub municipality: String,
    pub district: String,
}

/// Why a code was judged invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    /// The raw token could not be normalized. Never reaches the network.
    BadFormat,
    /// The lookup service rejected the code (HTTP 400/404 or empty result).
    NotFound,
}

impl InvalidReason {
    /// Convert to string representation for storage.
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidReason::BadFormat => "bad format",
            InvalidReason::NotFound => "not found",
        }
    }
}

impl std::str::FromStr for InvalidReason {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "bad format" => InvalidReason::BadFormat,
            _ => InvalidReason::NotFound,
        })
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of trying to enrich one code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The service returned a municipality and district.
    Resolved(Location),
    /// Conclusively invalid; will not be retried by later runs.
    Invalid { reason: InvalidReason },
    /// Transient failures exhausted the attempts (or the run was cancelled).
    /// Eligible for another try in a later run.
    Unknown,
}

impl Outcome {
    pub fn resolved(municipality: impl Into<String>, district: impl Into<String>) -> Self {
        Outcome::Resolved(Location {
            municipality: municipality.into(),
            district: district.into(),
        })
    }

    pub fn bad_format() -> Self {
        Outcome::Invalid {
            reason: InvalidReason::BadFormat,
        }
    }

    pub fn not_found() -> Self {
        Outcome::Invalid {
            reason: InvalidReason::NotFound,
        }
    }

    /// Short label used in logs and CLI output.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Resolved(_) => "resolved",
            Outcome::Invalid { .. } => "invalid",
            Outcome::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Resolved(loc) => write!(f, "{} / {}", loc.municipality, loc.district),
            Outcome::Invalid { reason } => write!(f, "invalid ({reason})"),
            Outcome::Unknown => f.write_str("unknown"),
        }
    }
}

/// Errors that can occur during enrichment
#[derive(Debug, Clone, thiserror::Error)]
pub enum EnrichmentError {
    #[error("Invalid postal code format {raw:?}: {reason}")]
    InvalidFormat { raw: String, reason: &'static str },

    #[error("Lookup rejected with HTTP {status}")]
    ClientRejected { status: u16 },

    #[error("No entries returned for postal code")]
    NoMatches,

    #[error("Unexpected HTTP status {status}")]
    UnexpectedStatus { status: u16 },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Gave up after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("Cancelled")]
    Cancelled,
}

impl EnrichmentError {
    /// Transient errors are retried; everything else is final.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EnrichmentError::UnexpectedStatus { .. }
                | EnrichmentError::Network(_)
                | EnrichmentError::Parse(_)
        )
    }
}
