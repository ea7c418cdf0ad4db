//! Upstream registry error types

use super::key::UpstreamKey;

/// Error type for entry creation and lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamError {
    /// A wildcard entry was requested for a group with no RP configured
    NoRpConfigured(UpstreamKey),
    /// RPF resolution failed at creation time; no entry was left behind
    RpfUnresolved(UpstreamKey),
    /// Operation referenced a key with no live entry
    NotFound(UpstreamKey),
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamError::NoRpConfigured(key) => {
                write!(f, "No RP configured for {}", key)
            }
            UpstreamError::RpfUnresolved(key) => {
                write!(f, "Unable to resolve RPF for {}", key)
            }
            UpstreamError::NotFound(key) => write!(f, "Upstream entry not found: {}", key),
        }
    }
}

impl std::error::Error for UpstreamError {}
