//! Error kinds shared across every copytrading component.
//!
//! These are deliberately *kinds*, not a per-component zoo of types: §7 of the
//! design groups failure behavior by how a caller should react, not by where
//! the failure originated. Components that need a narrower type (the OMS
//! state machine, the allocator) still define their own local error enum;
//! `CoreError` is for the boundary between those and the cadence/daemon glue.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum CoreError {
    /// Network-level failure expected to succeed on retry (timeout, connection reset).
    TransientNetwork { detail: String },
    /// HTTP 429 from the upstream capability.
    RateLimited { route: String, retry_after_hint: Option<u64> },
    /// 4xx other than 429.
    ApiError { status: u16, detail: String },
    /// Response body did not parse into the expected envelope.
    MalformedResponse { detail: String },
    /// Not enough input to produce a meaningful result (e.g. too few snapshots).
    InsufficientData { detail: String },
    /// Lock misuse in the single-loop scheduling model. Always a bug, always fatal.
    ConcurrencyConflict { detail: String },
    /// The paper-trading (or live) execution capability reported an infrastructure fault.
    CapabilityUnavailable { detail: String },
    /// Configuration or storage corruption. Scheduler shuts down cleanly on this.
    Fatal { detail: String },
}

impl CoreError {
    pub fn transient_network<S: Into<String>>(detail: S) -> Self {
        Self::TransientNetwork { detail: detail.into() }
    }

    pub fn rate_limited<S: Into<String>>(route: S, retry_after_hint: Option<u64>) -> Self {
        Self::RateLimited { route: route.into(), retry_after_hint }
    }

    pub fn api_error<S: Into<String>>(status: u16, detail: S) -> Self {
        Self::ApiError { status, detail: detail.into() }
    }

    pub fn malformed<S: Into<String>>(detail: S) -> Self {
        Self::MalformedResponse { detail: detail.into() }
    }

    pub fn insufficient_data<S: Into<String>>(detail: S) -> Self {
        Self::InsufficientData { detail: detail.into() }
    }

    pub fn capability_unavailable<S: Into<String>>(detail: S) -> Self {
        Self::CapabilityUnavailable { detail: detail.into() }
    }

    pub fn fatal<S: Into<String>>(detail: S) -> Self {
        Self::Fatal { detail: detail.into() }
    }

    /// Short stable label used in health-endpoint output and structured log fields.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::TransientNetwork { .. } => "transient_network",
            Self::RateLimited { .. } => "rate_limited",
            Self::ApiError { .. } => "api_error",
            Self::MalformedResponse { .. } => "malformed_response",
            Self::InsufficientData { .. } => "insufficient_data",
            Self::ConcurrencyConflict { .. } => "concurrency_conflict",
            Self::CapabilityUnavailable { .. } => "capability_unavailable",
            Self::Fatal { .. } => "fatal",
        }
    }

    /// Whether the Scheduler must shut down cleanly on observing this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. } | Self::ConcurrencyConflict { .. })
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransientNetwork { detail } => write!(f, "transient network error: {detail}"),
            Self::RateLimited { route, retry_after_hint } => match retry_after_hint {
                Some(s) => write!(f, "rate limited on '{route}', retry after ~{s}s"),
                None => write!(f, "rate limited on '{route}'"),
            },
            Self::ApiError { status, detail } => write!(f, "api error {status}: {detail}"),
            Self::MalformedResponse { detail } => write!(f, "malformed response: {detail}"),
            Self::InsufficientData { detail } => write!(f, "insufficient data: {detail}"),
            Self::ConcurrencyConflict { detail } => write!(f, "concurrency conflict: {detail}"),
            Self::CapabilityUnavailable { detail } => write!(f, "capability unavailable: {detail}"),
            Self::Fatal { detail } => write!(f, "fatal: {detail}"),
        }
    }
}

impl std::error::Error for CoreError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_and_concurrency_conflict_are_fatal() {
        assert!(CoreError::fatal("bad config").is_fatal());
        assert!(CoreError::ConcurrencyConflict { detail: "double lock".into() }.is_fatal());
    }

    #[test]
    fn other_kinds_are_not_fatal() {
        assert!(!CoreError::transient_network("timeout").is_fatal());
        assert!(!CoreError::rate_limited("trades", Some(7)).is_fatal());
        assert!(!CoreError::insufficient_data("too few snapshots").is_fatal());
    }

    #[test]
    fn kind_label_is_stable() {
        assert_eq!(CoreError::fatal("x").kind_label(), "fatal");
        assert_eq!(CoreError::api_error(404, "x").kind_label(), "api_error");
    }
}
