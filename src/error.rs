//! Error taxonomy for venue calls and hedge cycles.
//!
//! Two layers:
//! - `VenueError`: what a single venue call can fail with, classified so the
//!   retry policy can tell transient failures from permanent ones
//! - `HedgeError`: what a hedge cycle surfaces to its caller

use crate::exchange::Venue;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Classification of a transient venue failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    /// Request or response did not complete in time
    Timeout,
    /// Venue throttled us; `retry_after` is the venue's hint if it sent one
    RateLimited { retry_after: Option<Duration> },
    /// 5xx from the venue
    Server(u16),
    /// Connection reset, DNS failure, TLS hiccup
    Network,
}

impl fmt::Display for TransientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransientKind::Timeout => write!(f, "timeout"),
            TransientKind::RateLimited { .. } => write!(f, "rate limited"),
            TransientKind::Server(status) => write!(f, "server error {}", status),
            TransientKind::Network => write!(f, "network"),
        }
    }
}

/// Failure of a single venue call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum VenueError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("insufficient balance: {0}")]
    InsufficientBalance(String),

    /// The venue refused the order outright (post-only cross, risk check, ...).
    #[error("order rejected: {0}")]
    OrderRejected(String),

    #[error("transient venue error ({kind}): {message}")]
    Transient { kind: TransientKind, message: String },
}

impl VenueError {
    /// Build a transient error.
    pub fn transient(kind: TransientKind, message: impl Into<String>) -> Self {
        VenueError::Transient {
            kind,
            message: message.into(),
        }
    }

    /// Default transient predicate: timeouts, rate limits, 5xx and network errors.
    pub fn is_transient(&self) -> bool {
        matches!(self, VenueError::Transient { .. })
    }

    /// Whether the venue throttled this call.
    pub fn is_rate_limit(&self) -> bool {
        matches!(
            self,
            VenueError::Transient {
                kind: TransientKind::RateLimited { .. },
                ..
            }
        )
    }

    /// Venue-supplied retry hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            VenueError::Transient {
                kind: TransientKind::RateLimited { retry_after },
                ..
            } => *retry_after,
            _ => None,
        }
    }
}

/// Errors surfaced by the hedge coordinator and its components.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HedgeError {
    /// Bad range or precision. Fatal: the process should stop.
    #[error("configuration error: {0}")]
    Config(String),

    /// No notional satisfies both venues this cycle. Skip and try again later.
    #[error("no common size available: {0}")]
    SizeUnavailable(String),

    /// Transient failures outlasted the retry policy. Submission status is unknown.
    #[error("{venue} unavailable after {attempts} attempts: {message}")]
    VenueUnavailable {
        venue: Venue,
        attempts: u32,
        message: String,
    },

    /// Fatal for the venue: stop hedging on it.
    #[error("{venue} authentication failed: {message}")]
    Auth { venue: Venue, message: String },

    /// Fatal for the venue: stop hedging on it.
    #[error("{venue} does not list symbol {symbol}")]
    InvalidSymbol { venue: Venue, symbol: String },

    #[error("{venue} insufficient balance: {message}")]
    InsufficientBalance { venue: Venue, message: String },
}

impl HedgeError {
    /// Map a permanent venue error onto the hedge taxonomy.
    pub fn from_venue(venue: Venue, symbol: &str, error: VenueError, attempts: u32) -> Self {
        match error {
            VenueError::Auth(message) => HedgeError::Auth { venue, message },
            VenueError::InvalidSymbol(_) => HedgeError::InvalidSymbol {
                venue,
                symbol: symbol.to_string(),
            },
            VenueError::InsufficientBalance(message) => {
                HedgeError::InsufficientBalance { venue, message }
            }
            other => HedgeError::VenueUnavailable {
                venue,
                attempts,
                message: other.to_string(),
            },
        }
    }

    /// Errors after which the process must stop hedging on the venue.
    pub fn is_fatal_for_venue(&self) -> bool {
        matches!(
            self,
            HedgeError::Auth { .. } | HedgeError::InvalidSymbol { .. }
        )
    }

    /// Errors that only cost the current cycle.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            HedgeError::SizeUnavailable(_)
                | HedgeError::VenueUnavailable { .. }
                | HedgeError::InsufficientBalance { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let timeout = VenueError::transient(TransientKind::Timeout, "read timed out");
        let limited = VenueError::transient(
            TransientKind::RateLimited {
                retry_after: Some(Duration::from_secs(2)),
            },
            "429",
        );

        assert!(timeout.is_transient());
        assert!(!timeout.is_rate_limit());
        assert!(limited.is_rate_limit());
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(2)));
        assert!(!VenueError::Auth("bad key".into()).is_transient());
        assert!(!VenueError::OrderRejected("post only".into()).is_transient());
    }

    #[test]
    fn test_from_venue_mapping() {
        let err = HedgeError::from_venue(
            Venue::Bitget,
            "ETHPERP",
            VenueError::InvalidSymbol("ETHPERP".into()),
            1,
        );
        assert!(err.is_fatal_for_venue());
        assert_eq!(
            err,
            HedgeError::InvalidSymbol {
                venue: Venue::Bitget,
                symbol: "ETHPERP".into()
            }
        );

        let err = HedgeError::from_venue(
            Venue::Paradex,
            "ETH-USD-PERP",
            VenueError::transient(TransientKind::Server(502), "bad gateway"),
            3,
        );
        assert!(err.is_skippable());
        assert!(matches!(err, HedgeError::VenueUnavailable { attempts: 3, .. }));
    }

    #[test]
    fn test_config_error_is_neither_skippable_nor_venue_fatal() {
        let err = HedgeError::Config("no common lot step".into());
        assert!(!err.is_skippable());
        assert!(!err.is_fatal_for_venue());

        let auth = HedgeError::from_venue(
            Venue::Paradex,
            "ETH-USD-PERP",
            VenueError::Auth("expired key".into()),
            1,
        );
        assert!(!auth.is_skippable());
        assert!(auth.is_fatal_for_venue());
    }
}
