//! Venue-agnostic trading capability.
//!
//! Every venue the hedger trades on implements `VenueClient`. Symbol naming,
//! precision, signing and transport stay behind the adapter; the coordinator
//! never branches on which venue it is talking to.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::types::{Direction, LotConstraints, OrderRequest, OrderStatusReport};
use crate::error::VenueError;

/// Venue identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Paradex,
    Bitget,
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Venue::Paradex => write!(f, "Paradex"),
            Venue::Bitget => write!(f, "Bitget"),
        }
    }
}

impl Venue {
    /// Short code for display (2-3 chars).
    pub fn short_code(&self) -> &'static str {
        match self {
            Venue::Paradex => "PDX",
            Venue::Bitget => "BG",
        }
    }
}

/// Trading operations the hedge core needs from a venue.
///
/// Implementations own their session and any per-venue rate limiting on the
/// wire. Errors must be classified: anything worth retrying is
/// `VenueError::Transient`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VenueClient: Send + Sync {
    /// Returns the venue identifier.
    fn venue(&self) -> Venue;

    /// Submit a market order. Returns the venue's order id.
    async fn place_order(&self, request: &OrderRequest) -> Result<String, VenueError>;

    /// Current fill state of an order.
    async fn get_order_status(
        &self,
        symbol: &str,
        venue_order_id: &str,
    ) -> Result<OrderStatusReport, VenueError>;

    /// Submit a reduce-only market order in `direction` for `notional_usd`.
    ///
    /// `direction` is the direction of the closing order, i.e. the opposite
    /// of the position being reduced.
    async fn close_position(
        &self,
        symbol: &str,
        notional_usd: Decimal,
        direction: Direction,
    ) -> Result<String, VenueError>;

    /// Minimum notional and step size for `symbol`.
    async fn get_lot_constraints(&self, symbol: &str) -> Result<LotConstraints, VenueError>;

    /// Free collateral in USD.
    async fn get_available_balance(&self) -> Result<Decimal, VenueError>;

    /// One-off account setup for `symbol` (margin mode, leverage).
    async fn prepare(&self, _symbol: &str) -> Result<(), VenueError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_venue_display() {
        assert_eq!(Venue::Paradex.to_string(), "Paradex");
        assert_eq!(Venue::Bitget.short_code(), "BG");
    }

    #[test]
    fn test_venue_deserializes_lowercase() {
        let venue: Venue = serde_json::from_str("\"bitget\"").unwrap();
        assert_eq!(venue, Venue::Bitget);
    }
}
