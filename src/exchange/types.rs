//! Venue-neutral order and market types shared by every adapter.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Position direction of a leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// The other side.
    pub fn opposite(self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    /// Coin flip, used to pick which venue goes long each cycle.
    pub fn random() -> Self {
        if rand::random::<bool>() {
            Direction::Long
        } else {
            Direction::Short
        }
    }

    /// Signed multiplier for notional bookkeeping (+1 long, -1 short).
    pub fn sign(self) -> Decimal {
        match self {
            Direction::Long => Decimal::ONE,
            Direction::Short => Decimal::NEGATIVE_ONE,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

/// Order state as reported by the venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VenueOrderState {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl VenueOrderState {
    /// No further fills will happen on the venue.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            VenueOrderState::Filled | VenueOrderState::Cancelled | VenueOrderState::Rejected
        )
    }
}

/// Snapshot of an order on a venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatusReport {
    /// Filled size in USD notional
    pub filled_notional: Decimal,
    /// Average fill price, unset until something fills
    pub avg_price: Option<Decimal>,
    pub state: VenueOrderState,
    /// Cancel/reject reason if the venue gave one
    pub reason: Option<String>,
}

impl OrderStatusReport {
    pub fn new(state: VenueOrderState, filled_notional: Decimal) -> Self {
        Self {
            filled_notional,
            avg_price: None,
            state,
            reason: None,
        }
    }

    pub fn with_avg_price(mut self, price: Decimal) -> Self {
        self.avg_price = Some(price);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Size constraints of a symbol, expressed in USD notional.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LotConstraints {
    /// Smallest order the venue accepts
    pub min_notional: Decimal,
    /// Order notional must be a multiple of this (0 = any precision)
    pub step_size: Decimal,
    /// Largest single order, if the venue caps it
    pub max_notional: Option<Decimal>,
}

impl LotConstraints {
    pub fn new(min_notional: Decimal, step_size: Decimal) -> Self {
        Self {
            min_notional,
            step_size,
            max_notional: None,
        }
    }

    pub fn with_max_notional(mut self, max: Decimal) -> Self {
        self.max_notional = Some(max);
        self
    }

    /// Whether `notional` can be placed as a single order.
    pub fn accepts(&self, notional: Decimal) -> bool {
        notional >= self.min_notional
            && self.max_notional.map_or(true, |max| notional <= max)
            && crate::utils::is_multiple_of(notional, self.step_size)
    }
}

/// Market order submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub direction: Direction,
    pub notional_usd: Decimal,
    /// Our id for the order, lets adapters de-duplicate resubmissions
    pub client_order_id: String,
    pub reduce_only: bool,
}

impl OrderRequest {
    /// Market order opening `direction` for `notional_usd`.
    pub fn market(symbol: impl Into<String>, direction: Direction, notional_usd: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            direction,
            notional_usd,
            client_order_id: Uuid::new_v4().to_string(),
            reduce_only: false,
        }
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_direction_opposite() {
        assert_eq!(Direction::Long.opposite(), Direction::Short);
        assert_eq!(Direction::Short.opposite(), Direction::Long);
        assert_eq!(Direction::Short.sign(), dec!(-1));
    }

    #[test]
    fn test_terminal_states() {
        assert!(VenueOrderState::Filled.is_terminal());
        assert!(VenueOrderState::Cancelled.is_terminal());
        assert!(!VenueOrderState::Open.is_terminal());
        assert!(!VenueOrderState::PartiallyFilled.is_terminal());
    }

    #[test]
    fn test_lot_constraints_accepts() {
        let lot = LotConstraints::new(dec!(10), dec!(0.5)).with_max_notional(dec!(500));

        assert!(lot.accepts(dec!(10)));
        assert!(lot.accepts(dec!(120.5)));
        assert!(!lot.accepts(dec!(9.5)));
        assert!(!lot.accepts(dec!(120.25)));
        assert!(!lot.accepts(dec!(500.5)));
    }

    #[test]
    fn test_client_order_ids_are_unique() {
        let a = OrderRequest::market("ETHPERP", Direction::Long, dec!(100));
        let b = OrderRequest::market("ETHPERP", Direction::Long, dec!(100));
        assert_ne!(a.client_order_id, b.client_order_id);
        assert!(!a.reduce_only);
        assert!(a.reduce_only().reduce_only);
    }
}
