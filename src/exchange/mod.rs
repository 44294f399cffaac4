//! Venue integrations for the dual-venue hedger.
//!
//! ## VenueClient
//! The capability every venue adapter exposes: market orders, order status,
//! reduce-only closes, lot constraints and free balance.
//!
//! ## Paper
//! In-process simulated venue used by the `run` driver and by tests.

mod paper;
mod traits;
mod types;

pub use paper::{FillScript, PaperCall, PaperVenueClient};
pub use traits::{Venue, VenueClient};
pub use types::*;

#[cfg(test)]
pub use traits::MockVenueClient;
