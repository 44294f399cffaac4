//! Shared utilities.

mod decimal;

pub use decimal::{decimal_lcm, is_multiple_of};
