//! # Dual-Venue Hedger
//!
//! Opens equal-notional, opposite-direction perpetual positions on two
//! venues at once, then reconciles the fills so the pair stays
//! delta-neutral.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `error`: Venue and hedge error taxonomy
//! - `exchange`: Venue abstraction and the paper venue
//! - `strategy`: Sizing, retries, leg execution and cycle coordination
//! - `risk`: Exposure guard with halt-until-acknowledged alerts
//! - `persistence`: SQLite journal of cycles and halts
//! - `utils`: Shared utilities and decimal arithmetic

pub mod config;
pub mod error;
pub mod exchange;
pub mod persistence;
pub mod risk;
pub mod strategy;
pub mod utils;

pub use config::Config;
pub use error::{HedgeError, VenueError};
