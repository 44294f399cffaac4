//! Configuration management for the dual-venue hedger.
//!
//! Loads settings from an optional `config` file and `DVH__`-prefixed
//! environment variables (after `.env`), e.g. `DVH__HEDGE__MAX_POSITION_USD=500`.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::HedgeError;
use crate::exchange::{Direction, Venue};

/// Main application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Sizing and reconciliation policy
    #[serde(default)]
    pub hedge: HedgeConfig,
    /// Order placement and polling timing
    #[serde(default)]
    pub execution: ExecutionConfig,
    /// Backoff for flaky venue calls
    #[serde(default)]
    pub retry: RetryConfig,
    /// Which venue sits on each leg
    #[serde(default)]
    pub venues: VenuesConfig,
    /// Simulated venues used by the paper driver
    #[serde(default)]
    pub paper: PaperConfig,
    /// Driver loop settings
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

/// Distribution used to draw the notional of a cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeDistribution {
    #[default]
    Uniform,
    /// Peaks at the middle of the range
    Triangular,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HedgeConfig {
    /// Lower bound of the per-cycle notional in USD
    #[serde(default = "default_min_position_usd")]
    pub min_position_usd: Decimal,
    /// Upper bound of the per-cycle notional in USD
    #[serde(default = "default_max_position_usd")]
    pub max_position_usd: Decimal,
    /// Fill difference between legs accepted without corrective action
    #[serde(default = "default_imbalance_tolerance")]
    pub imbalance_tolerance_usd: Decimal,
    /// Symbol on venue A
    #[serde(default = "default_symbol_a")]
    pub symbol_a: String,
    /// Symbol on venue B
    #[serde(default = "default_symbol_b")]
    pub symbol_b: String,
    #[serde(default)]
    pub size_distribution: SizeDistribution,
    /// Fraction of the smaller free balance a cycle may use (0.0-1.0)
    #[serde(default = "default_balance_utilization")]
    pub balance_utilization: Decimal,
    /// Re-submit a rejected/short leg once before unwinding the other side (opt-in)
    #[serde(default)]
    pub retry_failed_leg: bool,
    /// Unwind imbalanced fills automatically
    #[serde(default = "default_true")]
    pub unwind_enabled: bool,
    /// Fixed direction for venue A; random each cycle when unset
    #[serde(default)]
    pub venue_a_direction: Option<Direction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Shared deadline for both legs to fill
    #[serde(default = "default_per_leg_timeout")]
    pub per_leg_timeout_ms: u64,
    /// Order status polling interval
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Deadline for each unwind order to fill
    #[serde(default = "default_unwind_timeout")]
    pub unwind_timeout_ms: u64,
    /// Timeout applied to every single venue call
    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per venue call, including the first
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    /// First backoff delay; doubles on every retry
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,
    /// Cap on a single backoff delay
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,
    /// Cap on the time spent retrying one call
    #[serde(default = "default_retry_max_elapsed")]
    pub retry_max_elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenuesConfig {
    #[serde(default = "default_venue_a")]
    pub venue_a: Venue,
    #[serde(default = "default_venue_b")]
    pub venue_b: Venue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperVenueConfig {
    /// Starting free collateral
    pub initial_balance_usd: Decimal,
    /// Price reported as the average fill price
    pub mark_price: Decimal,
    pub min_notional: Decimal,
    pub step_size: Decimal,
    #[serde(default)]
    pub max_notional: Option<Decimal>,
    /// Time until a market order fills
    pub fill_latency_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperConfig {
    #[serde(default = "default_paper_venue_a")]
    pub venue_a: PaperVenueConfig,
    #[serde(default = "default_paper_venue_b")]
    pub venue_b: PaperVenueConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Pause between hedge cycles
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,
    /// Stop after this many cycles (0 = run until interrupted)
    #[serde(default)]
    pub max_cycles: u64,
    /// SQLite journal location
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Consecutive no-fill cycles before hedging halts
    #[serde(default = "default_max_consecutive_failed_cycles")]
    pub max_consecutive_failed_cycles: u32,
}

// Default value functions
fn default_min_position_usd() -> Decimal {
    Decimal::new(50, 0) // $50
}

fn default_max_position_usd() -> Decimal {
    Decimal::new(1000, 0) // $1000
}

fn default_imbalance_tolerance() -> Decimal {
    Decimal::new(5, 0) // $5
}

fn default_symbol_a() -> String {
    "ETH-USD-PERP".to_string()
}

fn default_symbol_b() -> String {
    "ETHPERP".to_string()
}

fn default_balance_utilization() -> Decimal {
    Decimal::new(95, 2) // 0.95, leaves room for fees
}

fn default_true() -> bool {
    true
}

fn default_per_leg_timeout() -> u64 {
    5_000
}

fn default_poll_interval() -> u64 {
    500
}

fn default_unwind_timeout() -> u64 {
    10_000
}

fn default_call_timeout() -> u64 {
    3_000
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    250
}

fn default_retry_max_delay() -> u64 {
    4_000
}

fn default_retry_max_elapsed() -> u64 {
    15_000
}

fn default_venue_a() -> Venue {
    Venue::Paradex
}

fn default_venue_b() -> Venue {
    Venue::Bitget
}

fn default_paper_venue_a() -> PaperVenueConfig {
    PaperVenueConfig {
        initial_balance_usd: Decimal::new(10_000, 0),
        mark_price: Decimal::new(3_000, 0),
        min_notional: Decimal::new(10, 0),
        step_size: Decimal::ONE,
        max_notional: None,
        fill_latency_ms: 150,
    }
}

fn default_paper_venue_b() -> PaperVenueConfig {
    PaperVenueConfig {
        initial_balance_usd: Decimal::new(10_000, 0),
        mark_price: Decimal::new(3_000, 0),
        min_notional: Decimal::new(5, 0),
        step_size: Decimal::new(5, 1), // 0.5
        max_notional: None,
        fill_latency_ms: 300,
    }
}

fn default_cycle_interval() -> u64 {
    30
}

fn default_db_path() -> String {
    "data/hedger.db".to_string()
}

fn default_max_consecutive_failed_cycles() -> u32 {
    5
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("DVH"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), HedgeError> {
        self.hedge.validate()?;

        ensure(
            self.execution.poll_interval_ms > 0,
            "poll_interval_ms must be positive",
        )?;
        ensure(
            self.execution.per_leg_timeout_ms >= self.execution.poll_interval_ms,
            "per_leg_timeout_ms must be at least one poll interval",
        )?;
        ensure(
            self.execution.call_timeout_ms > 0 && self.execution.unwind_timeout_ms > 0,
            "call_timeout_ms and unwind_timeout_ms must be positive",
        )?;
        ensure(
            self.retry.max_retry_attempts >= 1,
            "max_retry_attempts must be at least 1",
        )?;
        ensure(
            self.retry.retry_base_delay_ms <= self.retry.retry_max_delay_ms,
            "retry_base_delay_ms must not exceed retry_max_delay_ms",
        )?;
        ensure(
            self.venues.venue_a != self.venues.venue_b,
            "venue_a and venue_b must be different venues",
        )?;

        Ok(())
    }
}

impl HedgeConfig {
    /// Validate the sizing range and reconciliation knobs.
    pub fn validate(&self) -> Result<(), HedgeError> {
        ensure(
            self.min_position_usd > Decimal::ZERO,
            "min_position_usd must be positive",
        )?;
        ensure(
            self.min_position_usd <= self.max_position_usd,
            "min_position_usd must not exceed max_position_usd",
        )?;
        ensure(
            self.imbalance_tolerance_usd >= Decimal::ZERO,
            "imbalance_tolerance_usd must not be negative",
        )?;
        ensure(
            self.balance_utilization > Decimal::ZERO && self.balance_utilization <= Decimal::ONE,
            "balance_utilization must be between 0 and 1",
        )?;
        ensure(
            !self.symbol_a.is_empty() && !self.symbol_b.is_empty(),
            "symbol_a and symbol_b must be set",
        )?;
        Ok(())
    }
}

impl ExecutionConfig {
    pub fn per_leg_timeout(&self) -> Duration {
        Duration::from_millis(self.per_leg_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn unwind_timeout(&self) -> Duration {
        Duration::from_millis(self.unwind_timeout_ms)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

fn ensure(condition: bool, message: &str) -> Result<(), HedgeError> {
    if condition {
        Ok(())
    } else {
        Err(HedgeError::Config(message.to_string()))
    }
}

impl Default for HedgeConfig {
    fn default() -> Self {
        Self {
            min_position_usd: default_min_position_usd(),
            max_position_usd: default_max_position_usd(),
            imbalance_tolerance_usd: default_imbalance_tolerance(),
            symbol_a: default_symbol_a(),
            symbol_b: default_symbol_b(),
            size_distribution: SizeDistribution::default(),
            balance_utilization: default_balance_utilization(),
            retry_failed_leg: false,
            unwind_enabled: true,
            venue_a_direction: None,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            per_leg_timeout_ms: default_per_leg_timeout(),
            poll_interval_ms: default_poll_interval(),
            unwind_timeout_ms: default_unwind_timeout(),
            call_timeout_ms: default_call_timeout(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: default_max_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
            retry_max_elapsed_ms: default_retry_max_elapsed(),
        }
    }
}

impl Default for VenuesConfig {
    fn default() -> Self {
        Self {
            venue_a: default_venue_a(),
            venue_b: default_venue_b(),
        }
    }
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            venue_a: default_paper_venue_a(),
            venue_b: default_paper_venue_b(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            cycle_interval_secs: default_cycle_interval(),
            max_cycles: 0,
            db_path: default_db_path(),
            max_consecutive_failed_cycles: default_max_consecutive_failed_cycles(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_inverted_range_is_config_error() {
        let mut config = Config::default();
        config.hedge.min_position_usd = dec!(500);
        config.hedge.max_position_usd = dec!(100);

        assert!(matches!(config.validate(), Err(HedgeError::Config(_))));
    }

    #[test]
    fn test_non_positive_min_is_config_error() {
        let mut config = Config::default();
        config.hedge.min_position_usd = Decimal::ZERO;
        assert!(matches!(config.validate(), Err(HedgeError::Config(_))));
    }

    #[test]
    fn test_same_venue_on_both_legs_rejected() {
        let mut config = Config::default();
        config.venues.venue_b = config.venues.venue_a;
        assert!(matches!(config.validate(), Err(HedgeError::Config(_))));
    }

    #[test]
    fn test_failed_leg_retry_is_opt_in() {
        let config = Config::default();
        assert!(!config.hedge.retry_failed_leg);
        assert!(config.hedge.unwind_enabled);

        let parsed: HedgeConfig = serde_json::from_str("{}").unwrap();
        assert!(!parsed.retry_failed_leg);
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = Config::default();
        config.retry.max_retry_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config = serde_json::from_str(
            r#"{ "hedge": { "min_position_usd": "100", "max_position_usd": "100" },
                 "venues": { "venue_a": "bitget", "venue_b": "paradex" } }"#,
        )
        .unwrap();

        assert_eq!(config.hedge.min_position_usd, dec!(100));
        assert_eq!(config.hedge.imbalance_tolerance_usd, dec!(5));
        assert_eq!(config.venues.venue_a, Venue::Bitget);
        assert_eq!(config.execution.poll_interval_ms, 500);
        assert!(config.validate().is_ok());
    }
}
