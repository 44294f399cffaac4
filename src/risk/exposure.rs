//! Exposure guard.
//!
//! Watches cycle results and errors for conditions that make further
//! hedging unsafe:
//! - Exposure left open after an unwind
//! - Orders whose fate is unknown
//! - Auth or symbol errors on a venue
//! - A run of cycles in which nothing filled
//!
//! Any of these halts the driver until an operator acknowledges it.
//! Alerts are emitted as structured JSON for log analysis.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::HedgeError;
use crate::exchange::Venue;
use crate::strategy::{HedgePairResult, Outcome, ResidualExposure};

/// What tripped the guard.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type")]
pub enum ExposureAlertType {
    /// An unwind left positions open
    ResidualExposure {
        cycle_id: String,
        positions: Vec<ResidualExposure>,
    },
    /// An order may exist or still fill without our knowledge
    UnknownExposure { cycle_id: String },
    /// Credentials or market listing broken on a venue
    VenueFatal { venue: Venue, message: String },
    /// Nothing filled for several cycles in a row
    ConsecutiveFailures { count: u32 },
    /// Configuration cannot produce a valid cycle
    InvalidConfig { message: String },
}

/// Severity levels for alerts.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "INFO",
            AlertSeverity::Warning => "WARNING",
            AlertSeverity::Error => "ERROR",
            AlertSeverity::Critical => "CRITICAL",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExposureAlert {
    pub alert_id: String,
    pub timestamp: DateTime<Utc>,
    pub alert_type: ExposureAlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub should_halt: bool,
    pub suggested_action: String,
}

impl ExposureAlert {
    fn new(
        alert_type: ExposureAlertType,
        severity: AlertSeverity,
        message: String,
        should_halt: bool,
        suggested_action: &str,
    ) -> Self {
        let timestamp = Utc::now();
        let alert_id = format!("exposure-{}-{:08x}", timestamp.timestamp(), rand::random::<u32>());

        Self {
            alert_id,
            timestamp,
            alert_type,
            severity,
            message,
            should_halt,
            suggested_action: suggested_action.to_string(),
        }
    }

    /// Emit alert as structured log.
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();

        match self.severity {
            AlertSeverity::Info => info!(target: "risk_alert", "RISK_ALERT: {}", json),
            AlertSeverity::Warning => warn!(target: "risk_alert", "RISK_ALERT: {}", json),
            AlertSeverity::Error | AlertSeverity::Critical => {
                error!(target: "risk_alert", "RISK_ALERT: {}", json)
            }
        }
    }
}

/// Halt-until-acknowledged latch over cycle results.
#[derive(Debug)]
pub struct ExposureGuard {
    max_consecutive_failed_cycles: u32,
    consecutive_failed: u32,
    halt_reason: Option<String>,
    halted_at: Option<DateTime<Utc>>,
    active_alerts: Vec<ExposureAlert>,
}

impl ExposureGuard {
    /// `max_consecutive_failed_cycles` of 0 disables the failure-run check.
    pub fn new(max_consecutive_failed_cycles: u32) -> Self {
        Self {
            max_consecutive_failed_cycles,
            consecutive_failed: 0,
            halt_reason: None,
            halted_at: None,
            active_alerts: Vec::new(),
        }
    }

    /// Inspect a finished cycle. Returns the alert it raised, if any.
    pub fn record_cycle(&mut self, result: &HedgePairResult) -> Option<ExposureAlert> {
        if !result.residual_exposure.is_empty() {
            let total: Decimal = result.residual_exposure.iter().map(|r| r.notional).sum();
            return Some(self.raise(ExposureAlert::new(
                ExposureAlertType::ResidualExposure {
                    cycle_id: result.cycle_id.clone(),
                    positions: result.residual_exposure.clone(),
                },
                AlertSeverity::Critical,
                format!(
                    "Cycle {} left ${} of unhedged exposure open",
                    result.cycle_id, total
                ),
                true,
                "Close the listed positions manually, then run `ack`",
            )));
        }

        if result.exposure_unknown {
            return Some(self.raise(ExposureAlert::new(
                ExposureAlertType::UnknownExposure {
                    cycle_id: result.cycle_id.clone(),
                },
                AlertSeverity::Critical,
                format!("Cycle {} has orders in unknown state", result.cycle_id),
                true,
                "Check open orders and positions on both venues, then run `ack`",
            )));
        }

        if let Some(venue) = result.fatal_venue() {
            return Some(self.raise(venue_fatal(venue, "leg failed with a fatal venue error")));
        }

        if result.outcome == Outcome::Failed {
            return self.record_failure();
        }

        if self.consecutive_failed > 0 {
            debug!(
                previous_failures = self.consecutive_failed,
                "Cycle filled - resetting failure counter"
            );
        }
        self.consecutive_failed = 0;
        None
    }

    /// Inspect an error that ended a cycle before any order was placed.
    pub fn record_error(&mut self, error: &HedgeError) -> Option<ExposureAlert> {
        match error {
            HedgeError::Auth { venue, message } => {
                Some(self.raise(venue_fatal(*venue, message)))
            }
            HedgeError::InvalidSymbol { venue, symbol } => {
                Some(self.raise(venue_fatal(*venue, &format!("unknown symbol {}", symbol))))
            }
            HedgeError::Config(message) => Some(self.raise(ExposureAlert::new(
                ExposureAlertType::InvalidConfig {
                    message: message.clone(),
                },
                AlertSeverity::Critical,
                format!("Invalid configuration: {}", message),
                true,
                "Fix the configuration and restart",
            ))),
            HedgeError::SizeUnavailable(_)
            | HedgeError::VenueUnavailable { .. }
            | HedgeError::InsufficientBalance { .. } => self.record_failure(),
        }
    }

    pub fn is_halted(&self) -> bool {
        self.halt_reason.is_some()
    }

    pub fn halt_reason(&self) -> Option<&str> {
        self.halt_reason.as_deref()
    }

    pub fn halted_at(&self) -> Option<DateTime<Utc>> {
        self.halted_at
    }

    pub fn active_alerts(&self) -> &[ExposureAlert] {
        &self.active_alerts
    }

    pub fn consecutive_failed(&self) -> u32 {
        self.consecutive_failed
    }

    /// Clear the halt. Returns whether the guard was halted.
    pub fn acknowledge(&mut self, operator: &str) -> bool {
        let was_halted = self.is_halted();
        if was_halted {
            info!(
                %operator,
                reason = self.halt_reason.as_deref().unwrap_or_default(),
                "Halt acknowledged"
            );
        }

        self.halt_reason = None;
        self.halted_at = None;
        self.consecutive_failed = 0;
        self.active_alerts.clear();
        was_halted
    }

    /// Re-enter a halt persisted by a previous run.
    pub fn restore(&mut self, reason: String, halted_at: DateTime<Utc>) {
        warn!(%reason, %halted_at, "Restored unacknowledged halt");
        self.halt_reason = Some(reason);
        self.halted_at = Some(halted_at);
    }

    fn record_failure(&mut self) -> Option<ExposureAlert> {
        self.consecutive_failed += 1;
        debug!(consecutive_failed = self.consecutive_failed, "Recorded failed cycle");

        let limit = self.max_consecutive_failed_cycles;
        if limit == 0 || self.consecutive_failed < limit {
            return None;
        }

        let count = self.consecutive_failed;
        Some(self.raise(ExposureAlert::new(
            ExposureAlertType::ConsecutiveFailures { count },
            AlertSeverity::Error,
            format!("{} consecutive cycles without a fill", count),
            true,
            "Check venue connectivity and balances, then run `ack`",
        )))
    }

    fn raise(&mut self, alert: ExposureAlert) -> ExposureAlert {
        if alert.should_halt && self.halt_reason.is_none() {
            self.halt_reason = Some(alert.message.clone());
            self.halted_at = Some(alert.timestamp);
        }
        alert.emit();
        self.active_alerts.push(alert.clone());
        alert
    }
}

fn venue_fatal(venue: Venue, message: &str) -> ExposureAlert {
    ExposureAlert::new(
        ExposureAlertType::VenueFatal {
            venue,
            message: message.to_string(),
        },
        AlertSeverity::Critical,
        format!("{} is unusable: {}", venue, message),
        true,
        "Fix credentials or symbol configuration for the venue, then run `ack`",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::Direction;
    use crate::strategy::{CycleState, HedgeRequest, LegFailure, LegFailureKind, LegOrder};
    use rust_decimal_macros::dec;

    fn result(outcome: Outcome) -> HedgePairResult {
        let request = HedgeRequest::new(dec!(100), Direction::Long).unwrap();
        HedgePairResult {
            cycle_id: "c-1".into(),
            leg_a: LegOrder::new(Venue::Paradex, "ETH-USD-PERP", Direction::Long, dec!(100), "a"),
            leg_b: LegOrder::new(Venue::Bitget, "ETHPERP", Direction::Short, dec!(100), "b"),
            request,
            top_up: None,
            classification: outcome,
            outcome,
            unwinds: Vec::new(),
            residual_exposure: Vec::new(),
            exposure_unknown: false,
            final_state: CycleState::BalancedDone,
            started_at: Utc::now(),
            finished_at: Utc::now(),
        }
    }

    #[test]
    fn test_balanced_cycle_does_not_halt() {
        let mut guard = ExposureGuard::new(3);
        assert!(guard.record_cycle(&result(Outcome::Balanced)).is_none());
        assert!(!guard.is_halted());
    }

    #[test]
    fn test_residual_exposure_halts_until_ack() {
        let mut guard = ExposureGuard::new(3);
        let mut failed = result(Outcome::Failed);
        failed.residual_exposure.push(ResidualExposure {
            venue: Venue::Paradex,
            symbol: "ETH-USD-PERP".into(),
            direction: Direction::Long,
            notional: dec!(100),
        });

        let alert = guard.record_cycle(&failed).unwrap();
        assert_eq!(alert.severity, AlertSeverity::Critical);
        assert!(alert.should_halt);
        assert!(guard.is_halted());

        assert!(guard.acknowledge("alice"));
        assert!(!guard.is_halted());
        assert!(!guard.acknowledge("alice"));
    }

    #[test]
    fn test_unknown_exposure_halts() {
        let mut guard = ExposureGuard::new(3);
        let mut unknown = result(Outcome::Unwound);
        unknown.exposure_unknown = true;

        let alert = guard.record_cycle(&unknown).unwrap();
        assert!(matches!(alert.alert_type, ExposureAlertType::UnknownExposure { .. }));
        assert!(guard.is_halted());
    }

    #[test]
    fn test_fatal_leg_halts() {
        let mut guard = ExposureGuard::new(3);
        let mut cycle = result(Outcome::Failed);
        cycle.leg_b = LegOrder::failed(
            Venue::Bitget,
            "ETHPERP",
            Direction::Short,
            dec!(100),
            LegFailure {
                kind: LegFailureKind::Auth,
                message: "bad key".into(),
                submission_uncertain: false,
            },
        );

        let alert = guard.record_cycle(&cycle).unwrap();
        assert_eq!(
            alert.alert_type,
            ExposureAlertType::VenueFatal {
                venue: Venue::Bitget,
                message: "leg failed with a fatal venue error".into()
            }
        );
        assert!(guard.is_halted());
    }

    #[test]
    fn test_consecutive_failures_halt() {
        let mut guard = ExposureGuard::new(3);

        assert!(guard.record_cycle(&result(Outcome::Failed)).is_none());
        assert!(guard
            .record_error(&HedgeError::SizeUnavailable("no lattice".into()))
            .is_none());
        assert_eq!(guard.consecutive_failed(), 2);

        let alert = guard.record_cycle(&result(Outcome::Failed)).unwrap();
        assert!(matches!(
            alert.alert_type,
            ExposureAlertType::ConsecutiveFailures { count: 3 }
        ));
        assert!(guard.is_halted());
    }

    #[test]
    fn test_success_resets_failure_run() {
        let mut guard = ExposureGuard::new(2);
        guard.record_cycle(&result(Outcome::Failed));
        guard.record_cycle(&result(Outcome::Unwound));
        assert_eq!(guard.consecutive_failed(), 0);
        assert!(guard.record_cycle(&result(Outcome::Failed)).is_none());
    }

    #[test]
    fn test_auth_error_halts() {
        let mut guard = ExposureGuard::new(0);
        let alert = guard
            .record_error(&HedgeError::Auth {
                venue: Venue::Paradex,
                message: "expired jwt".into(),
            })
            .unwrap();

        assert!(alert.should_halt);
        assert_eq!(guard.halt_reason(), Some("Paradex is unusable: expired jwt"));
    }

    #[test]
    fn test_restore_persisted_halt() {
        let mut guard = ExposureGuard::new(3);
        let at = Utc::now();
        guard.restore("residual exposure".into(), at);

        assert!(guard.is_halted());
        assert_eq!(guard.halted_at(), Some(at));
    }
}
