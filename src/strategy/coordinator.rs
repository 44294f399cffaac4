//! Hedge cycle coordination.
//!
//! One cycle opens a long on one venue and an equal short on the other:
//!
//! ```text
//! Idle -> Sizing -> Opening -> Reconciling -> BalancedDone
//!                                          -> Unwinding -> UnwoundDone | FailedDone
//!                                          -> FailedDone
//!                                          -> ImbalancedDone (unwinding disabled)
//! ```
//!
//! Both legs run as independent tasks against one shared deadline. Once
//! both have returned, the fills are reconciled: a lagging leg may be
//! topped up once, and any remaining excess is closed with reduce-only
//! orders, one after another.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::executor::{LegFailure, LegFailureKind, LegOrder, OrderExecutor, OrderState};
use super::retry::RetryPolicy;
use super::size_picker::{SizeDecision, SizePicker};
use crate::config::{Config, ExecutionConfig, HedgeConfig};
use crate::error::HedgeError;
use crate::exchange::{Direction, Venue, VenueClient};

/// Equal-notional, opposite-direction pair to open this cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HedgeRequest {
    pub notional_usd: Decimal,
    pub venue_a_leg: Direction,
    pub venue_b_leg: Direction,
    pub created_at: DateTime<Utc>,
}

impl HedgeRequest {
    pub fn new(notional_usd: Decimal, venue_a_leg: Direction) -> Result<Self, HedgeError> {
        if notional_usd <= Decimal::ZERO {
            return Err(HedgeError::Config(format!(
                "hedge notional {} must be positive",
                notional_usd
            )));
        }

        Ok(Self {
            notional_usd,
            venue_a_leg,
            venue_b_leg: venue_a_leg.opposite(),
            created_at: Utc::now(),
        })
    }
}

/// Verdict on a hedge cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Fills match within tolerance
    Balanced,
    /// Fills differ and nothing was done about it
    Imbalanced,
    /// Excess exposure was closed
    Unwound,
    /// Nothing filled, or an unwind did not complete
    Failed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Balanced => "BALANCED",
            Outcome::Imbalanced => "IMBALANCED",
            Outcome::Unwound => "UNWOUND",
            Outcome::Failed => "FAILED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Idle,
    Sizing,
    Opening,
    Reconciling,
    Unwinding,
    BalancedDone,
    UnwoundDone,
    ImbalancedDone,
    FailedDone,
}

/// Which configured venue a leg sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LegSide {
    A,
    B,
}

impl LegSide {
    pub fn other(self) -> Self {
        match self {
            LegSide::A => LegSide::B,
            LegSide::B => LegSide::A,
        }
    }
}

/// A corrective close that was submitted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnwindRecord {
    pub venue: Venue,
    /// Direction of the closing order
    pub direction: Direction,
    pub notional: Decimal,
    pub order: LegOrder,
    pub succeeded: bool,
}

/// Exposure left open after a cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResidualExposure {
    pub venue: Venue,
    pub symbol: String,
    /// Direction of the open position
    pub direction: Direction,
    pub notional: Decimal,
}

/// Everything that happened in one hedge cycle.
#[derive(Debug, Clone, Serialize)]
pub struct HedgePairResult {
    pub cycle_id: String,
    pub request: HedgeRequest,
    pub leg_a: LegOrder,
    pub leg_b: LegOrder,
    /// Re-submission for the lagging leg, if one was made
    pub top_up: Option<LegOrder>,
    /// Verdict on the opening fills before any corrective action
    pub classification: Outcome,
    /// Verdict after corrective action
    pub outcome: Outcome,
    pub unwinds: Vec<UnwindRecord>,
    pub residual_exposure: Vec<ResidualExposure>,
    /// Some order may exist or still fill on a venue without our knowledge
    pub exposure_unknown: bool,
    pub final_state: CycleState,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl HedgePairResult {
    /// Exposure is open or unknown; an operator has to look before the next cycle.
    pub fn needs_operator(&self) -> bool {
        self.exposure_unknown || !self.residual_exposure.is_empty()
    }

    /// Venue that failed in a way retrying cannot fix (auth, unknown symbol).
    pub fn fatal_venue(&self) -> Option<Venue> {
        [&self.leg_a, &self.leg_b]
            .into_iter()
            .chain(self.top_up.as_ref())
            .find(|leg| {
                leg.failure.as_ref().is_some_and(|f| {
                    matches!(f.kind, LegFailureKind::Auth | LegFailureKind::InvalidSymbol)
                })
            })
            .map(|leg| leg.venue)
    }

    /// Emit the result as a structured log line.
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();

        match self.outcome {
            Outcome::Balanced | Outcome::Unwound => {
                info!(target: "hedge_cycle", "HEDGE_CYCLE: {}", json)
            }
            Outcome::Imbalanced => warn!(target: "hedge_cycle", "HEDGE_CYCLE: {}", json),
            Outcome::Failed => error!(target: "hedge_cycle", "HEDGE_CYCLE: {}", json),
        }
    }
}

/// Inputs to the reconciliation policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconcileParams {
    pub tolerance: Decimal,
    pub min_notional_a: Decimal,
    pub min_notional_b: Decimal,
    pub retry_failed_leg: bool,
}

impl ReconcileParams {
    pub fn new(hedge: &HedgeConfig, sizing: &SizeDecision) -> Self {
        Self {
            tolerance: hedge.imbalance_tolerance_usd,
            min_notional_a: sizing.constraints_a.min_notional,
            min_notional_b: sizing.constraints_b.min_notional,
            retry_failed_leg: hedge.retry_failed_leg,
        }
    }

    fn min_notional(&self, side: LegSide) -> Decimal {
        match side {
            LegSide::A => self.min_notional_a,
            LegSide::B => self.min_notional_b,
        }
    }
}

/// Re-submit `notional` on `side` in the leg's original direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopUp {
    pub side: LegSide,
    pub notional: Decimal,
}

/// Reduce the position opened on `side` by `notional`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedClose {
    pub side: LegSide,
    pub notional: Decimal,
}

/// What to do about a pair of settled legs.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilePlan {
    pub classification: Outcome,
    /// Tried first; the closes apply if it is skipped or falls short
    pub top_up: Option<TopUp>,
    pub closes: Vec<PlannedClose>,
}

impl ReconcilePlan {
    fn settled(classification: Outcome) -> Self {
        Self {
            classification,
            top_up: None,
            closes: Vec::new(),
        }
    }
}

/// Decide how to bring two settled legs back to a hedged state.
pub fn plan_reconciliation(leg_a: &LegOrder, leg_b: &LegOrder, params: &ReconcileParams) -> ReconcilePlan {
    let (filled_a, filled_b) = (leg_a.filled_notional, leg_b.filled_notional);

    if !leg_a.has_fill() && !leg_b.has_fill() {
        return ReconcilePlan::settled(Outcome::Failed);
    }
    if leg_a.has_fill() && leg_b.has_fill() && (filled_a - filled_b).abs() <= params.tolerance {
        return ReconcilePlan::settled(Outcome::Balanced);
    }

    let (lead_side, lead, lag) = if filled_a >= filled_b {
        (LegSide::A, leg_a, leg_b)
    } else {
        (LegSide::B, leg_b, leg_a)
    };
    let lag_side = lead_side.other();

    let top_up = (params.retry_failed_leg
        && lead.state == OrderState::Filled
        && lag.is_venue_terminal()
        && !lag.is_fatal()
        && !lag.is_uncertain()
        && lag.unfilled() >= params.min_notional(lag_side))
    .then(|| TopUp {
        side: lag_side,
        notional: lag.unfilled(),
    });

    let closes = if !lag.has_fill() {
        vec![PlannedClose {
            side: lead_side,
            notional: lead.filled_notional,
        }]
    } else {
        let excess = lead.filled_notional - lag.filled_notional;
        let floor = params.min_notional_a.max(params.min_notional_b);

        if lag.filled_notional < floor || excess < params.min_notional(lead_side) {
            vec![
                PlannedClose {
                    side: LegSide::A,
                    notional: filled_a,
                },
                PlannedClose {
                    side: LegSide::B,
                    notional: filled_b,
                },
            ]
        } else {
            vec![PlannedClose {
                side: lead_side,
                notional: excess,
            }]
        }
    };

    ReconcilePlan {
        classification: Outcome::Imbalanced,
        top_up,
        closes,
    }
}

/// Runs hedge cycles across two venues.
pub struct HedgeCoordinator {
    executor_a: OrderExecutor,
    executor_b: OrderExecutor,
    hedge: HedgeConfig,
    per_leg_timeout: Duration,
    unwind_timeout: Duration,
}

impl HedgeCoordinator {
    /// Validate `config` and bind one executor per venue.
    pub fn new(
        config: &Config,
        client_a: Arc<dyn VenueClient>,
        client_b: Arc<dyn VenueClient>,
    ) -> Result<Self, HedgeError> {
        config.validate()?;

        let retry = RetryPolicy::new(&config.retry, config.execution.call_timeout());
        let poll_interval = config.execution.poll_interval();
        let executor_a = OrderExecutor::new(
            client_a,
            config.hedge.symbol_a.clone(),
            retry.for_venue(),
            poll_interval,
        );
        let executor_b = OrderExecutor::new(
            client_b,
            config.hedge.symbol_b.clone(),
            retry.for_venue(),
            poll_interval,
        );

        Ok(Self::from_parts(
            executor_a,
            executor_b,
            config.hedge.clone(),
            &config.execution,
        ))
    }

    pub fn from_parts(
        executor_a: OrderExecutor,
        executor_b: OrderExecutor,
        hedge: HedgeConfig,
        execution: &ExecutionConfig,
    ) -> Self {
        Self {
            executor_a,
            executor_b,
            hedge,
            per_leg_timeout: execution.per_leg_timeout(),
            unwind_timeout: execution.unwind_timeout(),
        }
    }

    pub fn venues(&self) -> (Venue, Venue) {
        (self.executor_a.venue(), self.executor_b.venue())
    }

    /// Per-venue account setup, run once before the first cycle.
    #[instrument(skip(self), name = "prepare_venues")]
    pub async fn prepare_venues(&self) -> Result<(), HedgeError> {
        let (a, b) = tokio::join!(self.executor_a.prepare(), self.executor_b.prepare());
        a?;
        b?;
        info!(
            venue_a = %self.executor_a.venue(),
            venue_b = %self.executor_b.venue(),
            "Venues prepared"
        );
        Ok(())
    }

    /// Run one cycle with the configured hedge settings.
    pub async fn run_cycle(&self) -> Result<HedgePairResult, HedgeError> {
        self.run_cycle_with(&self.hedge).await
    }

    /// Run one cycle with `hedge` overriding the configured settings.
    ///
    /// Errors are only returned before any order is placed; everything
    /// after that is reported in the result.
    #[instrument(skip_all, name = "hedge_cycle")]
    pub async fn run_cycle_with(&self, hedge: &HedgeConfig) -> Result<HedgePairResult, HedgeError> {
        let cycle_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let mut state = CycleState::Idle;

        transition(&cycle_id, &mut state, CycleState::Sizing);
        hedge.validate()?;
        let sizing = SizePicker::from_config(hedge)
            .pick_for_venues(
                hedge.min_position_usd,
                hedge.max_position_usd,
                &self.executor_a,
                &self.executor_b,
            )
            .await?;
        let direction = hedge.venue_a_direction.unwrap_or_else(Direction::random);
        let request = HedgeRequest::new(sizing.notional, direction)?;

        info!(
            %cycle_id,
            notional = %request.notional_usd,
            venue_a = %self.executor_a.venue(),
            venue_a_leg = %request.venue_a_leg,
            venue_b = %self.executor_b.venue(),
            venue_b_leg = %request.venue_b_leg,
            "Opening hedge"
        );

        transition(&cycle_id, &mut state, CycleState::Opening);
        let deadline = Instant::now() + self.per_leg_timeout;
        let (leg_a, leg_b) = self.open_legs(&request, deadline).await;

        transition(&cycle_id, &mut state, CycleState::Reconciling);
        let (mut leg_a, mut leg_b) = tokio::join!(
            self.executor_a.requery(leg_a),
            self.executor_b.requery(leg_b)
        );

        let params = ReconcileParams::new(hedge, &sizing);
        let mut plan = plan_reconciliation(&leg_a, &leg_b, &params);
        let classification = plan.classification;
        debug!(%cycle_id, classification = classification.as_str(), ?plan, "Reconciliation plan");

        let mut top_up_order = None;
        if let Some(top_up) = plan.top_up {
            let (leg, executor) = match top_up.side {
                LegSide::A => (&mut leg_a, &self.executor_a),
                LegSide::B => (&mut leg_b, &self.executor_b),
            };
            let order = self.top_up(executor, leg, top_up.notional).await;
            leg.absorb(&order);
            top_up_order = Some(order);

            let no_retry = ReconcileParams {
                retry_failed_leg: false,
                ..params
            };
            plan = plan_reconciliation(&leg_a, &leg_b, &no_retry);
        }

        let mut unwinds = Vec::new();
        let mut residual_exposure = Vec::new();
        let (outcome, final_state) = if plan.closes.is_empty() {
            match plan.classification {
                Outcome::Failed => (Outcome::Failed, CycleState::FailedDone),
                _ => (Outcome::Balanced, CycleState::BalancedDone),
            }
        } else if !hedge.unwind_enabled {
            for close in &plan.closes {
                let leg = side_leg(close.side, &leg_a, &leg_b);
                residual_exposure.push(exposure(leg, close.notional));
            }
            warn!(%cycle_id, open = residual_exposure.len(), "Unwinding disabled, leaving imbalance open");
            (Outcome::Imbalanced, CycleState::ImbalancedDone)
        } else {
            transition(&cycle_id, &mut state, CycleState::Unwinding);
            for close in &plan.closes {
                let (leg, executor) = match close.side {
                    LegSide::A => (&leg_a, &self.executor_a),
                    LegSide::B => (&leg_b, &self.executor_b),
                };
                let record = self.unwind(executor, leg, close.notional).await;
                let remaining = close.notional - record.order.filled_notional;
                if !record.succeeded && remaining > Decimal::ZERO {
                    residual_exposure.push(exposure(leg, remaining));
                }
                unwinds.push(record);
            }

            if residual_exposure.is_empty() {
                (Outcome::Unwound, CycleState::UnwoundDone)
            } else {
                error!(
                    %cycle_id,
                    residual = ?residual_exposure,
                    "CRITICAL: Unwind incomplete, exposure left open"
                );
                (Outcome::Failed, CycleState::FailedDone)
            }
        };
        transition(&cycle_id, &mut state, final_state);

        let exposure_unknown = leg_a.is_uncertain()
            || leg_b.is_uncertain()
            || top_up_order.as_ref().is_some_and(LegOrder::is_uncertain)
            || unwinds.iter().any(|u| u.order.is_uncertain());
        if exposure_unknown {
            error!(%cycle_id, "Order status unresolved, venue exposure unknown");
        }

        Ok(HedgePairResult {
            cycle_id,
            request,
            leg_a,
            leg_b,
            top_up: top_up_order,
            classification,
            outcome,
            unwinds,
            residual_exposure,
            exposure_unknown,
            final_state,
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Spawn both legs against the shared deadline and wait for both.
    async fn open_legs(&self, request: &HedgeRequest, deadline: Instant) -> (LegOrder, LegOrder) {
        let notional = request.notional_usd;

        let executor = self.executor_a.clone();
        let direction_a = request.venue_a_leg;
        let task_a = tokio::spawn(async move { executor.open(direction_a, notional, deadline).await });

        let executor = self.executor_b.clone();
        let direction_b = request.venue_b_leg;
        let task_b = tokio::spawn(async move { executor.open(direction_b, notional, deadline).await });

        let (joined_a, joined_b) = tokio::join!(task_a, task_b);
        (
            settle_leg(joined_a, &self.executor_a, direction_a, notional),
            settle_leg(joined_b, &self.executor_b, direction_b, notional),
        )
    }

    async fn top_up(&self, executor: &OrderExecutor, leg: &LegOrder, notional: Decimal) -> LegOrder {
        info!(
            venue = %leg.venue,
            direction = %leg.direction,
            %notional,
            previous_state = leg.state.as_str(),
            "Re-submitting lagging leg"
        );

        let deadline = Instant::now() + self.per_leg_timeout;
        match executor.open(leg.direction, notional, deadline).await {
            Ok(order) => executor.requery(order).await,
            Err(e) => {
                warn!(venue = %leg.venue, error = %e, "Top-up order failed");
                LegOrder::failed(
                    leg.venue,
                    leg.symbol.clone(),
                    leg.direction,
                    notional,
                    LegFailure::from_hedge_error(&e),
                )
            }
        }
    }

    async fn unwind(&self, executor: &OrderExecutor, leg: &LegOrder, notional: Decimal) -> UnwindRecord {
        let closing = leg.direction.opposite();
        let deadline = Instant::now() + self.unwind_timeout;

        let order = match executor.close(leg.direction, notional, deadline).await {
            Ok(order) => order,
            Err(e) => {
                error!(venue = %leg.venue, error = %e, "CRITICAL: Failed to submit unwind");
                LegOrder::failed(
                    leg.venue,
                    leg.symbol.clone(),
                    closing,
                    notional,
                    LegFailure::from_hedge_error(&e),
                )
            }
        };

        let succeeded = order.state == OrderState::Filled;
        if succeeded {
            info!(venue = %leg.venue, direction = %closing, %notional, "Unwind filled");
        } else {
            error!(
                venue = %leg.venue,
                direction = %closing,
                %notional,
                filled = %order.filled_notional,
                state = order.state.as_str(),
                "CRITICAL: Unwind did not fill"
            );
        }

        UnwindRecord {
            venue: leg.venue,
            direction: closing,
            notional,
            order,
            succeeded,
        }
    }
}

fn transition(cycle_id: &str, state: &mut CycleState, next: CycleState) {
    debug!(%cycle_id, from = ?*state, to = ?next, "Cycle state transition");
    *state = next;
}

fn side_leg<'a>(side: LegSide, leg_a: &'a LegOrder, leg_b: &'a LegOrder) -> &'a LegOrder {
    match side {
        LegSide::A => leg_a,
        LegSide::B => leg_b,
    }
}

fn exposure(leg: &LegOrder, notional: Decimal) -> ResidualExposure {
    ResidualExposure {
        venue: leg.venue,
        symbol: leg.symbol.clone(),
        direction: leg.direction,
        notional,
    }
}

/// Turn a joined leg task into a `LegOrder`, whatever happened to it.
fn settle_leg(
    joined: Result<Result<LegOrder, HedgeError>, JoinError>,
    executor: &OrderExecutor,
    direction: Direction,
    notional: Decimal,
) -> LegOrder {
    let failure = match joined {
        Ok(Ok(leg)) => return leg,
        Ok(Err(e)) => {
            error!(venue = %executor.venue(), error = %e, "Leg failed");
            LegFailure::from_hedge_error(&e)
        }
        Err(e) => {
            error!(venue = %executor.venue(), error = %e, "Leg task aborted");
            LegFailure::task_aborted(e.to_string())
        }
    };

    LegOrder::failed(
        executor.venue(),
        executor.symbol(),
        direction,
        notional,
        failure,
    )
}
