//! Hedge execution.
//!
//! Contains the core logic for:
//! - Picking a notional both venues can trade
//! - Retrying flaky venue calls with backoff
//! - Placing and tracking a single leg
//! - Coordinating both legs and reconciling their fills

mod coordinator;
mod executor;
mod retry;
mod size_picker;

pub use coordinator::{
    plan_reconciliation, CycleState, HedgeCoordinator, HedgePairResult, HedgeRequest, LegSide,
    Outcome, PlannedClose, ReconcileParams, ReconcilePlan, ResidualExposure, TopUp, UnwindRecord,
};
pub use executor::{LegFailure, LegFailureKind, LegOrder, OrderExecutor, OrderState};
pub use retry::{
    RateLimitTracker, RetryAttempt, RetryError, RetryPolicy, RetryStats, TransientPredicate,
};
pub use size_picker::{SizeDecision, SizePicker};
