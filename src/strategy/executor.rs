//! Order execution for a single hedge leg.
//!
//! An `OrderExecutor` is bound to one venue client and symbol. It submits a
//! market order through the retry policy, then polls the venue until the
//! order reaches a terminal state or the shared deadline passes, and
//! classifies the outcome into a `LegOrder`.

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, timeout, timeout_at, Instant};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::retry::{RetryError, RetryPolicy};
use crate::error::{HedgeError, VenueError};
use crate::exchange::{
    Direction, LotConstraints, OrderRequest, OrderStatusReport, Venue, VenueClient,
    VenueOrderState,
};

/// Classified state of a leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// Submitted, not yet classified
    Pending,
    Filled,
    /// Some but not all of the notional filled
    PartiallyFilled,
    /// Nothing filled and the venue refused or cancelled the order
    Rejected,
    /// Nothing filled by the deadline; the order may still be live
    TimedOut,
}

impl OrderState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::Pending => "PENDING",
            OrderState::Filled => "FILLED",
            OrderState::PartiallyFilled => "PARTIALLY_FILLED",
            OrderState::Rejected => "REJECTED",
            OrderState::TimedOut => "TIMED_OUT",
        }
    }
}

/// Why a leg could not be submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LegFailureKind {
    Auth,
    InvalidSymbol,
    InsufficientBalance,
    VenueUnavailable,
    /// The leg task panicked or was cancelled
    TaskAborted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegFailure {
    pub kind: LegFailureKind,
    pub message: String,
    /// The order may exist on the venue even though we never got an id back
    pub submission_uncertain: bool,
}

impl LegFailure {
    pub fn from_hedge_error(error: &HedgeError) -> Self {
        let (kind, submission_uncertain) = match error {
            HedgeError::Auth { .. } => (LegFailureKind::Auth, false),
            HedgeError::InvalidSymbol { .. } => (LegFailureKind::InvalidSymbol, false),
            HedgeError::InsufficientBalance { .. } => (LegFailureKind::InsufficientBalance, false),
            // Config and sizing errors are raised before any order exists
            HedgeError::VenueUnavailable { .. }
            | HedgeError::Config(_)
            | HedgeError::SizeUnavailable(_) => (LegFailureKind::VenueUnavailable, true),
        };

        Self {
            kind,
            message: error.to_string(),
            submission_uncertain,
        }
    }

    pub fn task_aborted(message: impl Into<String>) -> Self {
        Self {
            kind: LegFailureKind::TaskAborted,
            message: message.into(),
            submission_uncertain: true,
        }
    }

    /// Retrying on this venue cannot succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            LegFailureKind::Auth | LegFailureKind::InvalidSymbol | LegFailureKind::InsufficientBalance
        )
    }
}

/// One order on one venue and what became of it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegOrder {
    pub venue: Venue,
    pub symbol: String,
    pub direction: Direction,
    pub requested_notional: Decimal,
    pub filled_notional: Decimal,
    pub avg_price: Option<Decimal>,
    pub state: OrderState,
    pub venue_order_id: Option<String>,
    pub client_order_id: String,
    /// Transient submission failures that were retried
    pub submit_retries: u32,
    /// Last state the venue reported for the order
    pub last_venue_state: Option<VenueOrderState>,
    pub failure: Option<LegFailure>,
}

impl LegOrder {
    pub fn new(
        venue: Venue,
        symbol: impl Into<String>,
        direction: Direction,
        requested_notional: Decimal,
        client_order_id: impl Into<String>,
    ) -> Self {
        Self {
            venue,
            symbol: symbol.into(),
            direction,
            requested_notional,
            filled_notional: Decimal::ZERO,
            avg_price: None,
            state: OrderState::Pending,
            venue_order_id: None,
            client_order_id: client_order_id.into(),
            submit_retries: 0,
            last_venue_state: None,
            failure: None,
        }
    }

    /// A leg that never made it onto the venue.
    pub fn failed(
        venue: Venue,
        symbol: impl Into<String>,
        direction: Direction,
        requested_notional: Decimal,
        failure: LegFailure,
    ) -> Self {
        let mut leg = Self::new(venue, symbol, direction, requested_notional, String::new());
        leg.state = OrderState::Rejected;
        leg.failure = Some(failure);
        leg
    }

    /// Fold a venue status report into the leg. Fills never exceed the request.
    pub fn apply_report(&mut self, report: &OrderStatusReport) {
        self.filled_notional = report
            .filled_notional
            .max(Decimal::ZERO)
            .min(self.requested_notional);
        if report.avg_price.is_some() {
            self.avg_price = report.avg_price;
        }
        self.last_venue_state = Some(report.state);
    }

    /// Derive `state` from the fill and the last venue state.
    pub fn finalize(&mut self) {
        if self.failure.is_some() {
            self.state = OrderState::Rejected;
            return;
        }

        let venue_terminal = self.is_venue_terminal();
        self.state = if self.filled_notional >= self.requested_notional {
            OrderState::Filled
        } else if self.filled_notional > Decimal::ZERO {
            OrderState::PartiallyFilled
        } else if venue_terminal {
            OrderState::Rejected
        } else {
            OrderState::TimedOut
        };
    }

    /// Merge a top-up order for the missing notional into this leg.
    pub fn absorb(&mut self, top_up: &LegOrder) {
        let previous = self.filled_notional;
        let added = top_up.filled_notional;
        let total = (previous + added).min(self.requested_notional);

        self.avg_price = match (self.avg_price, top_up.avg_price) {
            (Some(p1), Some(p2)) if total > Decimal::ZERO => {
                Some((p1 * previous + p2 * added) / (previous + added))
            }
            (None, price) | (price, None) => price,
            (price, _) => price,
        };
        self.filled_notional = total;
        if top_up.venue_order_id.is_some() {
            self.last_venue_state = top_up.last_venue_state;
        }
        self.finalize();
    }

    pub fn has_fill(&self) -> bool {
        self.filled_notional > Decimal::ZERO
    }

    pub fn unfilled(&self) -> Decimal {
        self.requested_notional - self.filled_notional
    }

    /// The venue will not fill this order any further.
    pub fn is_venue_terminal(&self) -> bool {
        self.last_venue_state
            .map(VenueOrderState::is_terminal)
            .unwrap_or(false)
    }

    /// The order may still be resting on the venue, or may exist without our knowledge.
    pub fn is_uncertain(&self) -> bool {
        match &self.failure {
            Some(failure) => failure.submission_uncertain,
            None => self.venue_order_id.is_some() && !self.is_venue_terminal(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.failure.as_ref().map(LegFailure::is_fatal).unwrap_or(false)
    }
}

/// While an accepted order is being polled, only credential and symbol
/// errors end the poll early; anything else may be replication lag.
fn status_retryable(error: &VenueError) -> bool {
    !matches!(error, VenueError::Auth(_) | VenueError::InvalidSymbol(_))
}

/// Places and tracks orders on one venue.
#[derive(Clone)]
pub struct OrderExecutor {
    client: Arc<dyn VenueClient>,
    symbol: String,
    retry: Arc<RetryPolicy>,
    /// Shares cooldown and counters with `retry`
    status_retry: Arc<RetryPolicy>,
    poll_interval: Duration,
}

impl OrderExecutor {
    pub fn new(
        client: Arc<dyn VenueClient>,
        symbol: impl Into<String>,
        retry: RetryPolicy,
        poll_interval: Duration,
    ) -> Self {
        let status_retry = retry.clone().with_predicate(status_retryable);
        Self {
            client,
            symbol: symbol.into(),
            retry: Arc::new(retry),
            status_retry: Arc::new(status_retry),
            poll_interval,
        }
    }

    pub fn venue(&self) -> Venue {
        self.client.venue()
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Open a position leg with a market order and track it until `deadline`.
    ///
    /// Business-level non-fills come back as a `LegOrder`; only permanent
    /// account errors and exhausted transient failures are errors. No
    /// placement attempt starts at or after `deadline`.
    #[instrument(skip(self, deadline), name = "leg_open", fields(venue = %self.venue()))]
    pub async fn open(
        &self,
        direction: Direction,
        notional_usd: Decimal,
        deadline: Instant,
    ) -> Result<LegOrder, HedgeError> {
        let request = OrderRequest::market(self.symbol.clone(), direction, notional_usd);
        let mut leg = LegOrder::new(
            self.venue(),
            self.symbol.clone(),
            direction,
            notional_usd,
            request.client_order_id.clone(),
        );

        info!(
            venue = %self.venue(),
            symbol = %self.symbol,
            %direction,
            notional = %notional_usd,
            client_order_id = %request.client_order_id,
            "Placing leg order"
        );

        let mut retries = 0;
        let placed = self
            .retry
            .execute_observed(
                "place_order",
                Some(deadline),
                || self.client.place_order(&request),
                |_| retries += 1,
            )
            .await;
        leg.submit_retries = retries;

        match self.accept(&mut leg, placed)? {
            true => Ok(self.track(leg, deadline).await),
            false => Ok(leg),
        }
    }

    /// Reduce a position in `position_direction` by `notional_usd`.
    #[instrument(skip(self, deadline), name = "leg_close", fields(venue = %self.venue()))]
    pub async fn close(
        &self,
        position_direction: Direction,
        notional_usd: Decimal,
        deadline: Instant,
    ) -> Result<LegOrder, HedgeError> {
        let closing = position_direction.opposite();
        let mut leg = LegOrder::new(
            self.venue(),
            self.symbol.clone(),
            closing,
            notional_usd,
            Uuid::new_v4().to_string(),
        );

        info!(
            venue = %self.venue(),
            symbol = %self.symbol,
            direction = %closing,
            notional = %notional_usd,
            "Submitting reduce-only close"
        );

        let mut retries = 0;
        let placed = self
            .retry
            .execute_observed(
                "close_position",
                Some(deadline),
                || self.client.close_position(&self.symbol, notional_usd, closing),
                |_| retries += 1,
            )
            .await;
        leg.submit_retries = retries;

        match self.accept(&mut leg, placed)? {
            true => Ok(self.track(leg, deadline).await),
            false => Ok(leg),
        }
    }

    /// Query a leg that may still be live once more and reclassify it.
    pub async fn requery(&self, mut leg: LegOrder) -> LegOrder {
        let Some(order_id) = leg.venue_order_id.clone() else {
            return leg;
        };
        if leg.is_venue_terminal() {
            return leg;
        }

        match timeout(
            self.retry.call_timeout(),
            self.client.get_order_status(&self.symbol, &order_id),
        )
        .await
        {
            Ok(Ok(report)) => {
                debug!(venue = %leg.venue, %order_id, state = ?report.state, "Re-queried leg");
                leg.apply_report(&report);
            }
            Ok(Err(e)) => warn!(venue = %leg.venue, %order_id, error = %e, "Re-query failed"),
            Err(_) => warn!(venue = %leg.venue, %order_id, "Re-query timed out"),
        }

        leg.finalize();
        leg
    }

    pub async fn lot_constraints(&self) -> Result<LotConstraints, HedgeError> {
        self.retry
            .execute("lot_constraints", || self.client.get_lot_constraints(&self.symbol))
            .await
            .map_err(|e| e.into_hedge_error(self.venue(), &self.symbol))
    }

    pub async fn available_balance(&self) -> Result<Decimal, HedgeError> {
        self.retry
            .execute("available_balance", || self.client.get_available_balance())
            .await
            .map_err(|e| e.into_hedge_error(self.venue(), &self.symbol))
    }

    /// One-off account setup on the venue.
    pub async fn prepare(&self) -> Result<(), HedgeError> {
        self.retry
            .execute("prepare", || self.client.prepare(&self.symbol))
            .await
            .map_err(|e| e.into_hedge_error(self.venue(), &self.symbol))
    }

    /// Record the placement outcome. Returns whether the order needs tracking.
    fn accept(
        &self,
        leg: &mut LegOrder,
        placed: Result<String, RetryError>,
    ) -> Result<bool, HedgeError> {
        match placed {
            Ok(order_id) => {
                debug!(venue = %leg.venue, %order_id, "Order accepted");
                leg.venue_order_id = Some(order_id);
                Ok(true)
            }
            Err(RetryError::Permanent(VenueError::OrderRejected(reason))) => {
                warn!(venue = %leg.venue, symbol = %leg.symbol, %reason, "Order rejected at placement");
                leg.last_venue_state = Some(VenueOrderState::Rejected);
                leg.state = OrderState::Rejected;
                Ok(false)
            }
            Err(e) => Err(e.into_hedge_error(leg.venue, &leg.symbol)),
        }
    }

    /// Poll until venue-terminal or past the deadline, then classify.
    async fn track(&self, mut leg: LegOrder, deadline: Instant) -> LegOrder {
        let Some(order_id) = leg.venue_order_id.clone() else {
            leg.finalize();
            return leg;
        };

        loop {
            match self.poll_once(&order_id, deadline).await {
                Some(report) => {
                    leg.apply_report(&report);
                    if report.state.is_terminal() {
                        break;
                    }
                }
                None => break,
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep_until((now + self.poll_interval).min(deadline)).await;
        }

        leg.finalize();
        info!(
            venue = %leg.venue,
            %order_id,
            state = leg.state.as_str(),
            filled = %leg.filled_notional,
            requested = %leg.requested_notional,
            "Leg settled"
        );
        leg
    }

    /// One status query, retried inside the policy. The bound never cuts the
    /// very last poll shorter than one call timeout.
    async fn poll_once(&self, order_id: &str, deadline: Instant) -> Option<OrderStatusReport> {
        let bound = deadline.max(Instant::now() + self.retry.call_timeout());
        let polled = timeout_at(
            bound,
            self.status_retry.execute("order_status", || {
                self.client.get_order_status(&self.symbol, order_id)
            }),
        )
        .await;

        match polled {
            Ok(Ok(report)) => Some(report),
            Ok(Err(e)) => {
                warn!(venue = %self.venue(), %order_id, error = %e, "Order status unavailable");
                None
            }
            Err(_) => {
                warn!(venue = %self.venue(), %order_id, "Order status poll ran past deadline");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::error::TransientKind;
    use crate::exchange::{FillScript, MockVenueClient, PaperCall, PaperVenueClient};
    use rust_decimal_macros::dec;

    const SYMBOL: &str = "ETH-USD-PERP";

    fn retry() -> RetryPolicy {
        let config = RetryConfig {
            max_retry_attempts: 3,
            retry_base_delay_ms: 50,
            retry_max_delay_ms: 200,
            retry_max_elapsed_ms: 2_000,
        };
        RetryPolicy::new(&config, Duration::from_millis(500))
    }

    fn paper() -> Arc<PaperVenueClient> {
        Arc::new(
            PaperVenueClient::new(Venue::Paradex, LotConstraints::new(dec!(10), dec!(1)))
                .with_fill_latency(Duration::from_millis(200)),
        )
    }

    fn executor(client: Arc<PaperVenueClient>) -> OrderExecutor {
        OrderExecutor::new(client, SYMBOL, retry(), Duration::from_millis(100))
    }

    fn deadline(ms: u64) -> Instant {
        Instant::now() + Duration::from_millis(ms)
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_fills() {
        let client = paper();
        let leg = executor(client.clone())
            .open(Direction::Long, dec!(100), deadline(5_000))
            .await
            .unwrap();

        assert_eq!(leg.state, OrderState::Filled);
        assert_eq!(leg.filled_notional, dec!(100));
        assert_eq!(leg.avg_price, Some(dec!(3000)));
        assert_eq!(leg.venue_order_id.as_deref(), Some("PDX-1"));
        assert!(!leg.client_order_id.is_empty());
        assert_eq!(client.position(SYMBOL).await, dec!(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resting_order_times_out() {
        let client = paper();
        client.push_open_script(FillScript::Rest).await;

        let start = Instant::now();
        let leg = executor(client)
            .open(Direction::Short, dec!(100), deadline(1_000))
            .await
            .unwrap();

        assert_eq!(leg.state, OrderState::TimedOut);
        assert!(leg.is_uncertain());
        assert!(Instant::now() - start <= Duration::from_millis(1_500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_then_cancel() {
        let client = paper();
        client
            .push_open_script(FillScript::Partial {
                notional: dec!(40),
                after: Duration::from_millis(100),
                cancel_rest: true,
            })
            .await;

        let leg = executor(client)
            .open(Direction::Long, dec!(100), deadline(5_000))
            .await
            .unwrap();

        assert_eq!(leg.state, OrderState::PartiallyFilled);
        assert_eq!(leg.filled_notional, dec!(40));
        assert_eq!(leg.unfilled(), dec!(60));
        assert!(leg.is_venue_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_venue_cancel_without_fill_is_rejected() {
        let client = paper();
        client
            .push_open_script(FillScript::Reject {
                after: Duration::from_millis(100),
                reason: "self trade".into(),
            })
            .await;

        let leg = executor(client)
            .open(Direction::Long, dec!(100), deadline(5_000))
            .await
            .unwrap();

        assert_eq!(leg.state, OrderState::Rejected);
        assert!(!leg.is_uncertain());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_rejection_is_a_rejected_leg() {
        let client = paper();
        client
            .push_placement_error(VenueError::OrderRejected("price band".into()))
            .await;

        let leg = executor(client.clone())
            .open(Direction::Long, dec!(100), deadline(5_000))
            .await
            .unwrap();

        assert_eq!(leg.state, OrderState::Rejected);
        assert_eq!(leg.last_venue_state, Some(VenueOrderState::Rejected));
        assert!(leg.venue_order_id.is_none());
        assert_eq!(client.placed_orders().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_error_propagates() {
        let client = paper();
        client
            .push_placement_error(VenueError::Auth("expired".into()))
            .await;

        let result = executor(client)
            .open(Direction::Long, dec!(100), deadline(5_000))
            .await;

        assert!(matches!(result, Err(HedgeError::Auth { venue: Venue::Paradex, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_placement_recovers() {
        let client = paper();
        client
            .push_placement_error(VenueError::transient(TransientKind::Network, "reset"))
            .await;

        let leg = executor(client.clone())
            .open(Direction::Long, dec!(100), deadline(5_000))
            .await
            .unwrap();

        assert_eq!(leg.state, OrderState::Filled);
        assert_eq!(leg.submit_retries, 1);
        assert_eq!(client.placed_orders().await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_placement_retries_stop_at_deadline() {
        let client = paper();
        for _ in 0..2 {
            client
                .push_placement_error(VenueError::transient(
                    TransientKind::RateLimited {
                        retry_after: Some(Duration::from_secs(4)),
                    },
                    "429",
                ))
                .await;
        }
        let executor = OrderExecutor::new(
            client.clone(),
            SYMBOL,
            RetryPolicy::new(&RetryConfig::default(), Duration::from_millis(500)),
            Duration::from_millis(100),
        );

        let end = deadline(5_000);
        let result = executor.open(Direction::Long, dec!(100), end).await;

        assert!(matches!(
            result,
            Err(HedgeError::VenueUnavailable { venue: Venue::Paradex, attempts: 2, .. })
        ));
        assert!(Instant::now() < end);
        assert_eq!(client.placed_orders().await.len(), 2);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(client.position(SYMBOL).await, Decimal::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_lag_is_retried_while_polling() {
        let client = paper();
        client
            .push_status_error(VenueError::OrderRejected("order not found".into()))
            .await;

        let leg = executor(client.clone())
            .open(Direction::Long, dec!(100), deadline(5_000))
            .await
            .unwrap();

        assert_eq!(leg.state, OrderState::Filled);
        let status_calls = client
            .calls()
            .await
            .into_iter()
            .filter(|call| matches!(call, PaperCall::Status { .. }))
            .count();
        assert!(status_calls >= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_placement_is_venue_unavailable() {
        let mut client = MockVenueClient::new();
        client.expect_venue().return_const(Venue::Bitget);
        client
            .expect_place_order()
            .times(3)
            .returning(|_| Err(VenueError::transient(TransientKind::Server(502), "bad gateway")));

        let executor = OrderExecutor::new(Arc::new(client), "ETHPERP", retry(), Duration::from_millis(100));
        let result = executor.open(Direction::Short, dec!(50), deadline(5_000)).await;

        assert!(matches!(
            result,
            Err(HedgeError::VenueUnavailable { venue: Venue::Bitget, attempts: 3, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_failure_keeps_last_state() {
        let mut client = MockVenueClient::new();
        client.expect_venue().return_const(Venue::Bitget);
        client
            .expect_place_order()
            .times(1)
            .returning(|_| Ok("BG-7".to_string()));
        client
            .expect_get_order_status()
            .returning(|_, _| Err(VenueError::transient(TransientKind::Timeout, "slow")));

        let executor = OrderExecutor::new(Arc::new(client), "ETHPERP", retry(), Duration::from_millis(100));
        let leg = executor
            .open(Direction::Short, dec!(50), deadline(5_000))
            .await
            .unwrap();

        assert_eq!(leg.state, OrderState::TimedOut);
        assert_eq!(leg.venue_order_id.as_deref(), Some("BG-7"));
        assert!(leg.last_venue_state.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_uses_opposite_direction() {
        let client = paper();
        let leg = executor(client.clone())
            .close(Direction::Long, dec!(20), deadline(5_000))
            .await
            .unwrap();

        assert_eq!(leg.direction, Direction::Short);
        assert_eq!(leg.state, OrderState::Filled);
        assert_eq!(
            client.close_calls().await,
            vec![(SYMBOL.to_string(), dec!(20), Direction::Short)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_requery_picks_up_late_fill() {
        let client = paper();
        client
            .push_open_script(FillScript::Fill {
                after: Duration::from_millis(800),
            })
            .await;

        let executor = executor(client);
        let leg = executor
            .open(Direction::Long, dec!(100), deadline(500))
            .await
            .unwrap();
        assert_eq!(leg.state, OrderState::TimedOut);

        tokio::time::advance(Duration::from_millis(400)).await;
        let leg = executor.requery(leg).await;
        assert_eq!(leg.state, OrderState::Filled);
    }

    #[test]
    fn test_apply_report_clamps_fill() {
        let mut leg = LegOrder::new(Venue::Bitget, "ETHPERP", Direction::Long, dec!(100), "c1");
        leg.apply_report(&OrderStatusReport::new(VenueOrderState::Filled, dec!(100.5)));
        leg.finalize();

        assert_eq!(leg.filled_notional, dec!(100));
        assert_eq!(leg.state, OrderState::Filled);
    }

    #[test]
    fn test_absorb_top_up() {
        let mut leg = LegOrder::new(Venue::Bitget, "ETHPERP", Direction::Long, dec!(100), "c1");
        leg.apply_report(
            &OrderStatusReport::new(VenueOrderState::Cancelled, dec!(60)).with_avg_price(dec!(3000)),
        );
        leg.finalize();
        assert_eq!(leg.state, OrderState::PartiallyFilled);

        let mut top_up = LegOrder::new(Venue::Bitget, "ETHPERP", Direction::Long, dec!(40), "c2");
        top_up.venue_order_id = Some("BG-2".into());
        top_up.apply_report(
            &OrderStatusReport::new(VenueOrderState::Filled, dec!(40)).with_avg_price(dec!(3010)),
        );
        leg.absorb(&top_up);

        assert_eq!(leg.state, OrderState::Filled);
        assert_eq!(leg.filled_notional, dec!(100));
        assert_eq!(leg.avg_price, Some(dec!(3004)));
    }

    #[test]
    fn test_leg_failure_classification() {
        let unavailable = LegFailure::from_hedge_error(&HedgeError::VenueUnavailable {
            venue: Venue::Paradex,
            attempts: 3,
            message: "timeout".into(),
        });
        assert!(unavailable.submission_uncertain);
        assert!(!unavailable.is_fatal());

        let auth = LegFailure::from_hedge_error(&HedgeError::Auth {
            venue: Venue::Paradex,
            message: "expired".into(),
        });
        assert!(auth.is_fatal());
        assert!(!auth.submission_uncertain);
    }
}
