//! Paper trading venue for dry runs and tests.
//!
//! Simulates a perpetuals venue in-process. Every placement consumes the next
//! queued `FillScript` (falling back to a latency-delayed full fill), so a
//! driver can run end to end without credentials and tests can stage
//! partial fills, rejections, stuck orders and flaky transport.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

use super::traits::{Venue, VenueClient};
use super::types::{Direction, LotConstraints, OrderRequest, OrderStatusReport, VenueOrderState};
use crate::config::PaperVenueConfig;
use crate::error::VenueError;

/// How a simulated order behaves after it is accepted.
#[derive(Debug, Clone, PartialEq)]
pub enum FillScript {
    /// Fill the whole notional once `after` has elapsed.
    Fill { after: Duration },
    /// Fill `notional` once `after` has elapsed; the remainder is cancelled
    /// (IOC-style) when `cancel_rest` is set, otherwise it keeps resting.
    Partial {
        notional: Decimal,
        after: Duration,
        cancel_rest: bool,
    },
    /// Accepted but never filled.
    Rest,
    /// Cancelled by the venue once `after` has elapsed, with nothing filled.
    Reject { after: Duration, reason: String },
}

/// A call the simulated venue received.
#[derive(Debug, Clone, PartialEq)]
pub enum PaperCall {
    Place(OrderRequest),
    Close {
        symbol: String,
        notional: Decimal,
        direction: Direction,
    },
    Status {
        venue_order_id: String,
    },
}

#[derive(Debug, Clone)]
struct PaperOrder {
    symbol: String,
    direction: Direction,
    notional: Decimal,
    reduce_only: bool,
    placed_at: Instant,
    script: FillScript,
    /// Notional already booked into the position
    booked: Decimal,
}

impl PaperOrder {
    /// Venue-side view of the order at `now`.
    fn status_at(&self, now: Instant, mark_price: Decimal) -> OrderStatusReport {
        let elapsed = now.saturating_duration_since(self.placed_at);

        let report = match &self.script {
            FillScript::Fill { after } if elapsed >= *after => {
                OrderStatusReport::new(VenueOrderState::Filled, self.notional)
            }
            FillScript::Partial {
                notional,
                after,
                cancel_rest,
            } if elapsed >= *after => {
                let filled = (*notional).min(self.notional);
                let state = if filled >= self.notional {
                    VenueOrderState::Filled
                } else if *cancel_rest {
                    VenueOrderState::Cancelled
                } else {
                    VenueOrderState::PartiallyFilled
                };
                OrderStatusReport::new(state, filled)
            }
            FillScript::Reject { after, reason } if elapsed >= *after => {
                OrderStatusReport::new(VenueOrderState::Cancelled, Decimal::ZERO)
                    .with_reason(reason.clone())
            }
            _ => OrderStatusReport::new(VenueOrderState::Open, Decimal::ZERO),
        };

        if report.filled_notional > Decimal::ZERO {
            report.with_avg_price(mark_price)
        } else {
            report
        }
    }
}

#[derive(Debug, Default)]
struct PaperState {
    balance: Decimal,
    orders: HashMap<String, PaperOrder>,
    /// Signed notional per symbol (+ long, - short)
    positions: HashMap<String, Decimal>,
    open_scripts: VecDeque<FillScript>,
    close_scripts: VecDeque<FillScript>,
    placement_errors: VecDeque<VenueError>,
    close_errors: VecDeque<VenueError>,
    status_errors: VecDeque<VenueError>,
    calls: Vec<PaperCall>,
}

/// Simulated venue implementing `VenueClient`.
pub struct PaperVenueClient {
    venue: Venue,
    state: Arc<RwLock<PaperState>>,
    order_id_counter: AtomicU64,
    lot: LotConstraints,
    mark_price: Decimal,
    fill_latency: Duration,
}

impl PaperVenueClient {
    /// Create a paper venue with instant-ish fills and a $10k balance.
    pub fn new(venue: Venue, lot: LotConstraints) -> Self {
        let state = PaperState {
            balance: Decimal::new(10_000, 0),
            ..Default::default()
        };

        Self {
            venue,
            state: Arc::new(RwLock::new(state)),
            order_id_counter: AtomicU64::new(1),
            lot,
            mark_price: Decimal::new(3_000, 0),
            fill_latency: Duration::from_millis(100),
        }
    }

    /// Build from the `[paper.venue_*]` config section.
    pub fn from_config(venue: Venue, config: &PaperVenueConfig) -> Self {
        let mut lot = LotConstraints::new(config.min_notional, config.step_size);
        lot.max_notional = config.max_notional;

        Self::new(venue, lot)
            .with_initial_balance(config.initial_balance_usd)
            .with_mark_price(config.mark_price)
            .with_fill_latency(Duration::from_millis(config.fill_latency_ms))
    }

    pub fn with_initial_balance(mut self, balance: Decimal) -> Self {
        self.state = Arc::new(RwLock::new(PaperState {
            balance,
            ..Default::default()
        }));
        self
    }

    pub fn with_mark_price(mut self, price: Decimal) -> Self {
        self.mark_price = price;
        self
    }

    /// Latency of the default fill script.
    pub fn with_fill_latency(mut self, latency: Duration) -> Self {
        self.fill_latency = latency;
        self
    }

    pub async fn set_balance(&self, balance: Decimal) {
        self.state.write().await.balance = balance;
    }

    /// Queue the behaviour of the next opening order.
    pub async fn push_open_script(&self, script: FillScript) {
        self.state.write().await.open_scripts.push_back(script);
    }

    /// Queue the behaviour of the next close order.
    pub async fn push_close_script(&self, script: FillScript) {
        self.state.write().await.close_scripts.push_back(script);
    }

    /// Make the next `place_order` call fail with `error`.
    pub async fn push_placement_error(&self, error: VenueError) {
        self.state.write().await.placement_errors.push_back(error);
    }

    /// Make the next `close_position` call fail with `error`.
    pub async fn push_close_error(&self, error: VenueError) {
        self.state.write().await.close_errors.push_back(error);
    }

    /// Make the next `get_order_status` call fail with `error`.
    pub async fn push_status_error(&self, error: VenueError) {
        self.state.write().await.status_errors.push_back(error);
    }

    /// Every call received so far, oldest first.
    pub async fn calls(&self) -> Vec<PaperCall> {
        self.state.read().await.calls.clone()
    }

    /// Opening orders received (including failed attempts).
    pub async fn placed_orders(&self) -> Vec<OrderRequest> {
        self.state
            .read()
            .await
            .calls
            .iter()
            .filter_map(|call| match call {
                PaperCall::Place(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    /// Close calls received as `(symbol, notional, direction)`.
    pub async fn close_calls(&self) -> Vec<(String, Decimal, Direction)> {
        self.state
            .read()
            .await
            .calls
            .iter()
            .filter_map(|call| match call {
                PaperCall::Close {
                    symbol,
                    notional,
                    direction,
                } => Some((symbol.clone(), *notional, *direction)),
                _ => None,
            })
            .collect()
    }

    /// Signed position notional on `symbol` as of the last status poll.
    pub async fn position(&self, symbol: &str) -> Decimal {
        self.state
            .read()
            .await
            .positions
            .get(symbol)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    fn next_order_id(&self) -> String {
        format!(
            "{}-{}",
            self.venue.short_code(),
            self.order_id_counter.fetch_add(1, Ordering::SeqCst)
        )
    }

    fn check_symbol(&self, symbol: &str) -> Result<(), VenueError> {
        if symbol.trim().is_empty() {
            return Err(VenueError::InvalidSymbol(symbol.to_string()));
        }
        Ok(())
    }

    fn default_script(&self) -> FillScript {
        FillScript::Fill {
            after: self.fill_latency,
        }
    }

    /// Venue-side checks, then book the order under the next queued script.
    ///
    /// Reduce-only orders skip the balance and lot checks and take their
    /// script from the close queue.
    fn admit(&self, state: &mut PaperState, request: &OrderRequest) -> Result<String, VenueError> {
        self.check_symbol(&request.symbol)?;

        if !request.reduce_only {
            if request.notional_usd > state.balance {
                return Err(VenueError::InsufficientBalance(format!(
                    "need {} have {}",
                    request.notional_usd, state.balance
                )));
            }
            if !self.lot.accepts(request.notional_usd) {
                return Err(VenueError::OrderRejected(format!(
                    "notional {} violates lot rules (min {}, step {})",
                    request.notional_usd, self.lot.min_notional, self.lot.step_size
                )));
            }
        }

        let queued = if request.reduce_only {
            state.close_scripts.pop_front()
        } else {
            state.open_scripts.pop_front()
        };
        let script = queued.unwrap_or_else(|| self.default_script());

        let id = self.next_order_id();
        state.orders.insert(
            id.clone(),
            PaperOrder {
                symbol: request.symbol.clone(),
                direction: request.direction,
                notional: request.notional_usd,
                reduce_only: request.reduce_only,
                placed_at: Instant::now(),
                script,
                booked: Decimal::ZERO,
            },
        );

        info!(
            venue = %self.venue,
            order_id = %id,
            symbol = %request.symbol,
            direction = %request.direction,
            notional = %request.notional_usd,
            reduce_only = request.reduce_only,
            "Paper order accepted"
        );
        Ok(id)
    }
}

#[async_trait]
impl VenueClient for PaperVenueClient {
    fn venue(&self) -> Venue {
        self.venue
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<String, VenueError> {
        let mut state = self.state.write().await;
        state.calls.push(PaperCall::Place(request.clone()));

        if let Some(error) = state.placement_errors.pop_front() {
            debug!(venue = %self.venue, error = %error, "Paper placement failure");
            return Err(error);
        }

        self.admit(&mut state, request)
    }

    async fn get_order_status(
        &self,
        _symbol: &str,
        venue_order_id: &str,
    ) -> Result<OrderStatusReport, VenueError> {
        let mut state = self.state.write().await;
        state.calls.push(PaperCall::Status {
            venue_order_id: venue_order_id.to_string(),
        });

        if let Some(error) = state.status_errors.pop_front() {
            return Err(error);
        }

        let now = Instant::now();
        let (report, delta, symbol, direction, reduce_only) = match state.orders.get_mut(venue_order_id) {
            Some(order) => {
                let report = order.status_at(now, self.mark_price);
                let delta = report.filled_notional - order.booked;
                order.booked = report.filled_notional;
                (
                    report,
                    delta,
                    order.symbol.clone(),
                    order.direction,
                    order.reduce_only,
                )
            }
            None => {
                return Err(VenueError::OrderRejected(format!(
                    "unknown order {}",
                    venue_order_id
                )))
            }
        };

        if delta > Decimal::ZERO {
            *state.positions.entry(symbol).or_insert(Decimal::ZERO) += delta * direction.sign();
            // 1x isolated margin: opening locks collateral, closing releases it
            if reduce_only {
                state.balance += delta;
            } else {
                state.balance -= delta;
            }
        }

        Ok(report)
    }

    async fn close_position(
        &self,
        symbol: &str,
        notional_usd: Decimal,
        direction: Direction,
    ) -> Result<String, VenueError> {
        let mut state = self.state.write().await;
        state.calls.push(PaperCall::Close {
            symbol: symbol.to_string(),
            notional: notional_usd,
            direction,
        });

        if let Some(error) = state.close_errors.pop_front() {
            return Err(error);
        }
        let request = OrderRequest::market(symbol, direction, notional_usd).reduce_only();
        self.admit(&mut state, &request)
    }

    async fn get_lot_constraints(&self, symbol: &str) -> Result<LotConstraints, VenueError> {
        self.check_symbol(symbol)?;
        Ok(self.lot)
    }

    async fn get_available_balance(&self) -> Result<Decimal, VenueError> {
        Ok(self.state.read().await.balance)
    }
}
