//! Executor (§4.4): turns a rebalance action into a paper order, polls it to a
//! terminal state, and commits the resulting `OpenPosition` mutation.
//!
//! Lock acquisition (§5, `rebalance_lock`) is the scheduler's job, not this
//! crate's — `Executor::execute` assumes it already holds exclusive access to
//! the position book for the duration of the call.

use chrono::{DateTime, Duration, Utc};
use hlcopy_portfolio::{RebalanceAction, RebalanceActionKind};
use hlcopy_schemas::{OpenPosition, OrderStatus, Side};
use uuid::Uuid;

use crate::state_machine::{OrderEvent, OrderState};

/// What `Executor::place` committed to the capability, before any fill is
/// known. Callers that persist orders (§3: Order is a persisted entity with
/// monotonic state transitions) insert this as the `Pending` row, then
/// persist the `OrderSnapshot` `resolve` returns as the terminal update.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
    pub id: Uuid,
    pub side: Side,
    pub token: String,
    pub target_price: f64,
    pub limit_low: f64,
    pub limit_high: f64,
    pub target_notional: f64,
}

/// A `PlacedOrder` carried through to its terminal (or poll-exhausted) state.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSnapshot {
    pub id: Uuid,
    pub side: Side,
    pub token: String,
    pub target_price: f64,
    pub limit_low: f64,
    pub limit_high: f64,
    pub target_notional: f64,
    pub status: OrderStatus,
    pub attempt: u32,
    pub fill_price: Option<f64>,
    pub fill_size: Option<f64>,
    pub fill_time: Option<DateTime<Utc>>,
}

/// The capability contract an Executor drives orders through. `hlcopy-broker-paper`
/// is the shipped implementation; a live-trading adapter would implement the same
/// trait without the Executor's logic changing.
pub trait ExecutionCapability {
    fn place_order(&mut self, side: Side, token: &str, limit_low: f64, limit_high: f64, target_notional: f64) -> Uuid;
    fn poll_fill(&mut self, order_id: Uuid) -> PollResult;
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollResult {
    pub status: OrderStatus,
    pub fill_price: Option<f64>,
    pub fill_size: Option<f64>,
}

impl ExecutionCapability for hlcopy_broker_paper::PaperBroker {
    fn place_order(&mut self, side: Side, token: &str, limit_low: f64, limit_high: f64, target_notional: f64) -> Uuid {
        hlcopy_broker_paper::PaperBroker::place_order(self, side, token, limit_low, limit_high, target_notional)
    }

    fn poll_fill(&mut self, order_id: Uuid) -> PollResult {
        let report = hlcopy_broker_paper::PaperBroker::poll_fill(self, order_id);
        PollResult { status: report.status, fill_price: report.fill_price, fill_size: report.fill_size }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExecutionParams {
    pub slippage_bps: f64,
    pub stop_loss_bps: f64,
    pub trailing_bps: f64,
    pub max_hold_duration: Duration,
    pub poll_attempts: u32,
}

/// What happened to the book as a result of executing one action. `None`
/// means the order never reached a terminal fill and no position mutation
/// was committed (invariant: all-or-nothing).
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Opened(OpenPosition),
    Adjusted { size: f64, notional: f64 },
    Closed { realized_pnl: f64 },
    NoFill { reason: &'static str },
}

pub struct Executor<'a, C: ExecutionCapability> {
    capability: &'a mut C,
    params: ExecutionParams,
}

impl<'a, C: ExecutionCapability> Executor<'a, C> {
    pub fn new(capability: &'a mut C, params: ExecutionParams) -> Self {
        Self { capability, params }
    }

    /// Executes one rebalance action against `mark_price`. `existing` is the
    /// current `OpenPosition` for this (token, side) when the action is
    /// ADJUST or CLOSE; ignored for OPEN. Equivalent to `place` immediately
    /// followed by `resolve`, for callers that don't persist order rows.
    pub fn execute(
        &mut self,
        action: &RebalanceAction,
        mark_price: f64,
        existing: Option<&OpenPosition>,
        now: DateTime<Utc>,
    ) -> ExecutionOutcome {
        let placed = self.place(action, mark_price);
        self.resolve(&placed, action, existing, now).1
    }

    /// Submits `action` to the capability and returns the order it placed,
    /// before any fill is known.
    pub fn place(&mut self, action: &RebalanceAction, mark_price: f64) -> PlacedOrder {
        let slippage = mark_price * self.params.slippage_bps / 10_000.0;
        let (limit_low, limit_high) = (mark_price - slippage, mark_price + slippage);
        let target_notional = action.delta_notional().abs();
        let id = self.capability.place_order(action.side, &action.token, limit_low, limit_high, target_notional);
        PlacedOrder { id, side: action.side, token: action.token.clone(), target_price: mark_price, limit_low, limit_high, target_notional }
    }

    /// Polls `placed` to a terminal state (or until the poll budget is
    /// exhausted) and commits the resulting position mutation. Returns the
    /// final order snapshot alongside the book outcome so the caller can
    /// persist both.
    pub fn resolve(
        &mut self,
        placed: &PlacedOrder,
        action: &RebalanceAction,
        existing: Option<&OpenPosition>,
        now: DateTime<Utc>,
    ) -> (OrderSnapshot, ExecutionOutcome) {
        let mut order = OrderState::new();
        let mut last_poll = PollResult { status: OrderStatus::Pending, fill_price: None, fill_size: None };
        let mut attempt_used = 0u32;
        for attempt in 0..self.params.poll_attempts {
            attempt_used = attempt;
            last_poll = self.capability.poll_fill(placed.id);
            let event_id = format!("{}:{attempt}", placed.id);
            let event = match last_poll.status {
                OrderStatus::PartiallyFilled => OrderEvent::PartialFill {
                    price: last_poll.fill_price.unwrap_or(placed.target_price),
                    size: last_poll.fill_size.unwrap_or(0.0),
                },
                OrderStatus::Filled => OrderEvent::Fill {
                    price: last_poll.fill_price.unwrap_or(placed.target_price),
                    size: last_poll.fill_size.unwrap_or(0.0),
                },
                OrderStatus::Cancelled => OrderEvent::Cancel,
                OrderStatus::Failed => OrderEvent::Fail,
                OrderStatus::Pending => continue,
            };
            if order.apply(&event, Some(&event_id)).is_err() {
                tracing::error!(token = %action.token, kind = ?action.kind, "illegal order transition, halting action");
                let snapshot = self.snapshot(placed, &order, attempt_used, now);
                return (snapshot, ExecutionOutcome::NoFill { reason: "illegal_transition" });
            }
            if order.status.is_terminal() {
                break;
            }
        }

        let outcome = match order.status {
            OrderStatus::Filled => self.commit_fill(action, &order, existing, now),
            OrderStatus::Cancelled => {
                tracing::warn!(token = %action.token, kind = ?action.kind, "order cancelled, no position mutation");
                ExecutionOutcome::NoFill { reason: "cancelled" }
            }
            OrderStatus::Failed | OrderStatus::Pending => {
                tracing::warn!(
                    token = %action.token, kind = ?action.kind, status = ?order.status,
                    last_poll_status = ?last_poll.status,
                    "order did not reach a terminal fill within the poll budget"
                );
                ExecutionOutcome::NoFill { reason: "no_terminal_fill" }
            }
            OrderStatus::PartiallyFilled => unreachable!("loop only exits on terminal status or exhausted attempts"),
        };

        let snapshot = self.snapshot(placed, &order, attempt_used, now);
        (snapshot, outcome)
    }

    fn snapshot(&self, placed: &PlacedOrder, order: &OrderState, attempt: u32, now: DateTime<Utc>) -> OrderSnapshot {
        OrderSnapshot {
            id: placed.id,
            side: placed.side,
            token: placed.token.clone(),
            target_price: placed.target_price,
            limit_low: placed.limit_low,
            limit_high: placed.limit_high,
            target_notional: placed.target_notional,
            status: order.status,
            attempt,
            fill_price: order.fill_price,
            fill_size: order.fill_size,
            fill_time: if order.status.is_terminal() { Some(now) } else { None },
        }
    }

    fn commit_fill(
        &self,
        action: &RebalanceAction,
        order: &OrderState,
        existing: Option<&OpenPosition>,
        now: DateTime<Utc>,
    ) -> ExecutionOutcome {
        let fill_price = order.fill_price.unwrap_or(0.0);
        let fill_size = order.fill_size.unwrap_or(0.0);

        match action.kind {
            RebalanceActionKind::Open => {
                let stop_sign = if action.side == Side::Long { -1.0 } else { 1.0 };
                let stop_loss_price = fill_price * (1.0 + stop_sign * self.params.stop_loss_bps / 10_000.0);
                let position = OpenPosition {
                    id: Uuid::new_v4(),
                    token: action.token.clone(),
                    side: action.side,
                    entry_price: fill_price,
                    size: fill_size,
                    notional: fill_size * fill_price,
                    opened_at: now,
                    stop_loss_price,
                    trailing_peak: fill_price,
                    trailing_stop_price: stop_loss_price,
                    time_stop_at: now + self.params.max_hold_duration,
                    closed_at: None,
                    realized_pnl: None,
                };
                ExecutionOutcome::Opened(position)
            }
            RebalanceActionKind::Adjust => {
                ExecutionOutcome::Adjusted { size: fill_size, notional: fill_size * fill_price }
            }
            RebalanceActionKind::Close => {
                let realized_pnl = match existing {
                    Some(pos) => {
                        let direction = if pos.side == Side::Long { 1.0 } else { -1.0 };
                        (fill_price - pos.entry_price) * pos.size.abs() * direction
                    }
                    None => 0.0,
                };
                ExecutionOutcome::Closed { realized_pnl }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hlcopy_broker_paper::PaperBroker;
    use hlcopy_portfolio::RebalanceAction;

    fn params() -> ExecutionParams {
        ExecutionParams {
            slippage_bps: 10.0,
            stop_loss_bps: 500.0,
            trailing_bps: 300.0,
            max_hold_duration: Duration::days(7),
            poll_attempts: 5,
        }
    }

    #[test]
    fn open_sets_stop_fields_together() {
        let mut broker = PaperBroker::new();
        let mut executor = Executor::new(&mut broker, params());
        let action = RebalanceAction {
            kind: RebalanceActionKind::Open,
            token: "BTC".into(),
            side: Side::Long,
            current_notional: 0.0,
            target_notional: 50_000.0,
        };
        let now = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let outcome = executor.execute(&action, 50_000.0, None, now);
        match outcome {
            ExecutionOutcome::Opened(pos) => {
                assert_eq!(pos.token, "BTC");
                assert!((pos.entry_price - 50_000.0).abs() < 1.0);
                // stop_loss_bps=500 (5%) below entry for a long.
                assert!((pos.stop_loss_price - pos.entry_price * 0.95).abs() < 1.0);
                assert_eq!(pos.trailing_peak, pos.entry_price);
                assert_eq!(pos.time_stop_at, now + Duration::days(7));
                assert!(pos.closed_at.is_none());
            }
            other => panic!("expected Opened, got {other:?}"),
        }
    }

    /// S2: BTC Long entry 50,000 size 0.1, stop_loss_bps=500 -> stop 47,500;
    /// closing at mark 47,400 realizes (47,400 - 50,000) * 0.1.
    #[test]
    fn close_realizes_expected_pnl_for_s2() {
        let mut broker = PaperBroker::new();
        let mut executor = Executor::new(&mut broker, params());
        let existing = OpenPosition {
            id: Uuid::new_v4(),
            token: "BTC".into(),
            side: Side::Long,
            entry_price: 50_000.0,
            size: 0.1,
            notional: 5_000.0,
            opened_at: Utc::now(),
            stop_loss_price: 47_500.0,
            trailing_peak: 50_000.0,
            trailing_stop_price: 47_500.0,
            time_stop_at: Utc::now(),
            closed_at: None,
            realized_pnl: None,
        };
        let action = RebalanceAction {
            kind: RebalanceActionKind::Close,
            token: "BTC".into(),
            side: Side::Long,
            current_notional: 5_000.0,
            target_notional: 0.0,
        };
        let now = Utc::now();
        let outcome = executor.execute(&action, 47_400.0, Some(&existing), now);
        match outcome {
            ExecutionOutcome::Closed { realized_pnl } => {
                assert!((realized_pnl - (-260.0)).abs() < 1.0, "got {realized_pnl}");
            }
            other => panic!("expected Closed, got {other:?}"),
        }
    }

    #[test]
    fn cancelled_order_yields_no_fill_and_no_mutation() {
        struct AlwaysCancel;
        impl ExecutionCapability for AlwaysCancel {
            fn place_order(&mut self, _: Side, _: &str, _: f64, _: f64, _: f64) -> Uuid {
                Uuid::new_v4()
            }
            fn poll_fill(&mut self, _: Uuid) -> PollResult {
                PollResult { status: OrderStatus::Cancelled, fill_price: None, fill_size: None }
            }
        }
        let mut cap = AlwaysCancel;
        let mut executor = Executor::new(&mut cap, params());
        let action = RebalanceAction {
            kind: RebalanceActionKind::Open,
            token: "ETH".into(),
            side: Side::Long,
            current_notional: 0.0,
            target_notional: 1_000.0,
        };
        let outcome = executor.execute(&action, 3_000.0, None, Utc::now());
        assert_eq!(outcome, ExecutionOutcome::NoFill { reason: "cancelled" });
    }
}
