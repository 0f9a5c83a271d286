//! Deterministic paper-trading capability (§4.4): `place_order` / `poll_fill`.
//!
//! Design decisions (kept intentionally simple/deterministic):
//! - `order_id` is a v4 UUID minted at submit time; the broker never reuses one.
//! - Fills are computed at the bound midpoint — no randomness, no wall-clock reads.
//! - A configurable number of `PartiallyFilled` ticks precede the terminal `Filled`
//!   poll, so Executor retry/poll-loop behavior has something real to exercise.
//! - `place_order` takes no client id; each call mints a fresh order and there is
//!   no resubmission dedup. `poll_fill` is idempotent only in the sense that polling
//!   an already-terminal or unknown id is safe, reporting `Failed` rather than panicking.

use std::collections::BTreeMap;

use hlcopy_schemas::{OrderStatus, Side};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct FillReport {
    pub status: OrderStatus,
    pub fill_price: Option<f64>,
    pub fill_size: Option<f64>,
}

#[derive(Debug, Clone)]
struct PaperOrder {
    side: Side,
    token: String,
    limit_low: f64,
    limit_high: f64,
    target_notional: f64,
    ticks_remaining: u32,
}

impl PaperOrder {
    fn fill_price(&self) -> f64 {
        (self.limit_low + self.limit_high) / 2.0
    }

    fn fill_size(&self) -> f64 {
        let price = self.fill_price();
        if price == 0.0 {
            0.0
        } else {
            self.target_notional / price
        }
    }
}

/// A deterministic in-process paper broker. One instance per running Executor;
/// state is not persisted across restarts — in-flight paper orders are resubmitted.
#[derive(Debug, Clone, Default)]
pub struct PaperBroker {
    orders: BTreeMap<Uuid, PaperOrder>,
    /// Number of `PartiallyFilled` ticks to simulate before the terminal fill,
    /// applied to every order placed through this broker instance.
    partial_fill_ticks: u32,
}

impl PaperBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Same as `new`, but every order takes `ticks` `poll_fill` calls reporting
    /// `PartiallyFilled` before the terminal `Filled` report.
    pub fn with_partial_fill_ticks(ticks: u32) -> Self {
        Self { orders: BTreeMap::new(), partial_fill_ticks: ticks }
    }

    /// Places an order and returns its id. Deterministic midpoint-fill simulation;
    /// the fill itself is only realized through `poll_fill`.
    pub fn place_order(
        &mut self,
        side: Side,
        token: impl Into<String>,
        limit_low: f64,
        limit_high: f64,
        target_notional: f64,
    ) -> Uuid {
        let order_id = Uuid::new_v4();
        self.orders.insert(
            order_id,
            PaperOrder {
                side,
                token: token.into(),
                limit_low,
                limit_high,
                target_notional,
                ticks_remaining: self.partial_fill_ticks,
            },
        );
        order_id
    }

    /// Advances the order's simulated lifecycle by one poll and reports its state.
    /// Unknown order ids report `Failed` — the Executor treats this as a capability
    /// fault, never as a silent no-op.
    pub fn poll_fill(&mut self, order_id: Uuid) -> FillReport {
        let Some(order) = self.orders.get_mut(&order_id) else {
            return FillReport { status: OrderStatus::Failed, fill_price: None, fill_size: None };
        };

        if order.ticks_remaining > 0 {
            order.ticks_remaining -= 1;
            let partial_size = order.fill_size() / 2.0;
            return FillReport {
                status: OrderStatus::PartiallyFilled,
                fill_price: Some(order.fill_price()),
                fill_size: Some(partial_size),
            };
        }

        let price = order.fill_price();
        let size = order.fill_size();
        self.orders.remove(&order_id);
        FillReport { status: OrderStatus::Filled, fill_price: Some(price), fill_size: Some(size) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_order_fills_at_bound_midpoint() {
        let mut broker = PaperBroker::new();
        let id = broker.place_order(Side::Long, "BTC", 47_500.0, 47_550.0, 4_752.5);
        let report = broker.poll_fill(id);
        assert_eq!(report.status, OrderStatus::Filled);
        assert_eq!(report.fill_price, Some(47_525.0));
        assert!((report.fill_size.unwrap() - 4_752.5 / 47_525.0).abs() < 1e-9);
    }

    #[test]
    fn partial_ticks_precede_terminal_fill() {
        let mut broker = PaperBroker::with_partial_fill_ticks(2);
        let id = broker.place_order(Side::Short, "ETH", 2_995.0, 3_005.0, 3_000.0);

        let r1 = broker.poll_fill(id);
        assert_eq!(r1.status, OrderStatus::PartiallyFilled);
        let r2 = broker.poll_fill(id);
        assert_eq!(r2.status, OrderStatus::PartiallyFilled);
        let r3 = broker.poll_fill(id);
        assert_eq!(r3.status, OrderStatus::Filled);
    }

    #[test]
    fn unknown_order_id_reports_failed() {
        let mut broker = PaperBroker::new();
        let report = broker.poll_fill(Uuid::new_v4());
        assert_eq!(report.status, OrderStatus::Failed);
    }

    #[test]
    fn order_is_consumed_after_terminal_fill() {
        let mut broker = PaperBroker::new();
        let id = broker.place_order(Side::Long, "BTC", 100.0, 100.0, 1_000.0);
        broker.poll_fill(id);
        let second = broker.poll_fill(id);
        assert_eq!(second.status, OrderStatus::Failed, "polling a filled order again is unknown-id behavior");
    }
}
