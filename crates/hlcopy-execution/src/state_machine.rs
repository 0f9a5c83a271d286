//! Order state machine (§4.4): `Pending -> (PartiallyFilled | Filled | Cancelled
//! | Failed)`, `PartiallyFilled -> (Filled | Cancelled)`. Terminal states are
//! absorbing. Adapted from the teacher's OMS state machine to this simpler
//! state set — no cancel/replace-pending intermediates, since paper orders here
//! are cancel-then-resubmit rather than in-place replace.

use std::collections::HashSet;

use hlcopy_schemas::OrderStatus;

/// Events that drive `OrderState` transitions.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderEvent {
    /// A partial fill arrived.
    PartialFill { price: f64, size: f64 },
    /// The terminal fill arrived.
    Fill { price: f64, size: f64 },
    /// The capability reported the order as cancelled.
    Cancel,
    /// The capability reported an infrastructure fault.
    Fail,
}

/// Returned when an event cannot legally be applied in the current status.
/// Callers must treat this as a halt/alert condition — it indicates a
/// capability reported an impossible sequence of fills.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionError {
    pub from: OrderStatus,
    pub event: String,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "illegal order transition: {:?} + {}", self.from, self.event)
    }
}

impl std::error::Error for TransitionError {}

/// A single live order tracked through the state machine, with idempotent
/// replay of fill events by `event_id`.
#[derive(Debug, Clone)]
pub struct OrderState {
    pub status: OrderStatus,
    pub fill_price: Option<f64>,
    pub fill_size: Option<f64>,
    applied: HashSet<String>,
}

impl OrderState {
    pub fn new() -> Self {
        Self { status: OrderStatus::Pending, fill_price: None, fill_size: None, applied: HashSet::new() }
    }

    /// Applies `event`, deduplicated against `event_id` when supplied. A
    /// duplicate `event_id` is a silent no-op: state does not change, no error.
    pub fn apply(&mut self, event: &OrderEvent, event_id: Option<&str>) -> Result<(), TransitionError> {
        if let Some(id) = event_id {
            if self.applied.contains(id) {
                return Ok(());
            }
        }

        self.do_transition(event)?;

        if let Some(id) = event_id {
            self.applied.insert(id.to_string());
        }
        Ok(())
    }

    fn do_transition(&mut self, event: &OrderEvent) -> Result<(), TransitionError> {
        use OrderEvent::*;
        use OrderStatus::*;

        match (self.status, event) {
            (Pending | PartiallyFilled, PartialFill { price, size }) => {
                self.status = PartiallyFilled;
                self.fill_price = Some(*price);
                self.fill_size = Some(*size);
            }
            (Pending | PartiallyFilled, Fill { price, size }) => {
                self.status = Filled;
                self.fill_price = Some(*price);
                self.fill_size = Some(*size);
            }
            (Pending | PartiallyFilled, Cancel) => self.status = Cancelled,
            (Pending | PartiallyFilled, Fail) => self.status = Failed,
            // Late-duplicate terminal events on an already-terminal order: no-op.
            (Filled | Cancelled | Failed, Fill { .. } | PartialFill { .. }) => {}
            (status, ev) => {
                return Err(TransitionError { from: status, event: format!("{ev:?}") });
            }
        }
        Ok(())
    }
}

impl Default for OrderState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_order_is_pending() {
        let o = OrderState::new();
        assert_eq!(o.status, OrderStatus::Pending);
        assert!(!o.status.is_terminal());
    }

    #[test]
    fn partial_then_full_fill() {
        let mut o = OrderState::new();
        o.apply(&OrderEvent::PartialFill { price: 100.0, size: 1.0 }, Some("e1")).unwrap();
        assert_eq!(o.status, OrderStatus::PartiallyFilled);
        o.apply(&OrderEvent::Fill { price: 101.0, size: 2.0 }, Some("e2")).unwrap();
        assert_eq!(o.status, OrderStatus::Filled);
        assert_eq!(o.fill_price, Some(101.0));
    }

    #[test]
    fn duplicate_event_id_is_idempotent() {
        let mut o = OrderState::new();
        o.apply(&OrderEvent::Fill { price: 100.0, size: 1.0 }, Some("dup")).unwrap();
        o.apply(&OrderEvent::Fill { price: 999.0, size: 9.0 }, Some("dup")).unwrap();
        assert_eq!(o.fill_price, Some(100.0), "replayed event must not double-apply");
    }

    #[test]
    fn cancel_after_partial_fill_is_legal() {
        let mut o = OrderState::new();
        o.apply(&OrderEvent::PartialFill { price: 100.0, size: 1.0 }, Some("e1")).unwrap();
        o.apply(&OrderEvent::Cancel, Some("e2")).unwrap();
        assert_eq!(o.status, OrderStatus::Cancelled);
    }

    #[test]
    fn late_fill_on_terminal_order_is_noop() {
        let mut o = OrderState::new();
        o.apply(&OrderEvent::Fill { price: 100.0, size: 1.0 }, Some("e1")).unwrap();
        o.apply(&OrderEvent::Fill { price: 500.0, size: 5.0 }, Some("e-late")).unwrap();
        assert_eq!(o.fill_price, Some(100.0));
    }
}
