//! Monitor (§4.5): stop-loss, trailing-stop, and time-stop enforcement over
//! the `OpenPosition` book. Runs every monitor_interval under a *shared* read
//! of `rebalance_lock` (§5) — the lock itself is the scheduler's concern;
//! this crate is pure evaluation logic over positions the caller already
//! holds a consistent read of.

use chrono::{DateTime, Utc};
use hlcopy_schemas::{OpenPosition, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    StopLoss,
    TrailingStop,
    TimeStop,
}

impl StopReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::StopLoss => "stop_loss",
            Self::TrailingStop => "trailing_stop",
            Self::TimeStop => "time_stop",
        }
    }
}

/// Result of evaluating one position for one tick. `trailing_peak`/
/// `trailing_stop_price` always reflect the post-tick values even when no
/// stop triggered — trailing state advances on every tick, not just on close.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickUpdate {
    pub trailing_peak: f64,
    pub trailing_stop_price: f64,
    pub trigger: Option<StopReason>,
}

/// Evaluates a single open position against `mark_price` at `now`. Does not
/// mutate `position` — the caller applies the returned trailing fields and,
/// on a trigger, hands control to the Executor to close.
pub fn evaluate_tick(position: &OpenPosition, mark_price: f64, trailing_bps: f64, now: DateTime<Utc>) -> TickUpdate {
    let (trailing_peak, trailing_stop_price) = match position.side {
        Side::Long => {
            let peak = position.trailing_peak.max(mark_price);
            (peak, peak * (1.0 - trailing_bps / 10_000.0))
        }
        Side::Short => {
            let trough = if position.trailing_peak == 0.0 { mark_price } else { position.trailing_peak.min(mark_price) };
            (trough, trough * (1.0 + trailing_bps / 10_000.0))
        }
    };

    let stop_loss_hit = match position.side {
        Side::Long => mark_price <= position.stop_loss_price,
        Side::Short => mark_price >= position.stop_loss_price,
    };
    let trailing_hit = match position.side {
        Side::Long => mark_price <= trailing_stop_price,
        Side::Short => mark_price >= trailing_stop_price,
    };
    let time_hit = now >= position.time_stop_at;

    let trigger = if stop_loss_hit {
        Some(StopReason::StopLoss)
    } else if trailing_hit {
        Some(StopReason::TrailingStop)
    } else if time_hit {
        Some(StopReason::TimeStop)
    } else {
        None
    };

    TickUpdate { trailing_peak, trailing_stop_price, trigger }
}

/// Atomically claims `position` for closing: returns `true` and marks it
/// closed exactly once. A second call on an already-closed position is a
/// no-op returning `false` — this is the idempotent claim-then-close pattern
/// (`UPDATE ... WHERE closed_at IS NULL`) translated to the in-process book.
pub fn try_claim_close(position: &mut OpenPosition, now: DateTime<Utc>, realized_pnl: f64) -> bool {
    if position.closed_at.is_some() {
        return false;
    }
    position.closed_at = Some(now);
    position.realized_pnl = Some(realized_pnl);
    true
}

/// One stop trigger found while scanning the book, ready to be handed to the
/// Executor for a CLOSE.
#[derive(Debug, Clone, PartialEq)]
pub struct Triggered {
    pub position_id: uuid::Uuid,
    pub token: String,
    pub side: Side,
    pub reason: StopReason,
}

/// Scans `positions` in `(opened_at asc, token asc)` order, applies the per-tick
/// trailing update to each, and returns the stop triggers found. Does not close
/// anything — the caller (scheduler) hands each trigger to the Executor, which
/// performs the actual claim-then-close under the exclusive lock.
pub fn scan(positions: &mut [OpenPosition], mark_price: impl Fn(&str) -> Option<f64>, trailing_bps: f64, now: DateTime<Utc>) -> Vec<Triggered> {
    let mut order: Vec<usize> = (0..positions.len()).filter(|&i| positions[i].is_open()).collect();
    order.sort_by(|&a, &b| {
        positions[a].opened_at.cmp(&positions[b].opened_at).then_with(|| positions[a].token.cmp(&positions[b].token))
    });

    let mut triggers = Vec::new();
    for i in order {
        let Some(mark) = mark_price(&positions[i].token) else {
            tracing::warn!(token = %positions[i].token, "no mark price available, skipping monitor tick");
            continue;
        };
        let update = evaluate_tick(&positions[i], mark, trailing_bps, now);
        positions[i].trailing_peak = update.trailing_peak;
        positions[i].trailing_stop_price = update.trailing_stop_price;
        if let Some(reason) = update.trigger {
            tracing::info!(token = %positions[i].token, reason = reason.as_str(), "stop triggered");
            triggers.push(Triggered { position_id: positions[i].id, token: positions[i].token.clone(), side: positions[i].side, reason });
        }
    }
    triggers
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn long_position(entry: f64, stop: f64, now: DateTime<Utc>) -> OpenPosition {
        OpenPosition {
            id: Uuid::new_v4(),
            token: "BTC".into(),
            side: Side::Long,
            entry_price: entry,
            size: 0.1,
            notional: entry * 0.1,
            opened_at: now,
            stop_loss_price: stop,
            trailing_peak: entry,
            trailing_stop_price: stop,
            time_stop_at: now + chrono::Duration::days(7),
            closed_at: None,
            realized_pnl: None,
        }
    }

    /// S2: entry 50,000, stop_loss_price 47,500; mark drops to 47,400 -> stop-loss triggers.
    #[test]
    fn stop_loss_triggers_on_long_breach() {
        let now = Utc::now();
        let pos = long_position(50_000.0, 47_500.0, now);
        let update = evaluate_tick(&pos, 47_400.0, 300.0, now);
        assert_eq!(update.trigger, Some(StopReason::StopLoss));
    }

    #[test]
    fn trailing_stop_advances_with_new_highs_then_triggers_on_pullback() {
        let now = Utc::now();
        let mut pos = long_position(50_000.0, 47_500.0, now);

        let up = evaluate_tick(&pos, 55_000.0, 300.0, now);
        assert_eq!(up.trigger, None);
        assert_eq!(up.trailing_peak, 55_000.0);
        pos.trailing_peak = up.trailing_peak;
        pos.trailing_stop_price = up.trailing_stop_price;

        // 3% trailing off a 55,000 peak = 53,350. A pullback to 53,000 should trigger.
        let down = evaluate_tick(&pos, 53_000.0, 300.0, now);
        assert_eq!(down.trigger, Some(StopReason::TrailingStop));
    }

    #[test]
    fn time_stop_triggers_when_past_deadline() {
        let now = Utc::now();
        let mut pos = long_position(50_000.0, 40_000.0, now);
        pos.time_stop_at = now - chrono::Duration::seconds(1);
        let update = evaluate_tick(&pos, 50_000.0, 300.0, now);
        assert_eq!(update.trigger, Some(StopReason::TimeStop));
    }

    #[test]
    fn claim_close_is_idempotent() {
        let now = Utc::now();
        let mut pos = long_position(50_000.0, 47_500.0, now);
        assert!(try_claim_close(&mut pos, now, -260.0));
        assert!(!try_claim_close(&mut pos, now, -999.0), "second claim on an already-closed position must be a no-op");
        assert_eq!(pos.realized_pnl, Some(-260.0));
    }

    #[test]
    fn scan_orders_by_opened_at_then_token() {
        let t0 = Utc::now();
        let mut a = long_position(50_000.0, 100.0, t0 + chrono::Duration::seconds(1));
        a.token = "ETH".into();
        let mut b = long_position(50_000.0, 100.0, t0);
        b.token = "BTC".into();
        let mut positions = vec![a, b];
        let triggers = scan(&mut positions, |_| Some(1.0), 300.0, t0 + chrono::Duration::days(30));
        assert_eq!(triggers[0].token, "BTC");
        assert_eq!(triggers[1].token, "ETH");
    }
}
