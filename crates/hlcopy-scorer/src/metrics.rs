//! Derives window-scoped `TradeMetrics` from persisted `Trade` rows (§4.2.2's
//! metric producer — the scoring cycle recomputes these alongside the
//! position-based score, §3).
//!
//! Only `Close` and `Reduce` actions carry a realized `closed_pnl`; `Open`
//! and `Add` just establish or grow a position and contribute no P&L sample.

use hlcopy_schemas::{Trade, TradeAction, TradeMetrics};

pub fn derive_trade_metrics(trades: &[Trade], window_days: u32) -> TradeMetrics {
    let mut closes: Vec<&Trade> = trades.iter().filter(|t| matches!(t.action, TradeAction::Close | TradeAction::Reduce)).collect();
    closes.sort_by_key(|t| t.timestamp);

    if closes.is_empty() {
        return empty(window_days);
    }

    let total_trades = closes.len() as u32;
    let winning_trades = closes.iter().filter(|t| t.closed_pnl > 0.0).count() as u32;
    let losing_trades = closes.iter().filter(|t| t.closed_pnl < 0.0).count() as u32;
    let win_rate = winning_trades as f64 / total_trades as f64;

    let gross_profit: f64 = closes.iter().filter(|t| t.closed_pnl > 0.0).map(|t| t.closed_pnl).sum();
    let gross_loss: f64 = closes.iter().filter(|t| t.closed_pnl < 0.0).map(|t| -t.closed_pnl).sum();
    let profit_factor = gross_profit / gross_loss.max(f64::EPSILON);
    let total_pnl: f64 = closes.iter().map(|t| t.closed_pnl).sum();

    let returns: Vec<f64> = closes.iter().map(|t| t.closed_pnl / t.value_usd.abs().max(f64::EPSILON)).collect();
    let avg_return = returns.iter().sum::<f64>() / total_trades as f64;
    let variance = returns.iter().map(|r| (r - avg_return).powi(2)).sum::<f64>() / total_trades as f64;
    let std_return = variance.sqrt();
    let pseudo_sharpe = if std_return > f64::EPSILON { avg_return / std_return } else { 0.0 };

    let total_notional: f64 = closes.iter().map(|t| t.value_usd.abs()).sum();
    let roi_proxy = if total_notional > 0.0 { total_pnl / total_notional } else { 0.0 };

    let max_drawdown_proxy = pnl_drawdown(&closes);
    let pnl_trend_slope = pnl_trend_slope(&closes);

    let denom = (gross_profit + gross_loss).max(f64::EPSILON);
    let largest_trade_pnl_ratio = closes.iter().map(|t| t.closed_pnl.abs()).fold(0.0, f64::max) / denom;

    // Trade rows carry no leverage figure (that lives on position snapshots),
    // so the leverage-based strategies see a conservative zero here.
    let max_leverage = 0.0;
    let leverage_std = 0.0;

    TradeMetrics {
        window_days,
        total_trades,
        winning_trades,
        losing_trades,
        win_rate,
        gross_profit,
        gross_loss,
        profit_factor,
        avg_return,
        std_return,
        pseudo_sharpe,
        total_pnl,
        roi_proxy,
        max_drawdown_proxy,
        max_leverage,
        leverage_std,
        largest_trade_pnl_ratio,
        pnl_trend_slope,
    }
}

fn empty(window_days: u32) -> TradeMetrics {
    TradeMetrics {
        window_days,
        total_trades: 0,
        winning_trades: 0,
        losing_trades: 0,
        win_rate: 0.0,
        gross_profit: 0.0,
        gross_loss: 0.0,
        profit_factor: 0.0,
        avg_return: 0.0,
        std_return: 0.0,
        pseudo_sharpe: 0.0,
        total_pnl: 0.0,
        roi_proxy: 0.0,
        max_drawdown_proxy: 0.0,
        max_leverage: 0.0,
        leverage_std: 0.0,
        largest_trade_pnl_ratio: 0.0,
        pnl_trend_slope: 0.0,
    }
}

/// Worst peak-to-trough drop of the cumulative realized-P&L curve, in trade
/// order, as a fraction of the running peak.
fn pnl_drawdown(closes: &[&Trade]) -> f64 {
    let mut cum = 0.0;
    let mut peak = 0.0f64;
    let mut worst = 0.0f64;
    for t in closes {
        cum += t.closed_pnl;
        peak = peak.max(cum);
        if peak > 0.0 {
            worst = worst.max((peak - cum) / peak);
        }
    }
    worst
}

/// Slope of a linear regression of cumulative P&L against trade index.
fn pnl_trend_slope(closes: &[&Trade]) -> f64 {
    let n = closes.len() as f64;
    if n < 2.0 {
        return 0.0;
    }

    let mut cum = 0.0;
    let ys: Vec<f64> = closes
        .iter()
        .map(|t| {
            cum += t.closed_pnl;
            cum
        })
        .collect();
    let xs: Vec<f64> = (0..closes.len()).map(|i| i as f64).collect();

    let x_mean = xs.iter().sum::<f64>() / n;
    let y_mean = ys.iter().sum::<f64>() / n;
    let cov: f64 = xs.iter().zip(&ys).map(|(x, y)| (x - x_mean) * (y - y_mean)).sum();
    let var: f64 = xs.iter().map(|x| (x - x_mean).powi(2)).sum();

    if var.abs() < f64::EPSILON {
        0.0
    } else {
        cov / var
    }
}
