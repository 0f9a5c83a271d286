//! Shared domain types for the copytrading core.
//!
//! Mirrors the relational tables in `hlcopy-db`: every struct here is what a
//! row decodes into once the parse-on-ingest boundary has coerced upstream
//! string-typed numerics into floats. No component downstream of ingestion
//! should ever see a numeric string again.

pub mod error;

pub use error::CoreError;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Position/trade direction. Derived from the sign of `size`: negative = Short.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Invariant #1 (§8): `side = Short` iff `size < 0`.
    pub fn from_size(size: f64) -> Self {
        if size < 0.0 {
            Side::Short
        } else {
            Side::Long
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "long"),
            Side::Short => write!(f, "short"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeAction {
    Open,
    Close,
    Add,
    Reduce,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeverageType {
    Cross,
    Isolated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trader {
    pub address: String,
    pub label: Option<String>,
    pub account_value: f64,
    pub first_seen: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

/// An immutable trade record. Unique key: (trader, transaction_hash).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trader: String,
    pub token: String,
    pub side: Side,
    pub action: TradeAction,
    pub size: f64,
    pub price: f64,
    pub value_usd: f64,
    pub closed_pnl: f64,
    pub fee_usd: f64,
    pub timestamp: DateTime<Utc>,
    pub transaction_hash: String,
}

impl Trade {
    /// Builds a `Trade`, deriving `side` from the sign of `size` (invariant #1).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        trader: impl Into<String>,
        token: impl Into<String>,
        action: TradeAction,
        size: f64,
        price: f64,
        value_usd: f64,
        closed_pnl: f64,
        fee_usd: f64,
        timestamp: DateTime<Utc>,
        transaction_hash: impl Into<String>,
    ) -> Self {
        Self {
            trader: trader.into(),
            token: token.into(),
            side: Side::from_size(size),
            action,
            size,
            price,
            value_usd,
            closed_pnl,
            fee_usd,
            timestamp,
            transaction_hash: transaction_hash.into(),
        }
    }
}

/// Per-trader, per-token snapshot at a captured instant. Grouped by `snapshot_batch`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub trader: String,
    pub token: String,
    pub side: Side,
    pub size: f64,
    pub entry_price: f64,
    pub mark_price: f64,
    pub leverage_value: f64,
    pub leverage_type: LeverageType,
    pub liquidation_price: Option<f64>,
    pub unrealized_pnl: f64,
    pub margin_used: f64,
    pub account_value: f64,
    pub captured_at: DateTime<Utc>,
    pub snapshot_batch: Uuid,
}

impl PositionSnapshot {
    pub fn position_value(&self) -> f64 {
        self.size.abs() * self.mark_price
    }
}

/// Window-scoped aggregate metrics for a trader, used by the trade-based assessment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeMetrics {
    pub window_days: u32,
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub win_rate: f64,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub profit_factor: f64,
    pub avg_return: f64,
    pub std_return: f64,
    pub pseudo_sharpe: f64,
    pub total_pnl: f64,
    pub roi_proxy: f64,
    pub max_drawdown_proxy: f64,
    pub max_leverage: f64,
    pub leverage_std: f64,
    pub largest_trade_pnl_ratio: f64,
    pub pnl_trend_slope: f64,
}

/// Per-trader composite score, written once per scoring cycle (one row per candidate).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub trader: String,
    pub tier1_pass: bool,
    pub consistency_pass: bool,
    pub anti_luck_pass: bool,
    pub growth_score: f64,
    pub drawdown_score: f64,
    pub leverage_score: f64,
    pub liquidation_distance_score: f64,
    pub diversity_score: f64,
    pub consistency_score: f64,
    pub smart_money_multiplier: f64,
    pub recency_decay: f64,
    pub raw_composite: f64,
    pub final_composite: f64,
    pub rejection_reason: Option<String>,
    pub computed_at: DateTime<Utc>,
}

impl Score {
    pub fn is_eligible(&self) -> bool {
        self.rejection_reason.is_none()
    }
}

/// Per-trader weight at a computed_at instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationRow {
    pub trader: String,
    pub weight: f64,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    PartiallyFilled,
    Filled,
    Cancelled,
    Failed,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
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

/// The engine's own book entry. Owned exclusively by Executor during mutation;
/// readable by Monitor under the shared `rebalance_lock` (§5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    pub id: Uuid,
    pub token: String,
    pub side: Side,
    pub entry_price: f64,
    pub size: f64,
    pub notional: f64,
    pub opened_at: DateTime<Utc>,
    pub stop_loss_price: f64,
    pub trailing_peak: f64,
    pub trailing_stop_price: f64,
    pub time_stop_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub realized_pnl: Option<f64>,
}

impl OpenPosition {
    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlacklistEntry {
    pub address: String,
    pub reason: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl BlacklistEntry {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(exp) => now < exp,
            None => true,
        }
    }
}

/// Process-wide single row read once at startup, written after each successful cadence.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct SchedulerState {
    pub last_refresh_at: Option<DateTime<Utc>>,
    pub last_rebalance_at: Option<DateTime<Utc>>,
    pub last_ingest_at: Option<DateTime<Utc>>,
    pub last_monitor_at: Option<DateTime<Utc>>,
    pub last_ml_snapshot_at: Option<DateTime<Utc>>,
}
