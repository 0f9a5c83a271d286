//! Postgres adapter for the copytrading schema (§3). Mirrors the teacher's
//! `mqk-db`: plain `sqlx::query`/`query_as` functions over a `PgPool`, manual
//! row decode into the domain types from `hlcopy-schemas`, `anyhow::Context`
//! on every fallible call, and embedded migrations run via `sqlx::migrate!`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use hlcopy_schemas::{
    AllocationRow, BlacklistEntry, LeverageType, Order, OpenPosition, OrderStatus, PositionSnapshot,
    SchedulerState, Score, Side, Trade, TradeAction, TradeMetrics, Trader,
};
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use uuid::Uuid;

pub const ENV_DB_URL: &str = "HLCOPY_DATABASE_URL";

pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    PgPoolOptions::new().max_connections(10).connect(&url).await.context("failed to connect to Postgres")
}

/// Run embedded migrations. Safe to call on every startup — `sqlx::migrate!`
/// tracks applied versions in its own bookkeeping table.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await.context("db migrate failed")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbStatus {
    pub ok: bool,
    pub has_scheduler_state_table: bool,
}

pub async fn status(pool: &PgPool) -> Result<DbStatus> {
    let (one,): (i32,) = sqlx::query_as("select 1").fetch_one(pool).await.context("status connectivity query failed")?;
    let (exists,): (bool,) = sqlx::query_as(
        "select exists (select 1 from information_schema.tables where table_schema='public' and table_name='scheduler_state')",
    )
    .fetch_one(pool)
    .await
    .context("status table-exists query failed")?;
    Ok(DbStatus { ok: one == 1, has_scheduler_state_table: exists })
}

// ---------------------------------------------------------------------------
// Enum <-> text coercion. hlcopy-schemas stays sqlx-agnostic; the storage
// representation lives entirely in this crate.
// ---------------------------------------------------------------------------

fn side_to_str(side: Side) -> &'static str {
    match side {
        Side::Long => "long",
        Side::Short => "short",
    }
}

fn side_from_str(s: &str) -> Result<Side> {
    match s {
        "long" => Ok(Side::Long),
        "short" => Ok(Side::Short),
        other => anyhow::bail!("unknown side '{other}' in database row"),
    }
}

fn action_to_str(a: TradeAction) -> &'static str {
    match a {
        TradeAction::Open => "open",
        TradeAction::Close => "close",
        TradeAction::Add => "add",
        TradeAction::Reduce => "reduce",
    }
}

fn action_from_str(s: &str) -> Result<TradeAction> {
    match s {
        "open" => Ok(TradeAction::Open),
        "close" => Ok(TradeAction::Close),
        "add" => Ok(TradeAction::Add),
        "reduce" => Ok(TradeAction::Reduce),
        other => anyhow::bail!("unknown trade action '{other}' in database row"),
    }
}

fn leverage_type_to_str(t: LeverageType) -> &'static str {
    match t {
        LeverageType::Cross => "cross",
        LeverageType::Isolated => "isolated",
    }
}

fn leverage_type_from_str(s: &str) -> Result<LeverageType> {
    match s {
        "cross" => Ok(LeverageType::Cross),
        "isolated" => Ok(LeverageType::Isolated),
        other => anyhow::bail!("unknown leverage type '{other}' in database row"),
    }
}

fn order_status_to_str(s: OrderStatus) -> &'static str {
    match s {
        OrderStatus::Pending => "pending",
        OrderStatus::PartiallyFilled => "partially_filled",
        OrderStatus::Filled => "filled",
        OrderStatus::Cancelled => "cancelled",
        OrderStatus::Failed => "failed",
    }
}

fn order_status_from_str(s: &str) -> Result<OrderStatus> {
    match s {
        "pending" => Ok(OrderStatus::Pending),
        "partially_filled" => Ok(OrderStatus::PartiallyFilled),
        "filled" => Ok(OrderStatus::Filled),
        "cancelled" => Ok(OrderStatus::Cancelled),
        "failed" => Ok(OrderStatus::Failed),
        other => anyhow::bail!("unknown order status '{other}' in database row"),
    }
}

// ---------------------------------------------------------------------------
// traders
// ---------------------------------------------------------------------------

pub async fn upsert_trader(pool: &PgPool, trader: &Trader) -> Result<()> {
    sqlx::query(
        r#"
        insert into traders (address, label, account_value, first_seen, last_active)
        values ($1, $2, $3, $4, $5)
        on conflict (address) do update
            set label = excluded.label,
                account_value = excluded.account_value,
                last_active = excluded.last_active
        "#,
    )
    .bind(&trader.address)
    .bind(&trader.label)
    .bind(trader.account_value)
    .bind(trader.first_seen)
    .bind(trader.last_active)
    .execute(pool)
    .await
    .context("upsert_trader failed")?;
    Ok(())
}

pub async fn load_trader(pool: &PgPool, address: &str) -> Result<Option<Trader>> {
    let row = sqlx::query("select address, label, account_value, first_seen, last_active from traders where address = $1")
        .bind(address)
        .fetch_optional(pool)
        .await
        .context("load_trader failed")?;

    let Some(row) = row else { return Ok(None) };
    Ok(Some(Trader {
        address: row.try_get("address")?,
        label: row.try_get("label")?,
        account_value: row.try_get("account_value")?,
        first_seen: row.try_get("first_seen")?,
        last_active: row.try_get("last_active")?,
    }))
}

pub async fn load_all_traders(pool: &PgPool) -> Result<Vec<Trader>> {
    let rows = sqlx::query("select address, label, account_value, first_seen, last_active from traders order by address asc")
        .fetch_all(pool)
        .await
        .context("load_all_traders failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(Trader {
            address: row.try_get("address")?,
            label: row.try_get("label")?,
            account_value: row.try_get("account_value")?,
            first_seen: row.try_get("first_seen")?,
            last_active: row.try_get("last_active")?,
        });
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// trades
// ---------------------------------------------------------------------------

/// Idempotent on (trader, transaction_hash). Returns `false` if the trade was
/// already present and no row was inserted.
pub async fn insert_trade_deduped(pool: &PgPool, trade: &Trade) -> Result<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        insert into trades (trader, token, side, action, size, price, value_usd, closed_pnl, fee_usd, ts, transaction_hash)
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        on conflict (trader, transaction_hash) do nothing
        returning id
        "#,
    )
    .bind(&trade.trader)
    .bind(&trade.token)
    .bind(side_to_str(trade.side))
    .bind(action_to_str(trade.action))
    .bind(trade.size)
    .bind(trade.price)
    .bind(trade.value_usd)
    .bind(trade.closed_pnl)
    .bind(trade.fee_usd)
    .bind(trade.timestamp)
    .bind(&trade.transaction_hash)
    .fetch_optional(pool)
    .await
    .context("insert_trade_deduped failed")?;
    Ok(row.is_some())
}

pub async fn load_trades_since(pool: &PgPool, trader: &str, since: DateTime<Utc>) -> Result<Vec<Trade>> {
    let rows = sqlx::query(
        "select trader, token, side, action, size, price, value_usd, closed_pnl, fee_usd, ts, transaction_hash \
         from trades where trader = $1 and ts >= $2 order by ts asc",
    )
    .bind(trader)
    .bind(since)
    .fetch_all(pool)
    .await
    .context("load_trades_since failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(Trade {
            trader: row.try_get("trader")?,
            token: row.try_get("token")?,
            side: side_from_str(row.try_get("side")?)?,
            action: action_from_str(row.try_get("action")?)?,
            size: row.try_get("size")?,
            price: row.try_get("price")?,
            value_usd: row.try_get("value_usd")?,
            closed_pnl: row.try_get("closed_pnl")?,
            fee_usd: row.try_get("fee_usd")?,
            timestamp: row.try_get("ts")?,
            transaction_hash: row.try_get("transaction_hash")?,
        });
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// position_snapshots
// ---------------------------------------------------------------------------

pub async fn insert_position_snapshot(pool: &PgPool, snap: &PositionSnapshot) -> Result<()> {
    sqlx::query(
        r#"
        insert into position_snapshots
            (trader, token, side, size, entry_price, mark_price, leverage_value, leverage_type,
             liquidation_price, unrealized_pnl, margin_used, account_value, captured_at, snapshot_batch)
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
        "#,
    )
    .bind(&snap.trader)
    .bind(&snap.token)
    .bind(side_to_str(snap.side))
    .bind(snap.size)
    .bind(snap.entry_price)
    .bind(snap.mark_price)
    .bind(snap.leverage_value)
    .bind(leverage_type_to_str(snap.leverage_type))
    .bind(snap.liquidation_price)
    .bind(snap.unrealized_pnl)
    .bind(snap.margin_used)
    .bind(snap.account_value)
    .bind(snap.captured_at)
    .bind(snap.snapshot_batch)
    .execute(pool)
    .await
    .context("insert_position_snapshot failed")?;
    Ok(())
}

pub async fn load_position_snapshots_since(pool: &PgPool, trader: &str, since: DateTime<Utc>) -> Result<Vec<PositionSnapshot>> {
    let rows = sqlx::query(
        "select trader, token, side, size, entry_price, mark_price, leverage_value, leverage_type, \
         liquidation_price, unrealized_pnl, margin_used, account_value, captured_at, snapshot_batch \
         from position_snapshots where trader = $1 and captured_at >= $2 order by captured_at asc",
    )
    .bind(trader)
    .bind(since)
    .fetch_all(pool)
    .await
    .context("load_position_snapshots_since failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(PositionSnapshot {
            trader: row.try_get("trader")?,
            token: row.try_get("token")?,
            side: side_from_str(row.try_get("side")?)?,
            size: row.try_get("size")?,
            entry_price: row.try_get("entry_price")?,
            mark_price: row.try_get("mark_price")?,
            leverage_value: row.try_get("leverage_value")?,
            leverage_type: leverage_type_from_str(row.try_get("leverage_type")?)?,
            liquidation_price: row.try_get("liquidation_price")?,
            unrealized_pnl: row.try_get("unrealized_pnl")?,
            margin_used: row.try_get("margin_used")?,
            account_value: row.try_get("account_value")?,
            captured_at: row.try_get("captured_at")?,
            snapshot_batch: row.try_get("snapshot_batch")?,
        });
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// trade_metrics
// ---------------------------------------------------------------------------

pub async fn upsert_trade_metrics(pool: &PgPool, trader: &str, m: &TradeMetrics) -> Result<()> {
    sqlx::query(
        r#"
        insert into trade_metrics
            (trader, window_days, total_trades, winning_trades, losing_trades, win_rate, gross_profit,
             gross_loss, profit_factor, avg_return, std_return, pseudo_sharpe, total_pnl, roi_proxy,
             max_drawdown_proxy, max_leverage, leverage_std, largest_trade_pnl_ratio, pnl_trend_slope, computed_at)
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, now())
        on conflict (trader, window_days) do update
            set total_trades = excluded.total_trades,
                winning_trades = excluded.winning_trades,
                losing_trades = excluded.losing_trades,
                win_rate = excluded.win_rate,
                gross_profit = excluded.gross_profit,
                gross_loss = excluded.gross_loss,
                profit_factor = excluded.profit_factor,
                avg_return = excluded.avg_return,
                std_return = excluded.std_return,
                pseudo_sharpe = excluded.pseudo_sharpe,
                total_pnl = excluded.total_pnl,
                roi_proxy = excluded.roi_proxy,
                max_drawdown_proxy = excluded.max_drawdown_proxy,
                max_leverage = excluded.max_leverage,
                leverage_std = excluded.leverage_std,
                largest_trade_pnl_ratio = excluded.largest_trade_pnl_ratio,
                pnl_trend_slope = excluded.pnl_trend_slope,
                computed_at = excluded.computed_at
        "#,
    )
    .bind(trader)
    .bind(m.window_days as i32)
    .bind(m.total_trades as i32)
    .bind(m.winning_trades as i32)
    .bind(m.losing_trades as i32)
    .bind(m.win_rate)
    .bind(m.gross_profit)
    .bind(m.gross_loss)
    .bind(m.profit_factor)
    .bind(m.avg_return)
    .bind(m.std_return)
    .bind(m.pseudo_sharpe)
    .bind(m.total_pnl)
    .bind(m.roi_proxy)
    .bind(m.max_drawdown_proxy)
    .bind(m.max_leverage)
    .bind(m.leverage_std)
    .bind(m.largest_trade_pnl_ratio)
    .bind(m.pnl_trend_slope)
    .execute(pool)
    .await
    .context("upsert_trade_metrics failed")?;
    Ok(())
}

pub async fn load_trade_metrics(pool: &PgPool, trader: &str, window_days: u32) -> Result<Option<TradeMetrics>> {
    let row = sqlx::query(
        "select window_days, total_trades, winning_trades, losing_trades, win_rate, gross_profit, gross_loss, \
         profit_factor, avg_return, std_return, pseudo_sharpe, total_pnl, roi_proxy, max_drawdown_proxy, \
         max_leverage, leverage_std, largest_trade_pnl_ratio, pnl_trend_slope \
         from trade_metrics where trader = $1 and window_days = $2",
    )
    .bind(trader)
    .bind(window_days as i32)
    .fetch_optional(pool)
    .await
    .context("load_trade_metrics failed")?;

    let Some(row) = row else { return Ok(None) };
    Ok(Some(TradeMetrics {
        window_days: row.try_get::<i32, _>("window_days")? as u32,
        total_trades: row.try_get::<i32, _>("total_trades")? as u32,
        winning_trades: row.try_get::<i32, _>("winning_trades")? as u32,
        losing_trades: row.try_get::<i32, _>("losing_trades")? as u32,
        win_rate: row.try_get("win_rate")?,
        gross_profit: row.try_get("gross_profit")?,
        gross_loss: row.try_get("gross_loss")?,
        profit_factor: row.try_get("profit_factor")?,
        avg_return: row.try_get("avg_return")?,
        std_return: row.try_get("std_return")?,
        pseudo_sharpe: row.try_get("pseudo_sharpe")?,
        total_pnl: row.try_get("total_pnl")?,
        roi_proxy: row.try_get("roi_proxy")?,
        max_drawdown_proxy: row.try_get("max_drawdown_proxy")?,
        max_leverage: row.try_get("max_leverage")?,
        leverage_std: row.try_get("leverage_std")?,
        largest_trade_pnl_ratio: row.try_get("largest_trade_pnl_ratio")?,
        pnl_trend_slope: row.try_get("pnl_trend_slope")?,
    }))
}

// ---------------------------------------------------------------------------
// scores
// ---------------------------------------------------------------------------

pub async fn upsert_score(pool: &PgPool, score: &Score) -> Result<()> {
    sqlx::query(
        r#"
        insert into scores
            (trader, tier1_pass, consistency_pass, anti_luck_pass, growth_score, drawdown_score,
             leverage_score, liquidation_distance_score, diversity_score, consistency_score,
             smart_money_multiplier, recency_decay, raw_composite, final_composite, rejection_reason, computed_at)
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        on conflict (trader) do update
            set tier1_pass = excluded.tier1_pass,
                consistency_pass = excluded.consistency_pass,
                anti_luck_pass = excluded.anti_luck_pass,
                growth_score = excluded.growth_score,
                drawdown_score = excluded.drawdown_score,
                leverage_score = excluded.leverage_score,
                liquidation_distance_score = excluded.liquidation_distance_score,
                diversity_score = excluded.diversity_score,
                consistency_score = excluded.consistency_score,
                smart_money_multiplier = excluded.smart_money_multiplier,
                recency_decay = excluded.recency_decay,
                raw_composite = excluded.raw_composite,
                final_composite = excluded.final_composite,
                rejection_reason = excluded.rejection_reason,
                computed_at = excluded.computed_at
        "#,
    )
    .bind(&score.trader)
    .bind(score.tier1_pass)
    .bind(score.consistency_pass)
    .bind(score.anti_luck_pass)
    .bind(score.growth_score)
    .bind(score.drawdown_score)
    .bind(score.leverage_score)
    .bind(score.liquidation_distance_score)
    .bind(score.diversity_score)
    .bind(score.consistency_score)
    .bind(score.smart_money_multiplier)
    .bind(score.recency_decay)
    .bind(score.raw_composite)
    .bind(score.final_composite)
    .bind(&score.rejection_reason)
    .bind(score.computed_at)
    .execute(pool)
    .await
    .context("upsert_score failed")?;
    Ok(())
}

pub async fn load_eligible_scores(pool: &PgPool) -> Result<Vec<Score>> {
    let rows = sqlx::query(
        "select trader, tier1_pass, consistency_pass, anti_luck_pass, growth_score, drawdown_score, \
         leverage_score, liquidation_distance_score, diversity_score, consistency_score, \
         smart_money_multiplier, recency_decay, raw_composite, final_composite, rejection_reason, computed_at \
         from scores where rejection_reason is null order by final_composite desc",
    )
    .fetch_all(pool)
    .await
    .context("load_eligible_scores failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(Score {
            trader: row.try_get("trader")?,
            tier1_pass: row.try_get("tier1_pass")?,
            consistency_pass: row.try_get("consistency_pass")?,
            anti_luck_pass: row.try_get("anti_luck_pass")?,
            growth_score: row.try_get("growth_score")?,
            drawdown_score: row.try_get("drawdown_score")?,
            leverage_score: row.try_get("leverage_score")?,
            liquidation_distance_score: row.try_get("liquidation_distance_score")?,
            diversity_score: row.try_get("diversity_score")?,
            consistency_score: row.try_get("consistency_score")?,
            smart_money_multiplier: row.try_get("smart_money_multiplier")?,
            recency_decay: row.try_get("recency_decay")?,
            raw_composite: row.try_get("raw_composite")?,
            final_composite: row.try_get("final_composite")?,
            rejection_reason: row.try_get("rejection_reason")?,
            computed_at: row.try_get("computed_at")?,
        });
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// allocations
// ---------------------------------------------------------------------------

pub async fn insert_allocation(pool: &PgPool, row: &AllocationRow) -> Result<()> {
    sqlx::query("insert into allocations (trader, weight, computed_at) values ($1, $2, $3)")
        .bind(&row.trader)
        .bind(row.weight)
        .bind(row.computed_at)
        .execute(pool)
        .await
        .context("insert_allocation failed")?;
    Ok(())
}

pub async fn load_latest_allocations(pool: &PgPool) -> Result<Vec<AllocationRow>> {
    let rows = sqlx::query(
        r#"
        select trader, weight, computed_at from allocations
        where computed_at = (select max(computed_at) from allocations)
        order by trader asc
        "#,
    )
    .fetch_all(pool)
    .await
    .context("load_latest_allocations failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(AllocationRow {
            trader: row.try_get("trader")?,
            weight: row.try_get("weight")?,
            computed_at: row.try_get("computed_at")?,
        });
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// open_positions
// ---------------------------------------------------------------------------

pub async fn insert_open_position(pool: &PgPool, pos: &OpenPosition) -> Result<()> {
    sqlx::query(
        r#"
        insert into open_positions
            (id, token, side, entry_price, size, notional, opened_at, stop_loss_price,
             trailing_peak, trailing_stop_price, time_stop_at, closed_at, realized_pnl)
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(pos.id)
    .bind(&pos.token)
    .bind(side_to_str(pos.side))
    .bind(pos.entry_price)
    .bind(pos.size)
    .bind(pos.notional)
    .bind(pos.opened_at)
    .bind(pos.stop_loss_price)
    .bind(pos.trailing_peak)
    .bind(pos.trailing_stop_price)
    .bind(pos.time_stop_at)
    .bind(pos.closed_at)
    .bind(pos.realized_pnl)
    .execute(pool)
    .await
    .context("insert_open_position failed")?;
    Ok(())
}

pub async fn update_open_position_adjust(pool: &PgPool, id: Uuid, size: f64, notional: f64) -> Result<()> {
    sqlx::query("update open_positions set size = $2, notional = $3 where id = $1 and closed_at is null")
        .bind(id)
        .bind(size)
        .bind(notional)
        .execute(pool)
        .await
        .context("update_open_position_adjust failed")?;
    Ok(())
}

/// Atomic claim-then-close: only the first caller for a given `id` succeeds.
/// Grounded in the teacher's `FOR UPDATE SKIP LOCKED`-style claim pattern,
/// here expressed as a guarded `UPDATE ... WHERE closed_at IS NULL RETURNING`.
pub async fn claim_close_open_position(pool: &PgPool, id: Uuid, closed_at: DateTime<Utc>, realized_pnl: f64) -> Result<bool> {
    let row: Option<(Uuid,)> = sqlx::query_as(
        "update open_positions set closed_at = $2, realized_pnl = $3 where id = $1 and closed_at is null returning id",
    )
    .bind(id)
    .bind(closed_at)
    .bind(realized_pnl)
    .fetch_optional(pool)
    .await
    .context("claim_close_open_position failed")?;
    Ok(row.is_some())
}

pub async fn update_trailing_state(pool: &PgPool, id: Uuid, trailing_peak: f64, trailing_stop_price: f64) -> Result<()> {
    sqlx::query("update open_positions set trailing_peak = $2, trailing_stop_price = $3 where id = $1 and closed_at is null")
        .bind(id)
        .bind(trailing_peak)
        .bind(trailing_stop_price)
        .execute(pool)
        .await
        .context("update_trailing_state failed")?;
    Ok(())
}

pub async fn load_open_positions(pool: &PgPool) -> Result<Vec<OpenPosition>> {
    let rows = sqlx::query(
        "select id, token, side, entry_price, size, notional, opened_at, stop_loss_price, \
         trailing_peak, trailing_stop_price, time_stop_at, closed_at, realized_pnl \
         from open_positions where closed_at is null order by opened_at asc, token asc",
    )
    .fetch_all(pool)
    .await
    .context("load_open_positions failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(OpenPosition {
            id: row.try_get("id")?,
            token: row.try_get("token")?,
            side: side_from_str(row.try_get("side")?)?,
            entry_price: row.try_get("entry_price")?,
            size: row.try_get("size")?,
            notional: row.try_get("notional")?,
            opened_at: row.try_get("opened_at")?,
            stop_loss_price: row.try_get("stop_loss_price")?,
            trailing_peak: row.try_get("trailing_peak")?,
            trailing_stop_price: row.try_get("trailing_stop_price")?,
            time_stop_at: row.try_get("time_stop_at")?,
            closed_at: row.try_get("closed_at")?,
            realized_pnl: row.try_get("realized_pnl")?,
        });
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// orders
// ---------------------------------------------------------------------------

pub async fn insert_order(pool: &PgPool, order: &Order) -> Result<()> {
    sqlx::query(
        r#"
        insert into orders (id, side, token, target_price, limit_low, limit_high, target_notional,
                             status, attempt, fill_price, fill_size, fill_time)
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(order.id)
    .bind(side_to_str(order.side))
    .bind(&order.token)
    .bind(order.target_price)
    .bind(order.limit_low)
    .bind(order.limit_high)
    .bind(order.target_notional)
    .bind(order_status_to_str(order.status))
    .bind(order.attempt as i32)
    .bind(order.fill_price)
    .bind(order.fill_size)
    .bind(order.fill_time)
    .execute(pool)
    .await
    .context("insert_order failed")?;
    Ok(())
}

pub async fn update_order_status(pool: &PgPool, order: &Order) -> Result<()> {
    sqlx::query(
        "update orders set status = $2, attempt = $3, fill_price = $4, fill_size = $5, fill_time = $6 where id = $1",
    )
    .bind(order.id)
    .bind(order_status_to_str(order.status))
    .bind(order.attempt as i32)
    .bind(order.fill_price)
    .bind(order.fill_size)
    .bind(order.fill_time)
    .execute(pool)
    .await
    .context("update_order_status failed")?;
    Ok(())
}

pub async fn load_order(pool: &PgPool, id: Uuid) -> Result<Option<Order>> {
    let row = sqlx::query(
        "select id, side, token, target_price, limit_low, limit_high, target_notional, status, \
         attempt, fill_price, fill_size, fill_time from orders where id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("load_order failed")?;

    let Some(row) = row else { return Ok(None) };
    Ok(Some(Order {
        id: row.try_get("id")?,
        side: side_from_str(row.try_get("side")?)?,
        token: row.try_get("token")?,
        target_price: row.try_get("target_price")?,
        limit_low: row.try_get("limit_low")?,
        limit_high: row.try_get("limit_high")?,
        target_notional: row.try_get("target_notional")?,
        status: order_status_from_str(row.try_get("status")?)?,
        attempt: row.try_get::<i32, _>("attempt")? as u32,
        fill_price: row.try_get("fill_price")?,
        fill_size: row.try_get("fill_size")?,
        fill_time: row.try_get("fill_time")?,
    }))
}

// ---------------------------------------------------------------------------
// blacklist
// ---------------------------------------------------------------------------

pub async fn upsert_blacklist_entry(pool: &PgPool, entry: &BlacklistEntry) -> Result<()> {
    sqlx::query(
        r#"
        insert into blacklist (address, reason, expires_at)
        values ($1, $2, $3)
        on conflict (address) do update set reason = excluded.reason, expires_at = excluded.expires_at
        "#,
    )
    .bind(&entry.address)
    .bind(&entry.reason)
    .bind(entry.expires_at)
    .execute(pool)
    .await
    .context("upsert_blacklist_entry failed")?;
    Ok(())
}

/// O(1) lookup by primary key, consistent with the invariant that eligibility
/// checks fail closed on a blacklist hit.
pub async fn is_blacklisted(pool: &PgPool, address: &str, now: DateTime<Utc>) -> Result<bool> {
    let row: Option<(Option<DateTime<Utc>>,)> =
        sqlx::query_as("select expires_at from blacklist where address = $1").bind(address).fetch_optional(pool).await.context("is_blacklisted failed")?;
    Ok(match row {
        Some((expires_at,)) => expires_at.map(|exp| now < exp).unwrap_or(true),
        None => false,
    })
}

// ---------------------------------------------------------------------------
// scheduler_state (singleton row)
// ---------------------------------------------------------------------------

pub async fn load_scheduler_state(pool: &PgPool) -> Result<SchedulerState> {
    let row = sqlx::query(
        "select last_refresh_at, last_rebalance_at, last_ingest_at, last_monitor_at, last_ml_snapshot_at \
         from scheduler_state where sentinel_id = 1",
    )
    .fetch_optional(pool)
    .await
    .context("load_scheduler_state failed")?;

    let Some(row) = row else { return Ok(SchedulerState::default()) };
    Ok(SchedulerState {
        last_refresh_at: row.try_get("last_refresh_at")?,
        last_rebalance_at: row.try_get("last_rebalance_at")?,
        last_ingest_at: row.try_get("last_ingest_at")?,
        last_monitor_at: row.try_get("last_monitor_at")?,
        last_ml_snapshot_at: row.try_get("last_ml_snapshot_at")?,
    })
}

pub async fn save_scheduler_state(pool: &PgPool, state: &SchedulerState) -> Result<()> {
    sqlx::query(
        r#"
        insert into scheduler_state (sentinel_id, last_refresh_at, last_rebalance_at, last_ingest_at, last_monitor_at, last_ml_snapshot_at)
        values (1, $1, $2, $3, $4, $5)
        on conflict (sentinel_id) do update
            set last_refresh_at = excluded.last_refresh_at,
                last_rebalance_at = excluded.last_rebalance_at,
                last_ingest_at = excluded.last_ingest_at,
                last_monitor_at = excluded.last_monitor_at,
                last_ml_snapshot_at = excluded.last_ml_snapshot_at
        "#,
    )
    .bind(state.last_refresh_at)
    .bind(state.last_rebalance_at)
    .bind(state.last_ingest_at)
    .bind(state.last_monitor_at)
    .bind(state.last_ml_snapshot_at)
    .execute(pool)
    .await
    .context("save_scheduler_state failed")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// applied_config_snapshots
// ---------------------------------------------------------------------------

pub async fn insert_applied_config_snapshot(pool: &PgPool, config_hash: &str, config_json: &serde_json::Value) -> Result<()> {
    sqlx::query("insert into applied_config_snapshots (config_hash, config_json) values ($1, $2)")
        .bind(config_hash)
        .bind(config_json)
        .execute(pool)
        .await
        .context("insert_applied_config_snapshot failed")?;
    Ok(())
}
