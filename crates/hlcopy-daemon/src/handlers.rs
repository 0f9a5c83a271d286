//! `DaemonHandlers`: the concrete `CadenceHandlers` implementation wiring
//! together every pure-logic crate (marketclient, scorer, portfolio,
//! execution, broker-paper, monitor, db) into the four cadence bodies. This
//! is the one place in the repo where all of those crates meet — everything
//! upstream of this file stays composable and independently testable.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;

use hlcopy_broker_paper::PaperBroker;
use hlcopy_config::Config;
use hlcopy_execution::{Executor, ExecutionOutcome, ExecutionParams, OrderSnapshot};
use hlcopy_marketclient::{MarketClient, MarketClientConfig};
use hlcopy_portfolio::{
    apply_risk_overlay, compute_rebalance_diff, compute_target_weights, RebalanceAction, RebalanceActionKind, RiskCaps,
    TraderBook, TraderPosition, WeightCandidate,
};
use hlcopy_scheduler::{CadenceHandlers, NoopAugmenter, RebalanceLock, ScoreAugmenter};
use hlcopy_schemas::{CoreError, Order, OrderStatus, PositionSnapshot, Side, Trader};
use hlcopy_scorer::{derive_trade_metrics, score_position_based, ScoringInput};

fn to_fatal(e: anyhow::Error) -> CoreError {
    CoreError::fatal(e.to_string())
}

fn to_capability_unavailable(e: anyhow::Error) -> CoreError {
    CoreError::capability_unavailable(e.to_string())
}

pub struct DaemonHandlers {
    pool: PgPool,
    market: MarketClient,
    config: Config,
    broker: PaperBroker,
    augmenter: Box<dyn ScoreAugmenter>,
    rebalance_lock: RebalanceLock,
    /// Most recently observed mark price per token, refreshed by ingest and
    /// refresh's position fetches. No dedicated quote endpoint exists (§6);
    /// rebalance and monitor both price off the latest snapshot seen.
    mark_price_cache: BTreeMap<String, f64>,
    open_count: AtomicU32,
    /// Trader weights from the most recently completed rebalance, kept to
    /// compute the next cycle's turnover for the status surface.
    last_weights: BTreeMap<String, f64>,
    last_allocation_turnover: Option<f64>,
}

impl DaemonHandlers {
    pub fn new(pool: PgPool, config: Config, rebalance_lock: RebalanceLock) -> anyhow::Result<Self> {
        let market = MarketClient::new(MarketClientConfig {
            base_url: std::env::var("HL_COPYTRADE_BASE_URL").unwrap_or_else(|_| "https://api.hyperliquid-copytrade.example".to_string()),
            api_key: config.api_key.clone(),
            request_timeout: std::time::Duration::from_secs(30),
            rate_limiter_state_dir: Some(std::path::PathBuf::from("./.hlcopy/ratelimiter")),
        })?;
        Ok(Self {
            pool,
            market,
            config,
            broker: PaperBroker::new(),
            augmenter: Box::new(NoopAugmenter),
            rebalance_lock,
            mark_price_cache: BTreeMap::new(),
            open_count: AtomicU32::new(0),
            last_weights: BTreeMap::new(),
            last_allocation_turnover: None,
        })
    }

    /// Writes an order through its two persisted states (§3: Order is a
    /// persisted entity with monotonic state transitions): a `Pending` row
    /// at placement, then a terminal update once `resolve` has polled it.
    async fn persist_order(&self, snapshot: &OrderSnapshot) -> Result<(), CoreError> {
        let pending = Order {
            id: snapshot.id,
            side: snapshot.side,
            token: snapshot.token.clone(),
            target_price: snapshot.target_price,
            limit_low: snapshot.limit_low,
            limit_high: snapshot.limit_high,
            target_notional: snapshot.target_notional,
            status: OrderStatus::Pending,
            attempt: 0,
            fill_price: None,
            fill_size: None,
            fill_time: None,
        };
        hlcopy_db::insert_order(&self.pool, &pending).await.map_err(to_capability_unavailable)?;

        let resolved = Order {
            status: snapshot.status,
            attempt: snapshot.attempt,
            fill_price: snapshot.fill_price,
            fill_size: snapshot.fill_size,
            fill_time: snapshot.fill_time,
            ..pending
        };
        hlcopy_db::update_order_status(&self.pool, &resolved).await.map_err(to_capability_unavailable)?;
        Ok(())
    }

    fn execution_params(&self) -> ExecutionParams {
        ExecutionParams {
            slippage_bps: self.config.execution.slippage_bps,
            stop_loss_bps: self.config.execution.stop_loss_bps,
            trailing_bps: self.config.execution.trailing_bps,
            max_hold_duration: Duration::seconds(self.config.execution.max_hold_duration_secs),
            poll_attempts: self.config.execution.poll_attempts,
        }
    }
}

impl CadenceHandlers for DaemonHandlers {
    async fn run_refresh(&mut self) -> Result<(), CoreError> {
        let now = Utc::now();
        let date_from = now - Duration::days(30);
        let per_page = self.config.scoring.top_n.max(100) as u32;

        let mut page = 0u32;
        loop {
            let envelope = self.market.fetch_leaderboard(date_from, now, page, per_page).await?;
            let is_last = envelope.pagination.is_last_page;
            let is_empty = envelope.data.is_empty();

            for entry in envelope.data {
                let address = entry.trader_address.clone();
                if hlcopy_db::is_blacklisted(&self.pool, &address, now).await.map_err(to_fatal)? {
                    continue;
                }

                let trader = Trader {
                    address: address.clone(),
                    label: entry.trader_address_label.clone(),
                    account_value: entry.account_value,
                    first_seen: now,
                    last_active: now,
                };
                hlcopy_db::upsert_trader(&self.pool, &trader).await.map_err(to_fatal)?;

                let positions = match self.market.fetch_address_positions(&address).await {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(%address, error = %e, "skipping trader, positions fetch failed");
                        continue;
                    }
                };
                for snap in &positions {
                    self.mark_price_cache.insert(snap.token.clone(), snap.mark_price);
                    hlcopy_db::insert_position_snapshot(&self.pool, snap).await.map_err(to_fatal)?;
                }

                let since = now - Duration::days(30);
                let snapshots = hlcopy_db::load_position_snapshots_since(&self.pool, &address, since).await.map_err(to_fatal)?;
                let score = score_position_based(&ScoringInput {
                    trader: &address,
                    label: trader.label.as_deref(),
                    blacklisted: false,
                    snapshots: &snapshots,
                    now,
                });

                if let Some(prediction) = self.augmenter.augment(&address, &score) {
                    tracing::info!(%address, prediction, augmenter = self.augmenter.name(), "augmenter prediction logged, not applied");
                }
                hlcopy_db::upsert_score(&self.pool, &score).await.map_err(to_fatal)?;

                for window_days in [7u32, 30u32] {
                    let trades = hlcopy_db::load_trades_since(&self.pool, &address, now - Duration::days(window_days as i64))
                        .await
                        .map_err(to_fatal)?;
                    let metrics = derive_trade_metrics(&trades, window_days);
                    hlcopy_db::upsert_trade_metrics(&self.pool, &address, &metrics).await.map_err(to_fatal)?;
                }
            }

            if is_empty || is_last {
                break;
            }
            page += 1;
        }
        Ok(())
    }

    async fn run_rebalance(&mut self) -> Result<(), CoreError> {
        let now = Utc::now();
        let scores = hlcopy_db::load_eligible_scores(&self.pool).await.map_err(to_fatal)?;

        let mut candidates = Vec::new();
        let mut books = Vec::new();
        for score in &scores {
            let Some(trader) = hlcopy_db::load_trader(&self.pool, &score.trader).await.map_err(to_fatal)? else {
                continue;
            };
            candidates.push(WeightCandidate {
                trader: trader.address.clone(),
                final_score: score.final_composite,
                account_value: trader.account_value,
            });

            let since = now - Duration::hours(2);
            let snapshots = hlcopy_db::load_position_snapshots_since(&self.pool, &trader.address, since).await.map_err(to_fatal)?;
            books.push(TraderBook { trader: trader.address.clone(), positions: self.latest_positions(&trader, &snapshots) });
        }

        if candidates.is_empty() {
            tracing::info!("no eligible traders for rebalance, skipping");
            return Ok(());
        }

        let weights = compute_target_weights(&candidates, self.config.scoring.top_n, self.config.scoring.softmax_temperature);
        let caps = RiskCaps {
            per_trader_weight_cap: self.config.portfolio.per_trader_weight_cap,
            per_token_gross_cap: self.config.portfolio.per_token_gross_cap,
            directional_cap: self.config.portfolio.directional_cap,
            max_leverage: self.config.portfolio.max_leverage,
            min_trade_size: self.config.portfolio.min_trade_size,
        };
        let (final_weights, target_book) = apply_risk_overlay(weights, &books, self.config.account_value, &caps);

        for (trader, weight) in &final_weights {
            let row = hlcopy_schemas::AllocationRow { trader: trader.clone(), weight: *weight, computed_at: now };
            hlcopy_db::insert_allocation(&self.pool, &row).await.map_err(to_fatal)?;
        }
        self.last_allocation_turnover = Some(hlcopy_portfolio::compute_turnover(&self.last_weights, &final_weights));
        self.last_weights = final_weights.clone();

        let mut target: BTreeMap<(String, Side), f64> = BTreeMap::new();
        for entry in &target_book {
            target.insert((entry.token.clone(), entry.side), entry.notional);
        }

        let mut guard = self.rebalance_lock.write().await;
        let mut current: BTreeMap<(String, Side), f64> = BTreeMap::new();
        for pos in guard.iter().filter(|p| p.is_open()) {
            *current.entry((pos.token.clone(), pos.side)).or_insert(0.0) += pos.notional;
        }

        let actions = compute_rebalance_diff(&current, &target, self.config.portfolio.min_trade_size, self.config.portfolio.adjust_threshold);
        let params = self.execution_params();

        for action in &actions {
            let mark_price = *self.mark_price_cache.get(&action.token).unwrap_or(&0.0);
            if mark_price <= 0.0 {
                tracing::warn!(token = %action.token, "no mark price available, skipping action");
                continue;
            }

            let existing_idx = guard.iter().position(|p| p.token == action.token && p.side == action.side && p.is_open());
            let existing = existing_idx.map(|i| guard[i].clone());
            let mut executor = Executor::new(&mut self.broker, params);
            let placed = executor.place(action, mark_price);
            let (snapshot, outcome) = executor.resolve(&placed, action, existing.as_ref(), now);
            self.persist_order(&snapshot).await?;

            match outcome {
                ExecutionOutcome::Opened(pos) => {
                    hlcopy_db::insert_open_position(&self.pool, &pos).await.map_err(to_capability_unavailable)?;
                    guard.push(pos);
                }
                ExecutionOutcome::Adjusted { size, notional } => {
                    if let Some(i) = existing_idx {
                        guard[i].size = size;
                        guard[i].notional = notional;
                        hlcopy_db::update_open_position_adjust(&self.pool, guard[i].id, size, notional).await.map_err(to_capability_unavailable)?;
                    }
                }
                ExecutionOutcome::Closed { realized_pnl } => {
                    if let Some(i) = existing_idx {
                        let id = guard[i].id;
                        if hlcopy_monitor::try_claim_close(&mut guard[i], now, realized_pnl) {
                            hlcopy_db::claim_close_open_position(&self.pool, id, now, realized_pnl).await.map_err(to_capability_unavailable)?;
                        }
                    }
                }
                ExecutionOutcome::NoFill { reason } => {
                    tracing::warn!(token = %action.token, kind = ?action.kind, reason, "rebalance action produced no fill");
                }
            }
        }

        guard.retain(|p| p.is_open());
        self.open_count.store(guard.len() as u32, Ordering::SeqCst);
        Ok(())
    }

    async fn run_monitor(&mut self) -> Result<(), CoreError> {
        let now = Utc::now();
        let trailing_bps = self.config.execution.trailing_bps;
        let cache = self.mark_price_cache.clone();
        let params = self.execution_params();

        let mut guard = self.rebalance_lock.write().await;
        let triggers = hlcopy_monitor::scan(&mut guard, |token| cache.get(token).copied(), trailing_bps, now);

        for t in &triggers {
            let Some(i) = guard.iter().position(|p| p.id == t.position_id) else { continue };
            hlcopy_db::update_trailing_state(&self.pool, t.position_id, guard[i].trailing_peak, guard[i].trailing_stop_price)
                .await
                .map_err(to_capability_unavailable)?;

            let mark_price = *cache.get(&t.token).unwrap_or(&guard[i].entry_price);
            let existing = guard[i].clone();
            let action = RebalanceAction {
                kind: RebalanceActionKind::Close,
                token: t.token.clone(),
                side: t.side,
                current_notional: existing.notional,
                target_notional: 0.0,
            };
            let mut executor = Executor::new(&mut self.broker, params);
            let placed = executor.place(&action, mark_price);
            let (snapshot, outcome) = executor.resolve(&placed, &action, Some(&existing), now);
            self.persist_order(&snapshot).await?;

            match outcome {
                ExecutionOutcome::Closed { realized_pnl } => {
                    if hlcopy_monitor::try_claim_close(&mut guard[i], now, realized_pnl) {
                        hlcopy_db::claim_close_open_position(&self.pool, t.position_id, now, realized_pnl)
                            .await
                            .map_err(to_capability_unavailable)?;
                        tracing::info!(token = %t.token, reason = t.reason.as_str(), realized_pnl, "stop-triggered close filled");
                    }
                }
                other => {
                    tracing::warn!(token = %t.token, reason = t.reason.as_str(), outcome = ?other, "stop-triggered close did not fill");
                }
            }
        }

        guard.retain(|p| p.is_open());
        self.open_count.store(guard.len() as u32, Ordering::SeqCst);
        Ok(())
    }

    async fn run_ingest(&mut self) -> Result<(), CoreError> {
        let now = Utc::now();
        let since = now - Duration::days(1);
        let traders = hlcopy_db::load_all_traders(&self.pool).await.map_err(to_fatal)?;

        for trader in traders {
            match self.market.fetch_address_trades(&trader.address, since, now).await {
                Ok(trades) => {
                    for trade in trades {
                        if let Err(e) = hlcopy_db::insert_trade_deduped(&self.pool, &trade).await {
                            tracing::warn!(trader = %trader.address, error = %e, "failed to persist trade, skipping");
                        }
                    }
                }
                Err(e) => tracing::warn!(trader = %trader.address, error = %e, "trade ingest failed for trader, continuing"),
            }

            match self.market.fetch_address_positions(&trader.address).await {
                Ok(snaps) => {
                    for snap in &snaps {
                        self.mark_price_cache.insert(snap.token.clone(), snap.mark_price);
                        if let Err(e) = hlcopy_db::insert_position_snapshot(&self.pool, snap).await {
                            tracing::warn!(trader = %trader.address, error = %e, "failed to persist snapshot, skipping");
                        }
                    }
                }
                Err(e) => tracing::warn!(trader = %trader.address, error = %e, "position ingest failed for trader, continuing"),
            }
        }
        Ok(())
    }

    fn open_position_count(&self) -> u32 {
        self.open_count.load(Ordering::SeqCst)
    }

    fn last_allocation_turnover(&self) -> Option<f64> {
        self.last_allocation_turnover
    }
}

impl DaemonHandlers {
    /// Collapses each token's most recent snapshot (within the window already
    /// queried) into a `TraderPosition` fraction of the trader's own account
    /// value, caching its mark price for the Executor to price against.
    fn latest_positions(&mut self, trader: &Trader, snapshots: &[PositionSnapshot]) -> Vec<TraderPosition> {
        let mut latest: BTreeMap<String, &PositionSnapshot> = BTreeMap::new();
        for s in snapshots {
            latest
                .entry(s.token.clone())
                .and_modify(|cur: &mut &PositionSnapshot| {
                    if s.captured_at > cur.captured_at {
                        *cur = s;
                    }
                })
                .or_insert(s);
        }

        let mut positions = Vec::with_capacity(latest.len());
        for (token, snap) in latest {
            self.mark_price_cache.insert(token.clone(), snap.mark_price);
            if trader.account_value > 0.0 {
                positions.push(TraderPosition {
                    token,
                    side: snap.side,
                    fraction: snap.position_value() / trader.account_value,
                    leverage: snap.leverage_value,
                });
            }
        }
        positions
    }
}
