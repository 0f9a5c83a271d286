//! HTTP client for the upstream market-data capability.
//!
//! Three public operations (§4.1): `fetch_leaderboard`, `fetch_address_trades`
//! (auto-paginating), `fetch_address_positions`. Every numeric wire field is
//! coerced to `f64` here, at the adapter boundary — nothing downstream ever
//! sees a numeric string (§9, parse-on-ingest).

use crate::ratelimiter::{RateLimiter, RateLimiterConfig};
use crate::wire::*;
use chrono::{DateTime, TimeZone, Utc};
use hlcopy_schemas::{CoreError, LeverageType, PositionSnapshot, Side, Trade, TradeAction};
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

const MAX_RETRY_ATTEMPTS: u32 = 5;
const BASE_BACKOFF_MS: u64 = 200;
const TRADE_HARD_CAP: usize = 1000;
const TRADE_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct MarketClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub request_timeout: Duration,
    /// Directory the three rate limiters persist their state into. `None`
    /// disables persistence (used in tests).
    pub rate_limiter_state_dir: Option<PathBuf>,
}

pub struct MarketClient {
    http: Client,
    config: MarketClientConfig,
    leaderboard_limiter: RateLimiter,
    position_limiter: RateLimiter,
    trade_limiter: RateLimiter,
}

impl MarketClient {
    pub fn new(config: MarketClientConfig) -> anyhow::Result<Self> {
        let http = Client::builder().timeout(config.request_timeout).build()?;
        let dir = config.rate_limiter_state_dir.clone();
        let leaderboard_limiter = RateLimiter::new(
            RateLimiterConfig::LEADERBOARD,
            dir.as_ref().map(|d| d.join("leaderboard.json")),
        );
        let position_limiter = RateLimiter::new(
            RateLimiterConfig::POSITION,
            dir.as_ref().map(|d| d.join("position.json")),
        );
        let trade_limiter = RateLimiter::new(
            RateLimiterConfig::TRADE,
            dir.map(|d| d.join("trade.json")),
        );
        Ok(Self {
            http,
            config,
            leaderboard_limiter,
            position_limiter,
            trade_limiter,
        })
    }

    pub async fn fetch_leaderboard(
        &self,
        date_from: DateTime<Utc>,
        date_to: DateTime<Utc>,
        page: u32,
        per_page: u32,
    ) -> Result<LeaderboardEnvelope, CoreError> {
        self.leaderboard_limiter.acquire().await;
        let body = PagedRequest {
            date_from: Some(date_from.timestamp_millis()),
            date_to: Some(date_to.timestamp_millis()),
            page,
            per_page,
            order_by: None,
        };
        self.post_with_retry("/leaderboard", &body).await
    }

    /// Auto-paginates until an empty page, `is_last_page`, or the 1000-row
    /// hard cap, whichever comes first.
    pub async fn fetch_address_trades(
        &self,
        address: &str,
        date_from: DateTime<Utc>,
        date_to: DateTime<Utc>,
    ) -> Result<Vec<Trade>, CoreError> {
        let mut all = Vec::new();
        let mut page = 0u32;

        loop {
            self.trade_limiter.acquire().await;
            let body = PagedRequest {
                date_from: Some(date_from.timestamp_millis()),
                date_to: Some(date_to.timestamp_millis()),
                page,
                per_page: TRADE_PAGE_SIZE,
                order_by: None,
            };
            let envelope: TradesEnvelope = self.post_with_retry("/address_trades", &body).await?;
            let is_last = envelope.pagination.is_last_page;
            let is_empty = envelope.data.is_empty();

            for wire in envelope.data {
                match coerce_trade(address, wire) {
                    Ok(t) => all.push(t),
                    Err(e) => tracing::warn!(%address, error = %e, "skipping malformed trade record"),
                }
                if all.len() >= TRADE_HARD_CAP {
                    break;
                }
            }

            if is_empty || is_last || all.len() >= TRADE_HARD_CAP {
                break;
            }
            page += 1;
        }

        Ok(all)
    }

    pub async fn fetch_address_positions(&self, address: &str) -> Result<Vec<PositionSnapshot>, CoreError> {
        self.position_limiter.acquire().await;
        let body = PagedRequest {
            date_from: None,
            date_to: None,
            page: 0,
            per_page: 0,
            order_by: None,
        };
        let envelope: PositionsEnvelope = self.post_with_retry("/address_positions", &body).await?;

        let captured_at = Utc
            .timestamp_millis_opt(envelope.data.timestamp)
            .single()
            .unwrap_or_else(Utc::now);
        let batch = Uuid::new_v4();
        let account_value = envelope
            .data
            .margin_summary_account_value
            .as_deref()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0);

        let mut out = Vec::new();
        for ap in envelope.data.asset_positions {
            match coerce_position(address, ap.position, account_value, captured_at, batch) {
                Ok(p) => out.push(p),
                Err(e) => tracing::warn!(%address, error = %e, "skipping malformed position record"),
            }
        }
        Ok(out)
    }

    async fn post_with_retry<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T, CoreError> {
        let url = format!("{}{}", self.config.base_url, path);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let resp = self
                .http
                .post(&url)
                .header("apiKey", &self.config.api_key)
                .json(body)
                .send()
                .await;

            match resp {
                Ok(r) => {
                    let status = r.status();
                    if status.is_success() {
                        return r.json::<T>().await.map_err(|e| CoreError::malformed(e.to_string()));
                    }
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        if attempt >= MAX_RETRY_ATTEMPTS {
                            return Err(CoreError::rate_limited(path.to_string(), None));
                        }
                        tokio::time::sleep(backoff_delay(attempt)).await;
                        continue;
                    }
                    if status.is_server_error() {
                        if attempt >= MAX_RETRY_ATTEMPTS {
                            return Err(CoreError::transient_network(format!(
                                "{status} after {attempt} attempts"
                            )));
                        }
                        tokio::time::sleep(backoff_delay(attempt)).await;
                        continue;
                    }
                    return Err(CoreError::api_error(status.as_u16(), status.to_string()));
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    if attempt >= MAX_RETRY_ATTEMPTS {
                        return Err(CoreError::transient_network(e.to_string()));
                    }
                    tokio::time::sleep(backoff_delay(attempt)).await;
                }
                Err(e) => return Err(CoreError::transient_network(e.to_string())),
            }
        }
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = BASE_BACKOFF_MS * 2u64.pow(attempt.min(6));
    let jitter = rand::thread_rng().gen_range(0..=(base / 2).max(1));
    Duration::from_millis(base + jitter)
}

fn parse_numeric(field: &str, raw: &str) -> Result<f64, CoreError> {
    raw.parse::<f64>()
        .map_err(|_| CoreError::malformed(format!("field '{field}' not numeric: '{raw}'")))
}

fn coerce_trade(address: &str, wire: WireTrade) -> Result<Trade, CoreError> {
    let size = parse_numeric("size", &wire.size)?;
    let price = parse_numeric("price", &wire.price)?;
    let value_usd = parse_numeric("value_usd", &wire.value_usd)?;
    let closed_pnl = parse_numeric("closed_pnl", &wire.closed_pnl)?;
    let fee_usd = parse_numeric("fee_usd", &wire.fee_usd)?;
    let action = match wire.action.to_ascii_lowercase().as_str() {
        "open" => TradeAction::Open,
        "close" => TradeAction::Close,
        "add" => TradeAction::Add,
        "reduce" => TradeAction::Reduce,
        other => return Err(CoreError::malformed(format!("unknown trade action '{other}'"))),
    };
    let timestamp = Utc
        .timestamp_millis_opt(wire.timestamp)
        .single()
        .ok_or_else(|| CoreError::malformed("bad trade timestamp"))?;

    Ok(Trade::new(
        address,
        wire.token_symbol,
        action,
        size,
        price,
        value_usd,
        closed_pnl,
        fee_usd,
        timestamp,
        wire.transaction_hash,
    ))
}

fn coerce_position(
    address: &str,
    wire: WirePosition,
    account_value: f64,
    captured_at: DateTime<Utc>,
    batch: Uuid,
) -> Result<PositionSnapshot, CoreError> {
    let size = parse_numeric("size", &wire.size)?;
    let entry_price = parse_numeric("entry_price_usd", &wire.entry_price_usd)?;
    let position_value = parse_numeric("position_value_usd", &wire.position_value_usd)?;
    let margin_used = parse_numeric("margin_used_usd", &wire.margin_used_usd)?;
    let unrealized_pnl = parse_numeric("unrealized_pnl_usd", &wire.unrealized_pnl_usd)?;
    let liquidation_price = wire
        .liquidation_price_usd
        .as_deref()
        .map(|s| parse_numeric("liquidation_price_usd", s))
        .transpose()?;

    let leverage_type = match wire.leverage_type.to_ascii_lowercase().as_str() {
        "cross" => LeverageType::Cross,
        "isolated" => LeverageType::Isolated,
        other => return Err(CoreError::malformed(format!("unknown leverage_type '{other}'"))),
    };

    // The address-positions envelope carries position_value_usd rather than a
    // separate mark price; for a perp, position_value ≈ |size| · mark.
    let mark_price = if size.abs() > f64::EPSILON {
        position_value / size.abs()
    } else {
        entry_price
    };

    Ok(PositionSnapshot {
        trader: address.to_string(),
        token: wire.token_symbol,
        side: Side::from_size(size),
        size,
        entry_price,
        mark_price,
        leverage_value: wire.leverage_value,
        leverage_type,
        liquidation_price,
        unrealized_pnl,
        margin_used,
        account_value,
        captured_at,
        snapshot_batch: batch,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerce_trade_derives_side_and_parses_numerics() {
        let wire = WireTrade {
            action: "open".into(),
            block_number: 1,
            closed_pnl: "0".into(),
            crossed: false,
            fee_token_symbol: "USDC".into(),
            fee_usd: "1.5".into(),
            oid: 1,
            price: "50000.5".into(),
            side: None,
            size: "-0.1".into(),
            start_position: None,
            timestamp: 1_700_000_000_000,
            token_symbol: "BTC".into(),
            transaction_hash: "0xabc".into(),
            user: "0xdef".into(),
            value_usd: "5000.05".into(),
        };
        let t = coerce_trade("0xdef", wire).unwrap();
        assert_eq!(t.side, Side::Short);
        assert_eq!(t.price, 50000.5);
        assert_eq!(t.fee_usd, 1.5);
    }

    #[test]
    fn coerce_trade_rejects_non_numeric_field() {
        let mut wire = WireTrade {
            action: "open".into(),
            block_number: 1,
            closed_pnl: "0".into(),
            crossed: false,
            fee_token_symbol: "USDC".into(),
            fee_usd: "1.5".into(),
            oid: 1,
            price: "not-a-number".into(),
            side: None,
            size: "1".into(),
            start_position: None,
            timestamp: 1_700_000_000_000,
            token_symbol: "BTC".into(),
            transaction_hash: "0xabc".into(),
            user: "0xdef".into(),
            value_usd: "5000".into(),
        };
        let err = coerce_trade("0xdef", wire.clone()).unwrap_err();
        assert!(matches!(err, CoreError::MalformedResponse { .. }));

        wire.price = "50000".into();
        assert!(coerce_trade("0xdef", wire).is_ok());
    }

    #[test]
    fn coerce_position_derives_mark_from_position_value() {
        let wire = WirePosition {
            entry_price_usd: "48000".into(),
            leverage_type: "cross".into(),
            leverage_value: 3.0,
            liquidation_price_usd: Some("40000".into()),
            margin_used_usd: "1000".into(),
            position_value_usd: "5000".into(),
            return_on_equity: "0.1".into(),
            size: "0.1".into(),
            token_symbol: "BTC".into(),
            unrealized_pnl_usd: "200".into(),
        };
        let p = coerce_position("0xabc", wire, 20000.0, Utc::now(), Uuid::new_v4()).unwrap();
        assert_eq!(p.side, Side::Long);
        assert!((p.mark_price - 50000.0).abs() < 1e-9);
        assert_eq!(p.leverage_type, LeverageType::Cross);
    }
}
