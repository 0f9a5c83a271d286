//! Wire-level envelope types for the upstream market-data capability.
//!
//! These mirror the JSON shapes in §6 exactly, including the string-typed
//! numerics the upstream API emits on the address endpoints. Nothing outside
//! this module (and `client.rs`'s coercion step) should ever see a
//! `WirePosition` or `WireTrade` — downstream code consumes the coerced
//! `hlcopy_schemas` types only (parse-on-ingest, §9).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct Pagination {
    pub page: u32,
    pub per_page: u32,
    pub is_last_page: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeaderboardEnvelope {
    pub data: Vec<WireLeaderboardEntry>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireLeaderboardEntry {
    pub trader_address: String,
    pub trader_address_label: Option<String>,
    pub total_pnl: f64,
    pub roi: f64,
    pub account_value: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradesEnvelope {
    pub data: Vec<WireTrade>,
    pub pagination: Pagination,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireTrade {
    pub action: String,
    pub block_number: u64,
    pub closed_pnl: String,
    pub crossed: bool,
    pub fee_token_symbol: String,
    pub fee_usd: String,
    pub oid: u64,
    pub price: String,
    pub side: Option<String>,
    pub size: String,
    pub start_position: Option<String>,
    pub timestamp: i64,
    pub token_symbol: String,
    pub transaction_hash: String,
    pub user: String,
    pub value_usd: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PositionsEnvelope {
    pub data: WirePositionsData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WirePositionsData {
    pub asset_positions: Vec<WireAssetPosition>,
    pub margin_summary_account_value: Option<String>,
    pub timestamp: i64,
    pub withdrawable_usd: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireAssetPosition {
    pub position: WirePosition,
    pub position_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WirePosition {
    pub entry_price_usd: String,
    pub leverage_type: String,
    pub leverage_value: f64,
    pub liquidation_price_usd: Option<String>,
    pub margin_used_usd: String,
    pub position_value_usd: String,
    pub return_on_equity: String,
    pub size: String,
    pub token_symbol: String,
    pub unrealized_pnl_usd: String,
}

/// Outbound request body shared by all paginated endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct PagedRequest<'a> {
    pub date_from: Option<i64>,
    pub date_to: Option<i64>,
    pub page: u32,
    pub per_page: u32,
    pub order_by: Option<&'a str>,
}
