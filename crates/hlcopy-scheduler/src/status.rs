//! `StatusSnapshot`/`BusMsg` (§4.6 ambient addition): consumed by the
//! daemon's `/v1/status` route and periodically broadcast over an internal
//! `tokio::sync::broadcast` bus. Grounded in `mqk-daemon::state::AppState`'s
//! `StatusSnapshot`/`BusMsg` pair.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    Status(StatusSnapshot),
    LogLine { level: String, msg: String },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub uptime_secs: u64,
    pub last_refresh_at: Option<DateTime<Utc>>,
    pub last_rebalance_at: Option<DateTime<Utc>>,
    pub last_monitor_at: Option<DateTime<Utc>>,
    pub last_ingest_at: Option<DateTime<Utc>>,
    pub open_position_count: u32,
    pub last_allocation_turnover: Option<f64>,
    pub last_error_kind: Option<String>,
    pub config_hash: String,
}
