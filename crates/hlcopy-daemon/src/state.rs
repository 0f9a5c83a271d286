//! Shared daemon state. Mirrors `mqk-daemon::state::AppState`'s
//! `Arc<RwLock<_>>` composition, narrowed to the fields this spec's status
//! surface actually needs (no integrity-arm/broker-snapshot machinery —
//! those have no counterpart here).

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use hlcopy_scheduler::{BusMsg, StatusSnapshot};
use sqlx::PgPool;
use tokio::sync::{broadcast, RwLock};

pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

pub struct AppState {
    pub bus: broadcast::Sender<BusMsg>,
    pub build: BuildInfo,
    pub status: Arc<RwLock<StatusSnapshot>>,
    pub pool: PgPool,
}

impl AppState {
    pub fn new(pool: PgPool, config_hash: String) -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(64);
        Arc::new(Self {
            bus: tx,
            build: BuildInfo { service: "hlcopy-daemon", version: env!("CARGO_PKG_VERSION") },
            status: Arc::new(RwLock::new(StatusSnapshot {
                uptime_secs: 0,
                last_refresh_at: None,
                last_rebalance_at: None,
                last_monitor_at: None,
                last_ingest_at: None,
                open_position_count: 0,
                last_allocation_turnover: None,
                last_error_kind: None,
                config_hash,
            })),
            pool,
        })
    }
}

static START: OnceLock<Instant> = OnceLock::new();

pub fn uptime_secs() -> u64 {
    START.get_or_init(Instant::now).elapsed().as_secs()
}

pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: std::time::Duration) {
    START.get_or_init(Instant::now);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: chrono::Utc::now().timestamp_millis() });
        }
    });
}
