//! `rebalance_lock` (§5): the single exclusive `tokio::sync::RwLock`
//! protecting all `OpenPosition` mutations and Executor order placement.
//! Monitor acquires it in read mode for stop checks, then releases and lets
//! the Executor reacquire exclusively to perform a close — Monitor itself
//! never mutates under a read guard. Mirrors `mqk-daemon::AppState`'s
//! `Arc<RwLock<_>>` composition style.

use hlcopy_schemas::OpenPosition;
use std::sync::Arc;
use tokio::sync::RwLock;

pub type RebalanceLock = Arc<RwLock<Vec<OpenPosition>>>;

pub fn new_rebalance_lock(positions: Vec<OpenPosition>) -> RebalanceLock {
    Arc::new(RwLock::new(positions))
}
