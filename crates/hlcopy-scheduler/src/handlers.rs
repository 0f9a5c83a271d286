//! The seam between cadence timing (this crate) and cadence content
//! (daemon-composed wiring of marketclient/scorer/portfolio/execution/
//! monitor/db). Mirrors the capability-injection shape already used for
//! `ScoreAugmenter` and `hlcopy-execution::ExecutionCapability`: the
//! Scheduler is generic over `H`, never boxed, so each cadence's real I/O
//! lives entirely in the daemon binary.

use hlcopy_schemas::CoreError;

pub trait CadenceHandlers {
    /// Fetch top-100 leaderboard, update Trader table, recompute Scores, select top_n.
    fn run_refresh(&mut self) -> impl std::future::Future<Output = Result<(), CoreError>> + Send;
    /// Snapshot current book, compute target, apply risk overlay, compute diff, execute.
    fn run_rebalance(&mut self) -> impl std::future::Future<Output = Result<(), CoreError>> + Send;
    /// Stop-loss / trailing-stop / time-stop enforcement.
    fn run_monitor(&mut self) -> impl std::future::Future<Output = Result<(), CoreError>> + Send;
    /// Fetch recent trade history and position snapshots for tracked traders.
    fn run_ingest(&mut self) -> impl std::future::Future<Output = Result<(), CoreError>> + Send;

    /// Count of currently open positions, for `StatusSnapshot`.
    fn open_position_count(&self) -> u32;
    /// One-way turnover of the most recent rebalance's trader weights versus
    /// the previous cycle's, for `StatusSnapshot`. `None` before the first
    /// rebalance has run.
    fn last_allocation_turnover(&self) -> Option<f64>;
}
