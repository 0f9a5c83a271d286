pub mod augmenter;
pub mod cadence;
pub mod engine;
pub mod handlers;
pub mod lock;
pub mod status;

pub use augmenter::{NoopAugmenter, ScoreAugmenter};
pub use cadence::{due_cadences, is_due, Cadence};
pub use engine::{run_loop, CadenceIntervals, Scheduler};
pub use handlers::CadenceHandlers;
pub use lock::{new_rebalance_lock, RebalanceLock};
pub use status::{BusMsg, StatusSnapshot};
