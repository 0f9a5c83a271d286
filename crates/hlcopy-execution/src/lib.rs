//! Executor (§4.4): turns rebalance actions into orders against the
//! paper-trading capability and commits `OpenPosition` mutations.

pub mod engine;
pub mod state_machine;

pub use engine::{ExecutionCapability, ExecutionOutcome, ExecutionParams, Executor, OrderSnapshot, PlacedOrder, PollResult};
pub use state_machine::{OrderEvent, OrderState, TransitionError};
