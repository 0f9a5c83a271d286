//! Adapter for the upstream market-data capability (§4.1): leaderboard
//! screening, per-address trade history, and per-address open positions,
//! each behind its own rate limiter and retrying transient failures with
//! jittered backoff.

pub mod client;
pub mod ratelimiter;
pub mod wire;

pub use client::{MarketClient, MarketClientConfig};
pub use ratelimiter::{RateLimiter, RateLimiterConfig};
