//! Sliding-window + minimum-interval rate limiter with atomic on-disk persistence.
//!
//! §9: limiter state is a small JSON document of recent request timestamps,
//! written atomically (write-temp + rename) so rate budgets survive a
//! restart within the window and are simply ignored once stale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimiterConfig {
    pub per_second: u32,
    pub per_minute: u32,
    pub min_interval: Duration,
}

impl RateLimiterConfig {
    /// §4.1 table — leaderboard/screener endpoints.
    pub const LEADERBOARD: Self = Self {
        per_second: 20,
        per_minute: 300,
        min_interval: Duration::from_secs(0),
    };

    /// §4.1 table — profile positions endpoint.
    pub const POSITION: Self = Self {
        per_second: 5,
        per_minute: 100,
        min_interval: Duration::from_secs(0),
    };

    /// §4.1 table — profile trades endpoint.
    pub const TRADE: Self = Self {
        per_second: 1,
        per_minute: 9,
        min_interval: Duration::from_secs(7),
    };
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PersistedState {
    recent_requests: VecDeque<DateTime<Utc>>,
}

pub struct RateLimiter {
    config: RateLimiterConfig,
    persist_path: Option<PathBuf>,
    state: Mutex<PersistedState>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig, persist_path: Option<PathBuf>) -> Self {
        let initial = persist_path
            .as_deref()
            .and_then(load_persisted)
            .unwrap_or_default();
        Self {
            config,
            persist_path,
            state: Mutex::new(initial),
        }
    }

    /// Blocks until a permit is available, then records the request.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut st = self.state.lock().await;
                let now = Utc::now();
                prune(&mut st.recent_requests, now);

                let wait = self
                    .wait_for_window(&st.recent_requests, now, 1, self.config.per_second)
                    .max(self.wait_for_window(&st.recent_requests, now, 60, self.config.per_minute))
                    .max(self.wait_for_min_interval(&st.recent_requests, now));

                if wait.is_zero() {
                    st.recent_requests.push_back(now);
                    self.persist(&st).await;
                    None
                } else {
                    Some(wait)
                }
            };

            match wait {
                None => return,
                Some(d) => tokio::time::sleep(d).await,
            }
        }
    }

    fn wait_for_window(
        &self,
        recent: &VecDeque<DateTime<Utc>>,
        now: DateTime<Utc>,
        window_secs: i64,
        limit: u32,
    ) -> Duration {
        if limit == 0 {
            return Duration::from_secs(0);
        }
        let window_start = now - chrono::Duration::seconds(window_secs);
        let in_window: Vec<&DateTime<Utc>> = recent.iter().filter(|t| **t > window_start).collect();
        if (in_window.len() as u32) < limit {
            return Duration::from_secs(0);
        }
        // Oldest request inside the window determines when a slot frees up.
        let oldest = **in_window.first().unwrap();
        let free_at = oldest + chrono::Duration::seconds(window_secs);
        to_std_duration(free_at - now)
    }

    fn wait_for_min_interval(&self, recent: &VecDeque<DateTime<Utc>>, now: DateTime<Utc>) -> Duration {
        match recent.back() {
            Some(last) => {
                let elapsed = now - *last;
                let min_interval = chrono::Duration::from_std(self.config.min_interval)
                    .unwrap_or_else(|_| chrono::Duration::zero());
                if elapsed < min_interval {
                    to_std_duration(min_interval - elapsed)
                } else {
                    Duration::from_secs(0)
                }
            }
            None => Duration::from_secs(0),
        }
    }

    async fn persist(&self, st: &PersistedState) {
        let Some(path) = &self.persist_path else { return };
        let Ok(json) = serde_json::to_vec(st) else { return };
        let tmp_path = path.with_extension("tmp");
        if tokio::fs::write(&tmp_path, &json).await.is_ok() {
            let _ = tokio::fs::rename(&tmp_path, path).await;
        }
    }
}

fn prune(recent: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>) {
    let cutoff = now - chrono::Duration::seconds(60);
    while let Some(front) = recent.front() {
        if *front <= cutoff {
            recent.pop_front();
        } else {
            break;
        }
    }
}

fn to_std_duration(d: chrono::Duration) -> Duration {
    d.to_std().unwrap_or(Duration::from_secs(0))
}

fn load_persisted(path: &std::path::Path) -> Option<PersistedState> {
    let bytes = std::fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn single_permit_under_limit_does_not_wait() {
        let limiter = RateLimiter::new(RateLimiterConfig::LEADERBOARD, None);
        let start = tokio::time::Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn min_interval_is_enforced() {
        let limiter = RateLimiter::new(RateLimiterConfig::TRADE, None);
        limiter.acquire().await;
        let start = tokio::time::Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn per_minute_budget_throttles_after_quota_exhausted() {
        // per_minute=9, min_interval=7s: calls 1-9 run close together once the
        // interval elapses each time; call 10 must wait for the 60s window to
        // roll the oldest request out, matching S4 in §8.
        let limiter = RateLimiter::new(RateLimiterConfig::TRADE, None);
        for _ in 0..9 {
            limiter.acquire().await;
        }
        let before_10th = tokio::time::Instant::now();
        limiter.acquire().await;
        // 9 calls at >=7s spacing already consumed ~56s; the 10th must wait
        // for the rolling window rather than firing immediately.
        assert!(before_10th.elapsed() > Duration::from_secs(0));
    }

    #[test]
    fn limiter_configs_match_spec_table() {
        assert_eq!(RateLimiterConfig::LEADERBOARD.per_second, 20);
        assert_eq!(RateLimiterConfig::LEADERBOARD.per_minute, 300);
        assert_eq!(RateLimiterConfig::POSITION.per_second, 5);
        assert_eq!(RateLimiterConfig::POSITION.per_minute, 100);
        assert_eq!(RateLimiterConfig::TRADE.per_second, 1);
        assert_eq!(RateLimiterConfig::TRADE.per_minute, 9);
        assert_eq!(RateLimiterConfig::TRADE.min_interval, Duration::from_secs(7));
    }
}
