//! Cadence timing and priority (§4.6). Due-check + missed-tick coalescing:
//! a cadence is due once `now >= last_run + interval`; because `last_run` only
//! advances after a successful run, any number of intervals missed while the
//! process was down collapse into exactly one run on resume (invariant #6).

use chrono::{DateTime, Duration, Utc};

/// High to low priority, matching enum declaration order via derived `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Cadence {
    Refresh,
    Rebalance,
    Monitor,
    Ingest,
}

impl Cadence {
    pub fn default_interval(self) -> Duration {
        match self {
            Cadence::Refresh => Duration::days(1),
            Cadence::Rebalance => Duration::hours(4),
            Cadence::Monitor => Duration::seconds(60),
            Cadence::Ingest => Duration::minutes(5),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Cadence::Refresh => "refresh",
            Cadence::Rebalance => "rebalance",
            Cadence::Monitor => "monitor",
            Cadence::Ingest => "ingest",
        }
    }
}

pub fn is_due(last_run: Option<DateTime<Utc>>, interval: Duration, now: DateTime<Utc>) -> bool {
    match last_run {
        None => true,
        Some(last) => now >= last + interval,
    }
}

/// Returns the subset of `[Refresh, Rebalance, Monitor, Ingest]` that are due,
/// already sorted high-priority first. Only the single highest-priority
/// member should actually run on a given tick; the rest defer to the next one.
pub fn due_cadences(
    last_refresh_at: Option<DateTime<Utc>>,
    last_rebalance_at: Option<DateTime<Utc>>,
    last_monitor_at: Option<DateTime<Utc>>,
    last_ingest_at: Option<DateTime<Utc>>,
    intervals: [Duration; 4],
    now: DateTime<Utc>,
) -> Vec<Cadence> {
    let mut due = Vec::new();
    if is_due(last_refresh_at, intervals[0], now) {
        due.push(Cadence::Refresh);
    }
    if is_due(last_rebalance_at, intervals[1], now) {
        due.push(Cadence::Rebalance);
    }
    if is_due(last_monitor_at, intervals[2], now) {
        due.push(Cadence::Monitor);
    }
    if is_due(last_ingest_at, intervals[3], now) {
        due.push(Cadence::Ingest);
    }
    due.sort();
    due
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_order_is_refresh_rebalance_monitor_ingest() {
        let mut cadences = vec![Cadence::Ingest, Cadence::Monitor, Cadence::Rebalance, Cadence::Refresh];
        cadences.sort();
        assert_eq!(cadences, vec![Cadence::Refresh, Cadence::Rebalance, Cadence::Monitor, Cadence::Ingest]);
    }

    #[test]
    fn never_run_cadence_is_due_immediately() {
        assert!(is_due(None, Duration::hours(4), Utc::now()));
    }

    /// Invariant #6: missing several intervals collapses to exactly one due signal.
    #[test]
    fn missed_ticks_coalesce_to_a_single_due_signal() {
        let last = Utc::now() - Duration::hours(20);
        assert!(is_due(Some(last), Duration::hours(4), Utc::now()));
        // After the run records `now` as last_run, the next check is not due.
        let just_ran = Utc::now();
        assert!(!is_due(Some(just_ran), Duration::hours(4), just_ran));
    }

    #[test]
    fn when_multiple_are_due_only_the_highest_priority_is_first() {
        let now = Utc::now();
        let long_ago = now - Duration::days(2);
        let due = due_cadences(
            Some(long_ago),
            Some(long_ago),
            Some(long_ago),
            Some(long_ago),
            [Duration::days(1), Duration::hours(4), Duration::seconds(60), Duration::minutes(5)],
            now,
        );
        assert_eq!(due.first(), Some(&Cadence::Refresh));
    }
}
