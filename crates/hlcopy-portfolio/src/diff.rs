//! `compute_rebalance_diff` (§4.3): turns current vs. target books into an
//! ordered list of CLOSE/ADJUST/OPEN actions. CLOSE first to free margin,
//! then ADJUST (shrink before grow is implicit — both sides are the same
//! action kind), then OPEN; alphabetical by token within each category.

use hlcopy_schemas::Side;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RebalanceActionKind {
    Close,
    Adjust,
    Open,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RebalanceAction {
    pub kind: RebalanceActionKind,
    pub token: String,
    pub side: Side,
    pub current_notional: f64,
    pub target_notional: f64,
}

impl RebalanceAction {
    pub fn delta_notional(&self) -> f64 {
        self.target_notional - self.current_notional
    }
}

/// `current`/`target`: (token, side) -> notional. `adjust_threshold` is a
/// fraction of current notional (e.g. 0.10).
pub fn compute_rebalance_diff(
    current: &BTreeMap<(String, Side), f64>,
    target: &BTreeMap<(String, Side), f64>,
    min_trade_size: f64,
    adjust_threshold: f64,
) -> Vec<RebalanceAction> {
    let mut keys: Vec<(String, Side)> = current.keys().chain(target.keys()).cloned().collect();
    keys.sort();
    keys.dedup();

    let mut actions = Vec::new();
    for (token, side) in keys {
        let cur = *current.get(&(token.clone(), side)).unwrap_or(&0.0);
        let tgt = *target.get(&(token.clone(), side)).unwrap_or(&0.0);
        let delta = tgt - cur;

        let kind = if cur <= 0.0 && tgt > min_trade_size {
            Some(RebalanceActionKind::Open)
        } else if tgt <= 0.0 && cur > 0.0 {
            Some(RebalanceActionKind::Close)
        } else if cur > 0.0 && tgt > 0.0 && delta.abs() > adjust_threshold * cur {
            Some(RebalanceActionKind::Adjust)
        } else {
            None
        };

        if let Some(kind) = kind {
            actions.push(RebalanceAction {
                kind,
                token,
                side,
                current_notional: cur,
                target_notional: tgt,
            });
        }
    }

    actions.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.token.cmp(&b.token)));
    actions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_emits_open_in_alphabetical_order() {
        let mut target = BTreeMap::new();
        target.insert(("BTC".to_string(), Side::Long), 31_000.0);
        target.insert(("ETH".to_string(), Side::Short), 11_000.0);
        let current = BTreeMap::new();

        let actions = compute_rebalance_diff(&current, &target, 50.0, 0.10);
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].kind, RebalanceActionKind::Open);
        assert_eq!(actions[0].token, "BTC");
        assert_eq!(actions[1].token, "ETH");
    }

    #[test]
    fn close_before_adjust_before_open() {
        let mut current = BTreeMap::new();
        current.insert(("AAA".to_string(), Side::Long), 5_000.0);
        current.insert(("BBB".to_string(), Side::Long), 2_000.0);
        let mut target = BTreeMap::new();
        target.insert(("BBB".to_string(), Side::Long), 3_000.0);
        target.insert(("CCC".to_string(), Side::Long), 1_000.0);

        let actions = compute_rebalance_diff(&current, &target, 50.0, 0.10);
        let kinds: Vec<_> = actions.iter().map(|a| a.kind).collect();
        assert_eq!(
            kinds,
            vec![RebalanceActionKind::Close, RebalanceActionKind::Adjust, RebalanceActionKind::Open]
        );
    }

    #[test]
    fn noop_when_delta_below_threshold() {
        let mut current = BTreeMap::new();
        current.insert(("BTC".to_string(), Side::Long), 10_000.0);
        let mut target = BTreeMap::new();
        target.insert(("BTC".to_string(), Side::Long), 10_500.0);

        let actions = compute_rebalance_diff(&current, &target, 50.0, 0.10);
        assert!(actions.is_empty());
    }

    /// S2 setup sanity: a plain adjust conserves |delta| modulo threshold (invariant #4).
    #[test]
    fn every_pair_in_union_yields_exactly_one_action_or_noop() {
        let mut current = BTreeMap::new();
        current.insert(("BTC".to_string(), Side::Long), 10_000.0);
        let mut target = BTreeMap::new();
        target.insert(("BTC".to_string(), Side::Long), 20_000.0);
        target.insert(("ETH".to_string(), Side::Short), 500.0);

        let actions = compute_rebalance_diff(&current, &target, 1_000.0, 0.10);
        // ETH target (500) is below min_trade_size (1000) so it's a NOOP, not an OPEN.
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].token, "BTC");
        assert_eq!(actions[0].kind, RebalanceActionKind::Adjust);
    }
}
