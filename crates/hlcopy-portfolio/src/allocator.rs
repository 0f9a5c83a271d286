//! Target-weight computation and the six-cap risk overlay (§4.3).
//!
//! `compute_target_weights` selects the top_n eligible traders and assigns a
//! softmax-with-temperature weight to each. `apply_risk_overlay` then walks
//! the six caps in order, trimming and redistributing weight exactly the way
//! the teacher's constraint trimming works: an offending entity is clipped,
//! and the removed mass flows proportionally to whoever is left.

use hlcopy_schemas::Side;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// One eligible trader considered for allocation, joined from `Score` +
/// `Trader` by the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightCandidate {
    pub trader: String,
    pub final_score: f64,
    pub account_value: f64,
}

/// A trader's own book, expressed as fractions of their own notional so it
/// can be scaled by an allocation weight. Fractions for one trader need not
/// sum to exactly 1.0 if they hold idle margin.
#[derive(Debug, Clone, PartialEq)]
pub struct TraderPosition {
    pub token: String,
    pub side: Side,
    pub fraction: f64,
    pub leverage: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraderBook {
    pub trader: String,
    pub positions: Vec<TraderPosition>,
}

/// One (token, side) slice of the aggregated target book.
#[derive(Debug, Clone, PartialEq)]
pub struct BookEntry {
    pub token: String,
    pub side: Side,
    pub notional: f64,
    pub leverage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskCaps {
    pub per_trader_weight_cap: f64,
    pub per_token_gross_cap: f64,
    pub directional_cap: f64,
    pub max_leverage: f64,
    pub min_trade_size: f64,
}

/// Step 1: select top_n eligible candidates by final score (ties broken by
/// account_value desc, then trader asc per §4.2.1) and assign
/// `softmax_τ(final_i)` weights.
pub fn compute_target_weights(
    candidates: &[WeightCandidate],
    top_n: usize,
    temperature: f64,
) -> BTreeMap<String, f64> {
    let mut sorted: Vec<&WeightCandidate> = candidates.iter().collect();
    sorted.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.account_value.partial_cmp(&a.account_value).unwrap_or(Ordering::Equal))
            .then_with(|| a.trader.cmp(&b.trader))
    });

    let selected: Vec<&WeightCandidate> = sorted.into_iter().take(top_n).collect();
    if selected.is_empty() {
        return BTreeMap::new();
    }

    let tau = if temperature.abs() < f64::EPSILON { 1.0 } else { temperature };
    let exps: Vec<f64> = selected.iter().map(|c| (c.final_score / tau).exp()).collect();
    let sum: f64 = exps.iter().sum();

    selected
        .iter()
        .zip(exps.iter())
        .map(|(c, &e)| (c.trader.clone(), if sum > 0.0 { e / sum } else { 0.0 }))
        .collect()
}

/// Applies all six caps in order and returns the final weights plus the
/// aggregated target book they imply.
pub fn apply_risk_overlay(
    weights: BTreeMap<String, f64>,
    books: &[TraderBook],
    account_value: f64,
    caps: &RiskCaps,
) -> (BTreeMap<String, f64>, Vec<BookEntry>) {
    let mut weights = weights;

    // Cap 2: per-trader weight cap.
    apply_per_trader_cap(&mut weights, caps.per_trader_weight_cap);

    // Caps 3-5 operate on the expanded book and iteratively re-trim weights.
    apply_token_gross_cap(&mut weights, books, account_value, caps.per_token_gross_cap);
    apply_directional_cap(&mut weights, books, account_value, caps.directional_cap);
    apply_leverage_cap(&mut weights, books, account_value, caps.max_leverage);

    // Cap 6: min trade size floor — dropped entries become residual cash,
    // no redistribution (§4.3).
    let mut book = expand_target_book(&weights, books, account_value);
    book.retain(|e| e.notional.abs() >= caps.min_trade_size);

    (weights, book)
}

/// Expands each trader's own book by their allocation weight and aggregates
/// by (token, side).
fn expand_target_book(weights: &BTreeMap<String, f64>, books: &[TraderBook], account_value: f64) -> Vec<BookEntry> {
    let mut agg: BTreeMap<(String, Side), (f64, f64)> = BTreeMap::new();
    for book in books {
        let Some(&w) = weights.get(&book.trader) else { continue };
        if w <= 0.0 {
            continue;
        }
        for pos in &book.positions {
            let notional = w * pos.fraction * account_value;
            let e = agg.entry((pos.token.clone(), pos.side)).or_insert((0.0, 0.0));
            e.0 += notional;
            e.1 += notional * pos.leverage;
        }
    }
    agg.into_iter()
        .map(|((token, side), (notional, lev_weighted))| BookEntry {
            token,
            side,
            notional,
            leverage: if notional.abs() > 0.0 { lev_weighted / notional } else { 0.0 },
        })
        .collect()
}

fn apply_per_trader_cap(weights: &mut BTreeMap<String, f64>, cap: f64) {
    loop {
        let offenders: Vec<(String, f64)> = weights
            .iter()
            .filter(|(_, &w)| w > cap)
            .map(|(k, &w)| (k.clone(), w))
            .collect();
        if offenders.is_empty() {
            break;
        }

        let mut total_excess = 0.0;
        for (k, w) in &offenders {
            total_excess += w - cap;
            weights.insert(k.clone(), cap);
        }

        let offender_keys: Vec<&String> = offenders.iter().map(|(k, _)| k).collect();
        let denom: f64 = weights
            .iter()
            .filter(|(k, _)| !offender_keys.contains(k))
            .map(|(_, &w)| w)
            .sum();
        if denom <= 0.0 {
            break;
        }
        for (k, w) in weights.iter_mut() {
            if !offender_keys.contains(&k) {
                *w += total_excess * (*w / denom);
            }
        }
    }
}

/// Shared trimming primitive for the book-derived caps (3-5): given each
/// trader's dollar contribution to an offending aggregate and the scale
/// factor needed to bring it under cap, shrinks the contributing traders'
/// weights and redistributes the freed mass to everyone else proportionally.
fn trim_contributors(weights: &mut BTreeMap<String, f64>, contributions: &BTreeMap<String, f64>, scale: f64) {
    let excess: f64 = contributions.values().map(|c| c * (1.0 - scale)).sum();
    for (trader, c) in contributions {
        if let Some(w) = weights.get_mut(trader) {
            *w -= c * (1.0 - scale);
        }
    }
    let denom: f64 = weights
        .iter()
        .filter(|(k, _)| !contributions.contains_key(*k))
        .map(|(_, &w)| w)
        .sum();
    if denom <= 0.0 {
        return; // excess becomes residual cash
    }
    let keys: Vec<String> = weights.keys().cloned().collect();
    for k in keys {
        if !contributions.contains_key(&k) {
            if let Some(w) = weights.get_mut(&k) {
                *w += excess * (*w / denom);
            }
        }
    }
}

fn apply_token_gross_cap(weights: &mut BTreeMap<String, f64>, books: &[TraderBook], account_value: f64, cap_fraction: f64) {
    if cap_fraction <= 0.0 || account_value <= 0.0 {
        return;
    }
    for _ in 0..8 {
        let book = expand_target_book(weights, books, account_value);
        let cap_dollars = cap_fraction * account_value;
        let mut violated = false;

        for entry in &book {
            if entry.notional.abs() <= cap_dollars {
                continue;
            }
            let scale = cap_dollars / entry.notional.abs();
            let contributions = token_contributions(weights, books, &entry.token, entry.side);
            if contributions.values().sum::<f64>() <= 0.0 {
                continue;
            }
            violated = true;
            trim_contributors(weights, &contributions, scale);
        }
        if !violated {
            break;
        }
    }
}

fn apply_directional_cap(weights: &mut BTreeMap<String, f64>, books: &[TraderBook], account_value: f64, cap_fraction: f64) {
    if cap_fraction <= 0.0 || account_value <= 0.0 {
        return;
    }
    for _ in 0..8 {
        let book = expand_target_book(weights, books, account_value);
        let cap_dollars = cap_fraction * account_value;
        let mut violated = false;

        for side in [Side::Long, Side::Short] {
            let side_total: f64 = book.iter().filter(|e| e.side == side).map(|e| e.notional.abs()).sum();
            if side_total <= cap_dollars || side_total <= 0.0 {
                continue;
            }
            let scale = cap_dollars / side_total;
            let contributions = side_contributions(weights, books, side);
            if contributions.values().sum::<f64>() <= 0.0 {
                continue;
            }
            violated = true;
            trim_contributors(weights, &contributions, scale);
        }
        if !violated {
            break;
        }
    }
}

fn apply_leverage_cap(weights: &mut BTreeMap<String, f64>, books: &[TraderBook], account_value: f64, max_leverage: f64) {
    if max_leverage <= 0.0 || account_value <= 0.0 {
        return;
    }
    for _ in 0..8 {
        let book = expand_target_book(weights, books, account_value);
        let gross_leveraged: f64 = book.iter().map(|e| e.notional.abs() * e.leverage).sum();
        let book_leverage = gross_leveraged / account_value;
        if book_leverage <= max_leverage {
            break;
        }
        let scale = max_leverage / book_leverage;
        let contributions: BTreeMap<String, f64> = weights.iter().map(|(k, &w)| (k.clone(), w)).collect();
        if contributions.values().sum::<f64>() <= 0.0 {
            break;
        }
        trim_contributors(weights, &contributions, scale);
    }
}

fn token_contributions(weights: &BTreeMap<String, f64>, books: &[TraderBook], token: &str, side: Side) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    for tb in books {
        let Some(&w) = weights.get(&tb.trader) else { continue };
        if w <= 0.0 {
            continue;
        }
        let frac: f64 = tb.positions.iter().filter(|p| p.token == token && p.side == side).map(|p| p.fraction).sum();
        if frac > 0.0 {
            out.insert(tb.trader.clone(), w * frac);
        }
    }
    out
}

fn side_contributions(weights: &BTreeMap<String, f64>, books: &[TraderBook], side: Side) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    for tb in books {
        let Some(&w) = weights.get(&tb.trader) else { continue };
        if w <= 0.0 {
            continue;
        }
        let frac: f64 = tb.positions.iter().filter(|p| p.side == side).map(|p| p.fraction).sum();
        if frac > 0.0 {
            out.insert(tb.trader.clone(), w * frac);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(trader: &str, final_score: f64, account_value: f64) -> WeightCandidate {
        WeightCandidate {
            trader: trader.to_string(),
            final_score,
            account_value,
        }
    }

    #[test]
    fn softmax_weights_sum_to_one_and_rank_by_score() {
        let candidates = vec![candidate("A", 0.80, 100_000.0), candidate("B", 0.60, 80_000.0), candidate("C", 0.40, 60_000.0)];
        let weights = compute_target_weights(&candidates, 15, 1.0);
        let sum: f64 = weights.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(weights["A"] > weights["B"]);
        assert!(weights["B"] > weights["C"]);
    }

    /// S6 — risk-cap redistribution.
    #[test]
    fn per_trader_cap_redistributes_proportionally() {
        let mut weights = BTreeMap::new();
        weights.insert("trader-1".to_string(), 0.50);
        weights.insert("trader-2".to_string(), 0.30);
        weights.insert("trader-3".to_string(), 0.20);

        apply_per_trader_cap(&mut weights, 0.40);

        assert!((weights["trader-1"] - 0.40).abs() < 1e-9);
        assert!((weights["trader-2"] - 0.36).abs() < 1e-9);
        assert!((weights["trader-3"] - 0.24).abs() < 1e-9);
    }

    #[test]
    fn min_trade_floor_drops_without_redistribution() {
        let mut weights = BTreeMap::new();
        weights.insert("A".to_string(), 0.99);
        weights.insert("B".to_string(), 0.01);
        let books = vec![
            TraderBook {
                trader: "A".to_string(),
                positions: vec![TraderPosition { token: "BTC".to_string(), side: Side::Long, fraction: 1.0, leverage: 2.0 }],
            },
            TraderBook {
                trader: "B".to_string(),
                positions: vec![TraderPosition { token: "ETH".to_string(), side: Side::Short, fraction: 1.0, leverage: 1.0 }],
            },
        ];
        let caps = RiskCaps {
            per_trader_weight_cap: 1.0,
            per_token_gross_cap: 1.0,
            directional_cap: 1.0,
            max_leverage: 10.0,
            min_trade_size: 1000.0,
        };
        let (_final_weights, book) = apply_risk_overlay(weights, &books, 50_000.0, &caps);
        assert!(book.iter().any(|e| e.token == "BTC"));
        assert!(!book.iter().any(|e| e.token == "ETH"));
    }
}
