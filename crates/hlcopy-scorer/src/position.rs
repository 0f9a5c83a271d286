//! Position-based scoring (§4.2.1) — the scheduler's allocation-selection path.
//!
//! Strict pipeline: deposit/withdrawal detection, metric derivation,
//! normalization, eligibility gates, composite. A trader failing any gate
//! gets a `Score` row with `final_composite = 0` and a rejection reason —
//! never an error.

use chrono::{DateTime, Utc};
use hlcopy_schemas::{PositionSnapshot, Score};
use std::collections::BTreeMap;

const MIN_SNAPSHOTS: usize = 48;
const MAX_ELIGIBLE_LEVERAGE: f64 = 25.0;
const MIN_LATEST_ACCOUNT_VALUE: f64 = 1_000.0;

/// One aggregated snapshot instant: every position row sharing a
/// `snapshot_batch`, collapsed to the account-level figures Stage B needs.
#[derive(Debug, Clone)]
struct BatchAggregate {
    captured_at: DateTime<Utc>,
    account_value: f64,
    total_unrealized_pnl: f64,
    leverage: f64,
    hhi: f64,
    liq_distance_weighted_sum: f64,
    liq_distance_weight: f64,
}

/// Everything the position-based scorer needs for one candidate trader.
pub struct ScoringInput<'a> {
    pub trader: &'a str,
    pub label: Option<&'a str>,
    pub blacklisted: bool,
    pub snapshots: &'a [PositionSnapshot],
    pub now: DateTime<Utc>,
}

pub fn score_position_based(input: &ScoringInput<'_>) -> Score {
    let batches = group_batches(input.snapshots);

    if input.blacklisted {
        return ineligible(input, "Trader is blacklisted".to_string());
    }
    if batches.len() < MIN_SNAPSHOTS {
        return ineligible(
            input,
            format!("Insufficient snapshots: {} < {}", batches.len(), MIN_SNAPSHOTS),
        );
    }

    let flagged = detect_deposit_withdrawals(&batches);
    let growth = account_growth(&batches, &flagged);
    let (avg_leverage, leverage_std) = leverage_stats(&batches);
    let latest_account_value = batches.last().map(|b| b.account_value).unwrap_or(0.0);

    if growth <= 0.0 {
        return ineligible(input, format!("Non-positive growth: {growth:.4}"));
    }
    if avg_leverage > MAX_ELIGIBLE_LEVERAGE {
        return ineligible(
            input,
            format!("Average leverage too high: {avg_leverage:.2} > {MAX_ELIGIBLE_LEVERAGE}"),
        );
    }
    if latest_account_value <= MIN_LATEST_ACCOUNT_VALUE {
        return ineligible(
            input,
            format!("Latest account value too low: {latest_account_value:.2} <= {MIN_LATEST_ACCOUNT_VALUE}"),
        );
    }

    let drawdown = max_drawdown(&batches, &flagged);
    let avg_liq_distance = avg_liquidation_distance(&batches);
    let avg_hhi = batches.iter().map(|b| b.hhi).sum::<f64>() / batches.len() as f64;
    let consistency_ratio = consistency(&batches, &flagged);

    let growth_score = clip(growth / 0.10, 0.0, 1.0);
    let drawdown_score = clip(1.0 - drawdown / 0.50, 0.0, 1.0);
    let leverage_score = clip(1.0 - avg_leverage / 20.0, 0.0, 1.0) - (leverage_std / 25.0).min(0.2);
    let liquidation_distance_score = normalize_liq_distance(avg_liq_distance);
    let diversity_score = normalize_diversity(avg_hhi);
    let consistency_score = clip(consistency_ratio, 0.0, 1.0);

    let raw_composite = 0.30 * growth_score
        + 0.20 * drawdown_score
        + 0.15 * leverage_score
        + 0.15 * liquidation_distance_score
        + 0.10 * diversity_score
        + 0.10 * consistency_score;

    let smart_money_multiplier = smart_money_bonus(input.label);
    let hours_since_last = batches
        .last()
        .map(|b| (input.now - b.captured_at).num_seconds() as f64 / 3600.0)
        .unwrap_or(0.0)
        .max(0.0);
    let recency_decay = (-0.693 * hours_since_last / 168.0).exp();
    let final_composite = raw_composite * smart_money_multiplier * recency_decay;

    Score {
        trader: input.trader.to_string(),
        tier1_pass: true,
        consistency_pass: growth > 0.0,
        anti_luck_pass: avg_leverage <= MAX_ELIGIBLE_LEVERAGE && latest_account_value > MIN_LATEST_ACCOUNT_VALUE,
        growth_score,
        drawdown_score,
        leverage_score,
        liquidation_distance_score,
        diversity_score,
        consistency_score,
        smart_money_multiplier,
        recency_decay,
        raw_composite,
        final_composite,
        rejection_reason: None,
        computed_at: input.now,
    }
}

fn ineligible(input: &ScoringInput<'_>, reason: String) -> Score {
    Score {
        trader: input.trader.to_string(),
        tier1_pass: false,
        consistency_pass: false,
        anti_luck_pass: false,
        growth_score: 0.0,
        drawdown_score: 0.0,
        leverage_score: 0.0,
        liquidation_distance_score: 0.0,
        diversity_score: 0.0,
        consistency_score: 0.0,
        smart_money_multiplier: smart_money_bonus(input.label),
        recency_decay: 0.0,
        raw_composite: 0.0,
        final_composite: 0.0,
        rejection_reason: Some(reason),
        computed_at: input.now,
    }
}

fn group_batches(snapshots: &[PositionSnapshot]) -> Vec<BatchAggregate> {
    let mut by_batch: BTreeMap<uuid::Uuid, Vec<&PositionSnapshot>> = BTreeMap::new();
    for s in snapshots {
        by_batch.entry(s.snapshot_batch).or_default().push(s);
    }

    let mut aggregates: Vec<BatchAggregate> = by_batch
        .into_values()
        .map(|rows| {
            let captured_at = rows[0].captured_at;
            let account_value = rows[0].account_value;
            let total_unrealized_pnl: f64 = rows.iter().map(|r| r.unrealized_pnl).sum();
            let total_value: f64 = rows.iter().map(|r| r.position_value()).sum();
            let leverage = if account_value > 0.0 {
                total_value / account_value
            } else {
                0.0
            };
            let hhi = if total_value > 0.0 {
                rows.iter()
                    .map(|r| {
                        let w = r.position_value() / total_value;
                        w * w
                    })
                    .sum()
            } else {
                1.0
            };
            let (liq_distance_weighted_sum, liq_distance_weight) = rows
                .iter()
                .filter_map(|r| {
                    r.liquidation_price.map(|liq| {
                        let dist = if r.entry_price.abs() > f64::EPSILON {
                            (r.entry_price - liq).abs() / r.entry_price
                        } else {
                            0.0
                        };
                        (dist * r.position_value(), r.position_value())
                    })
                })
                .fold((0.0, 0.0), |(sw, w), (dw, ww)| (sw + dw, w + ww));

            BatchAggregate {
                captured_at,
                account_value,
                total_unrealized_pnl,
                leverage,
                hhi,
                liq_distance_weighted_sum,
                liq_distance_weight,
            }
        })
        .collect();

    aggregates.sort_by_key(|b| b.captured_at);
    aggregates
}

/// Stage A — returns the set of batch indices (i >= 1) whose interval from
/// i-1 to i is a deposit/withdrawal, per the three-condition test in §4.2.1.
fn detect_deposit_withdrawals(batches: &[BatchAggregate]) -> Vec<bool> {
    let mut flagged = vec![false; batches.len()];
    for i in 1..batches.len() {
        let delta_account = batches[i].account_value - batches[i - 1].account_value;
        let delta_upnl = batches[i].total_unrealized_pnl - batches[i - 1].total_unrealized_pnl;
        let prev_value = batches[i - 1].account_value;
        if delta_account.abs() > 1_000.0
            && delta_account.abs() > 0.10 * prev_value
            && (delta_account - delta_upnl).abs() > 1_000.0
        {
            flagged[i] = true;
        }
    }
    flagged
}

fn account_growth(batches: &[BatchAggregate], flagged: &[bool]) -> f64 {
    let start = batches.first().map(|b| b.account_value).unwrap_or(0.0);
    if start.abs() < f64::EPSILON {
        return 0.0;
    }
    let end = batches.last().map(|b| b.account_value).unwrap_or(0.0);
    let excluded: f64 = (1..batches.len())
        .filter(|&i| flagged[i])
        .map(|i| batches[i].account_value - batches[i - 1].account_value)
        .sum();
    (end - start - excluded) / start
}

fn max_drawdown(batches: &[BatchAggregate], flagged: &[bool]) -> f64 {
    let series: Vec<f64> = batches
        .iter()
        .enumerate()
        .filter(|&(i, _)| !flagged[i])
        .map(|(_, b)| b.account_value)
        .collect();

    let mut peak = f64::MIN;
    let mut worst = 0.0f64;
    for v in series {
        if v > peak {
            peak = v;
        }
        if peak > 0.0 {
            let dd = (peak - v) / peak;
            if dd > worst {
                worst = dd;
            }
        }
    }
    worst
}

fn leverage_stats(batches: &[BatchAggregate]) -> (f64, f64) {
    let n = batches.len() as f64;
    if n == 0.0 {
        return (0.0, 0.0);
    }
    let mean = batches.iter().map(|b| b.leverage).sum::<f64>() / n;
    let variance = batches.iter().map(|b| (b.leverage - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

fn avg_liquidation_distance(batches: &[BatchAggregate]) -> f64 {
    let total_weight: f64 = batches.iter().map(|b| b.liq_distance_weight).sum();
    if total_weight <= 0.0 {
        return 1.0;
    }
    let total_weighted: f64 = batches.iter().map(|b| b.liq_distance_weighted_sum).sum();
    total_weighted / total_weight
}

fn consistency(batches: &[BatchAggregate], flagged: &[bool]) -> f64 {
    let deltas: Vec<f64> = (1..batches.len())
        .filter(|&i| !flagged[i])
        .map(|i| {
            let prev = batches[i - 1].account_value;
            if prev.abs() < f64::EPSILON {
                0.0
            } else {
                (batches[i].account_value - prev) / prev
            }
        })
        .collect();

    if deltas.is_empty() {
        return 0.0;
    }
    let n = deltas.len() as f64;
    let mean = deltas.iter().sum::<f64>() / n;
    let variance = deltas.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();

    if std.abs() < f64::EPSILON {
        if mean > 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        mean / std
    }
}

fn normalize_liq_distance(distance: f64) -> f64 {
    if distance >= 0.30 {
        1.0
    } else if distance <= 0.05 {
        0.0
    } else {
        (distance - 0.05) / (0.30 - 0.05)
    }
}

fn normalize_diversity(hhi: f64) -> f64 {
    if hhi <= 0.25 {
        1.0
    } else {
        (1.0 - (hhi - 0.25) / 0.75 * 0.8).max(0.2)
    }
}

fn smart_money_bonus(label: Option<&str>) -> f64 {
    match label {
        Some(l) if l.to_ascii_lowercase().contains("fund") => 1.10,
        Some(l) if l.to_ascii_lowercase().contains("smart") => 1.08,
        Some(_) => 1.05,
        None => 1.00,
    }
}

fn clip(v: f64, lo: f64, hi: f64) -> f64 {
    v.max(lo).min(hi)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hlcopy_schemas::{LeverageType, Side};
    use uuid::Uuid;

    fn snapshot(account_value: f64, captured_at: DateTime<Utc>) -> PositionSnapshot {
        PositionSnapshot {
            trader: "0xabc".into(),
            token: "BTC".into(),
            side: Side::Long,
            size: 0.0,
            entry_price: 0.0,
            mark_price: 0.0,
            leverage_value: 1.0,
            leverage_type: LeverageType::Cross,
            liquidation_price: None,
            unrealized_pnl: 0.0,
            margin_used: 0.0,
            account_value,
            captured_at,
            snapshot_batch: Uuid::new_v4(),
        }
    }

    /// S3 — deposit exclusion.
    #[test]
    fn deposit_flagged_and_excluded_from_growth() {
        let base = Utc::now();
        let values = [
            100_000.0, 100_000.0, 100_000.0, 100_000.0, 100_000.0, 150_000.0, 150_000.0, 150_000.0,
            150_000.0, 150_000.0,
        ];
        let batches: Vec<BatchAggregate> = values
            .iter()
            .enumerate()
            .map(|(i, v)| BatchAggregate {
                captured_at: base + chrono::Duration::hours(i as i64),
                account_value: *v,
                total_unrealized_pnl: 0.0,
                leverage: 0.0,
                hhi: 1.0,
                liq_distance_weighted_sum: 0.0,
                liq_distance_weight: 0.0,
            })
            .collect();

        let flagged = detect_deposit_withdrawals(&batches);
        assert!(flagged[5]);
        assert!(!flagged[4]);
        assert!((account_growth(&batches, &flagged) - 0.0).abs() < 1e-9);
    }

    /// S5 — ineligibility due to snapshots.
    #[test]
    fn insufficient_snapshots_rejected_with_exact_reason() {
        let base = Utc::now();
        let snapshots: Vec<PositionSnapshot> = (0..40)
            .map(|i| snapshot(10_000.0 + i as f64, base + chrono::Duration::hours(i)))
            .collect();
        let input = ScoringInput {
            trader: "0xabc",
            label: None,
            blacklisted: false,
            snapshots: &snapshots,
            now: base + chrono::Duration::hours(40),
        };
        let score = score_position_based(&input);
        assert_eq!(score.final_composite, 0.0);
        assert_eq!(
            score.rejection_reason.as_deref(),
            Some("Insufficient snapshots: 40 < 48")
        );
    }

    #[test]
    fn diversity_normalization_matches_table() {
        assert_eq!(normalize_diversity(0.20), 1.0);
        assert!((normalize_diversity(1.0) - 0.2).abs() < 1e-9);
    }

    #[test]
    fn liquidation_distance_normalization_matches_table() {
        assert_eq!(normalize_liq_distance(0.40), 1.0);
        assert_eq!(normalize_liq_distance(0.02), 0.0);
        assert!((normalize_liq_distance(0.175) - 0.5).abs() < 1e-9);
    }
}
