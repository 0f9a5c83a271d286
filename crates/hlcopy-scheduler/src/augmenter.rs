//! Optional ML score augmentation (§9 design note): a capability injected
//! into the Scheduler. Its predictions are logged alongside the deterministic
//! `Score` but never replace it unless a configuration flag is set — the core
//! scoring pipeline must not be coupled to this capability's availability.
//! Grounded in the teacher's `dyn Broker`-shaped capability-injection style.

use hlcopy_schemas::Score;

pub trait ScoreAugmenter: Send + Sync {
    /// Returns an auxiliary prediction for `trader`, or `None` if the
    /// augmenter has no opinion (e.g. a cold model, or the trader is new).
    fn augment(&self, trader: &str, score: &Score) -> Option<f64>;

    fn name(&self) -> &'static str;
}

/// Default augmenter: never produces a prediction. Wiring this in is
/// equivalent to running with ML augmentation disabled.
pub struct NoopAugmenter;

impl ScoreAugmenter for NoopAugmenter {
    fn augment(&self, _trader: &str, _score: &Score) -> Option<f64> {
        None
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_score() -> Score {
        Score {
            trader: "0xabc".into(),
            tier1_pass: true,
            consistency_pass: true,
            anti_luck_pass: true,
            growth_score: 0.5,
            drawdown_score: 0.5,
            leverage_score: 0.5,
            liquidation_distance_score: 0.5,
            diversity_score: 0.5,
            consistency_score: 0.5,
            smart_money_multiplier: 1.0,
            recency_decay: 1.0,
            raw_composite: 0.5,
            final_composite: 0.5,
            rejection_reason: None,
            computed_at: Utc::now(),
        }
    }

    #[test]
    fn noop_augmenter_never_predicts() {
        let augmenter = NoopAugmenter;
        assert_eq!(augmenter.augment("0xabc", &sample_score()), None);
        assert_eq!(augmenter.name(), "noop");
    }
}
