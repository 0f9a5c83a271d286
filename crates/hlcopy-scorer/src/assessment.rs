//! Trade-based assessment variant (§4.2.2) — ten independent strategies over
//! window-scoped `TradeMetrics`, used only by the on-demand assess path.
//!
//! Each strategy is a small `AssessmentStrategy` implementation; `assess`
//! runs the full registry and rolls the pass count up into a confidence
//! tier. This mirrors the teacher's plugin-registry split between static
//! metadata and instantiation, simplified to a flat `Vec` since there is no
//! dynamic loading here — every strategy ships in this binary.

use serde::Serialize;

use hlcopy_schemas::TradeMetrics;

#[derive(Debug, Clone, Serialize)]
pub struct StrategyResult {
    pub name: &'static str,
    pub category: &'static str,
    pub score: f64,
    pub passed: bool,
    pub explanation: String,
}

/// The primary window plus whichever of the 7d/30d consistency windows are
/// available. `primary` drives every strategy except Consistency.
pub struct AssessmentInput<'a> {
    pub primary: &'a TradeMetrics,
    pub window_7d: Option<&'a TradeMetrics>,
    pub window_30d: Option<&'a TradeMetrics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Assessment {
    pub results: Vec<StrategyResult>,
    pub pass_count: u8,
    pub tier: &'static str,
}

pub trait AssessmentStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn category(&self) -> &'static str;
    fn evaluate(&self, input: &AssessmentInput<'_>) -> StrategyResult;
}

pub fn default_strategies() -> Vec<Box<dyn AssessmentStrategy>> {
    vec![
        Box::new(Roi),
        Box::new(RiskAdjusted),
        Box::new(ProfitFactor),
        Box::new(WinRateQuality),
        Box::new(AntiLuck),
        Box::new(Consistency),
        Box::new(DrawdownResilience),
        Box::new(LeverageDiscipline),
        Box::new(PositionSizing),
        Box::new(ProfitabilityTrend),
    ]
}

pub fn assess(input: &AssessmentInput<'_>) -> Assessment {
    if input.primary.total_trades == 0 {
        return Assessment {
            results: default_strategies()
                .iter()
                .map(|s| StrategyResult {
                    name: s.name(),
                    category: s.category(),
                    score: 0.0,
                    passed: false,
                    explanation: "No trades in window".to_string(),
                })
                .collect(),
            pass_count: 0,
            tier: "Insufficient Data",
        };
    }

    let results: Vec<StrategyResult> = default_strategies().iter().map(|s| s.evaluate(input)).collect();
    let pass_count = results.iter().filter(|r| r.passed).count() as u8;
    let tier = match pass_count {
        9..=10 => "Elite",
        7..=8 => "Strong",
        5..=6 => "Moderate",
        3..=4 => "Weak",
        _ => "Avoid",
    };

    Assessment { results, pass_count, tier }
}

fn clip(v: f64, lo: f64, hi: f64) -> f64 {
    v.max(lo).min(hi)
}

struct Roi;
impl AssessmentStrategy for Roi {
    fn name(&self) -> &'static str {
        "ROI"
    }
    fn category(&self) -> &'static str {
        "profitability"
    }
    fn evaluate(&self, input: &AssessmentInput<'_>) -> StrategyResult {
        let roi = input.primary.roi_proxy;
        let score = clip(roi / 0.10 * 100.0, 0.0, 100.0);
        StrategyResult {
            name: self.name(),
            category: self.category(),
            score,
            passed: roi >= 0.0,
            explanation: format!("roi_proxy={roi:.4}"),
        }
    }
}

struct RiskAdjusted;
impl AssessmentStrategy for RiskAdjusted {
    fn name(&self) -> &'static str {
        "Risk-Adjusted"
    }
    fn category(&self) -> &'static str {
        "risk"
    }
    fn evaluate(&self, input: &AssessmentInput<'_>) -> StrategyResult {
        let sharpe = input.primary.pseudo_sharpe;
        let score = clip(sharpe / 3.0 * 100.0, 0.0, 100.0);
        StrategyResult {
            name: self.name(),
            category: self.category(),
            score,
            passed: sharpe >= 0.5,
            explanation: format!("pseudo_sharpe={sharpe:.3}"),
        }
    }
}

struct ProfitFactor;
impl AssessmentStrategy for ProfitFactor {
    fn name(&self) -> &'static str {
        "Profit Factor"
    }
    fn category(&self) -> &'static str {
        "profitability"
    }
    fn evaluate(&self, input: &AssessmentInput<'_>) -> StrategyResult {
        let pf = input.primary.profit_factor;
        let score = clip((pf - 1.0) / (3.0 - 1.0) * 100.0, 0.0, 100.0);
        StrategyResult {
            name: self.name(),
            category: self.category(),
            score,
            passed: pf >= 1.1,
            explanation: format!("profit_factor={pf:.2}"),
        }
    }
}

struct WinRateQuality;
impl AssessmentStrategy for WinRateQuality {
    fn name(&self) -> &'static str {
        "Win Rate Quality"
    }
    fn category(&self) -> &'static str {
        "consistency"
    }
    fn evaluate(&self, input: &AssessmentInput<'_>) -> StrategyResult {
        const OPTIMAL: f64 = 0.55;
        let wr = input.primary.win_rate;
        let deviation = (wr - OPTIMAL).abs();
        let score = clip((1.0 - deviation / 0.30) * 100.0, 0.0, 100.0);
        StrategyResult {
            name: self.name(),
            category: self.category(),
            score,
            passed: (0.30..=0.85).contains(&wr),
            explanation: format!("win_rate={wr:.3}"),
        }
    }
}

struct AntiLuck;
impl AssessmentStrategy for AntiLuck {
    fn name(&self) -> &'static str {
        "Anti-Luck"
    }
    fn category(&self) -> &'static str {
        "robustness"
    }
    fn evaluate(&self, input: &AssessmentInput<'_>) -> StrategyResult {
        let m = input.primary;
        let mut failures = 0u32;
        if m.total_trades < 10 {
            failures += 1;
        }
        if m.total_pnl < 500.0 {
            failures += 1;
        }
        if !(0.25..=0.90).contains(&m.win_rate) {
            failures += 1;
        }
        let score = clip(100.0 - 33.0 * failures as f64, 0.0, 100.0);
        StrategyResult {
            name: self.name(),
            category: self.category(),
            score,
            passed: failures == 0,
            explanation: format!("failures={failures}"),
        }
    }
}

struct Consistency;
impl AssessmentStrategy for Consistency {
    fn name(&self) -> &'static str {
        "Consistency"
    }
    fn category(&self) -> &'static str {
        "consistency"
    }
    fn evaluate(&self, input: &AssessmentInput<'_>) -> StrategyResult {
        match (input.window_7d, input.window_30d) {
            (Some(w7), Some(w30)) => {
                let profitable = (w7.total_pnl > 0.0) as u8 + (w30.total_pnl > 0.0) as u8;
                StrategyResult {
                    name: self.name(),
                    category: self.category(),
                    score: profitable as f64 / 2.0 * 100.0,
                    passed: profitable >= 2,
                    explanation: format!("profitable_windows={profitable}/2"),
                }
            }
            (Some(w), None) | (None, Some(w)) => {
                let passed = w.total_pnl > 0.0;
                StrategyResult {
                    name: self.name(),
                    category: self.category(),
                    // Degraded form: only one window available, so confidence is halved.
                    score: if passed { 50.0 } else { 0.0 },
                    passed,
                    explanation: "only one of {7d,30d} windows available".to_string(),
                }
            }
            (None, None) => StrategyResult {
                name: self.name(),
                category: self.category(),
                score: 0.0,
                passed: false,
                explanation: "no 7d/30d window data available".to_string(),
            },
        }
    }
}

struct DrawdownResilience;
impl AssessmentStrategy for DrawdownResilience {
    fn name(&self) -> &'static str {
        "Drawdown Resilience"
    }
    fn category(&self) -> &'static str {
        "risk"
    }
    fn evaluate(&self, input: &AssessmentInput<'_>) -> StrategyResult {
        let dd = input.primary.max_drawdown_proxy;
        let score = clip((1.0 - dd / 0.30) * 100.0, 0.0, 100.0);
        StrategyResult {
            name: self.name(),
            category: self.category(),
            score,
            passed: dd < 0.30,
            explanation: format!("max_drawdown_proxy={dd:.3}"),
        }
    }
}

struct LeverageDiscipline;
impl AssessmentStrategy for LeverageDiscipline {
    fn name(&self) -> &'static str {
        "Leverage Discipline"
    }
    fn category(&self) -> &'static str {
        "risk"
    }
    fn evaluate(&self, input: &AssessmentInput<'_>) -> StrategyResult {
        let lev = input.primary.max_leverage;
        if lev > 50.0 {
            return StrategyResult {
                name: self.name(),
                category: self.category(),
                score: 0.0,
                passed: false,
                explanation: format!("max_leverage={lev:.1} exceeds 50x hard cap"),
            };
        }
        let score = clip((1.0 - lev / 50.0) * 100.0, 0.0, 100.0);
        StrategyResult {
            name: self.name(),
            category: self.category(),
            score,
            passed: lev <= 20.0,
            explanation: format!("max_leverage={lev:.1}"),
        }
    }
}

struct PositionSizing;
impl AssessmentStrategy for PositionSizing {
    fn name(&self) -> &'static str {
        "Position Sizing"
    }
    fn category(&self) -> &'static str {
        "risk"
    }
    fn evaluate(&self, input: &AssessmentInput<'_>) -> StrategyResult {
        let ratio = input.primary.largest_trade_pnl_ratio;
        let score = clip((1.0 - ratio) * 100.0, 0.0, 100.0);
        StrategyResult {
            name: self.name(),
            category: self.category(),
            score,
            passed: ratio <= 0.40,
            explanation: format!("largest_trade_pnl_ratio={ratio:.3}"),
        }
    }
}

struct ProfitabilityTrend;
impl AssessmentStrategy for ProfitabilityTrend {
    fn name(&self) -> &'static str {
        "Profitability Trend"
    }
    fn category(&self) -> &'static str {
        "profitability"
    }
    fn evaluate(&self, input: &AssessmentInput<'_>) -> StrategyResult {
        let slope = input.primary.pnl_trend_slope.clamp(-1.0, 1.0);
        let score = clip((slope + 1.0) / 2.0 * 100.0, 0.0, 100.0);
        StrategyResult {
            name: self.name(),
            category: self.category(),
            score,
            passed: slope >= -0.5,
            explanation: format!("pnl_trend_slope={slope:.3}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(overrides: impl FnOnce(&mut TradeMetrics)) -> TradeMetrics {
        let mut m = TradeMetrics {
            window_days: 30,
            total_trades: 50,
            winning_trades: 30,
            losing_trades: 20,
            win_rate: 0.60,
            gross_profit: 10_000.0,
            gross_loss: 4_000.0,
            profit_factor: 2.5,
            avg_return: 0.02,
            std_return: 0.05,
            pseudo_sharpe: 1.2,
            total_pnl: 6_000.0,
            roi_proxy: 0.12,
            max_drawdown_proxy: 0.15,
            max_leverage: 10.0,
            leverage_std: 2.0,
            largest_trade_pnl_ratio: 0.10,
            pnl_trend_slope: 0.3,
        };
        overrides(&mut m);
        m
    }

    #[test]
    fn strong_trader_scores_elite_or_strong() {
        let m = metrics(|_| {});
        let input = AssessmentInput {
            primary: &m,
            window_7d: Some(&m),
            window_30d: Some(&m),
        };
        let result = assess(&input);
        assert!(result.pass_count >= 7);
        assert!(matches!(result.tier, "Elite" | "Strong"));
    }

    #[test]
    fn zero_trades_is_insufficient_data() {
        let m = metrics(|m| m.total_trades = 0);
        let input = AssessmentInput {
            primary: &m,
            window_7d: None,
            window_30d: None,
        };
        let result = assess(&input);
        assert_eq!(result.tier, "Insufficient Data");
        assert!(result.results.iter().all(|r| r.score == 0.0));
    }

    #[test]
    fn anti_luck_deducts_per_failure() {
        let m = metrics(|m| {
            m.total_trades = 5;
            m.total_pnl = 100.0;
            m.win_rate = 0.95;
        });
        let input = AssessmentInput {
            primary: &m,
            window_7d: None,
            window_30d: None,
        };
        let result = AntiLuck.evaluate(&input);
        assert_eq!(result.score, 1.0);
        assert!(!result.passed);
    }

    #[test]
    fn leverage_discipline_hard_fails_above_50x() {
        let m = metrics(|m| m.max_leverage = 75.0);
        let input = AssessmentInput {
            primary: &m,
            window_7d: None,
            window_30d: None,
        };
        let result = LeverageDiscipline.evaluate(&input);
        assert_eq!(result.score, 0.0);
        assert!(!result.passed);
    }

    #[test]
    fn consistency_degrades_gracefully_with_one_window() {
        let m30 = metrics(|_| {});
        let input = AssessmentInput {
            primary: &m30,
            window_7d: None,
            window_30d: Some(&m30),
        };
        let result = Consistency.evaluate(&input);
        assert!(result.passed);
        assert_eq!(result.score, 50.0);
    }
}
