//! Multi-stage scoring pipeline (§4.2): position-based scoring for
//! allocation selection, and the on-demand trade-based assessment variant.

pub mod assessment;
pub mod metrics;
pub mod position;

pub use assessment::{assess, default_strategies, Assessment, AssessmentInput, AssessmentStrategy, StrategyResult};
pub use metrics::derive_trade_metrics;
pub use position::{score_position_based, ScoringInput};
