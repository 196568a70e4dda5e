//! 决策：输入快照、规则、组合打分引擎

pub mod engine;
pub mod rule;
pub mod snapshot;

pub use engine::{Decision, DecisionEngine, DecisionInput, DecisionWeights, ModelScores};
pub use rule::{Comparison, Predicate, Rule, RuleSet};
pub use snapshot::Snapshot;
