//! 决策引擎：规则过滤 → 模型打分 → 上下文加权 → 加权求和取最高
//!
//! 纯函数、同步、无内部状态，可在多个 Agent 任务中并发调用。同样的输入永远得到同样的输出。

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{CoordError, CoordResult};
use crate::decision::{RuleSet, Snapshot};

/// 组合权重
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionWeights {
    pub rule_weight: f64,
    pub model_weight: f64,
    pub context_weight: f64,
    /// 模型不可用（或分数非法）时每个候选的分数
    pub model_fallback: f64,
    /// 上下文权重缺失时的默认值
    pub context_default: f64,
}

impl Default for DecisionWeights {
    fn default() -> Self {
        Self {
            rule_weight: 0.4,
            model_weight: 0.4,
            context_weight: 0.2,
            model_fallback: 0.5,
            context_default: 1.0,
        }
    }
}

/// 模型协作方的打分结果
#[derive(Debug, Clone, PartialEq)]
pub enum ModelScores {
    Scored(HashMap<String, f64>),
    Unavailable,
}

/// 一次决策的全部输入
#[derive(Debug, Clone, Copy)]
pub struct DecisionInput<'a> {
    pub snapshot: &'a Snapshot,
    pub rules: &'a RuleSet,
    pub model_scores: &'a ModelScores,
    /// None 表示上下文协作方不可用
    pub context_weights: Option<&'a HashMap<String, f64>>,
    pub at: DateTime<Utc>,
}

/// 决策结果（核心不持久化）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: String,
    pub combined_score: f64,
    pub rule_ids: Vec<String>,
    pub model_score: f64,
    pub context_weight: f64,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct DecisionEngine {
    weights: DecisionWeights,
}

impl DecisionEngine {
    pub fn new(weights: DecisionWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &DecisionWeights {
        &self.weights
    }

    /// 规则过滤：动作 → 推荐它的规则 ID（按规则集顺序）
    pub fn filter_rules(
        &self,
        snapshot: &Snapshot,
        rules: &RuleSet,
    ) -> BTreeMap<String, Vec<String>> {
        let mut applicable: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for rule in rules.iter().filter(|r| r.applies(snapshot)) {
            applicable
                .entry(rule.action.clone())
                .or_default()
                .push(rule.id.clone());
        }
        applicable
    }

    /// 候选动作 = 适用规则的动作 ∪ 模型给出分数的动作 ∪ 上下文给出权重的动作
    pub fn decide(&self, input: DecisionInput<'_>) -> CoordResult<Decision> {
        let applicable = self.filter_rules(input.snapshot, input.rules);

        let mut candidates: BTreeSet<&str> = applicable.keys().map(String::as_str).collect();
        if let ModelScores::Scored(scores) = input.model_scores {
            candidates.extend(scores.keys().map(String::as_str));
        }
        if let Some(weights) = input.context_weights {
            candidates.extend(weights.keys().map(String::as_str));
        }

        let mut best: Option<Decision> = None;
        // BTreeSet 按字典序迭代，严格大于才替换：同分时字典序最小者胜出
        for action in candidates {
            let rule_ids = applicable.get(action).cloned().unwrap_or_default();
            let rule_score = if rule_ids.is_empty() { 0.0 } else { 1.0 };
            let model_score = self.model_score(input.model_scores, action);
            let context_weight = self.context_weight(input.context_weights, action);
            let combined = (rule_score * self.weights.rule_weight
                + model_score * self.weights.model_weight
                + context_weight * self.weights.context_weight)
                .clamp(0.0, 1.0);

            let better = best
                .as_ref()
                .map(|b| combined > b.combined_score)
                .unwrap_or(true);
            if better {
                best = Some(Decision {
                    action: action.to_string(),
                    combined_score: combined,
                    rule_ids,
                    model_score,
                    context_weight,
                    decided_at: input.at,
                });
            }
        }

        best.ok_or(CoordError::NoApplicableAction)
    }

    fn model_score(&self, scores: &ModelScores, action: &str) -> f64 {
        let raw = match scores {
            ModelScores::Scored(map) => map.get(action).copied(),
            ModelScores::Unavailable => None,
        };
        match raw {
            Some(s) if s.is_finite() => s.clamp(0.0, 1.0),
            _ => self.weights.model_fallback,
        }
    }

    fn context_weight(&self, weights: Option<&HashMap<String, f64>>, action: &str) -> f64 {
        match weights.and_then(|w| w.get(action).copied()) {
            Some(w) if w.is_finite() => w.clamp(0.0, 1.0),
            _ => self.weights.context_default,
        }
    }
}
