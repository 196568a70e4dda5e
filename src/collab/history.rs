//! Agent 的动作结果历史（有界），供上下文协作方计算权重

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::collab::ContextProvider;
use crate::core::CoordResult;

pub const DEFAULT_HISTORY_CAPACITY: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub action: String,
    pub success: bool,
    pub combined_score: f64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct OutcomeHistory {
    entries: VecDeque<Outcome>,
    capacity: usize,
}

impl OutcomeHistory {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// 追加一条结果，超出容量时丢弃最旧的
    pub fn record(&mut self, outcome: Outcome) {
        self.entries.push_back(outcome);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Outcome> {
        self.entries.iter()
    }

    /// 某个动作的成功率；从未执行过返回 None
    pub fn success_ratio(&self, action: &str) -> Option<f64> {
        let (total, ok) = self
            .entries
            .iter()
            .filter(|o| o.action == action)
            .fold((0u32, 0u32), |(t, s), o| (t + 1, s + u32::from(o.success)));
        (total > 0).then(|| f64::from(ok) / f64::from(total))
    }
}

impl Default for OutcomeHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// 默认上下文协作方：权重 = 该动作的历史成功率；没有历史的动作不给权重（引擎取默认值）
#[derive(Debug, Default, Clone, Copy)]
pub struct HistoryContextProvider;

#[async_trait]
impl ContextProvider for HistoryContextProvider {
    async fn weights(
        &self,
        candidates: &[String],
        history: &OutcomeHistory,
    ) -> CoordResult<HashMap<String, f64>> {
        Ok(candidates
            .iter()
            .filter_map(|c| history.success_ratio(c).map(|r| (c.clone(), r)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(action: &str, success: bool) -> Outcome {
        Outcome {
            action: action.to_string(),
            success,
            combined_score: 0.8,
            at: Utc::now(),
        }
    }

    #[test]
    fn test_history_is_bounded() {
        let mut history = OutcomeHistory::with_capacity(3);
        for _ in 0..5 {
            history.record(outcome("raise_alert", true));
        }
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn test_success_ratio() {
        let mut history = OutcomeHistory::new();
        history.record(outcome("launch_campaign", true));
        history.record(outcome("launch_campaign", false));
        history.record(outcome("launch_campaign", true));
        history.record(outcome("launch_campaign", true));
        assert_eq!(history.success_ratio("launch_campaign"), Some(0.75));
        assert_eq!(history.success_ratio("track_progress"), None);
    }

    #[tokio::test]
    async fn test_history_context_skips_unknown_actions() {
        let mut history = OutcomeHistory::new();
        history.record(outcome("award_points", false));
        let weights = HistoryContextProvider
            .weights(
                &["award_points".to_string(), "recommend_indoor_activity".to_string()],
                &history,
            )
            .await
            .unwrap();
        assert_eq!(weights.len(), 1);
        assert_eq!(weights["award_points"], 0.0);
    }
}
