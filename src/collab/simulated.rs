//! 模拟协作方（二进制与本地演示用）：确定性数据、静态先验打分、只打日志的执行器

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::collab::{ActionExecutor, DataSource, ModelScorer};
use crate::core::CoordResult;
use crate::decision::Snapshot;

/// 按调用次数轮转的一组空气质量读数（含一次污染高峰）
const READINGS: [(f64, f64); 6] = [
    (42.0, 12.0),
    (68.0, 35.0),
    (95.0, 80.0),
    (135.0, 160.0),
    (180.0, 210.0),
    (88.0, 55.0),
];

#[derive(Debug, Default)]
pub struct SimulatedDataSource {
    ticks: AtomicU64,
}

impl SimulatedDataSource {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DataSource for SimulatedDataSource {
    async fn fetch_snapshot(&self, domain: &str) -> CoordResult<serde_json::Value> {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed);
        let snapshot = match domain {
            "environmental" => {
                let (aqi, pm25) = READINGS[(tick as usize) % READINGS.len()];
                json!({
                    "aqi": aqi,
                    "pm25": pm25,
                    "location": "city-center",
                    "sample": tick,
                })
            }
            "users" => json!({ "active_users": 120 + (tick % 7) * 3 }),
            _ => json!({}),
        };
        Ok(snapshot)
    }
}

/// 每个动作一个固定先验分数，没有先验的动作取默认分
#[derive(Debug, Clone)]
pub struct StaticScorer {
    priors: HashMap<String, f64>,
    default_score: f64,
}

impl StaticScorer {
    pub fn new(default_score: f64) -> Self {
        Self {
            priors: HashMap::new(),
            default_score,
        }
    }

    pub fn with_prior(mut self, action: impl Into<String>, score: f64) -> Self {
        self.priors.insert(action.into(), score);
        self
    }
}

impl Default for StaticScorer {
    fn default() -> Self {
        Self::new(0.6)
            .with_prior("raise_alert", 0.9)
            .with_prior("publish_prediction", 0.75)
            .with_prior("launch_campaign", 0.7)
            .with_prior("award_points", 0.8)
    }
}

#[async_trait]
impl ModelScorer for StaticScorer {
    async fn score(
        &self,
        candidates: &[String],
        _snapshot: &Snapshot,
    ) -> CoordResult<HashMap<String, f64>> {
        Ok(candidates
            .iter()
            .map(|c| {
                let score = self.priors.get(c).copied().unwrap_or(self.default_score);
                (c.clone(), score)
            })
            .collect())
    }
}

/// 只记录日志的执行器
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingExecutor;

#[async_trait]
impl ActionExecutor for LoggingExecutor {
    async fn execute(
        &self,
        action: &str,
        payload: &serde_json::Value,
    ) -> CoordResult<serde_json::Value> {
        info!(action, payload = %payload, "Executing action");
        Ok(json!({ "status": "ok", "action": action }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_source_cycles_readings() {
        let source = SimulatedDataSource::new();
        let first = source.fetch_snapshot("environmental").await.unwrap();
        assert_eq!(first["aqi"], 42.0);
        for _ in 0..5 {
            source.fetch_snapshot("environmental").await.unwrap();
        }
        let wrapped = source.fetch_snapshot("environmental").await.unwrap();
        assert_eq!(wrapped["aqi"], 42.0);
    }

    #[tokio::test]
    async fn test_static_scorer_uses_priors() {
        let scorer = StaticScorer::default();
        let scores = scorer
            .score(
                &["raise_alert".to_string(), "record_readings".to_string()],
                &Snapshot::new(),
            )
            .await
            .unwrap();
        assert_eq!(scores["raise_alert"], 0.9);
        assert_eq!(scores["record_readings"], 0.6);
    }
}
