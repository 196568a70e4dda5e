//! 外部协作方接口
//!
//! 数据接入、模型推理、上下文、动作执行都在协调核心之外，通过这四个窄接口访问。
//! 任何一个协作方失败都只影响调用它的 Agent 的当前周期。

use std::collections::HashMap;

use async_trait::async_trait;

use crate::collab::OutcomeHistory;
use crate::core::CoordResult;
use crate::decision::Snapshot;

/// 数据源：按领域拉取一份原始快照（JSON 对象）
#[async_trait]
pub trait DataSource: Send + Sync {
    /// 拿不到数据返回 DataUnavailable
    async fn fetch_snapshot(&self, domain: &str) -> CoordResult<serde_json::Value>;
}

/// 模型打分：每个候选动作一个 [0,1] 分数
#[async_trait]
pub trait ModelScorer: Send + Sync {
    /// 不可用时返回 ModelUnavailable，决策引擎会回落到固定分数
    async fn score(
        &self,
        candidates: &[String],
        snapshot: &Snapshot,
    ) -> CoordResult<HashMap<String, f64>>;
}

/// 上下文权重：结合 Agent 的历史结果给候选动作加权
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn weights(
        &self,
        candidates: &[String],
        history: &OutcomeHistory,
    ) -> CoordResult<HashMap<String, f64>>;
}

/// 动作执行：产生外部副作用
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// 成功返回执行结果；失败返回 ActionFailed
    async fn execute(
        &self,
        action: &str,
        payload: &serde_json::Value,
    ) -> CoordResult<serde_json::Value>;
}
