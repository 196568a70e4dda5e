//! Agent：感知 → 决策 → 执行 → 通信 的周期参与者
//!
//! 四种变体（监测 / 预测 / 社区 / 教练）共用同一个周期实现，差异全部来自 AgentProfile：
//! 读哪些存储键、订阅哪些消息类型、用什么规则、动作产生什么后续效果。

pub mod cycle;
pub mod memory;
pub mod presets;
pub mod profile;

use serde::{Deserialize, Serialize};

pub use cycle::{Agent, AgentBindings, AgentContext, CycleReport};
pub use memory::{AgentMemory, MemoryEntry};
pub use presets::standard_profiles;
pub use profile::{
    attention_key, status_key, ActionSpec, AgentProfile, AttentionClaim, IntervalBoost,
    ATTENTION_PREFIX,
};

/// Agent 变体标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Monitoring,
    Predictive,
    Community,
    Coach,
}

impl AgentKind {
    pub const ALL: [AgentKind; 4] = [
        AgentKind::Monitoring,
        AgentKind::Predictive,
        AgentKind::Community,
        AgentKind::Coach,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Monitoring => "monitoring",
            AgentKind::Predictive => "predictive",
            AgentKind::Community => "community",
            AgentKind::Coach => "coach",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
