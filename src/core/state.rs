//! 状态定义：Agent 生命周期状态机、状态视图投影
//!
//! Agent 在自己的任务里维护完整的内部状态，通过 watch 通道投影出轻量的 AgentStatus；
//! 编排器聚合这些投影得到 OrchestratorStatus，这是协调核心唯一对外可见的输出。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::AgentKind;
use crate::core::{CoordError, CoordResult, LastError};

/// Agent 生命周期：Created -> Running <-> Suspended -> Stopped（终态）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentState {
    Created,
    Running,
    Suspended,
    Stopped,
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentState::Created => write!(f, "created"),
            AgentState::Running => write!(f, "running"),
            AgentState::Suspended => write!(f, "suspended"),
            AgentState::Stopped => write!(f, "stopped"),
        }
    }
}

impl AgentState {
    pub fn can_transition_to(self, to: AgentState) -> bool {
        use AgentState::*;
        matches!(
            (self, to),
            (Created, Running)
                | (Running, Suspended)
                | (Suspended, Running)
                | (Running, Stopped)
                | (Suspended, Stopped)
        )
    }

    /// 校验并返回目标状态；非法迁移返回 InvalidTransition
    pub fn transition(self, to: AgentState) -> CoordResult<AgentState> {
        if self.can_transition_to(to) {
            Ok(to)
        } else {
            Err(CoordError::InvalidTransition {
                from: self.to_string(),
                to: to.to_string(),
            })
        }
    }

    pub fn is_terminal(self) -> bool {
        self == AgentState::Stopped
    }
}

/// 单个 Agent 的状态投影
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentStatus {
    pub name: String,
    pub kind: AgentKind,
    pub state: AgentState,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_error: Option<LastError>,
    /// 已完成的周期数
    pub cycles: u64,
    /// 成功执行的动作数
    pub actions: u64,
    pub last_action: Option<String>,
    /// 私有记忆中的键（只暴露键名）
    pub memory_keys: Vec<String>,
    pub cycle_interval_secs: u64,
}

impl AgentStatus {
    pub fn new(name: impl Into<String>, kind: AgentKind, cycle_interval_secs: u64) -> Self {
        Self {
            name: name.into(),
            kind,
            state: AgentState::Created,
            last_cycle_at: None,
            last_error: None,
            cycles: 0,
            actions: 0,
            last_action: None,
            memory_keys: Vec::new(),
            cycle_interval_secs,
        }
    }
}

/// 编排器健康状况：存储 / 总线不可用时 healthy = false
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Health {
    pub healthy: bool,
    pub last_coordination_at: Option<DateTime<Utc>>,
    pub coordination_error: Option<LastError>,
}

/// 编排器聚合状态（只读快照）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub health: Health,
    pub agents: Vec<AgentStatus>,
}

impl OrchestratorStatus {
    pub fn agent(&self, name: &str) -> Option<&AgentStatus> {
        self.agents.iter().find(|a| a.name == name)
    }

    pub fn agents_running(&self) -> usize {
        self.agents
            .iter()
            .filter(|a| a.state == AgentState::Running)
            .count()
    }

    pub fn total_actions(&self) -> u64 {
        self.agents.iter().map(|a| a.actions).sum()
    }
}
