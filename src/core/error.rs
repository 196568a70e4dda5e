//! 协调核心错误类型与恢复动作
//!
//! 与 RecoveryPolicy 配合：根据 CoordError 决定 Fallback / Skip / Continue / RetryWithFreshRead / Escalate。
//! 所有被捕获的错误都会以 LastError 的形式记录到发起方 Agent 的状态上。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 协调核心运行过程中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoordError {
    /// 模型打分协作方不可用，决策回落到 0.5
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// 本轮没有任何候选动作
    #[error("No applicable action")]
    NoApplicableAction,

    #[error("Action '{action}' failed: {reason}")]
    ActionFailed { action: String, reason: String },

    #[error("Version conflict on '{key}': expected {expected}, found {actual}")]
    VersionConflict {
        key: String,
        expected: u64,
        actual: u64,
    },

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Bus unavailable: {0}")]
    BusUnavailable(String),

    /// 外部数据源暂时拿不到快照
    #[error("Data source unavailable: {0}")]
    DataUnavailable(String),

    #[error("Context provider unavailable: {0}")]
    ContextUnavailable(String),

    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Invalid lifecycle transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Config error: {0}")]
    Config(String),
}

pub type CoordResult<T> = Result<T, CoordError>;

/// 错误类别（状态视图用，可序列化）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ModelUnavailable,
    NoApplicableAction,
    ActionFailed,
    VersionConflict,
    StoreUnavailable,
    BusUnavailable,
    DataUnavailable,
    ContextUnavailable,
    NotFound,
    AgentNotFound,
    InvalidTransition,
    Config,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl CoordError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoordError::ModelUnavailable(_) => ErrorKind::ModelUnavailable,
            CoordError::NoApplicableAction => ErrorKind::NoApplicableAction,
            CoordError::ActionFailed { .. } => ErrorKind::ActionFailed,
            CoordError::VersionConflict { .. } => ErrorKind::VersionConflict,
            CoordError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            CoordError::BusUnavailable(_) => ErrorKind::BusUnavailable,
            CoordError::DataUnavailable(_) => ErrorKind::DataUnavailable,
            CoordError::ContextUnavailable(_) => ErrorKind::ContextUnavailable,
            CoordError::NotFound(_) => ErrorKind::NotFound,
            CoordError::AgentNotFound(_) => ErrorKind::AgentNotFound,
            CoordError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            CoordError::Config(_) => ErrorKind::Config,
        }
    }

    /// 存储或总线后端不可用：对当前周期是致命的
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoordError::StoreUnavailable(_) | CoordError::BusUnavailable(_)
        )
    }
}

/// 状态视图中记录的最近一次错误
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastError {
    pub kind: ErrorKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

impl LastError {
    pub fn new(err: &CoordError, at: DateTime<Utc>) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
            at,
        }
    }
}

/// 恢复策略根据错误类型给出的建议动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 使用保守的默认值继续本轮（如模型不可用时打分回落）
    Fallback,
    /// 本轮不执行动作，等待下一个周期
    Skip,
    /// 记录后继续循环（如动作执行失败：本轮不通信）
    Continue,
    /// 重新读取最新版本后再试（乐观并发冲突）
    RetryWithFreshRead,
    /// 终止当前周期并上报健康状态
    Escalate,
}
