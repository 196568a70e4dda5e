//! EcoMind - 多 Agent 协调核心
//!
//! 模块划分：
//! - **agent**: Agent 周期（感知 → 决策 → 执行 → 通信）、变体配置、私有记忆
//! - **bus**: 有类型的点对点 / 广播消息总线
//! - **collab**: 外部协作方接口（数据源、模型打分、上下文、动作执行）与模拟实现
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 编排器、错误与恢复、状态投影、监管、优雅关闭
//! - **decision**: 规则、输入快照、组合打分引擎
//! - **observability**: tracing 初始化
//! - **store**: 带版本与优先级裁决的共享协调存储

pub mod agent;
pub mod bus;
pub mod collab;
pub mod config;
pub mod core;
pub mod decision;
pub mod observability;
pub mod store;

pub use crate::core::{Orchestrator, OrchestratorBuilder};
