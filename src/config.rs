//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `ECOMIND__*` 覆盖（双下划线表示嵌套，
//! 如 `ECOMIND__ORCHESTRATOR__COORDINATION_INTERVAL_SECS=5`）。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::agent::AgentKind;
use crate::core::{CoordError, CoordResult};
use crate::decision::DecisionWeights;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub logging: LoggingSection,
    pub orchestrator: OrchestratorSection,
    pub store: StoreSection,
    pub bus: BusSection,
    pub decision: DecisionWeights,
    pub agents: AgentsSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "ecomind".to_string(),
        }
    }
}

/// [logging] 段：RUST_LOG 未设置时使用 filter
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub filter: String,
    /// 输出 JSON 行日志
    pub json: bool,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: false,
        }
    }
}

/// [orchestrator] 段：协调周期与关闭超时（秒）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    pub coordination_interval_secs: u64,
    /// 协调周期失败后的等待时间
    pub coordination_backoff_secs: u64,
    pub shutdown_timeout_secs: u64,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            coordination_interval_secs: 30,
            coordination_backoff_secs: 10,
            shutdown_timeout_secs: 10,
        }
    }
}

impl OrchestratorSection {
    pub fn coordination_interval(&self) -> Duration {
        Duration::from_secs(self.coordination_interval_secs.max(1))
    }

    pub fn coordination_backoff(&self) -> Duration {
        Duration::from_secs(self.coordination_backoff_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// [store] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    /// 每个键保留的历史写入条数
    pub history_limit: usize,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self { history_limit: 64 }
    }
}

/// [bus] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusSection {
    /// 收件箱去重记住的消息 ID 数
    pub dedup_window: usize,
}

impl Default for BusSection {
    fn default() -> Self {
        Self { dedup_window: 1024 }
    }
}

/// [agents.<variant>] 段：未设置的字段沿用变体默认值
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentOverrides {
    pub enabled: Option<bool>,
    pub name: Option<String>,
    pub interval_secs: Option<u64>,
    pub priority: Option<i64>,
    pub action_threshold: Option<f64>,
    pub error_backoff_secs: Option<u64>,
    /// 告警加速期间的周期（仅监测变体）
    pub alert_interval_secs: Option<u64>,
    /// 告警加速持续时间（仅监测变体）
    pub alert_boost_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentsSection {
    pub monitoring: AgentOverrides,
    pub predictive: AgentOverrides,
    pub community: AgentOverrides,
    pub coach: AgentOverrides,
}

impl AgentsSection {
    pub fn overrides(&self, kind: AgentKind) -> &AgentOverrides {
        match kind {
            AgentKind::Monitoring => &self.monitoring,
            AgentKind::Predictive => &self.predictive,
            AgentKind::Community => &self.community,
            AgentKind::Coach => &self.coach,
        }
    }
}

/// 未显式指定时依次尝试的默认配置文件
const DEFAULT_CONFIG_FILES: [&str; 2] = ["config/default.toml", "../config/default.toml"];

impl AppConfig {
    /// 权重必须是 [0,1] 内的有限数
    pub fn validate(&self) -> CoordResult<()> {
        let d = &self.decision;
        let weights = [
            ("rule_weight", d.rule_weight),
            ("model_weight", d.model_weight),
            ("context_weight", d.context_weight),
            ("model_fallback", d.model_fallback),
            ("context_default", d.context_default),
        ];
        for (name, value) in weights {
            if !(0.0..=1.0).contains(&value) {
                return Err(CoordError::Config(format!(
                    "decision.{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.bus.dedup_window == 0 {
            return Err(CoordError::Config("bus.dedup_window must be positive".into()));
        }
        Ok(())
    }
}

/// 加载配置：默认文件 → `config_path`（存在时）→ 环境变量 `ECOMIND__*`，后者覆盖前者
pub fn load_config(config_path: Option<PathBuf>) -> CoordResult<AppConfig> {
    let defaults = DEFAULT_CONFIG_FILES
        .iter()
        .map(Path::new)
        .find(|p| p.exists());

    let mut builder = config::Config::builder();
    for path in defaults.into_iter().chain(config_path.as_deref()) {
        builder = builder.add_source(config::File::from(path).required(false));
    }
    let cfg: AppConfig = builder
        .add_source(
            config::Environment::with_prefix("ECOMIND")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .and_then(|c| c.try_deserialize::<AppConfig>())
        .map_err(|e| CoordError::Config(e.to_string()))?;
    cfg.validate()?;
    Ok(cfg)
}
