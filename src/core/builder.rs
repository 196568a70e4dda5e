//! 编排器构建器：统一的初始化逻辑
//!
//! 二进制与测试都从这里组装：存储、总线、决策权重、时钟、Agent 列表及各自的协作方。

use std::collections::HashSet;
use std::sync::Arc;

use crate::agent::{standard_profiles, AgentBindings, AgentProfile};
use crate::bus::MessageBus;
use crate::config::AppConfig;
use crate::core::orchestrator::PendingAgent;
use crate::core::{Clock, CoordError, CoordResult, Orchestrator, OrchestratorSettings, SystemClock};
use crate::decision::{DecisionEngine, DecisionWeights};
use crate::store::{CoordinationStore, InMemoryStore};

pub struct OrchestratorBuilder {
    store: Option<Arc<dyn CoordinationStore>>,
    bus: Option<MessageBus>,
    clock: Arc<dyn Clock>,
    weights: DecisionWeights,
    settings: OrchestratorSettings,
    history_limit: usize,
    dedup_window: usize,
    agents: Vec<PendingAgent>,
}

impl OrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            bus: None,
            clock: Arc::new(SystemClock),
            weights: DecisionWeights::default(),
            settings: OrchestratorSettings::default(),
            history_limit: 64,
            dedup_window: 1024,
            agents: Vec::new(),
        }
    }

    /// 从配置读取协调周期、决策权重、存储与总线参数（不包含 Agent）
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            weights: config.decision.clone(),
            settings: OrchestratorSettings::from(&config.orchestrator),
            history_limit: config.store.history_limit,
            dedup_window: config.bus.dedup_window,
            ..Self::new()
        }
    }

    /// 使用外部存储（默认内存存储）
    pub fn with_store(mut self, store: Arc<dyn CoordinationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_bus(mut self, bus: MessageBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_weights(mut self, weights: DecisionWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_settings(mut self, settings: OrchestratorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_agent(mut self, profile: AgentProfile, bindings: AgentBindings) -> Self {
        self.agents.push(PendingAgent { profile, bindings });
        self
    }

    /// 按配置加入标准变体，全部共用同一组协作方
    pub fn with_standard_agents(mut self, config: &AppConfig, bindings: AgentBindings) -> Self {
        for profile in standard_profiles(&config.agents) {
            self.agents.push(PendingAgent {
                profile,
                bindings: bindings.clone(),
            });
        }
        self
    }

    /// Agent 名称必须唯一
    pub fn build(self) -> CoordResult<Orchestrator> {
        let mut seen = HashSet::new();
        for pending in &self.agents {
            if !seen.insert(pending.profile.name.as_str()) {
                return Err(CoordError::Config(format!(
                    "duplicate agent name: {}",
                    pending.profile.name
                )));
            }
        }

        let store = self.store.unwrap_or_else(|| {
            Arc::new(
                InMemoryStore::with_clock(self.clock.clone()).with_history_limit(self.history_limit),
            )
        });
        let bus = self
            .bus
            .unwrap_or_else(|| MessageBus::with_dedup_window(self.dedup_window));

        Ok(Orchestrator::new(
            store,
            bus,
            Arc::new(DecisionEngine::new(self.weights)),
            self.clock,
            self.settings,
            self.agents,
        ))
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
