//! 集成测试共用的协作方替身

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Notify;

use ecomind::agent::{Agent, AgentBindings, AgentContext, AgentProfile};
use ecomind::bus::{MessageBus, TypeFilter};
use ecomind::collab::{
    ActionExecutor, ContextProvider, DataSource, HistoryContextProvider, ModelScorer, OutcomeHistory,
};
use ecomind::core::{AgentStatus, CoordError, CoordResult, SystemClock};
use ecomind::decision::{DecisionEngine, Snapshot};
use ecomind::store::InMemoryStore;

/// 每次返回同一份数据
pub struct FixedSource(pub Value);

#[async_trait]
impl DataSource for FixedSource {
    async fn fetch_snapshot(&self, _domain: &str) -> CoordResult<Value> {
        Ok(self.0.clone())
    }
}

pub fn polluted_source() -> Arc<FixedSource> {
    Arc::new(FixedSource(json!({ "aqi": 180.0, "pm25": 220.0 })))
}

pub struct UnavailableScorer;

#[async_trait]
impl ModelScorer for UnavailableScorer {
    async fn score(&self, _candidates: &[String], _snapshot: &Snapshot) -> CoordResult<HashMap<String, f64>> {
        Err(CoordError::ModelUnavailable("inference service timeout".into()))
    }
}

/// 所有候选给同一个分数
pub struct FlatScorer(pub f64);

#[async_trait]
impl ModelScorer for FlatScorer {
    async fn score(&self, candidates: &[String], _snapshot: &Snapshot) -> CoordResult<HashMap<String, f64>> {
        Ok(candidates.iter().map(|c| (c.clone(), self.0)).collect())
    }
}

/// 不给任何权重，引擎对所有候选取默认上下文权重
pub struct NeutralContext;

#[async_trait]
impl ContextProvider for NeutralContext {
    async fn weights(&self, _candidates: &[String], _history: &OutcomeHistory) -> CoordResult<HashMap<String, f64>> {
        Ok(HashMap::new())
    }
}

#[derive(Default)]
pub struct RecordingExecutor {
    pub actions: Mutex<Vec<String>>,
}

impl RecordingExecutor {
    pub fn actions(&self) -> Vec<String> {
        self.actions.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionExecutor for RecordingExecutor {
    async fn execute(&self, action: &str, _payload: &Value) -> CoordResult<Value> {
        self.actions.lock().unwrap().push(action.to_string());
        Ok(json!({ "status": "ok" }))
    }
}

#[derive(Default)]
pub struct FailingExecutor {
    pub calls: AtomicUsize,
}

impl FailingExecutor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ActionExecutor for FailingExecutor {
    async fn execute(&self, action: &str, _payload: &Value) -> CoordResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CoordError::ActionFailed {
            action: action.to_string(),
            reason: "notification gateway rejected request".into(),
        })
    }
}

/// 进入 execute 后通知 `entered`，直到 `release` 才返回
#[derive(Default)]
pub struct GatedExecutor {
    pub entered: Notify,
    pub release: Notify,
}

#[async_trait]
impl ActionExecutor for GatedExecutor {
    async fn execute(&self, _action: &str, _payload: &Value) -> CoordResult<Value> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(json!({ "status": "ok" }))
    }
}

pub fn bindings(
    data_source: Arc<dyn DataSource>,
    scorer: Arc<dyn ModelScorer>,
    executor: Arc<dyn ActionExecutor>,
) -> AgentBindings {
    AgentBindings {
        data_source,
        scorer,
        context: Arc::new(HistoryContextProvider),
        executor,
    }
}

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub bus: MessageBus,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            store: Arc::new(InMemoryStore::new()),
            bus: MessageBus::new(),
        }
    }

    pub fn context(&self) -> AgentContext {
        AgentContext {
            store: self.store.clone(),
            bus: self.bus.clone(),
            engine: Arc::new(DecisionEngine::default()),
            clock: Arc::new(SystemClock),
        }
    }

    /// 按 profile 订阅并创建 Agent
    pub async fn agent(
        &self,
        profile: AgentProfile,
        bindings: AgentBindings,
    ) -> (Agent, tokio::sync::watch::Receiver<AgentStatus>) {
        let filter = TypeFilter::only(profile.subscriptions.iter().copied());
        let inbox = self.bus.subscribe(profile.name.clone(), filter).await.unwrap();
        Agent::new(profile, self.context(), bindings, inbox)
    }
}
