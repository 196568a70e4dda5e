//! Agent 周期：perceive → decide → act → communicate → sleep
//!
//! 每个 Agent 在独立任务中运行 `Agent::run`。取消与暂停只在周期边界生效，
//! 正在执行的周期总会完整跑完四个步骤（不会出现写了一半的通信）。
//!
//! 错误处理（RecoveryPolicy）：
//! - 数据源 / 模型 / 上下文不可用：记录 last_error，用保守默认值继续本轮
//! - 动作执行失败：记录 last_error，本轮不通信，循环继续
//! - 存储 / 总线不可用：本轮中止，等待 error_backoff 后重试

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::agent::{attention_key, AgentMemory, AgentProfile, AttentionClaim};
use crate::bus::{Inbox, Message, MessageBus};
use crate::collab::{ActionExecutor, ContextProvider, DataSource, ModelScorer, Outcome, OutcomeHistory};
use crate::core::{
    AgentState, AgentStatus, AgentSupervisor, Clock, CoordError, CoordResult, LastError,
    RecoveryAction, RecoveryPolicy,
};
use crate::decision::{Decision, DecisionEngine, DecisionInput, ModelScores, Snapshot};
use crate::store::CoordinationStore;

/// 所有 Agent 共享的协调基础设施
#[derive(Clone)]
pub struct AgentContext {
    pub store: Arc<dyn CoordinationStore>,
    pub bus: MessageBus,
    pub engine: Arc<DecisionEngine>,
    pub clock: Arc<dyn Clock>,
}

/// 单个 Agent 使用的外部协作方
#[derive(Clone)]
pub struct AgentBindings {
    pub data_source: Arc<dyn DataSource>,
    pub scorer: Arc<dyn ModelScorer>,
    pub context: Arc<dyn ContextProvider>,
    pub executor: Arc<dyn ActionExecutor>,
}

impl AgentBindings {
    /// 本地演示用的模拟协作方
    pub fn simulated() -> Self {
        Self {
            data_source: Arc::new(crate::collab::SimulatedDataSource::new()),
            scorer: Arc::new(crate::collab::StaticScorer::default()),
            context: Arc::new(crate::collab::HistoryContextProvider),
            executor: Arc::new(crate::collab::LoggingExecutor),
        }
    }

    pub fn with_data_source(mut self, data_source: Arc<dyn DataSource>) -> Self {
        self.data_source = data_source;
        self
    }

    pub fn with_scorer(mut self, scorer: Arc<dyn ModelScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_context(mut self, context: Arc<dyn ContextProvider>) -> Self {
        self.context = context;
        self
    }

    pub fn with_executor(mut self, executor: Arc<dyn ActionExecutor>) -> Self {
        self.executor = executor;
        self
    }
}

/// 一个周期的结果摘要
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub decision: Option<Decision>,
    /// 动作已执行且成功
    pub acted: bool,
    pub action_error: Option<CoordError>,
    pub messages_published: usize,
}

pub struct Agent {
    profile: AgentProfile,
    ctx: AgentContext,
    bindings: AgentBindings,
    inbox: Inbox,
    memory: AgentMemory,
    history: OutcomeHistory,
    policy: RecoveryPolicy,
    status_tx: watch::Sender<AgentStatus>,
    boost_until: Option<Instant>,
}

impl Agent {
    /// 创建 Agent，返回状态投影的接收端
    pub fn new(
        profile: AgentProfile,
        ctx: AgentContext,
        bindings: AgentBindings,
        inbox: Inbox,
    ) -> (Self, watch::Receiver<AgentStatus>) {
        let status = AgentStatus::new(
            profile.name.clone(),
            profile.kind,
            profile.interval.as_secs(),
        );
        let (status_tx, status_rx) = watch::channel(status);
        let agent = Self {
            profile,
            ctx,
            bindings,
            inbox,
            memory: AgentMemory::new(),
            history: OutcomeHistory::new(),
            policy: RecoveryPolicy::new(),
            status_tx,
            boost_until: None,
        };
        (agent, status_rx)
    }

    pub fn name(&self) -> &str {
        &self.profile.name
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    pub fn status(&self) -> AgentStatus {
        self.status_tx.borrow().clone()
    }

    pub fn memory(&self) -> &AgentMemory {
        &self.memory
    }

    /// 生命周期迁移；非法迁移只记日志
    fn set_state(&self, to: AgentState) {
        let from = self.status_tx.borrow().state;
        if from == to {
            return;
        }
        match from.transition(to) {
            Ok(state) => {
                info!(agent = %self.profile.name, from = %from, to = %state, "Agent state changed");
                self.status_tx.send_modify(|s| s.state = state);
            }
            Err(e) => warn!(agent = %self.profile.name, error = %e, "Rejected state change"),
        }
    }

    fn record_error(&self, err: &CoordError) {
        let last = LastError::new(err, self.ctx.clock.now());
        self.status_tx.send_modify(|s| s.last_error = Some(last));
    }

    /// 当前周期间隔（告警加速期内取加速值）
    fn current_interval(&mut self) -> std::time::Duration {
        let interval = match (self.boost_until, self.profile.boost) {
            (Some(until), Some(boost)) if Instant::now() < until => boost.interval,
            (Some(_), _) => {
                self.boost_until = None;
                info!(agent = %self.profile.name, "Alert boost expired, interval restored");
                self.profile.interval
            }
            _ => self.profile.interval,
        };
        let secs = interval.as_secs();
        self.status_tx.send_if_modified(|s| {
            let changed = s.cycle_interval_secs != secs;
            s.cycle_interval_secs = secs;
            changed
        });
        interval
    }

    /// 主循环：直到被取消。返回最终状态
    pub async fn run(mut self, supervisor: AgentSupervisor) -> AgentStatus {
        let cancel = supervisor.cancel_token();
        let mut pause_rx = supervisor.pause_watch();
        self.set_state(AgentState::Running);

        loop {
            if cancel.is_cancelled() {
                break;
            }

            if *pause_rx.borrow_and_update() {
                self.set_state(AgentState::Suspended);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = pause_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                }
            }
            self.set_state(AgentState::Running);

            let delay = match self.tick().await {
                Ok(_) => self.current_interval(),
                Err(e) => {
                    error!(
                        agent = %self.profile.name,
                        error = %e,
                        backoff_secs = self.profile.error_backoff.as_secs(),
                        "Cycle aborted"
                    );
                    self.profile.error_backoff
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
                changed = pause_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.set_state(AgentState::Stopped);
        info!(agent = %self.profile.name, "Agent stopped");
        self.status()
    }

    /// 执行一个完整周期并更新状态投影；致命错误记录为 last_error 后返回
    pub async fn tick(&mut self) -> CoordResult<CycleReport> {
        let started = self.ctx.clock.now();
        let outcome = self.cycle(started).await;

        let memory_keys = self.memory.keys();
        self.status_tx.send_modify(|s| {
            s.last_cycle_at = Some(started);
            s.cycles += 1;
            s.memory_keys = memory_keys;
        });

        let outcome = match outcome {
            Ok(report) => self.write_status().await.map(|()| report),
            Err(e) => Err(e),
        };
        if let Err(e) = &outcome {
            self.record_error(e);
        }
        outcome
    }

    async fn write_status(&self) -> CoordResult<()> {
        let status = serde_json::to_value(self.status())
            .map_err(|e| CoordError::StoreUnavailable(e.to_string()))?;
        self.ctx
            .store
            .put(
                &self.profile.status_key(),
                status,
                &self.profile.name,
                self.profile.priority,
            )
            .await
            .map(|_| ())
    }

    async fn cycle(&mut self, now: DateTime<Utc>) -> CoordResult<CycleReport> {
        let mut report = CycleReport::default();

        let (snapshot, data) = self.perceive().await?;

        let decision = match self.decide(&snapshot, now).await {
            Ok(d) => d,
            Err(e) if self.policy.handle(&e) == RecoveryAction::Skip => {
                debug!(agent = %self.profile.name, reason = %e, "No action this cycle");
                return Ok(report);
            }
            Err(e) => return Err(e),
        };
        let remembered = serde_json::to_value(&decision)
            .map_err(|e| CoordError::StoreUnavailable(e.to_string()))?;
        self.memory.store("last_decision", remembered, now);
        report.decision = Some(decision.clone());

        if decision.combined_score < self.profile.action_threshold {
            debug!(
                agent = %self.profile.name,
                action = %decision.action,
                score = decision.combined_score,
                threshold = self.profile.action_threshold,
                "Decision below action threshold, skipping"
            );
            return Ok(report);
        }

        let payload = json!({
            "agent": self.profile.name,
            "action": decision.action,
            "combined_score": decision.combined_score,
            "rule_ids": decision.rule_ids,
            "data": data,
        });
        match self
            .bindings
            .executor
            .execute(&decision.action, &payload)
            .await
        {
            Ok(result) => {
                info!(
                    agent = %self.profile.name,
                    action = %decision.action,
                    score = decision.combined_score,
                    "Action executed"
                );
                report.acted = true;
                self.history.record(Outcome {
                    action: decision.action.clone(),
                    success: true,
                    combined_score: decision.combined_score,
                    at: now,
                });
                self.memory.store("last_action_result", result, now);
                let action = decision.action.clone();
                self.status_tx.send_modify(|s| {
                    s.actions += 1;
                    s.last_action = Some(action);
                });
            }
            Err(e) => {
                let e = match e {
                    CoordError::ActionFailed { .. } => e,
                    other => CoordError::ActionFailed {
                        action: decision.action.clone(),
                        reason: other.to_string(),
                    },
                };
                warn!(agent = %self.profile.name, error = %e, "Action failed, continuing");
                self.record_error(&e);
                self.history.record(Outcome {
                    action: decision.action.clone(),
                    success: false,
                    combined_score: decision.combined_score,
                    at: now,
                });
                report.action_error = Some(e);
                return Ok(report);
            }
        }

        report.messages_published = self.communicate(&decision, data, now).await?;
        Ok(report)
    }

    /// 数据源快照 + 范围内的存储键 + 收件箱
    async fn perceive(&mut self) -> CoordResult<(Snapshot, Value)> {
        let mut snapshot = Snapshot::new();
        let mut data = Value::Null;

        if let Some(domain) = &self.profile.data_domain {
            match self.bindings.data_source.fetch_snapshot(domain).await {
                Ok(value) => {
                    data = value.clone();
                    snapshot.merge(value);
                }
                Err(e) => {
                    let e = match e {
                        CoordError::DataUnavailable(_) => e,
                        other => CoordError::DataUnavailable(other.to_string()),
                    };
                    self.absorb(e)?;
                }
            }
        }

        for key in &self.profile.read_keys {
            match self.ctx.store.get(key).await {
                Ok(entry) => snapshot.insert(key.clone(), entry.value),
                Err(e) if self.policy.handle(&e) == RecoveryAction::Skip => {}
                Err(e) => return Err(e),
            }
        }

        let mut received = 0usize;
        for message in self.inbox.drain() {
            if message.sender == self.profile.name {
                continue;
            }
            received += 1;
            snapshot.push_message(message);
        }
        if received > 0 {
            debug!(agent = %self.profile.name, received, "Inbox drained");
        }

        if !data.is_null() {
            self.memory.store("last_data", data.clone(), self.ctx.clock.now());
        }
        Ok((snapshot, data))
    }

    /// 可回落的协作方错误：记录并吞掉；其他错误原样返回
    fn absorb(&self, err: CoordError) -> CoordResult<()> {
        match self.policy.handle(&err) {
            RecoveryAction::Fallback => {
                warn!(agent = %self.profile.name, error = %err, "Collaborator unavailable, using fallback");
                self.record_error(&err);
                Ok(())
            }
            _ => Err(err),
        }
    }

    async fn decide(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> CoordResult<Decision> {
        let engine = &self.ctx.engine;
        let candidates: Vec<String> = engine
            .filter_rules(snapshot, &self.profile.rules)
            .into_keys()
            .collect();
        if candidates.is_empty() {
            return Err(CoordError::NoApplicableAction);
        }

        let model_scores = match self.bindings.scorer.score(&candidates, snapshot).await {
            Ok(scores) => ModelScores::Scored(scores),
            Err(e) => {
                let e = match e {
                    CoordError::ModelUnavailable(_) => e,
                    other => CoordError::ModelUnavailable(other.to_string()),
                };
                self.absorb(e)?;
                ModelScores::Unavailable
            }
        };

        let context_weights: Option<HashMap<String, f64>> =
            match self.bindings.context.weights(&candidates, &self.history).await {
                Ok(weights) => Some(weights),
                Err(e) => {
                    let e = match e {
                        CoordError::ContextUnavailable(_) => e,
                        other => CoordError::ContextUnavailable(other.to_string()),
                    };
                    self.absorb(e)?;
                    None
                }
            };

        engine.decide(DecisionInput {
            snapshot,
            rules: &self.profile.rules,
            model_scores: &model_scores,
            context_weights: context_weights.as_ref(),
            at: now,
        })
    }

    /// 动作成功后的通信：发布记录、广播、资源声明、告警加速。返回发出的消息数
    async fn communicate(
        &mut self,
        decision: &Decision,
        data: Value,
        now: DateTime<Utc>,
    ) -> CoordResult<usize> {
        let spec = self.profile.action_spec(&decision.action);
        let name = self.profile.name.clone();
        let priority = self.profile.priority;

        let mut record = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("data".to_string(), other);
                map
            }
        };
        record.insert("action".to_string(), json!(decision.action));
        record.insert("combined_score".to_string(), json!(decision.combined_score));
        record.insert("updated_at".to_string(), json!(now));
        record.insert("source".to_string(), json!(name));
        for flag in self.profile.flags() {
            let set = spec.flag.as_deref() == Some(flag);
            record.insert(flag.to_string(), json!(set));
        }
        let record = Value::Object(record);

        if spec.publishes {
            if let Some(key) = &self.profile.publish_key {
                self.ctx.store.put(key, record.clone(), &name, priority).await?;
            }
        }

        if let Some(resource) = &spec.target {
            let seen_version = self.ctx.store.version(resource).await?;
            let claim = AttentionClaim {
                agent: name.clone(),
                resource: resource.clone(),
                action: decision.action.clone(),
                priority,
                combined_score: decision.combined_score,
                claimed_at: now,
                seen_version,
                resolved: false,
                winner: None,
            };
            let value = serde_json::to_value(&claim)
                .map_err(|e| CoordError::StoreUnavailable(e.to_string()))?;
            self.ctx
                .store
                .put(&attention_key(resource, &name), value, &name, priority)
                .await?;
        }

        let mut published = 0;
        if let Some(message_type) = spec.emits {
            let message = Message::broadcast(name.clone(), message_type, record, now);
            self.ctx.bus.publish(message).await?;
            published += 1;
        }

        if spec.boosts_interval {
            if let Some(boost) = self.profile.boost {
                self.boost_until = Some(Instant::now() + boost.duration);
                info!(
                    agent = %name,
                    interval_secs = boost.interval.as_secs(),
                    for_secs = boost.duration.as_secs(),
                    "Alert raised, boosting cycle interval"
                );
            }
        }

        Ok(published)
    }
}
