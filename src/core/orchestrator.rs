//! 编排器：拥有全部 Agent，驱动它们的周期，并运行独立的协调周期
//!
//! 协调周期（默认每 30s）：
//! 1. 升级：`environmental/current` 出现带 `pollution_alert = true` 的新版本时广播 CAMPAIGN_REQUEST
//! 2. 冲突裁决：扫描 `attention/`，同一资源上未裁决的动作声明按「优先级 → 时间戳」选出胜者，
//!    以声明时看到的资源版本 CAS 写入资源键（资源当前值优先级更高时不覆盖），
//!    把声明标记为已裁决，再向相关 Agent 定向发送 SYSTEM_STATUS
//! 3. 写入 `system/state`
//!
//! 存储 / 总线不可用对协调周期是致命的：本轮中止、健康状态置为不健康，等待 backoff 后重试。

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agent::presets::{ENVIRONMENTAL_CURRENT, POLLUTION_ALERT_FLAG};
use crate::agent::{
    Agent, AgentBindings, AgentContext, AgentProfile, AttentionClaim, ATTENTION_PREFIX,
};
use crate::bus::{Message, MessageBus, MessageId, MessageType, TypeFilter};
use crate::config::OrchestratorSection;
use crate::core::{
    AgentState, AgentStatus, AgentSupervisor, Clock, CoordError, CoordResult, Health, LastError,
    OrchestratorStatus, RecoveryAction, RecoveryPolicy,
};
use crate::decision::DecisionEngine;
use crate::store::{precedence, CoordinationStore, ReadEntry};

/// 编排器在存储与总线上的身份
pub const ORCHESTRATOR_ID: &str = "orchestrator";
/// 编排器写入的优先级，高于任何标准变体
pub const ORCHESTRATOR_PRIORITY: i64 = 100;
pub const SYSTEM_STATE_KEY: &str = "system/state";

#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    pub coordination_interval: Duration,
    pub coordination_backoff: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&OrchestratorSection::default())
    }
}

impl From<&OrchestratorSection> for OrchestratorSettings {
    fn from(section: &OrchestratorSection) -> Self {
        Self {
            coordination_interval: section.coordination_interval(),
            coordination_backoff: section.coordination_backoff(),
            shutdown_timeout: section.shutdown_timeout(),
        }
    }
}

/// 一次资源裁决
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub resource: String,
    pub winner: String,
    pub action: String,
    /// 存在不同动作的竞争声明
    pub conflict: bool,
    pub participants: Vec<String>,
    /// 资源已被更高优先级的写入占据，胜出声明未写入
    pub superseded_by: Option<String>,
}

enum Applied {
    Written,
    /// 资源当前值的写入者优先于胜出声明
    Superseded(String),
    Retry,
}

/// 其他写入者持有的资源值在「优先级 → 时间戳」上高于声明时返回该写入者；
/// Agent 可以替换自己先前的裁决结果
fn outranking_holder(head: Option<&ReadEntry>, claim: &AttentionClaim) -> Option<String> {
    let head = head?;
    if head.writer == claim.agent {
        return None;
    }
    ((head.priority, head.written_at) > (claim.priority, claim.claimed_at))
        .then(|| head.writer.clone())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoordinationReport {
    pub escalated: bool,
    pub resolutions: Vec<Resolution>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Running,
    Stopped,
}

struct Lifecycle {
    phase: Phase,
    started_at: Option<DateTime<Utc>>,
}

pub(crate) struct PendingAgent {
    pub profile: AgentProfile,
    pub bindings: AgentBindings,
}

struct AgentSlot {
    name: String,
    supervisor: AgentSupervisor,
    status_rx: watch::Receiver<AgentStatus>,
}

struct Inner {
    store: Arc<dyn CoordinationStore>,
    bus: MessageBus,
    engine: Arc<DecisionEngine>,
    clock: Arc<dyn Clock>,
    settings: OrchestratorSettings,
    policy: RecoveryPolicy,
    root: CancellationToken,
    /// 串行化 start / stop
    control: Mutex<()>,
    lifecycle: StdMutex<Lifecycle>,
    pending: Mutex<Vec<PendingAgent>>,
    agents: RwLock<Vec<AgentSlot>>,
    tasks: Mutex<Vec<JoinHandle<AgentStatus>>>,
    coordinator: Mutex<Option<JoinHandle<()>>>,
    health: RwLock<Health>,
    /// 已处理过的 environmental/current 版本
    last_env_version: Mutex<Option<u64>>,
}

/// 编排器句柄（可克隆，内部共享）
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    pub(crate) fn new(
        store: Arc<dyn CoordinationStore>,
        bus: MessageBus,
        engine: Arc<DecisionEngine>,
        clock: Arc<dyn Clock>,
        settings: OrchestratorSettings,
        pending: Vec<PendingAgent>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                bus,
                engine,
                clock,
                settings,
                policy: RecoveryPolicy::new(),
                root: CancellationToken::new(),
                control: Mutex::new(()),
                lifecycle: StdMutex::new(Lifecycle {
                    phase: Phase::Created,
                    started_at: None,
                }),
                pending: Mutex::new(pending),
                agents: RwLock::new(Vec::new()),
                tasks: Mutex::new(Vec::new()),
                coordinator: Mutex::new(None),
                health: RwLock::new(Health::default()),
                last_env_version: Mutex::new(None),
            }),
        }
    }

    pub fn store(&self) -> Arc<dyn CoordinationStore> {
        self.inner.store.clone()
    }

    pub fn bus(&self) -> MessageBus {
        self.inner.bus.clone()
    }

    fn phase(&self) -> Phase {
        self.inner
            .lifecycle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .phase
    }

    fn set_phase(&self, phase: Phase, started_at: Option<DateTime<Utc>>) {
        let mut lifecycle = self.inner.lifecycle.lock().unwrap_or_else(|e| e.into_inner());
        lifecycle.phase = phase;
        if started_at.is_some() {
            lifecycle.started_at = started_at;
        }
    }

    fn started_at(&self) -> Option<DateTime<Utc>> {
        self.inner
            .lifecycle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .started_at
    }

    async fn set_health(&self, result: Result<(), &CoordError>) {
        let now = self.inner.clock.now();
        let mut health = self.inner.health.write().await;
        match result {
            Ok(()) => {
                health.healthy = true;
                health.last_coordination_at = Some(now);
                health.coordination_error = None;
            }
            Err(e) => {
                health.healthy = false;
                health.coordination_error = Some(LastError::new(e, now));
            }
        }
    }

    /// 启动前检查存储与总线是否可用
    async fn probe(&self) -> CoordResult<()> {
        match self.inner.store.get(SYSTEM_STATE_KEY).await {
            Ok(_) | Err(CoordError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        if !self.inner.bus.is_open() {
            return Err(CoordError::BusUnavailable("message bus is closed".to_string()));
        }
        Ok(())
    }

    /// 启动所有 Agent 与协调周期；存储或总线不可用时返回启动错误
    pub async fn start(&self) -> CoordResult<()> {
        let _guard = self.inner.control.lock().await;
        match self.phase() {
            Phase::Running => return Ok(()),
            Phase::Stopped => {
                return Err(CoordError::InvalidTransition {
                    from: AgentState::Stopped.to_string(),
                    to: AgentState::Running.to_string(),
                })
            }
            Phase::Created => {}
        }

        if let Err(e) = self.probe().await {
            error!(error = %e, "Startup check failed");
            self.set_health(Err(&e)).await;
            return Err(e);
        }

        let ctx = AgentContext {
            store: self.inner.store.clone(),
            bus: self.inner.bus.clone(),
            engine: self.inner.engine.clone(),
            clock: self.inner.clock.clone(),
        };

        let pending = std::mem::take(&mut *self.inner.pending.lock().await);
        let mut slots = Vec::with_capacity(pending.len());
        let mut tasks = Vec::with_capacity(pending.len());
        for PendingAgent { profile, bindings } in pending {
            let filter = TypeFilter::only(profile.subscriptions.iter().copied());
            let inbox = self.inner.bus.subscribe(profile.name.clone(), filter).await?;
            let supervisor = AgentSupervisor::with_parent(&self.inner.root);
            let (agent, status_rx) = Agent::new(profile, ctx.clone(), bindings, inbox);
            let name = agent.name().to_string();
            info!(agent = %name, kind = %agent.profile().kind, "Starting agent");
            tasks.push(tokio::spawn(agent.run(supervisor.clone())));
            slots.push(AgentSlot {
                name,
                supervisor,
                status_rx,
            });
        }
        let count = slots.len();
        self.inner.agents.write().await.extend(slots);
        self.inner.tasks.lock().await.extend(tasks);

        self.set_phase(Phase::Running, Some(self.inner.clock.now()));
        self.set_health(Ok(())).await;

        let this = self.clone();
        *self.inner.coordinator.lock().await = Some(tokio::spawn(async move {
            this.coordination_loop().await;
        }));

        info!(agents = count, "Orchestrator started");
        Ok(())
    }

    async fn coordination_loop(self) {
        let token = self.inner.root.clone();
        let mut delay = self.inner.settings.coordination_interval;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            delay = match self.run_coordination_cycle().await {
                Ok(_) => self.inner.settings.coordination_interval,
                Err(_) => self.inner.settings.coordination_backoff,
            };
        }
        debug!("Coordination loop exited");
    }

    /// 执行一次协调周期（循环内部调用，也可直接调用）
    pub async fn run_coordination_cycle(&self) -> CoordResult<CoordinationReport> {
        let now = self.inner.clock.now();
        let result: CoordResult<CoordinationReport> = async {
            let escalated = self.check_escalation(now).await?;
            let resolutions = self.resolve_conflicts(now).await?;
            self.write_system_state(now).await?;
            Ok::<_, CoordError>(CoordinationReport {
                escalated,
                resolutions,
            })
        }
        .await;

        match &result {
            Ok(report) => {
                debug!(
                    escalated = report.escalated,
                    resolutions = report.resolutions.len(),
                    "Coordination cycle completed"
                );
                self.set_health(Ok(())).await;
            }
            Err(e) => {
                error!(
                    error = %e,
                    backoff_secs = self.inner.settings.coordination_backoff.as_secs(),
                    "Coordination cycle failed"
                );
                self.set_health(Err(e)).await;
            }
        }
        result
    }

    async fn check_escalation(&self, now: DateTime<Utc>) -> CoordResult<bool> {
        let entry = match self.inner.store.get(ENVIRONMENTAL_CURRENT).await {
            Ok(entry) => entry,
            Err(CoordError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        let mut last_seen = self.inner.last_env_version.lock().await;
        if (*last_seen).map_or(false, |v| entry.version <= v) {
            return Ok(false);
        }

        let alert = entry
            .value
            .get(POLLUTION_ALERT_FLAG)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if alert {
            let payload = json!({
                "reason": POLLUTION_ALERT_FLAG,
                "version": entry.version,
                "environmental": entry.value,
            });
            self.inner
                .bus
                .publish(Message::broadcast(
                    ORCHESTRATOR_ID,
                    MessageType::CampaignRequest,
                    payload,
                    now,
                ))
                .await?;
            info!(version = entry.version, "Pollution alert escalated to campaign request");
        }
        *last_seen = Some(entry.version);
        Ok(alert)
    }

    async fn resolve_conflicts(&self, now: DateTime<Utc>) -> CoordResult<Vec<Resolution>> {
        let store = &self.inner.store;
        let mut groups: BTreeMap<String, Vec<(ReadEntry, AttentionClaim)>> = BTreeMap::new();
        for entry in store.scan(ATTENTION_PREFIX).await? {
            match serde_json::from_value::<AttentionClaim>(entry.value.clone()) {
                Ok(claim) if !claim.resolved => {
                    groups.entry(claim.resource.clone()).or_default().push((entry, claim));
                }
                Ok(_) => {}
                Err(e) => warn!(key = %entry.key, error = %e, "Malformed attention entry ignored"),
            }
        }

        let mut resolutions = Vec::new();
        for (resource, claims) in groups {
            let winner = match claims
                .iter()
                .max_by_key(|(entry, claim)| precedence(claim.priority, claim.claimed_at, entry.version))
            {
                Some((_, claim)) => claim.clone(),
                None => continue,
            };
            let conflict = claims.iter().any(|(_, c)| c.action != winner.action);

            let value = json!({
                "action": winner.action,
                "agent": winner.agent,
                "combined_score": winner.combined_score,
                "claimed_at": winner.claimed_at,
                "resolved_at": now,
                "conflict": conflict,
            });
            let superseded_by = match self.apply_winner(&resource, &winner, value).await? {
                Applied::Written => None,
                Applied::Superseded(writer) => Some(writer),
                Applied::Retry => continue,
            };
            let settled_winner = superseded_by.clone().unwrap_or_else(|| winner.agent.clone());

            for (entry, claim) in &claims {
                let mut settled = claim.clone();
                settled.resolved = true;
                settled.winner = Some(settled_winner.clone());
                let settled = serde_json::to_value(&settled)
                    .map_err(|e| CoordError::StoreUnavailable(e.to_string()))?;
                match store
                    .compare_and_swap(&entry.key, entry.version, settled, ORCHESTRATOR_ID, claim.priority)
                    .await
                {
                    Ok(_) => {}
                    Err(e) if self.inner.policy.handle(&e) == RecoveryAction::RetryWithFreshRead => {
                        debug!(key = %entry.key, "Claim rewritten by its agent, left for next cycle");
                    }
                    Err(e) => return Err(e),
                }
            }

            let participants: Vec<String> = claims
                .iter()
                .map(|(_, c)| c.agent.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect();
            for agent in &participants {
                let payload = json!({
                    "resource": resource,
                    "action": winner.action,
                    "winner": settled_winner,
                    "accepted": superseded_by.is_none() && *agent == winner.agent,
                    "conflict": conflict,
                    "superseded_by": superseded_by,
                });
                self.inner
                    .bus
                    .publish(Message::direct(
                        ORCHESTRATOR_ID,
                        agent.clone(),
                        MessageType::SystemStatus,
                        payload,
                        now,
                    ))
                    .await?;
            }

            match &superseded_by {
                Some(writer) => info!(
                    resource = %resource,
                    claimant = %winner.agent,
                    holder = %writer,
                    "Claims outranked by current resource value"
                ),
                None if conflict => info!(
                    resource = %resource,
                    winner = %winner.agent,
                    action = %winner.action,
                    "Resolved conflicting actions"
                ),
                None => {}
            }
            resolutions.push(Resolution {
                resource,
                winner: winner.agent,
                action: winner.action,
                conflict,
                participants,
                superseded_by,
            });
        }
        Ok(resolutions)
    }

    /// 资源键当前的可见值；不存在或已删除为 None
    async fn live_head(&self, resource: &str) -> CoordResult<Option<ReadEntry>> {
        match self.inner.store.get(resource).await {
            Ok(entry) => Ok(Some(entry)),
            Err(CoordError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// 以声明时看到的版本 CAS 写入胜者；资源已被更高优先级的写入占据时不覆盖
    async fn apply_winner(
        &self,
        resource: &str,
        winner: &AttentionClaim,
        value: Value,
    ) -> CoordResult<Applied> {
        let store = &self.inner.store;
        let head = self.live_head(resource).await?;
        if let Some(holder) = outranking_holder(head.as_ref(), winner) {
            return Ok(Applied::Superseded(holder));
        }
        let err = match store
            .compare_and_swap(resource, winner.seen_version, value.clone(), &winner.agent, winner.priority)
            .await
        {
            Ok(_) => return Ok(Applied::Written),
            Err(e) if self.inner.policy.handle(&e) == RecoveryAction::RetryWithFreshRead => e,
            Err(e) => return Err(e),
        };

        // 声明之后资源被写过：基于最新读取重新比较一次
        debug!(resource = %resource, error = %err, "Resource advanced since claim, re-reading");
        let head = self.live_head(resource).await?;
        if let Some(holder) = outranking_holder(head.as_ref(), winner) {
            return Ok(Applied::Superseded(holder));
        }
        let fresh = match &head {
            Some(entry) => entry.version,
            None => store.version(resource).await?,
        };
        match store
            .compare_and_swap(resource, fresh, value, &winner.agent, winner.priority)
            .await
        {
            Ok(_) => Ok(Applied::Written),
            Err(e) if self.inner.policy.handle(&e) == RecoveryAction::RetryWithFreshRead => {
                debug!(resource = %resource, error = %e, "Resource changed during resolution, retrying next cycle");
                Ok(Applied::Retry)
            }
            Err(e) => Err(e),
        }
    }

    async fn write_system_state(&self, now: DateTime<Utc>) -> CoordResult<()> {
        let status = self.status().await;
        let state = json!({
            "agents_running": status.agents_running(),
            "total_actions": status.total_actions(),
            "timestamp": now,
            "started_at": status.started_at,
        });
        self.inner
            .store
            .put(SYSTEM_STATE_KEY, state, ORCHESTRATOR_ID, ORCHESTRATOR_PRIORITY)
            .await
            .map(|_| ())
    }

    /// 停止所有 Agent：每个 Agent 先跑完当前周期；超过 shutdown_timeout 的任务被中止
    pub async fn stop(&self) {
        let _guard = self.inner.control.lock().await;
        if self.phase() != Phase::Running {
            self.set_phase(Phase::Stopped, None);
            return;
        }

        info!("Stopping orchestrator");
        self.inner.root.cancel();

        let tasks = std::mem::take(&mut *self.inner.tasks.lock().await);
        let coordinator = self.inner.coordinator.lock().await.take();
        let mut aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        if let Some(handle) = &coordinator {
            aborts.push(handle.abort_handle());
        }

        let wait = async {
            for result in join_all(tasks).await {
                if let Err(e) = result {
                    warn!(error = %e, "Agent task ended abnormally");
                }
            }
            if let Some(handle) = coordinator {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(self.inner.settings.shutdown_timeout, wait)
            .await
            .is_err()
        {
            warn!(
                timeout_secs = self.inner.settings.shutdown_timeout.as_secs(),
                "Shutdown timed out, aborting remaining tasks"
            );
            for abort in aborts {
                abort.abort();
            }
        }

        self.set_phase(Phase::Stopped, None);
        info!("Orchestrator stopped");
    }

    async fn set_paused(&self, name: &str, paused: bool) -> CoordResult<()> {
        let target = if paused {
            AgentState::Suspended
        } else {
            AgentState::Running
        };
        let agents = self.inner.agents.read().await;
        let Some(slot) = agents.iter().find(|s| s.name == name) else {
            let pending = self.inner.pending.lock().await;
            return if pending.iter().any(|p| p.profile.name == name) {
                Err(CoordError::InvalidTransition {
                    from: AgentState::Created.to_string(),
                    to: target.to_string(),
                })
            } else {
                Err(CoordError::AgentNotFound(name.to_string()))
            };
        };
        let state = slot.status_rx.borrow().state;
        if state.is_terminal() {
            return Err(CoordError::InvalidTransition {
                from: state.to_string(),
                to: target.to_string(),
            });
        }
        slot.supervisor.set_paused(paused);
        info!(agent = %name, paused, "Agent pause state requested");
        Ok(())
    }

    /// 暂停 Agent：当前周期跑完后进入 Suspended
    pub async fn pause(&self, name: &str) -> CoordResult<()> {
        self.set_paused(name, true).await
    }

    pub async fn resume(&self, name: &str) -> CoordResult<()> {
        self.set_paused(name, false).await
    }

    pub async fn agent_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .agents
            .read()
            .await
            .iter()
            .map(|s| s.name.clone())
            .collect();
        names.extend(
            self.inner
                .pending
                .lock()
                .await
                .iter()
                .map(|p| p.profile.name.clone()),
        );
        names
    }

    /// 聚合状态快照
    pub async fn status(&self) -> OrchestratorStatus {
        let mut agents: Vec<AgentStatus> = self
            .inner
            .agents
            .read()
            .await
            .iter()
            .map(|s| s.status_rx.borrow().clone())
            .collect();
        // 编排器停止后，从未启动的 Agent 也视为已停止
        let stopped = self.phase() == Phase::Stopped;
        agents.extend(self.inner.pending.lock().await.iter().map(|p| {
            let mut status =
                AgentStatus::new(p.profile.name.clone(), p.profile.kind, p.profile.interval.as_secs());
            if stopped {
                status.state = AgentState::Stopped;
            }
            status
        }));
        OrchestratorStatus {
            running: self.phase() == Phase::Running,
            started_at: self.started_at(),
            health: self.health().await,
            agents,
        }
    }

    pub async fn health(&self) -> Health {
        self.inner.health.read().await.clone()
    }

    /// 以编排器身份向指定 Agent 发送消息
    pub async fn send_to_agent(
        &self,
        name: &str,
        message_type: MessageType,
        payload: Value,
    ) -> CoordResult<MessageId> {
        if !self.agent_names().await.iter().any(|n| n == name) {
            return Err(CoordError::AgentNotFound(name.to_string()));
        }
        let message = Message::direct(
            ORCHESTRATOR_ID,
            name,
            message_type,
            payload,
            self.inner.clock.now(),
        );
        self.inner.bus.publish(message).await
    }

    /// 以编排器身份广播
    pub async fn broadcast(&self, message_type: MessageType, payload: Value) -> CoordResult<MessageId> {
        let message = Message::broadcast(ORCHESTRATOR_ID, message_type, payload, self.inner.clock.now());
        self.inner.bus.publish(message).await
    }
}
