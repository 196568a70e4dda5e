//! 编排器集成测试：冲突裁决、告警升级、健康状况、完整运行与停止

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use common::*;
use ecomind::agent::{attention_key, presets, AgentBindings, AttentionClaim};
use ecomind::bus::{MessageBus, MessageType, TypeFilter};
use ecomind::collab::{LoggingExecutor, StaticScorer};
use ecomind::core::{AgentState, CoordError, ErrorKind, SYSTEM_STATE_KEY};
use ecomind::store::{CoordinationStore, InMemoryStore};
use ecomind::{Orchestrator, OrchestratorBuilder};

fn orchestrator(store: &Arc<InMemoryStore>, bus: &MessageBus) -> Orchestrator {
    OrchestratorBuilder::new()
        .with_store(store.clone())
        .with_bus(bus.clone())
        .build()
        .unwrap()
}

async fn claim(store: &InMemoryStore, agent: &str, action: &str, priority: i64) {
    let seen_version = store.version(presets::CAMPAIGNS_ACTIVE).await.unwrap();
    let claim = AttentionClaim {
        agent: agent.to_string(),
        resource: presets::CAMPAIGNS_ACTIVE.to_string(),
        action: action.to_string(),
        priority,
        combined_score: 0.85,
        claimed_at: Utc::now(),
        seen_version,
        resolved: false,
        winner: None,
    };
    store
        .put(
            &attention_key(presets::CAMPAIGNS_ACTIVE, agent),
            serde_json::to_value(&claim).unwrap(),
            agent,
            priority,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_conflicting_claims_resolved_by_priority() {
    let store = Arc::new(InMemoryStore::new());
    let bus = MessageBus::new();
    let mut predictive_inbox = bus.subscribe("predictive", TypeFilter::All).await.unwrap();
    let mut community_inbox = bus.subscribe("community", TypeFilter::All).await.unwrap();
    let orchestrator = orchestrator(&store, &bus);

    claim(&store, "community", "launch_campaign", 5).await;
    claim(&store, "predictive", "postpone_outdoor_campaigns", 8).await;

    let report = orchestrator.run_coordination_cycle().await.unwrap();
    assert_eq!(report.resolutions.len(), 1);
    let resolution = &report.resolutions[0];
    assert_eq!(resolution.resource, presets::CAMPAIGNS_ACTIVE);
    assert_eq!(resolution.winner, "predictive");
    assert_eq!(resolution.action, "postpone_outdoor_campaigns");
    assert!(resolution.conflict);
    assert!(resolution.superseded_by.is_none());
    assert_eq!(resolution.participants, vec!["community", "predictive"]);

    let active = store.get(presets::CAMPAIGNS_ACTIVE).await.unwrap();
    assert_eq!(active.value["action"], json!("postpone_outdoor_campaigns"));
    assert_eq!(active.writer, "predictive");

    for agent in ["community", "predictive"] {
        let settled = store
            .get(&attention_key(presets::CAMPAIGNS_ACTIVE, agent))
            .await
            .unwrap();
        assert_eq!(settled.value["resolved"], json!(true));
        assert_eq!(settled.value["winner"], json!("predictive"));
    }

    let to_community = community_inbox.drain();
    assert_eq!(to_community.len(), 1);
    assert_eq!(to_community[0].message_type, MessageType::SystemStatus);
    assert_eq!(to_community[0].payload["accepted"], json!(false));
    let to_predictive = predictive_inbox.drain();
    assert_eq!(to_predictive.len(), 1);
    assert_eq!(to_predictive[0].payload["accepted"], json!(true));

    // 已裁决的声明不会再处理
    let again = orchestrator.run_coordination_cycle().await.unwrap();
    assert!(again.resolutions.is_empty());
    assert!(community_inbox.drain().is_empty());
}

#[tokio::test]
async fn test_single_claim_is_applied_without_conflict() {
    let store = Arc::new(InMemoryStore::new());
    let bus = MessageBus::new();
    let orchestrator = orchestrator(&store, &bus);

    claim(&store, "community", "launch_campaign", 5).await;
    let report = orchestrator.run_coordination_cycle().await.unwrap();
    assert_eq!(report.resolutions.len(), 1);
    assert!(!report.resolutions[0].conflict);

    let active = store.get(presets::CAMPAIGNS_ACTIVE).await.unwrap();
    assert_eq!(active.value["action"], json!("launch_campaign"));
    assert_eq!(active.value["conflict"], json!(false));
}

#[tokio::test]
async fn test_later_lower_priority_claim_keeps_earlier_resolution() {
    let store = Arc::new(InMemoryStore::new());
    let bus = MessageBus::new();
    let mut community_inbox = bus.subscribe("community", TypeFilter::All).await.unwrap();
    let orchestrator = orchestrator(&store, &bus);

    claim(&store, "predictive", "postpone_outdoor_campaigns", 8).await;
    orchestrator.run_coordination_cycle().await.unwrap();
    let resolved_version = store.version(presets::CAMPAIGNS_ACTIVE).await.unwrap();

    claim(&store, "community", "launch_campaign", 5).await;
    let report = orchestrator.run_coordination_cycle().await.unwrap();
    assert_eq!(report.resolutions.len(), 1);
    assert_eq!(report.resolutions[0].superseded_by.as_deref(), Some("predictive"));

    let active = store.get(presets::CAMPAIGNS_ACTIVE).await.unwrap();
    assert_eq!(active.value["action"], json!("postpone_outdoor_campaigns"));
    assert_eq!(active.writer, "predictive");
    assert_eq!(active.priority, 8);
    assert_eq!(store.version(presets::CAMPAIGNS_ACTIVE).await.unwrap(), resolved_version);

    let settled = store
        .get(&attention_key(presets::CAMPAIGNS_ACTIVE, "community"))
        .await
        .unwrap();
    assert_eq!(settled.value["resolved"], json!(true));
    assert_eq!(settled.value["winner"], json!("predictive"));

    let notes = community_inbox.drain();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].payload["accepted"], json!(false));
    assert_eq!(notes[0].payload["superseded_by"], json!("predictive"));
}

#[tokio::test]
async fn test_fresher_higher_priority_write_is_not_clobbered() {
    let store = Arc::new(InMemoryStore::new());
    let bus = MessageBus::new();
    let orchestrator = orchestrator(&store, &bus);

    claim(&store, "community", "launch_campaign", 5).await;
    store
        .put(
            presets::CAMPAIGNS_ACTIVE,
            json!({ "action": "manual_hold" }),
            "operator",
            50,
        )
        .await
        .unwrap();

    let report = orchestrator.run_coordination_cycle().await.unwrap();
    assert_eq!(report.resolutions[0].superseded_by.as_deref(), Some("operator"));
    let active = store.get(presets::CAMPAIGNS_ACTIVE).await.unwrap();
    assert_eq!(active.value["action"], json!("manual_hold"));
    assert_eq!(active.writer, "operator");
}

#[tokio::test]
async fn test_claim_outranking_newer_write_is_applied_after_fresh_read() {
    let store = Arc::new(InMemoryStore::new());
    let bus = MessageBus::new();
    let orchestrator = orchestrator(&store, &bus);

    // 声明之后资源被低优先级写入推进了版本，重新读取后胜者仍然写入
    claim(&store, "predictive", "postpone_outdoor_campaigns", 8).await;
    store
        .put(presets::CAMPAIGNS_ACTIVE, json!({ "action": "launch_campaign" }), "coach", 3)
        .await
        .unwrap();

    let report = orchestrator.run_coordination_cycle().await.unwrap();
    assert!(report.resolutions[0].superseded_by.is_none());
    let active = store.get(presets::CAMPAIGNS_ACTIVE).await.unwrap();
    assert_eq!(active.value["action"], json!("postpone_outdoor_campaigns"));
    assert_eq!(active.writer, "predictive");
    assert_eq!(active.version, 2);
}

#[tokio::test]
async fn test_alert_escalated_once_per_version() {
    let store = Arc::new(InMemoryStore::new());
    let bus = MessageBus::new();
    let mut community = bus
        .subscribe("community", TypeFilter::only([MessageType::CampaignRequest]))
        .await
        .unwrap();
    let orchestrator = orchestrator(&store, &bus);

    let alert = json!({ "aqi": 180.0, "pollution_alert": true });
    store
        .put(presets::ENVIRONMENTAL_CURRENT, alert.clone(), "monitoring", 10)
        .await
        .unwrap();

    assert!(orchestrator.run_coordination_cycle().await.unwrap().escalated);
    let requests = community.drain();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].sender, "orchestrator");

    assert!(!orchestrator.run_coordination_cycle().await.unwrap().escalated);
    assert!(community.drain().is_empty());

    // 新版本的告警会再次升级；解除告警则不会
    store
        .put(presets::ENVIRONMENTAL_CURRENT, alert, "monitoring", 10)
        .await
        .unwrap();
    assert!(orchestrator.run_coordination_cycle().await.unwrap().escalated);
    store
        .put(
            presets::ENVIRONMENTAL_CURRENT,
            json!({ "aqi": 40.0, "pollution_alert": false }),
            "monitoring",
            10,
        )
        .await
        .unwrap();
    assert!(!orchestrator.run_coordination_cycle().await.unwrap().escalated);
    assert_eq!(community.drain().len(), 1);
}

#[tokio::test]
async fn test_coordination_cycle_writes_system_state() {
    let store = Arc::new(InMemoryStore::new());
    let bus = MessageBus::new();
    let orchestrator = orchestrator(&store, &bus);

    orchestrator.run_coordination_cycle().await.unwrap();
    let state = store.get(SYSTEM_STATE_KEY).await.unwrap();
    assert_eq!(state.value["agents_running"], json!(0));
    assert_eq!(state.value["total_actions"], json!(0));
    assert!(orchestrator.health().await.healthy);
}

#[tokio::test]
async fn test_store_outage_marks_orchestrator_unhealthy() {
    let store = Arc::new(InMemoryStore::new());
    let bus = MessageBus::new();
    let orchestrator = orchestrator(&store, &bus);

    store.set_online(false);
    let err = orchestrator.run_coordination_cycle().await.unwrap_err();
    assert!(matches!(err, CoordError::StoreUnavailable(_)));
    let health = orchestrator.health().await;
    assert!(!health.healthy);
    assert_eq!(
        health.coordination_error.map(|e| e.kind),
        Some(ErrorKind::StoreUnavailable)
    );

    store.set_online(true);
    orchestrator.run_coordination_cycle().await.unwrap();
    let health = orchestrator.health().await;
    assert!(health.healthy);
    assert!(health.coordination_error.is_none());
}

#[tokio::test]
async fn test_start_fails_when_store_unavailable() {
    let store = Arc::new(InMemoryStore::new());
    let bus = MessageBus::new();
    let orchestrator = OrchestratorBuilder::new()
        .with_store(store.clone())
        .with_bus(bus)
        .with_agent(presets::coach(), AgentBindings::simulated())
        .build()
        .unwrap();

    store.set_online(false);
    let err = orchestrator.start().await.unwrap_err();
    assert!(matches!(err, CoordError::StoreUnavailable(_)));

    let status = orchestrator.status().await;
    assert!(!status.running);
    assert!(!status.health.healthy);
    assert_eq!(status.agent("coach").map(|a| a.state), Some(AgentState::Created));
}

#[tokio::test]
async fn test_stop_before_start_reports_agents_stopped() {
    let orchestrator = OrchestratorBuilder::new()
        .with_agent(presets::coach(), AgentBindings::simulated())
        .with_agent(presets::community(), AgentBindings::simulated())
        .build()
        .unwrap();
    assert_eq!(
        orchestrator.status().await.agent("coach").map(|a| a.state),
        Some(AgentState::Created)
    );

    orchestrator.stop().await;
    let status = orchestrator.status().await;
    assert!(!status.running);
    assert_eq!(status.agents.len(), 2);
    assert!(status.agents.iter().all(|a| a.state == AgentState::Stopped));
}

#[tokio::test]
async fn test_start_fails_when_bus_closed() {
    let bus = MessageBus::new();
    bus.close();
    let orchestrator = OrchestratorBuilder::new().with_bus(bus).build().unwrap();
    let err = orchestrator.start().await.unwrap_err();
    assert!(matches!(err, CoordError::BusUnavailable(_)));
}

#[tokio::test]
async fn test_addressing_unknown_agents() {
    let orchestrator = OrchestratorBuilder::new()
        .with_agent(presets::coach(), AgentBindings::simulated())
        .build()
        .unwrap();

    let err = orchestrator
        .send_to_agent("ghost", MessageType::UserAction, json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, CoordError::AgentNotFound(_)));
    assert!(matches!(
        orchestrator.pause("ghost").await,
        Err(CoordError::AgentNotFound(_))
    ));
    // 尚未启动的 Agent 不能暂停
    assert!(matches!(
        orchestrator.pause("coach").await,
        Err(CoordError::InvalidTransition { .. })
    ));
    assert!(orchestrator
        .send_to_agent("coach", MessageType::UserAction, json!({ "user": "u1" }))
        .await
        .is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_full_run_and_graceful_stop() {
    let store = Arc::new(InMemoryStore::new());
    let bindings = AgentBindings::simulated()
        .with_data_source(polluted_source())
        .with_scorer(Arc::new(StaticScorer::default()))
        .with_executor(Arc::new(LoggingExecutor));
    let mut builder = OrchestratorBuilder::new().with_store(store.clone());
    for profile in [
        presets::monitoring(),
        presets::predictive(),
        presets::community(),
        presets::coach(),
    ] {
        builder = builder.with_agent(profile, bindings.clone());
    }
    let orchestrator = builder.build().unwrap();

    orchestrator.start().await.unwrap();
    // 重复启动无副作用
    orchestrator.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1000)).await;

    let status = orchestrator.status().await;
    assert!(status.running);
    assert!(status.health.healthy);
    assert_eq!(status.agents_running(), 4);
    for name in ["monitoring", "predictive", "community"] {
        let agent = status.agent(name).unwrap();
        assert!(agent.actions >= 1, "{} took no action", name);
    }
    assert_eq!(status.agent("monitoring").unwrap().cycle_interval_secs, 60);

    // 社区的活动声明已被裁决并落到资源键
    let active = store.get(presets::CAMPAIGNS_ACTIVE).await.unwrap();
    assert_eq!(active.value["action"], json!("launch_campaign"));
    assert!(store.get("agents/community/status").await.is_ok());

    orchestrator.pause("coach").await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(
        orchestrator.status().await.agent("coach").unwrap().state,
        AgentState::Suspended
    );

    orchestrator.stop().await;
    let status = orchestrator.status().await;
    assert!(!status.running);
    assert!(status.agents.iter().all(|a| a.state == AgentState::Stopped));

    assert!(matches!(
        orchestrator.start().await,
        Err(CoordError::InvalidTransition { .. })
    ));
}
