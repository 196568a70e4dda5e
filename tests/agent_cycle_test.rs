//! Agent 周期集成测试：失败隔离、停止时周期完整、回落打分、暂停 / 恢复、告警加速

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use common::*;
use ecomind::agent::presets;
use ecomind::bus::{MessageType, TypeFilter};
use ecomind::core::{AgentState, AgentSupervisor, CoordError, ErrorKind};
use ecomind::store::CoordinationStore;

#[tokio::test(start_paused = true)]
async fn test_failed_action_is_recorded_and_loop_continues() {
    let harness = Harness::new();
    let executor = Arc::new(FailingExecutor::default());
    let mut profile = presets::monitoring();
    profile.interval = Duration::from_secs(10);
    let (agent, status_rx) = harness
        .agent(
            profile,
            // 历史成功率会把失败动作压到阈值以下，这里固定上下文权重
            bindings(polluted_source(), Arc::new(UnavailableScorer), executor.clone())
                .with_context(Arc::new(NeutralContext)),
        )
        .await;

    let supervisor = AgentSupervisor::new();
    let handle = tokio::spawn(agent.run(supervisor.clone()));
    tokio::time::sleep(Duration::from_secs(35)).await;

    let status = status_rx.borrow().clone();
    assert_eq!(status.state, AgentState::Running);
    assert_eq!(
        status.last_error.as_ref().map(|e| e.kind),
        Some(ErrorKind::ActionFailed)
    );
    assert!(status.cycles >= 3, "cycles = {}", status.cycles);
    assert_eq!(status.actions, 0);
    assert!(executor.calls() >= 3);

    // 失败的动作不产生通信
    assert!(harness.store.get("environmental/current").await.is_err());

    supervisor.cancel();
    let final_status = handle.await.unwrap();
    assert_eq!(final_status.state, AgentState::Stopped);
}

#[tokio::test]
async fn test_stop_mid_cycle_completes_the_cycle() {
    let harness = Harness::new();
    let mut observer = harness.bus.subscribe("observer", TypeFilter::All).await.unwrap();
    let executor = Arc::new(GatedExecutor::default());
    let (agent, _status_rx) = harness
        .agent(
            presets::monitoring(),
            bindings(polluted_source(), Arc::new(UnavailableScorer), executor.clone()),
        )
        .await;

    let supervisor = AgentSupervisor::new();
    let handle = tokio::spawn(agent.run(supervisor.clone()));

    executor.entered.notified().await;
    supervisor.cancel();
    executor.release.notify_one();

    let final_status = handle.await.unwrap();
    assert_eq!(final_status.state, AgentState::Stopped);
    assert_eq!(final_status.cycles, 1);
    assert_eq!(final_status.actions, 1);
    assert_eq!(final_status.last_action.as_deref(), Some("raise_alert"));

    let alerts = observer.drain();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].message_type, MessageType::EnvironmentalAlert);

    let current = harness.store.get("environmental/current").await.unwrap();
    assert_eq!(current.value["pollution_alert"], json!(true));
    let status = harness.store.get("agents/monitoring/status").await.unwrap();
    assert_eq!(status.value["name"], json!("monitoring"));
    assert_eq!(status.value["actions"], json!(1));
}

#[tokio::test]
async fn test_model_unavailable_falls_back_and_is_recorded() {
    let harness = Harness::new();
    let executor = Arc::new(RecordingExecutor::default());
    let source = Arc::new(FixedSource(json!({ "aqi": 60.0, "pm25": 200.0 })));
    let (mut agent, status_rx) = harness
        .agent(
            presets::monitoring(),
            bindings(source, Arc::new(UnavailableScorer), executor.clone()),
        )
        .await;

    let report = agent.tick().await.unwrap();
    let decision = report.decision.unwrap();
    assert_eq!(decision.action, "raise_alert");
    assert!((decision.combined_score - 0.8).abs() < 1e-9);
    assert!(report.acted);
    assert_eq!(report.messages_published, 1);
    assert_eq!(executor.actions(), vec!["raise_alert".to_string()]);

    let status = status_rx.borrow().clone();
    assert_eq!(
        status.last_error.map(|e| e.kind),
        Some(ErrorKind::ModelUnavailable)
    );
    assert!(status.memory_keys.contains(&"last_decision".to_string()));
}

#[tokio::test]
async fn test_low_score_decision_is_not_executed() {
    let harness = Harness::new();
    let executor = Arc::new(RecordingExecutor::default());
    let (mut agent, status_rx) = harness
        .agent(
            presets::monitoring(),
            bindings(polluted_source(), Arc::new(FlatScorer(0.0)), executor.clone()),
        )
        .await;

    let report = agent.tick().await.unwrap();
    assert!((report.decision.unwrap().combined_score - 0.6).abs() < 1e-9);
    assert!(!report.acted);
    assert!(executor.actions().is_empty());
    assert_eq!(status_rx.borrow().cycles, 1);
}

#[tokio::test]
async fn test_store_outage_is_fatal_to_the_cycle() {
    let harness = Harness::new();
    let (mut agent, status_rx) = harness
        .agent(
            presets::predictive(),
            bindings(
                polluted_source(),
                Arc::new(FlatScorer(0.9)),
                Arc::new(RecordingExecutor::default()),
            ),
        )
        .await;

    harness.store.set_online(false);
    let err = agent.tick().await.unwrap_err();
    assert!(matches!(err, CoordError::StoreUnavailable(_)));
    assert_eq!(
        status_rx.borrow().last_error.as_ref().map(|e| e.kind),
        Some(ErrorKind::StoreUnavailable)
    );
}

#[tokio::test]
async fn test_predictive_claims_campaigns_on_pm25_risk() {
    let harness = Harness::new();
    let executor = Arc::new(RecordingExecutor::default());
    let (mut monitor, _) = harness
        .agent(
            presets::monitoring(),
            bindings(polluted_source(), Arc::new(UnavailableScorer), Arc::new(RecordingExecutor::default())),
        )
        .await;
    let (mut predictive, _) = harness
        .agent(
            presets::predictive(),
            bindings(polluted_source(), Arc::new(FlatScorer(0.5)), executor.clone()),
        )
        .await;

    monitor.tick().await.unwrap();
    harness
        .store
        .put("campaigns/active", json!({ "action": "launch_campaign" }), "community", 5)
        .await
        .unwrap();
    let report = predictive.tick().await.unwrap();
    let decision = report.decision.unwrap();
    assert_eq!(decision.action, "postpone_outdoor_campaigns");
    assert!(decision.rule_ids.contains(&"pm25_outdoor_risk".to_string()));

    // 两个动作同分，字典序较小者胜出；postpone 会写入 campaigns/active 的声明
    let claim = harness
        .store
        .get("attention/campaigns/active/predictive")
        .await
        .unwrap();
    assert_eq!(claim.value["action"], json!("postpone_outdoor_campaigns"));
    assert_eq!(claim.value["resolved"], json!(false));
    // 声明记录下当时看到的资源版本
    assert_eq!(claim.value["seen_version"], json!(1));
}

#[tokio::test(start_paused = true)]
async fn test_pause_and_resume() {
    let harness = Harness::new();
    let mut profile = presets::coach();
    profile.interval = Duration::from_secs(10);
    let (agent, status_rx) = harness
        .agent(
            profile,
            bindings(
                polluted_source(),
                Arc::new(FlatScorer(0.9)),
                Arc::new(RecordingExecutor::default()),
            ),
        )
        .await;

    let supervisor = AgentSupervisor::new();
    let handle = tokio::spawn(agent.run(supervisor.clone()));
    tokio::time::sleep(Duration::from_secs(5)).await;

    supervisor.set_paused(true);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(status_rx.borrow().state, AgentState::Suspended);
    let cycles_when_paused = status_rx.borrow().cycles;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(status_rx.borrow().cycles, cycles_when_paused);

    supervisor.set_paused(false);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(status_rx.borrow().state, AgentState::Running);
    assert!(status_rx.borrow().cycles > cycles_when_paused);

    supervisor.cancel();
    assert_eq!(handle.await.unwrap().state, AgentState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_alert_boosts_monitoring_interval() {
    let harness = Harness::new();
    let (agent, status_rx) = harness
        .agent(
            presets::monitoring(),
            bindings(
                polluted_source(),
                Arc::new(UnavailableScorer),
                Arc::new(RecordingExecutor::default()),
            ),
        )
        .await;

    let supervisor = AgentSupervisor::new();
    let handle = tokio::spawn(agent.run(supervisor.clone()));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(status_rx.borrow().cycle_interval_secs, 60);

    // 加速期内按 60s 采样
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert!(status_rx.borrow().cycles >= 5);

    supervisor.cancel();
    handle.await.unwrap();
}
