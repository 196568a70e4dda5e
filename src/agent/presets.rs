//! 四个标准变体的默认配置
//!
//! | 变体 | 优先级 | 周期 | 读取 | 订阅 | 输出 |
//! |---|---|---|---|---|---|
//! | monitoring | 10 | 300s | 数据源 environmental | - | environmental/current, ENVIRONMENTAL_ALERT |
//! | predictive | 8 | 600s | environmental/current | ENVIRONMENTAL_ALERT | predictions/latest, PREDICTION_UPDATE |
//! | community | 5 | 900s | environmental/current, predictions/latest, campaigns/active | ALERT / PREDICTION / CAMPAIGN_REQUEST / USER_ACTION | campaigns/active 声明 |
//! | coach | 3 | 1800s | 数据源 users, environmental/current, campaigns/active | ALERT / USER_ACTION | USER_ACTION |

use std::collections::BTreeMap;
use std::time::Duration;

use crate::agent::{ActionSpec, AgentKind, AgentProfile, IntervalBoost};
use crate::bus::MessageType;
use crate::config::AgentsSection;
use crate::decision::{Predicate, Rule, RuleSet};

pub const ENVIRONMENTAL_CURRENT: &str = "environmental/current";
pub const PREDICTIONS_LATEST: &str = "predictions/latest";
pub const CAMPAIGNS_ACTIVE: &str = "campaigns/active";

/// 监测变体的告警标记（编排器据此升级为 CAMPAIGN_REQUEST）
pub const POLLUTION_ALERT_FLAG: &str = "pollution_alert";

pub fn monitoring() -> AgentProfile {
    let mut profile = AgentProfile::new("monitoring", AgentKind::Monitoring);
    profile.priority = 10;
    profile.interval = Duration::from_secs(300);
    profile.data_domain = Some("environmental".to_string());
    profile.rules = RuleSet::new(vec![
        Rule::new("aqi_unhealthy", Predicate::above("aqi", 100.0), "raise_alert"),
        Rule::new("pm25_hazardous", Predicate::above("pm25", 150.0), "raise_alert"),
        Rule::new("readings_present", Predicate::exists("aqi"), "record_readings"),
    ]);
    profile.actions = BTreeMap::from([
        (
            "raise_alert".to_string(),
            ActionSpec::new()
                .emits(MessageType::EnvironmentalAlert)
                .publishes()
                .flag(POLLUTION_ALERT_FLAG)
                .boosts_interval(),
        ),
        ("record_readings".to_string(), ActionSpec::new().publishes()),
    ]);
    profile.publish_key = Some(ENVIRONMENTAL_CURRENT.to_string());
    profile.boost = Some(IntervalBoost {
        interval: Duration::from_secs(60),
        duration: Duration::from_secs(1800),
    });
    profile
}

pub fn predictive() -> AgentProfile {
    let mut profile = AgentProfile::new("predictive", AgentKind::Predictive);
    profile.priority = 8;
    profile.interval = Duration::from_secs(600);
    profile.read_keys = vec![ENVIRONMENTAL_CURRENT.to_string()];
    profile.subscriptions = vec![MessageType::EnvironmentalAlert];
    profile.rules = RuleSet::new(vec![
        Rule::new(
            "alert_received",
            Predicate::received(MessageType::EnvironmentalAlert),
            "publish_prediction",
        ),
        Rule::new(
            "aqi_trending_high",
            Predicate::above(format!("{}.aqi", ENVIRONMENTAL_CURRENT), 80.0),
            "publish_prediction",
        ),
        Rule::new(
            "pm25_outdoor_risk",
            Predicate::above(format!("{}.pm25", ENVIRONMENTAL_CURRENT), 150.0),
            "postpone_outdoor_campaigns",
        ),
    ]);
    profile.actions = BTreeMap::from([
        (
            "publish_prediction".to_string(),
            ActionSpec::new()
                .emits(MessageType::PredictionUpdate)
                .publishes(),
        ),
        (
            "postpone_outdoor_campaigns".to_string(),
            ActionSpec::new().targets(CAMPAIGNS_ACTIVE),
        ),
    ]);
    profile.publish_key = Some(PREDICTIONS_LATEST.to_string());
    profile
}

pub fn community() -> AgentProfile {
    let mut profile = AgentProfile::new("community", AgentKind::Community);
    profile.priority = 5;
    profile.interval = Duration::from_secs(900);
    profile.read_keys = vec![
        ENVIRONMENTAL_CURRENT.to_string(),
        PREDICTIONS_LATEST.to_string(),
        CAMPAIGNS_ACTIVE.to_string(),
    ];
    profile.subscriptions = vec![
        MessageType::EnvironmentalAlert,
        MessageType::PredictionUpdate,
        MessageType::CampaignRequest,
        MessageType::UserAction,
    ];
    profile.rules = RuleSet::new(vec![
        Rule::new(
            "campaign_requested",
            Predicate::received(MessageType::CampaignRequest),
            "launch_campaign",
        ),
        Rule::new(
            "prediction_received",
            Predicate::received(MessageType::PredictionUpdate),
            "launch_campaign",
        ),
        Rule::new(
            "user_engaged",
            Predicate::received(MessageType::UserAction),
            "track_progress",
        ),
    ]);
    profile.actions = BTreeMap::from([
        (
            "launch_campaign".to_string(),
            ActionSpec::new().targets(CAMPAIGNS_ACTIVE),
        ),
        ("track_progress".to_string(), ActionSpec::new()),
    ]);
    profile
}

pub fn coach() -> AgentProfile {
    let mut profile = AgentProfile::new("coach", AgentKind::Coach);
    profile.priority = 3;
    profile.interval = Duration::from_secs(1800);
    profile.data_domain = Some("users".to_string());
    profile.read_keys = vec![
        ENVIRONMENTAL_CURRENT.to_string(),
        CAMPAIGNS_ACTIVE.to_string(),
    ];
    profile.subscriptions = vec![MessageType::EnvironmentalAlert, MessageType::UserAction];
    profile.rules = RuleSet::new(vec![
        Rule::new(
            "air_unhealthy",
            Predicate::above(format!("{}.aqi", ENVIRONMENTAL_CURRENT), 100.0),
            "recommend_indoor_activity",
        ),
        Rule::new(
            "campaign_running",
            Predicate::exists(CAMPAIGNS_ACTIVE),
            "recommend_campaign_participation",
        ),
        Rule::new(
            "user_engaged",
            Predicate::received(MessageType::UserAction),
            "award_points",
        ),
    ]);
    profile.actions = BTreeMap::from([
        ("recommend_indoor_activity".to_string(), ActionSpec::new()),
        ("recommend_campaign_participation".to_string(), ActionSpec::new()),
        (
            "award_points".to_string(),
            ActionSpec::new().emits(MessageType::UserAction),
        ),
    ]);
    profile
}

pub fn preset(kind: AgentKind) -> AgentProfile {
    match kind {
        AgentKind::Monitoring => monitoring(),
        AgentKind::Predictive => predictive(),
        AgentKind::Community => community(),
        AgentKind::Coach => coach(),
    }
}

/// 按配置启用并覆盖后的标准变体
pub fn standard_profiles(agents: &AgentsSection) -> Vec<AgentProfile> {
    AgentKind::ALL
        .into_iter()
        .filter_map(|kind| {
            let overrides = agents.overrides(kind);
            overrides
                .enabled
                .unwrap_or(true)
                .then(|| preset(kind).apply_overrides(overrides))
        })
        .collect()
}
