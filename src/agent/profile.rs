//! Agent 配置描述：一个结构体参数化整个周期，不靠继承区分变体

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::AgentKind;
use crate::bus::MessageType;
use crate::config::AgentOverrides;
use crate::decision::RuleSet;

/// 需要编排器关注的动作声明都写在这个前缀下
pub const ATTENTION_PREFIX: &str = "attention/";

pub fn status_key(agent: &str) -> String {
    format!("agents/{}/status", agent)
}

pub fn attention_key(resource: &str, agent: &str) -> String {
    format!("{}{}/{}", ATTENTION_PREFIX, resource, agent)
}

/// 动作执行成功后的后续效果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionSpec {
    /// 作用的共享资源（如 `campaigns/active`）；设置后会写入 attention 声明交给编排器裁决
    pub target: Option<String>,
    /// 成功后广播的消息类型
    pub emits: Option<MessageType>,
    /// 成功后是否把本轮记录写入 profile 的 publish_key
    pub publishes: bool,
    /// 写入记录中的布尔标记名：选中本动作时为 true，其他动作为 false
    pub flag: Option<String>,
    /// 是否触发周期加速
    pub boosts_interval: bool,
}

impl ActionSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn targets(mut self, resource: impl Into<String>) -> Self {
        self.target = Some(resource.into());
        self
    }

    pub fn emits(mut self, message_type: MessageType) -> Self {
        self.emits = Some(message_type);
        self
    }

    pub fn publishes(mut self) -> Self {
        self.publishes = true;
        self
    }

    pub fn flag(mut self, name: impl Into<String>) -> Self {
        self.flag = Some(name.into());
        self
    }

    pub fn boosts_interval(mut self) -> Self {
        self.boosts_interval = true;
        self
    }
}

/// 临时缩短周期：告警后一段时间内加密采样
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalBoost {
    pub interval: Duration,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct AgentProfile {
    pub name: String,
    pub kind: AgentKind,
    /// 写入共享存储时的优先级（越大越优先）
    pub priority: i64,
    pub interval: Duration,
    /// 组合分数低于此值时本轮不执行动作
    pub action_threshold: f64,
    /// 周期出现致命错误后的等待时间
    pub error_backoff: Duration,
    /// 数据源领域；None 表示只从共享存储感知
    pub data_domain: Option<String>,
    pub read_keys: Vec<String>,
    pub subscriptions: Vec<MessageType>,
    pub rules: RuleSet,
    pub actions: BTreeMap<String, ActionSpec>,
    pub publish_key: Option<String>,
    pub boost: Option<IntervalBoost>,
}

impl AgentProfile {
    pub fn new(name: impl Into<String>, kind: AgentKind) -> Self {
        Self {
            name: name.into(),
            kind,
            priority: 0,
            interval: Duration::from_secs(300),
            action_threshold: 0.7,
            error_backoff: Duration::from_secs(5),
            data_domain: None,
            read_keys: Vec::new(),
            subscriptions: Vec::new(),
            rules: RuleSet::empty(),
            actions: BTreeMap::new(),
            publish_key: None,
            boost: None,
        }
    }

    pub fn status_key(&self) -> String {
        status_key(&self.name)
    }

    /// 动作的后续效果；未声明的动作没有后续效果
    pub fn action_spec(&self, action: &str) -> ActionSpec {
        self.actions.get(action).cloned().unwrap_or_default()
    }

    /// 所有动作声明的布尔标记名
    pub fn flags(&self) -> impl Iterator<Item = &str> {
        self.actions.values().filter_map(|s| s.flag.as_deref())
    }

    /// 用配置文件中的 `[agents.<variant>]` 覆盖默认值
    pub fn apply_overrides(mut self, overrides: &AgentOverrides) -> Self {
        if let Some(name) = &overrides.name {
            self.name = name.clone();
        }
        if let Some(secs) = overrides.interval_secs {
            self.interval = Duration::from_secs(secs.max(1));
        }
        if let Some(priority) = overrides.priority {
            self.priority = priority;
        }
        if let Some(threshold) = overrides.action_threshold {
            self.action_threshold = threshold;
        }
        if let Some(secs) = overrides.error_backoff_secs {
            self.error_backoff = Duration::from_secs(secs);
        }
        if let Some(boost) = self.boost.as_mut() {
            if let Some(secs) = overrides.alert_interval_secs {
                boost.interval = Duration::from_secs(secs.max(1));
            }
            if let Some(secs) = overrides.alert_boost_secs {
                boost.duration = Duration::from_secs(secs);
            }
        }
        self
    }
}

/// 写在 `attention/<resource>/<agent>` 下的动作声明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttentionClaim {
    pub agent: String,
    pub resource: String,
    pub action: String,
    pub priority: i64,
    pub combined_score: f64,
    pub claimed_at: DateTime<Utc>,
    /// 声明时资源键的版本，裁决写入以此做 CAS
    #[serde(default)]
    pub seen_version: u64,
    #[serde(default)]
    pub resolved: bool,
    /// 裁决后填入胜出的 Agent
    #[serde(default)]
    pub winner: Option<String>,
}
