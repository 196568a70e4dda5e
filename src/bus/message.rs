//! 消息定义：类型、收件人、不可变消息体

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::CoordError;

/// 消息类型（线上名称为 SCREAMING_SNAKE_CASE）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    EnvironmentalAlert,
    PredictionUpdate,
    CampaignRequest,
    UserAction,
    SystemStatus,
}

impl MessageType {
    pub const ALL: [MessageType; 5] = [
        MessageType::EnvironmentalAlert,
        MessageType::PredictionUpdate,
        MessageType::CampaignRequest,
        MessageType::UserAction,
        MessageType::SystemStatus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::EnvironmentalAlert => "ENVIRONMENTAL_ALERT",
            MessageType::PredictionUpdate => "PREDICTION_UPDATE",
            MessageType::CampaignRequest => "CAMPAIGN_REQUEST",
            MessageType::UserAction => "USER_ACTION",
            MessageType::SystemStatus => "SYSTEM_STATUS",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = CoordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MessageType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoordError::Config(format!("unknown message type: {}", s)))
    }
}

/// 消息唯一 ID（接收方按它去重）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 收件人：指定 Agent 或广播
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recipient {
    Agent(String),
    Broadcast,
}

/// 总线上的消息，创建后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender: String,
    pub recipient: Recipient,
    pub message_type: MessageType,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn broadcast(
        sender: impl Into<String>,
        message_type: MessageType,
        payload: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            sender: sender.into(),
            recipient: Recipient::Broadcast,
            message_type,
            payload,
            created_at,
        }
    }

    pub fn direct(
        sender: impl Into<String>,
        to: impl Into<String>,
        message_type: MessageType,
        payload: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            sender: sender.into(),
            recipient: Recipient::Agent(to.into()),
            message_type,
            payload,
            created_at,
        }
    }

    pub fn is_broadcast(&self) -> bool {
        self.recipient == Recipient::Broadcast
    }
}
