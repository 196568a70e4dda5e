//! Agent 私有记忆：只属于所属 Agent 的键值对，其他 Agent 看不到
//!
//! 跨 Agent 的可见性只能通过共享存储或消息。状态视图只暴露键名。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub value: serde_json::Value,
    pub stored_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct AgentMemory {
    entries: BTreeMap<String, MemoryEntry>,
}

impl AgentMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入（覆盖同名键）
    pub fn store(&mut self, key: impl Into<String>, value: serde_json::Value, at: DateTime<Utc>) {
        self.entries.insert(
            key.into(),
            MemoryEntry {
                value,
                stored_at: at,
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<&MemoryEntry> {
        self.entries.get(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<MemoryEntry> {
        self.entries.remove(key)
    }

    /// 键名（有序）
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
