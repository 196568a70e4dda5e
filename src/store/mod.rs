//! 共享协调存储：带版本的键值空间
//!
//! 所有 Agent 与编排器通过这里共享状态（不再有全局可变字典）。写入冲突按「优先级 → 时间戳」裁决：
//! - 同一版本代（generation）内，可见值是优先级最高的写入；优先级相同则最近一次写入胜出
//! - 落败的写入保留为历史，`get` 不返回
//! - `compare_and_swap` 与墓碑删除会开启新的版本代
//!
//! 键是层级路径（如 `agents/<name>/status`、`campaigns/active`），核心不解释其内容。

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::CoordResult;

pub use memory::InMemoryStore;

/// 一次写入记录；value 为 None 表示墓碑
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedEntry {
    pub key: String,
    pub value: Option<serde_json::Value>,
    /// 该键上的单调递增版本号
    pub version: u64,
    pub writer: String,
    pub written_at: DateTime<Utc>,
    pub priority: i64,
}

impl SharedEntry {
    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }

    /// 与 `other` 比较：优先级高者胜；同优先级时间戳晚者胜；再相同则版本号大者（更近的写入）胜
    pub fn supersedes(&self, other: &SharedEntry) -> bool {
        precedence(self.priority, self.written_at, self.version)
            >= precedence(other.priority, other.written_at, other.version)
    }
}

/// 优先级 + 时间戳裁决的排序键（编排器的冲突裁决复用同一规则）
pub fn precedence(priority: i64, at: DateTime<Utc>, seq: u64) -> (i64, DateTime<Utc>, u64) {
    (priority, at, seq)
}

/// `get` 的结果：可见值 + 该键当前版本（CAS 需要的 expected_version）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadEntry {
    pub key: String,
    pub value: serde_json::Value,
    /// 键的当前版本（包括落败写入在内的最新版本号）
    pub version: u64,
    pub writer: String,
    pub priority: i64,
    pub written_at: DateTime<Utc>,
}

/// 共享协调存储接口：单键原子，无跨键事务
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// 写入并返回本次写入分配的版本号
    async fn put(
        &self,
        key: &str,
        value: serde_json::Value,
        writer: &str,
        priority: i64,
    ) -> CoordResult<u64>;

    /// 读取可见值；不存在或已删除返回 NotFound
    async fn get(&self, key: &str) -> CoordResult<ReadEntry>;

    /// 键的版本自 `expected_version` 之后推进过则返回 VersionConflict，且不修改存储
    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: u64,
        value: serde_json::Value,
        writer: &str,
        priority: i64,
    ) -> CoordResult<u64>;

    /// 键的当前版本（墓碑也有版本）；从未写过返回 0
    async fn version(&self, key: &str) -> CoordResult<u64>;

    /// 显式墓碑写入
    async fn delete(&self, key: &str, writer: &str, priority: i64) -> CoordResult<u64>;

    /// 前缀扫描（跳过墓碑），按键名排序
    async fn scan(&self, prefix: &str) -> CoordResult<Vec<ReadEntry>>;

    /// 该键被取代或落败的历史写入（旧 → 新）
    async fn history(&self, key: &str) -> CoordResult<Vec<SharedEntry>>;
}
