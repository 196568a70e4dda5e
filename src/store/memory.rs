//! 内存版共享协调存储
//!
//! 每个键保存当前可见写入（head）、单调版本号与有界历史。所有操作在一把 RwLock 下完成，
//! 因此对单个键是原子的。`set_online(false)` 模拟后端不可用（所有调用返回 StoreUnavailable）。

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::{Clock, CoordError, CoordResult, SystemClock};
use crate::store::{CoordinationStore, ReadEntry, SharedEntry};

struct KeySlot {
    head: SharedEntry,
    /// 该键最新分配的版本号（落败写入也会推进）
    version: u64,
    history: VecDeque<SharedEntry>,
}

impl KeySlot {
    fn read(&self) -> Option<ReadEntry> {
        let value = self.head.value.clone()?;
        Some(ReadEntry {
            key: self.head.key.clone(),
            value,
            version: self.version,
            writer: self.head.writer.clone(),
            priority: self.head.priority,
            written_at: self.head.written_at,
        })
    }

    fn archive(&mut self, entry: SharedEntry, limit: usize) {
        self.history.push_back(entry);
        while self.history.len() > limit {
            self.history.pop_front();
        }
    }
}

/// 内存存储
pub struct InMemoryStore {
    slots: RwLock<BTreeMap<String, KeySlot>>,
    clock: Arc<dyn Clock>,
    history_limit: usize,
    online: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            slots: RwLock::new(BTreeMap::new()),
            clock,
            history_limit: 64,
            online: AtomicBool::new(true),
        }
    }

    /// 每个键保留的历史条数上限
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    fn ensure_online(&self) -> CoordResult<()> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(CoordError::StoreUnavailable(
                "in-memory store is offline".to_string(),
            ))
        }
    }

    fn make_entry(
        &self,
        key: &str,
        value: Option<serde_json::Value>,
        version: u64,
        writer: &str,
        priority: i64,
    ) -> SharedEntry {
        SharedEntry {
            key: key.to_string(),
            value,
            version,
            writer: writer.to_string(),
            written_at: self.clock.now(),
            priority,
        }
    }

    /// 开启新版本代：无条件替换 head（CAS 成功与墓碑删除共用）
    async fn replace_head(
        &self,
        key: &str,
        value: Option<serde_json::Value>,
        writer: &str,
        priority: i64,
    ) -> u64 {
        let mut slots = self.slots.write().await;
        match slots.get_mut(key) {
            Some(slot) => {
                slot.version += 1;
                let entry = self.make_entry(key, value, slot.version, writer, priority);
                let previous = std::mem::replace(&mut slot.head, entry);
                slot.archive(previous, self.history_limit);
                slot.version
            }
            None => {
                let entry = self.make_entry(key, value, 1, writer, priority);
                slots.insert(
                    key.to_string(),
                    KeySlot {
                        head: entry,
                        version: 1,
                        history: VecDeque::new(),
                    },
                );
                1
            }
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationStore for InMemoryStore {
    async fn put(
        &self,
        key: &str,
        value: serde_json::Value,
        writer: &str,
        priority: i64,
    ) -> CoordResult<u64> {
        self.ensure_online()?;
        let mut slots = self.slots.write().await;
        let version = match slots.get_mut(key) {
            Some(slot) => {
                slot.version += 1;
                let entry = self.make_entry(key, Some(value), slot.version, writer, priority);
                // 墓碑之后的写入开启新版本代，不与墓碑比较优先级
                if slot.head.is_tombstone() || entry.supersedes(&slot.head) {
                    let previous = std::mem::replace(&mut slot.head, entry);
                    slot.archive(previous, self.history_limit);
                } else {
                    tracing::debug!(
                        key,
                        writer,
                        priority,
                        winner = %slot.head.writer,
                        "Write lost priority resolution, kept as history"
                    );
                    slot.archive(entry, self.history_limit);
                }
                slot.version
            }
            None => {
                let entry = self.make_entry(key, Some(value), 1, writer, priority);
                slots.insert(
                    key.to_string(),
                    KeySlot {
                        head: entry,
                        version: 1,
                        history: VecDeque::new(),
                    },
                );
                1
            }
        };
        Ok(version)
    }

    async fn get(&self, key: &str) -> CoordResult<ReadEntry> {
        self.ensure_online()?;
        let slots = self.slots.read().await;
        slots
            .get(key)
            .and_then(KeySlot::read)
            .ok_or_else(|| CoordError::NotFound(key.to_string()))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: u64,
        value: serde_json::Value,
        writer: &str,
        priority: i64,
    ) -> CoordResult<u64> {
        self.ensure_online()?;
        let mut slots = self.slots.write().await;
        let actual = slots.get(key).map(|s| s.version).unwrap_or(0);
        if actual != expected_version {
            return Err(CoordError::VersionConflict {
                key: key.to_string(),
                expected: expected_version,
                actual,
            });
        }
        let version = actual + 1;
        let entry = self.make_entry(key, Some(value), version, writer, priority);
        match slots.get_mut(key) {
            Some(slot) => {
                slot.version = version;
                let previous = std::mem::replace(&mut slot.head, entry);
                slot.archive(previous, self.history_limit);
            }
            None => {
                slots.insert(
                    key.to_string(),
                    KeySlot {
                        head: entry,
                        version,
                        history: VecDeque::new(),
                    },
                );
            }
        }
        Ok(version)
    }

    async fn version(&self, key: &str) -> CoordResult<u64> {
        self.ensure_online()?;
        Ok(self.slots.read().await.get(key).map(|s| s.version).unwrap_or(0))
    }

    async fn delete(&self, key: &str, writer: &str, priority: i64) -> CoordResult<u64> {
        self.ensure_online()?;
        Ok(self.replace_head(key, None, writer, priority).await)
    }

    async fn scan(&self, prefix: &str) -> CoordResult<Vec<ReadEntry>> {
        self.ensure_online()?;
        let slots = self.slots.read().await;
        Ok(slots
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .filter_map(|(_, slot)| slot.read())
            .collect())
    }

    async fn history(&self, key: &str) -> CoordResult<Vec<SharedEntry>> {
        self.ensure_online()?;
        let slots = self.slots.read().await;
        Ok(slots
            .get(key)
            .map(|s| s.history.iter().cloned().collect())
            .unwrap_or_default())
    }
}
