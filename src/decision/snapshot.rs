//! 输入快照：一轮感知得到的全部输入（数据源字段、存储键、收件箱消息）

use serde_json::{Map, Value};

use crate::bus::{Message, MessageType};

/// 规则求值与模型打分的输入
///
/// 字段路径：先按完整字符串匹配顶层键（存储键本身含 `/`），否则取第一个 `.` 之前作为顶层键，
/// 其余部分逐级进入嵌套对象。例如 `environmental/current.pm25`。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    fields: Map<String, Value>,
    messages: Vec<Message>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// 合并数据源返回的对象（顶层展开）；非对象值放到 `data` 下
    pub fn merge(&mut self, value: Value) {
        match value {
            Value::Object(map) => self.fields.extend(map),
            Value::Null => {}
            other => {
                self.fields.insert("data".to_string(), other);
            }
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.insert(key, value);
        self
    }

    pub fn push_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn has_message(&self, message_type: MessageType) -> bool {
        self.messages.iter().any(|m| m.message_type == message_type)
    }

    pub fn lookup(&self, path: &str) -> Option<&Value> {
        if let Some(v) = self.fields.get(path) {
            return Some(v);
        }
        let mut parts = path.split('.');
        let mut current = self.fields.get(parts.next()?)?;
        for part in parts {
            current = match current {
                Value::Object(map) => map.get(part)?,
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn number(&self, path: &str) -> Option<f64> {
        self.lookup(path).and_then(Value::as_f64)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.messages.is_empty()
    }

    /// 序列化视图（给模型打分协作方）：字段 + `messages` 数组
    pub fn to_value(&self) -> Value {
        let mut map = self.fields.clone();
        let messages = self
            .messages
            .iter()
            .filter_map(|m| serde_json::to_value(m).ok())
            .collect();
        map.insert("messages".to_string(), Value::Array(messages));
        Value::Object(map)
    }
}
