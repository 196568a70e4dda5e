//! 规则：快照上的谓词 + 推荐动作。进程生命周期内只加载一次，不可变

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bus::MessageType;
use crate::decision::Snapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl Comparison {
    pub fn apply(self, left: f64, right: f64) -> bool {
        match self {
            Comparison::Gt => left > right,
            Comparison::Ge => left >= right,
            Comparison::Lt => left < right,
            Comparison::Le => left <= right,
            Comparison::Eq => (left - right).abs() < f64::EPSILON,
            Comparison::Ne => (left - right).abs() >= f64::EPSILON,
        }
    }
}

/// 规则谓词；字段缺失或类型不符时为 false
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    Threshold {
        path: String,
        cmp: Comparison,
        value: f64,
    },
    Exists {
        path: String,
    },
    Equals {
        path: String,
        value: Value,
    },
    MessageReceived {
        message_type: MessageType,
    },
    All {
        predicates: Vec<Predicate>,
    },
    Any {
        predicates: Vec<Predicate>,
    },
    Always,
}

impl Predicate {
    pub fn above(path: impl Into<String>, value: f64) -> Self {
        Predicate::Threshold {
            path: path.into(),
            cmp: Comparison::Gt,
            value,
        }
    }

    pub fn exists(path: impl Into<String>) -> Self {
        Predicate::Exists { path: path.into() }
    }

    pub fn received(message_type: MessageType) -> Self {
        Predicate::MessageReceived { message_type }
    }

    pub fn evaluate(&self, snapshot: &Snapshot) -> bool {
        match self {
            Predicate::Threshold { path, cmp, value } => snapshot
                .number(path)
                .map(|n| cmp.apply(n, *value))
                .unwrap_or(false),
            Predicate::Exists { path } => snapshot
                .lookup(path)
                .map(|v| !v.is_null())
                .unwrap_or(false),
            Predicate::Equals { path, value } => snapshot.lookup(path) == Some(value),
            Predicate::MessageReceived { message_type } => snapshot.has_message(*message_type),
            Predicate::All { predicates } => predicates.iter().all(|p| p.evaluate(snapshot)),
            Predicate::Any { predicates } => predicates.iter().any(|p| p.evaluate(snapshot)),
            Predicate::Always => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub predicate: Predicate,
    pub action: String,
}

impl Rule {
    pub fn new(id: impl Into<String>, predicate: Predicate, action: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            predicate,
            action: action.into(),
        }
    }

    pub fn applies(&self, snapshot: &Snapshot) -> bool {
        self.predicate.evaluate(snapshot)
    }
}

/// 不可变规则集，克隆只增加引用计数
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSet(Arc<[Rule]>);

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self(rules.into())
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 所有规则会推荐的动作（去重、排序）
    pub fn actions(&self) -> Vec<String> {
        let mut actions: Vec<String> = self.0.iter().map(|r| r.action.clone()).collect();
        actions.sort();
        actions.dedup();
        actions
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::empty()
    }
}

impl From<Vec<Rule>> for RuleSet {
    fn from(rules: Vec<Rule>) -> Self {
        Self::new(rules)
    }
}
