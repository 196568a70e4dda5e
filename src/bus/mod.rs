//! 消息总线：Agent 之间、Agent 与编排器之间的有类型点对点 / 广播通信
//!
//! - 每个订阅者拥有一个无界 mpsc 收件箱；同一发送者的消息按发布顺序到达每个收件人
//! - 广播投递给所有类型过滤匹配的订阅者（包括发送者自己，由接收方自行忽略）
//! - 定向消息只投递给指定收件人，不经过类型过滤；收件人未订阅时仅记录日志
//! - 至少一次投递：收件箱按消息 ID 去重

pub mod message;

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::core::{CoordError, CoordResult};

pub use message::{Message, MessageId, MessageType, Recipient};

/// 订阅时的类型过滤
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeFilter {
    All,
    Only(HashSet<MessageType>),
}

impl TypeFilter {
    pub fn only(types: impl IntoIterator<Item = MessageType>) -> Self {
        TypeFilter::Only(types.into_iter().collect())
    }

    pub fn matches(&self, message_type: MessageType) -> bool {
        match self {
            TypeFilter::All => true,
            TypeFilter::Only(types) => types.contains(&message_type),
        }
    }
}

struct Subscriber {
    filter: TypeFilter,
    tx: mpsc::UnboundedSender<Message>,
}

struct BusInner {
    subscribers: RwLock<HashMap<String, Subscriber>>,
    open: AtomicBool,
    dedup_window: usize,
}

/// 消息总线句柄（可克隆，内部共享）
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::with_dedup_window(1024)
    }

    /// 收件箱记住的最近消息 ID 数量
    pub fn with_dedup_window(dedup_window: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(HashMap::new()),
                open: AtomicBool::new(true),
                dedup_window: dedup_window.max(1),
            }),
        }
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// 关闭总线：之后的 publish / subscribe 返回 BusUnavailable
    pub fn close(&self) {
        self.inner.open.store(false, Ordering::SeqCst);
    }

    /// 重新打开（故障演练用）
    pub fn reopen(&self) {
        self.inner.open.store(true, Ordering::SeqCst);
    }

    fn ensure_open(&self) -> CoordResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(CoordError::BusUnavailable("message bus is closed".to_string()))
        }
    }

    /// 订阅；同名订阅者再次订阅会替换旧收件箱
    pub async fn subscribe(
        &self,
        agent_id: impl Into<String>,
        filter: TypeFilter,
    ) -> CoordResult<Inbox> {
        self.ensure_open()?;
        let agent_id = agent_id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.inner.subscribers.write().await;
        if subscribers
            .insert(agent_id.clone(), Subscriber { filter, tx })
            .is_some()
        {
            debug!(agent = %agent_id, "Replaced existing subscription");
        }
        Ok(Inbox::new(agent_id, rx, self.inner.dedup_window))
    }

    pub async fn unsubscribe(&self, agent_id: &str) {
        self.inner.subscribers.write().await.remove(agent_id);
    }

    pub async fn subscribers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.subscribers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// 发布消息，返回消息 ID
    pub async fn publish(&self, message: Message) -> CoordResult<MessageId> {
        self.ensure_open()?;
        let id = message.id;
        let subscribers = self.inner.subscribers.read().await;
        match &message.recipient {
            Recipient::Broadcast => {
                let mut delivered = 0usize;
                for (name, sub) in subscribers.iter() {
                    if !sub.filter.matches(message.message_type) {
                        continue;
                    }
                    if sub.tx.send(message.clone()).is_ok() {
                        delivered += 1;
                    } else {
                        debug!(agent = %name, "Inbox dropped, skipping delivery");
                    }
                }
                debug!(
                    id = %id,
                    sender = %message.sender,
                    message_type = %message.message_type,
                    delivered,
                    "Broadcast published"
                );
            }
            Recipient::Agent(to) => match subscribers.get(to) {
                Some(sub) => {
                    if sub.tx.send(message.clone()).is_err() {
                        warn!(recipient = %to, id = %id, "Recipient inbox dropped, message discarded");
                    } else {
                        debug!(
                            id = %id,
                            sender = %message.sender,
                            recipient = %to,
                            message_type = %message.message_type,
                            "Direct message published"
                        );
                    }
                }
                None => {
                    warn!(recipient = %to, id = %id, "Recipient not subscribed, message discarded");
                }
            },
        }
        Ok(id)
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

/// 订阅者的收件箱，归所属 Agent 独占
pub struct Inbox {
    owner: String,
    rx: mpsc::UnboundedReceiver<Message>,
    seen: HashSet<MessageId>,
    seen_order: VecDeque<MessageId>,
    window: usize,
}

impl Inbox {
    fn new(owner: String, rx: mpsc::UnboundedReceiver<Message>, window: usize) -> Self {
        Self {
            owner,
            rx,
            seen: HashSet::new(),
            seen_order: VecDeque::new(),
            window,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// 记录 ID；已见过返回 false
    fn first_sighting(&mut self, id: MessageId) -> bool {
        if !self.seen.insert(id) {
            return false;
        }
        self.seen_order.push_back(id);
        while self.seen_order.len() > self.window {
            if let Some(old) = self.seen_order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }

    /// 取出当前所有待处理消息（不等待），已去重
    pub fn drain(&mut self) -> Vec<Message> {
        let mut out = Vec::new();
        while let Ok(message) = self.rx.try_recv() {
            if self.first_sighting(message.id) {
                out.push(message);
            } else {
                debug!(agent = %self.owner, id = %message.id, "Duplicate message dropped");
            }
        }
        out
    }

    /// 等待下一条未见过的消息；总线释放了发送端时返回 None
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            let message = self.rx.recv().await?;
            if self.first_sighting(message.id) {
                return Some(message);
            }
        }
    }
}
