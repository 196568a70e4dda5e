//! Agent 监管：生命周期控制、中断管理
//!
//! 持有 CancellationToken（停止）与暂停开关（watch 通道，可唤醒正在睡眠的周期循环）。
//! 取消只在周期边界被观察：正在执行的 perceive→decide→act→communicate 会先跑完。

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// 单个 Agent 的控制面：编排器持有一份，Agent 任务持有一份克隆
#[derive(Debug, Clone)]
pub struct AgentSupervisor {
    cancel_token: CancellationToken,
    paused_tx: Arc<watch::Sender<bool>>,
}

impl AgentSupervisor {
    pub fn new() -> Self {
        let (paused_tx, _) = watch::channel(false);
        Self {
            cancel_token: CancellationToken::new(),
            paused_tx: Arc::new(paused_tx),
        }
    }

    /// 以父 token 创建（编排器整体停止时级联取消）
    pub fn with_parent(parent: &CancellationToken) -> Self {
        let (paused_tx, _) = watch::channel(false);
        Self {
            cancel_token: parent.child_token(),
            paused_tx: Arc::new(paused_tx),
        }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// 请求停止
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn is_paused(&self) -> bool {
        *self.paused_tx.borrow()
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused_tx.send_replace(paused);
    }

    /// 订阅暂停开关的变化
    pub fn pause_watch(&self) -> watch::Receiver<bool> {
        self.paused_tx.subscribe()
    }
}

impl Default for AgentSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
