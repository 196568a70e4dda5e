//! 优雅关闭
//!
//! Ctrl+C / SIGTERM 触发关闭令牌；`serve_until_shutdown` 收到后停止编排器
//! （每个 Agent 跑完当前周期），返回最终的聚合状态。

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::core::{Orchestrator, OrchestratorStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C
    UserInitiated,
    /// SIGTERM
    Signal,
}

/// 进程级关闭信号：一个取消令牌 + 第一次触发的原因
pub struct ShutdownManager {
    token: CancellationToken,
    reason: watch::Sender<Option<ShutdownReason>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            reason: watch::Sender::new(None),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 触发关闭；只有第一次调用生效，返回是否由本次触发
    pub fn trigger(&self, reason: ShutdownReason) -> bool {
        let first = self.reason.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        });
        if first {
            info!(reason = ?reason, "Shutdown requested");
            self.token.cancel();
        }
        first
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        *self.reason.borrow()
    }

    /// 监听 Ctrl+C 与 SIGTERM
    pub fn listen_for_signals(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                manager.trigger(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    manager.trigger(ShutdownReason::Signal);
                }
            });
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

/// 等待关闭信号，停止编排器并返回停止后的状态
pub async fn serve_until_shutdown(
    orchestrator: &Orchestrator,
    manager: Arc<ShutdownManager>,
) -> OrchestratorStatus {
    manager.token().cancelled().await;
    info!(reason = ?manager.reason(), "Stopping coordination core");
    orchestrator.stop().await;
    orchestrator.status().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{presets, AgentBindings};
    use crate::core::{AgentState, OrchestratorBuilder};

    #[test]
    fn test_first_reason_wins() {
        let manager = ShutdownManager::new();
        let token = manager.token();
        assert!(!manager.is_triggered());

        assert!(manager.trigger(ShutdownReason::Signal));
        assert!(!manager.trigger(ShutdownReason::UserInitiated));
        assert!(token.is_cancelled());
        assert_eq!(manager.reason(), Some(ShutdownReason::Signal));
    }

    #[tokio::test(start_paused = true)]
    async fn test_serve_stops_orchestrator_on_trigger() {
        let orchestrator = OrchestratorBuilder::new()
            .with_agent(presets::coach(), AgentBindings::simulated())
            .build()
            .unwrap();
        orchestrator.start().await.unwrap();

        let manager = Arc::new(ShutdownManager::new());
        let trigger = manager.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            trigger.trigger(ShutdownReason::UserInitiated);
        });

        let status = serve_until_shutdown(&orchestrator, manager).await;
        assert!(!status.running);
        assert_eq!(status.agent("coach").map(|a| a.state), Some(AgentState::Stopped));
    }
}
