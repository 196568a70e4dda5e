//! 错误恢复策略
//!
//! 根据 CoordError 类型返回 RecoveryAction，供 Agent 周期与协调周期决定是回落、跳过、继续、重读还是上报。

use crate::core::{CoordError, RecoveryAction};

/// 语义化错误恢复：将错误映射为可执行动作
#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryPolicy;

impl RecoveryPolicy {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, err: &CoordError) -> RecoveryAction {
        match err {
            CoordError::ModelUnavailable(_)
            | CoordError::ContextUnavailable(_)
            | CoordError::DataUnavailable(_) => RecoveryAction::Fallback,
            CoordError::NoApplicableAction => RecoveryAction::Skip,
            CoordError::ActionFailed { .. } => RecoveryAction::Continue,
            CoordError::VersionConflict { .. } => RecoveryAction::RetryWithFreshRead,
            CoordError::StoreUnavailable(_) | CoordError::BusUnavailable(_) => {
                RecoveryAction::Escalate
            }
            CoordError::NotFound(_) => RecoveryAction::Skip,
            CoordError::AgentNotFound(_)
            | CoordError::InvalidTransition { .. }
            | CoordError::Config(_) => RecoveryAction::Escalate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovery_model_unavailable() {
        let policy = RecoveryPolicy::new();
        let action = policy.handle(&CoordError::ModelUnavailable("timeout".into()));
        assert_eq!(action, RecoveryAction::Fallback);
    }

    #[test]
    fn test_recovery_no_applicable_action() {
        let policy = RecoveryPolicy::new();
        assert_eq!(
            policy.handle(&CoordError::NoApplicableAction),
            RecoveryAction::Skip
        );
    }

    #[test]
    fn test_recovery_action_failed() {
        let policy = RecoveryPolicy::new();
        let err = CoordError::ActionFailed {
            action: "raise_alert".into(),
            reason: "gateway down".into(),
        };
        assert_eq!(policy.handle(&err), RecoveryAction::Continue);
    }

    #[test]
    fn test_recovery_version_conflict() {
        let policy = RecoveryPolicy::new();
        let err = CoordError::VersionConflict {
            key: "campaigns/active".into(),
            expected: 1,
            actual: 2,
        };
        assert_eq!(policy.handle(&err), RecoveryAction::RetryWithFreshRead);
    }

    #[test]
    fn test_recovery_backend_unavailable() {
        let policy = RecoveryPolicy::new();
        assert_eq!(
            policy.handle(&CoordError::StoreUnavailable("io".into())),
            RecoveryAction::Escalate
        );
        assert_eq!(
            policy.handle(&CoordError::BusUnavailable("closed".into())),
            RecoveryAction::Escalate
        );
    }
}
