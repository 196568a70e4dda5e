//! 核心编排层：错误与恢复、状态投影、时钟、Agent 监管、优雅关闭、编排器

pub mod builder;
pub mod clock;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod shutdown;
pub mod state;
pub mod supervisor;

pub use builder::OrchestratorBuilder;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoordError, CoordResult, ErrorKind, LastError, RecoveryAction};
pub use orchestrator::{
    CoordinationReport, Orchestrator, OrchestratorSettings, Resolution, ORCHESTRATOR_ID,
    ORCHESTRATOR_PRIORITY, SYSTEM_STATE_KEY,
};
pub use recovery::RecoveryPolicy;
pub use shutdown::{serve_until_shutdown, ShutdownManager, ShutdownReason};
pub use state::{AgentState, AgentStatus, Health, OrchestratorStatus};
pub use supervisor::AgentSupervisor;
