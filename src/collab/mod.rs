//! 外部协作方：接口、结果历史、模拟实现

pub mod history;
pub mod simulated;
pub mod traits;

pub use history::{HistoryContextProvider, Outcome, OutcomeHistory, DEFAULT_HISTORY_CAPACITY};
pub use simulated::{LoggingExecutor, SimulatedDataSource, StaticScorer};
pub use traits::{ActionExecutor, ContextProvider, DataSource, ModelScorer};
