//! EcoMind - 多 Agent 协调核心
//!
//! 入口：加载配置、初始化日志、用模拟协作方启动四个标准 Agent，收到 Ctrl+C / SIGTERM 后优雅停止。

use std::sync::Arc;

use anyhow::Context;
use ecomind::agent::AgentBindings;
use ecomind::config::load_config;
use ecomind::core::{serve_until_shutdown, OrchestratorBuilder, ShutdownManager};
use ecomind::observability;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(Into::into);
    let config = load_config(config_path).context("Failed to load config")?;
    observability::init(&config.logging);

    let orchestrator = OrchestratorBuilder::from_config(&config)
        .with_standard_agents(&config, AgentBindings::simulated())
        .build()
        .context("Failed to build orchestrator")?;
    orchestrator
        .start()
        .await
        .context("Coordination core failed to start")?;
    tracing::info!(app = %config.app.name, "EcoMind running, press Ctrl+C to stop");

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.listen_for_signals();
    let status = serve_until_shutdown(&orchestrator, shutdown).await;

    for agent in &status.agents {
        tracing::info!(
            agent = %agent.name,
            state = %agent.state,
            cycles = agent.cycles,
            actions = agent.actions,
            last_error = ?agent.last_error.as_ref().map(|e| e.kind),
            "Final agent status"
        );
    }
    Ok(())
}
