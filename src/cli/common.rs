//! Shared CLI helpers used across multiple command handlers.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;

use triggerclaw::agent::{AgentLoop, ChatPlanner};
use triggerclaw::catalog::{ToolCatalog, ToolRouterClient};
use triggerclaw::config::{validate::validate_startup, Config};
use triggerclaw::respond::ResponseDispatcher;
use triggerclaw::session::{SessionApi, SessionManager};
use triggerclaw::utils::logging::init_logging;

/// The wired core shared by `listen` and `interactive`.
pub(crate) struct Components {
    pub sessions: Arc<SessionManager>,
    pub agent: Arc<AgentLoop>,
}

/// Load config, install logging and fail fast on missing credentials.
///
/// A missing reasoning-engine or tool-router credential is a startup
/// failure: the process exits non-zero before any listening begins.
pub(crate) fn load_validated_config() -> Result<Config> {
    let config = Config::load().context("Failed to load configuration")?;
    init_logging(&config.logging).context("Failed to initialize logging")?;
    validate_startup(&config).context("Startup validation failed")?;
    Ok(config)
}

/// Build the session manager and agent loop over the real HTTP
/// collaborators. `shutdown_rx` wires the agent into an external stop
/// signal; omit it for a one-shot interactive run.
pub(crate) fn build_components(
    config: &Config,
    shutdown_rx: Option<watch::Receiver<bool>>,
) -> Components {
    let router = Arc::new(ToolRouterClient::from_config(&config.router));
    let catalog: Arc<dyn ToolCatalog> = router.clone();
    let session_api: Arc<dyn SessionApi> = router;

    let planner = Arc::new(ChatPlanner::from_config(&config.planner));
    let dispatcher = ResponseDispatcher::new(catalog.clone(), &config.router.reply_tool_id);

    let mut agent = AgentLoop::new(
        planner,
        catalog.clone(),
        dispatcher,
        config.agent.clone(),
    );
    if let Some(rx) = shutdown_rx {
        agent = agent.with_shutdown(rx);
    }

    let sessions = Arc::new(SessionManager::new(session_api, config.session.clone()));

    Components {
        sessions,
        agent: Arc::new(agent),
    }
}
