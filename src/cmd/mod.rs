//! CLI command implementations.
//!
//! | Module   | Commands handled |
//! |----------|------------------|
//! | `serve`  | `Serve`          |
//! | `run`    | `Run`            |
//! | `config` | `Config`         |

pub mod config;
pub mod run;
pub mod serve;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use opendev::config::OpendevConfig;
use opendev::generation::OpenRouterFactory;
use opendev::orchestrator::TaskOrchestrator;
use opendev::sandbox::SandboxEngine;
use opendev::task::TaskRegistry;

pub use config::cmd_config;
pub use run::cmd_run;
pub use serve::cmd_serve;

/// `.opendev/opendev.toml` with environment overrides applied.
pub fn load_config(project_dir: &Path) -> Result<OpendevConfig> {
    let mut config = OpendevConfig::load(project_dir)?;
    config
        .apply_env()
        .context("Invalid configuration in environment")?;
    Ok(config)
}

/// Wire the generation factory, sandbox engine and registry together.
pub fn build_orchestrator(config: &OpendevConfig) -> Result<TaskOrchestrator> {
    let sandbox = SandboxEngine::from_config(&config.sandbox)
        .context("Failed to initialize the sandbox runtime")?;
    tracing::info!(
        runtime = sandbox.runtime_name(),
        work_dir = %config.sandbox.work_dir.display(),
        "Sandbox ready"
    );
    if config.generation.api_key.is_none() {
        tracing::warn!("No default OpenRouter API key configured; submissions must carry their own");
    }

    Ok(TaskOrchestrator::new(
        TaskRegistry::new(),
        Arc::new(OpenRouterFactory::new(config.generation.clone())),
        Arc::new(sandbox),
        Duration::from_secs(config.sandbox.timeout),
    ))
}
