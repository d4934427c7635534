//! Configuration for opendev, read from `.opendev/opendev.toml`.
//!
//! Every section and field is optional; missing values take the defaults
//! below. Environment variables are applied on top of the file, and CLI flags
//! on top of both.
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8000
//! permissive_cors = true
//!
//! [generation]
//! base_url = "https://openrouter.ai/api/v1"
//! request_timeout_secs = 120
//!
//! [generation.roles.architect]
//! model = "openai/gpt-4o"
//! temperature = 0.3
//!
//! [sandbox]
//! runtime = "docker"          # or "process"
//! image = "opendev-sandbox:latest"
//! memory = "2g"
//! cpus = 2.0
//! timeout = 60
//! work_dir = "/tmp/opendev/work"
//! max_output_bytes = 65536
//!
//! [logging]
//! format = "pretty"           # or "json"
//! directory = ".opendev/logs"
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::generation::{AgentRole, RoleBinding};

pub const CONFIG_DIR: &str = ".opendev";
pub const CONFIG_FILE: &str = "opendev.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpendevConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub generation: GenerationSection,
    #[serde(default)]
    pub sandbox: SandboxSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allow any origin. The browser front end is served from another port.
    #[serde(default = "default_true")]
    pub permissive_cors: bool,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_true() -> bool {
    true
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            permissive_cors: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSection {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Fallback credential for submissions that don't carry their own.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub roles: RolesSection,
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_request_timeout() -> u64 {
    120
}

impl Default for GenerationSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            request_timeout_secs: default_request_timeout(),
            roles: RolesSection::default(),
        }
    }
}

/// Model binding per agent role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolesSection {
    #[serde(default = "default_architect")]
    pub architect: RoleBinding,
    #[serde(default = "default_coder")]
    pub coder: RoleBinding,
    #[serde(default = "default_debugger")]
    pub debugger: RoleBinding,
}

fn default_architect() -> RoleBinding {
    RoleBinding::new("openai/gpt-4o", 0.3)
}

fn default_coder() -> RoleBinding {
    RoleBinding::new("mistral/codestral-22b", 0.2)
}

fn default_debugger() -> RoleBinding {
    RoleBinding::new("anthropic/claude-3-5-sonnet", 0.2)
}

impl Default for RolesSection {
    fn default() -> Self {
        Self {
            architect: default_architect(),
            coder: default_coder(),
            debugger: default_debugger(),
        }
    }
}

impl RolesSection {
    pub fn binding(&self, role: AgentRole) -> &RoleBinding {
        match role {
            AgentRole::Architect => &self.architect,
            AgentRole::Coder => &self.coder,
            AgentRole::Debugger => &self.debugger,
        }
    }
}

/// Which compute unit the sandbox launches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// Disposable Docker container: no network, memory and CPU bounded.
    #[default]
    Docker,
    /// Local `sh -c` in its own process group. Only the timeout is enforced.
    Process,
}

impl std::fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeKind::Docker => write!(f, "docker"),
            RuntimeKind::Process => write!(f, "process"),
        }
    }
}

impl FromStr for RuntimeKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "docker" => Ok(RuntimeKind::Docker),
            "process" => Ok(RuntimeKind::Process),
            _ => anyhow::bail!("Invalid sandbox runtime '{}'. Valid values: docker, process", s),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSection {
    #[serde(default)]
    pub runtime: RuntimeKind,
    #[serde(default = "default_image")]
    pub image: String,
    /// Memory ceiling, e.g. "512m" or "2g".
    #[serde(default = "default_memory")]
    pub memory: String,
    #[serde(default = "default_cpus")]
    pub cpus: f64,
    /// Wall-clock limit per run, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Parent of the per-task workspaces.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// Captured stdout/stderr are each truncated to this many bytes.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

fn default_image() -> String {
    "opendev-sandbox:latest".to_string()
}

fn default_memory() -> String {
    "2g".to_string()
}

fn default_cpus() -> f64 {
    2.0
}

fn default_timeout() -> u64 {
    60
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("opendev").join("work")
}

fn default_max_output_bytes() -> usize {
    64 * 1024
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            runtime: RuntimeKind::default(),
            image: default_image(),
            memory: default_memory(),
            cpus: default_cpus(),
            timeout: default_timeout(),
            work_dir: default_work_dir(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

impl SandboxSection {
    pub fn memory_bytes(&self) -> Result<u64> {
        parse_memory(&self.memory)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid log format '{}'. Valid values: pretty, json", s),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub format: LogFormat,
    /// When set, logs are also written to a daily rolling file here.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl OpendevConfig {
    /// Path of the config file for a project directory.
    pub fn path_for(project_dir: &Path) -> PathBuf {
        project_dir.join(CONFIG_DIR).join(CONFIG_FILE)
    }

    /// Load `.opendev/opendev.toml` from `project_dir`, or defaults if absent.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let path = Self::path_for(project_dir);
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_file(&path)
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        config.sandbox.memory_bytes()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides using `lookup` to read variables.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("OPENROUTER_API_KEY").filter(|k| !k.is_empty()) {
            self.generation.api_key = Some(key);
        }
        if let Some(url) = lookup("OPENDEV_BASE_URL") {
            self.generation.base_url = url;
        }
        if let Some(runtime) = lookup("OPENDEV_SANDBOX_RUNTIME") {
            self.sandbox.runtime = runtime.parse()?;
        }
        if let Some(image) = lookup("OPENDEV_SANDBOX_IMAGE") {
            self.sandbox.image = image;
        }
        if let Some(dir) = lookup("OPENDEV_WORK_DIR") {
            self.sandbox.work_dir = PathBuf::from(dir);
        }
        Ok(())
    }
}

/// Parse a memory size like `"512m"`, `"2g"` or `"1048576"` into bytes.
pub fn parse_memory(value: &str) -> Result<u64> {
    let trimmed = value.trim().to_lowercase();
    let trimmed = trimmed.strip_suffix('b').unwrap_or(&trimmed);
    let (digits, multiplier) = match trimmed.chars().last() {
        Some('k') => (&trimmed[..trimmed.len() - 1], 1024),
        Some('m') => (&trimmed[..trimmed.len() - 1], 1024 * 1024),
        Some('g') => (&trimmed[..trimmed.len() - 1], 1024 * 1024 * 1024),
        _ => (trimmed, 1),
    };
    let amount: u64 = digits
        .trim()
        .parse()
        .with_context(|| format!("Invalid memory size '{}'", value))?;
    if amount == 0 {
        anyhow::bail!("Memory size must be greater than zero");
    }
    amount
        .checked_mul(multiplier)
        .with_context(|| format!("Memory size too large: '{}'", value))
}
