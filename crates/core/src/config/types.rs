use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

pub use crate::autopilot::{AutopilotConfig, MergeMethod, ReleaseConfig};
pub use crate::orchestrator::OrchestratorConfig;
pub use crate::poller::PollerConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub github: Option<GithubConfig>,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub executor: Option<ExecutorConfig>,
    #[serde(default)]
    pub autopilot: AutopilotConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub quality: QualityConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("shipyard.db")
}

/// GitHub connection used both as the work-item source and as the
/// pull-request host for autopilot.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GithubConfig {
    /// Personal access token or app token.
    pub token: String,
    /// Repository in `owner/name` form.
    pub repo: String,
    /// Label marking issues that should be picked up.
    #[serde(default = "default_label")]
    pub label: String,
    /// Label applied while an item is being worked on.
    #[serde(default = "default_in_progress_label")]
    pub in_progress_label: String,
    /// Label applied when an item is finished.
    #[serde(default = "default_done_label")]
    pub done_label: String,
    /// Label applied when an item failed.
    #[serde(default = "default_failed_label")]
    pub failed_label: String,
    /// API base URL (override for GitHub Enterprise or tests).
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u32,
}

impl GithubConfig {
    /// Split `repo` into owner and name.
    pub fn owner_and_name(&self) -> Option<(&str, &str)> {
        let (owner, name) = self.repo.split_once('/')?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return None;
        }
        Some((owner, name))
    }
}

fn default_label() -> String {
    "shipyard".to_string()
}

fn default_in_progress_label() -> String {
    "shipyard-in-progress".to_string()
}

fn default_done_label() -> String {
    "shipyard-done".to_string()
}

fn default_failed_label() -> String {
    "shipyard-failed".to_string()
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_timeout() -> u32 {
    30
}

/// External command that performs a task.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutorConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Token budget enforced by the executor.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BudgetConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Per-task input token limit (0 = unlimited).
    #[serde(default)]
    pub max_input_tokens: i64,
    /// Per-task output token limit (0 = unlimited).
    #[serde(default)]
    pub max_output_tokens: i64,
}

/// Post-execution quality gate.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct QualityConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Shell commands run in the project path; all must exit 0.
    #[serde(default)]
    pub commands: Vec<String>,
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github: Option<SanitizedGithubConfig>,
    pub poller: PollerConfig,
    pub orchestrator: OrchestratorConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executor: Option<ExecutorConfig>,
    pub autopilot: AutopilotConfig,
    pub budget: BudgetConfig,
    pub quality: QualityConfig,
}

/// Sanitized GitHub config (token hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedGithubConfig {
    pub repo: String,
    pub label: String,
    pub api_url: String,
    pub token_configured: bool,
    pub timeout_secs: u32,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            github: config.github.as_ref().map(|g| SanitizedGithubConfig {
                repo: g.repo.clone(),
                label: g.label.clone(),
                api_url: g.api_url.clone(),
                token_configured: !g.token.is_empty(),
                timeout_secs: g.timeout_secs,
            }),
            poller: config.poller.clone(),
            orchestrator: config.orchestrator.clone(),
            executor: config.executor.clone(),
            autopilot: config.autopilot.clone(),
            budget: config.budget.clone(),
            quality: config.quality.clone(),
        }
    }
}
