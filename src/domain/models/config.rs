//! Main configuration structure for maestro.
//!
//! Every value has a safe default so the process starts with no config
//! file at all; integration secrets default to empty and only error when
//! the integration is actually used.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// HTTP ingress port.
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub queues: QueuesConfig,

    #[serde(default)]
    pub retries: RetryConfig,

    #[serde(default)]
    pub outputs: OutputsConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub chat: ChatConfig,

    #[serde(default)]
    pub source_control: SourceControlConfig,

    #[serde(default)]
    pub issue_tracker: IssueTrackerConfig,

    #[serde(default)]
    pub doc_store: DocStoreConfig,
}

const fn default_port() -> u16 {
    8080
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            database: DatabaseConfig::default(),
            logging: LoggingConfig::default(),
            queues: QueuesConfig::default(),
            retries: RetryConfig::default(),
            outputs: OutputsConfig::default(),
            agent: AgentConfig::default(),
            polling: PollingConfig::default(),
            chat: ChatConfig::default(),
            source_control: SourceControlConfig::default(),
            issue_tracker: IssueTrackerConfig::default(),
            doc_store: DocStoreConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to the `SQLite` database file.
    #[serde(default = "default_database_path")]
    pub path: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".maestro/maestro.db".to_string()
}

const fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Worker-pool sizes per named queue.
///
/// The orchestrator queue is pinned to 1: route decisions and state
/// mutations are serialised through it, which is what lets route handlers
/// run lock-free.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct QueuesConfig {
    #[serde(default = "default_architect_workers")]
    pub architect: usize,

    #[serde(default = "default_code_writer_workers")]
    pub code_writer: usize,

    #[serde(default = "default_reviewer_workers")]
    pub reviewer: usize,

    #[serde(default = "default_orchestrator_workers")]
    pub orchestrator: usize,
}

const fn default_architect_workers() -> usize {
    2
}

const fn default_code_writer_workers() -> usize {
    3
}

const fn default_reviewer_workers() -> usize {
    2
}

const fn default_orchestrator_workers() -> usize {
    1
}

impl Default for QueuesConfig {
    fn default() -> Self {
        Self {
            architect: default_architect_workers(),
            code_writer: default_code_writer_workers(),
            reviewer: default_reviewer_workers(),
            orchestrator: default_orchestrator_workers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_ci_retries: u32,

    #[serde(default = "default_max_retries")]
    pub max_review_retries: u32,
}

const fn default_max_retries() -> u32 {
    10
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_ci_retries: default_max_retries(),
            max_review_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct OutputsConfig {
    /// Base directory for per-design agent outputs.
    #[serde(default = "default_outputs_base")]
    pub base_path: String,
}

fn default_outputs_base() -> String {
    "designs".to_string()
}

impl Default for OutputsConfig {
    fn default() -> Self {
        Self {
            base_path: default_outputs_base(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AgentConfig {
    /// Agent CLI binary.
    #[serde(default = "default_agent_binary")]
    pub binary_path: String,

    /// Hard wall-clock limit per run.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Liveness window: no stdout activity for this long kills the run.
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,

    /// Passed through as `--allowedTools` when set.
    #[serde(default)]
    pub allowed_tools: Option<Vec<String>>,

    /// Repository the code-writer worktrees branch from.
    #[serde(default = "default_repo_path")]
    pub repo_path: String,

    /// Leave worktrees on disk after a run (debugging aid).
    #[serde(default)]
    pub keep_worktrees: bool,
}

fn default_agent_binary() -> String {
    "claude".to_string()
}

const fn default_timeout_ms() -> u64 {
    3_600_000
}

const fn default_heartbeat_ms() -> u64 {
    600_000
}

fn default_repo_path() -> String {
    ".".to_string()
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            binary_path: default_agent_binary(),
            timeout_ms: default_timeout_ms(),
            heartbeat_ms: default_heartbeat_ms(),
            allowed_tools: None,
            repo_path: default_repo_path(),
            keep_worktrees: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
}

const fn default_poll_interval() -> u64 {
    60
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ChatConfig {
    #[serde(default)]
    pub signing_secret: String,
    #[serde(default)]
    pub bot_token: String,
    /// Incoming-webhook URL for simple sends.
    #[serde(default)]
    pub webhook_url: String,
    /// Default channel for notifications.
    #[serde(default)]
    pub channel: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SourceControlConfig {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub webhook_secret: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub repo: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct IssueTrackerConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default)]
    pub project_key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DocStoreConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_token: String,
    #[serde(default)]
    pub space_id: String,
    /// Optional parent for published design pages.
    #[serde(default)]
    pub parent_page_id: Option<String>,
}
