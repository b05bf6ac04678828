//! Domain models.

pub mod agent;
pub mod config;
pub mod design;
pub mod event;
pub mod external;
pub mod pr_state;

pub use agent::{
    review_passed, AgentInvocation, AgentJob, AgentKind, AgentRunResult, TaskKind, WorktreeSpec,
};
pub use config::{
    AgentConfig, ChatConfig, Config, DatabaseConfig, DocStoreConfig, IssueTrackerConfig,
    LoggingConfig, OutputsConfig, PollingConfig, QueuesConfig, RetryConfig, SourceControlConfig,
};
pub use design::{design_doc_key, Design, DesignOutput, DesignStage, DesignStatus, IntakeRecord};
pub use event::{Envelope, EventSource, OrchestratorEvent};
pub use external::{IssueFields, IssueSummary, Page, PageComment, PullRequest};
pub use pr_state::{CheckStatus, PrStage, PrState};
