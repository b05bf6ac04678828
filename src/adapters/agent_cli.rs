//! Agent CLI subprocess spawner.
//!
//! The production [`AgentSpawner`]: launches the agent binary with the
//! fixed argument contract and piped stdin/stdout. Tests substitute their
//! own spawner instead of touching this one.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::{Child, Command};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::AgentInvocation;
use crate::domain::ports::AgentSpawner;

#[derive(Debug, Clone)]
pub struct CliAgentSpawner {
    binary_path: String,
}

impl CliAgentSpawner {
    pub fn new(binary_path: impl Into<String>) -> Self {
        Self {
            binary_path: binary_path.into(),
        }
    }
}

#[async_trait]
impl AgentSpawner for CliAgentSpawner {
    async fn spawn(&self, invocation: &AgentInvocation) -> DomainResult<Child> {
        Command::new(&self.binary_path)
            .args(invocation.args())
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DomainError::ExternalCallFailed(format!(
                    "failed to spawn agent '{}': {e}",
                    self.binary_path
                ))
            })
    }
}
