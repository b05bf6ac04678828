//! Subprocess spawning port.
//!
//! The supervisor never calls `Command::new` directly; it goes through
//! this trait so tests can substitute a fake process.

use async_trait::async_trait;
use tokio::process::Child;

use crate::domain::errors::DomainResult;
use crate::domain::models::AgentInvocation;

#[async_trait]
pub trait AgentSpawner: Send + Sync {
    /// Spawn the agent subprocess with stdin, stdout, and stderr piped.
    ///
    /// The supervisor owns the returned child: it writes the prompt to
    /// stdin, watches stdout, and reaps the process.
    async fn spawn(&self, invocation: &AgentInvocation) -> DomainResult<Child>;
}
