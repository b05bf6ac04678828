//! Agent subprocess supervision.
//!
//! Three outcomes race over every run: normal completion (stdout EOF then
//! exit), heartbeat expiry (no stdout activity inside the liveness
//! window), and the hard wall-clock timeout. Exactly one settles; the
//! loop below breaks once, kills where needed, and reaps the child before
//! returning, so a timer that fires after the kill can never re-settle
//! the run.
//!
//! The supervisor is pure plumbing: it returns an [`AgentRunResult`] and
//! leaves every routing and state decision to the caller.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AgentInvocation, AgentRunResult};
use crate::domain::ports::AgentSpawner;

use super::worktree::WorktreeManager;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub timeout_ms: u64,
    pub heartbeat_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 3_600_000,
            heartbeat_ms: 600_000,
        }
    }
}

enum Settled {
    /// Stdout reached EOF; wait for exit next.
    Eof,
    Heartbeat,
    HardTimeout,
    ReadError(std::io::Error),
}

pub struct AgentSupervisor {
    spawner: Arc<dyn AgentSpawner>,
    worktrees: WorktreeManager,
    config: SupervisorConfig,
}

impl AgentSupervisor {
    pub fn new(
        spawner: Arc<dyn AgentSpawner>,
        worktrees: WorktreeManager,
        config: SupervisorConfig,
    ) -> Self {
        Self {
            spawner,
            worktrees,
            config,
        }
    }

    /// Run one agent to settlement.
    ///
    /// When the invocation asks for a worktree, it is created before the
    /// spawn and removed after the run settles on every exit path —
    /// success, heartbeat kill, or hard timeout — unless `keep` is set.
    /// Worktree creation failure aborts the run; removal failure is
    /// logged, not raised.
    pub async fn run(&self, invocation: &AgentInvocation) -> DomainResult<AgentRunResult> {
        let mut effective = invocation.clone();
        let mut created: Option<(PathBuf, bool)> = None;

        if let Some(ref spec) = invocation.worktree {
            let path = self.worktrees.create(&spec.branch, spec.create_branch).await?;
            effective.working_dir = path.clone();
            created = Some((path, spec.keep));
        }

        let outcome = self.supervise(&effective).await;

        if let Some((path, keep)) = created {
            if !keep {
                if let Err(e) = self.worktrees.remove(&path).await {
                    warn!(path = %path.display(), error = %e, "worktree removal failed");
                }
            }
        }

        outcome
    }

    async fn supervise(&self, invocation: &AgentInvocation) -> DomainResult<AgentRunResult> {
        let started = Instant::now();
        let mut child = self.spawner.spawn(invocation).await?;

        // Prompt goes to stdin, which is then closed so the agent sees EOF.
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(invocation.prompt.as_bytes()).await?;
            stdin.shutdown().await?;
            drop(stdin);
        }

        let mut stdout = child.stdout.take().ok_or_else(|| {
            DomainError::ExternalCallFailed("agent subprocess has no piped stdout".to_string())
        })?;

        let heartbeat = Duration::from_millis(self.config.heartbeat_ms);
        let deadline = tokio::time::sleep_until(started + Duration::from_millis(self.config.timeout_ms));
        tokio::pin!(deadline);

        let mut collected: Vec<u8> = Vec::new();
        // The heartbeat timer is re-armed on every chunk; the deadline is
        // polled first so a simultaneous expiry settles as hard timeout.
        let settled = loop {
            tokio::select! {
                biased;
                _ = &mut deadline => break Settled::HardTimeout,
                read = stdout.read_buf(&mut collected) => match read {
                    Ok(0) => break Settled::Eof,
                    Ok(_) => continue,
                    Err(e) => break Settled::ReadError(e),
                },
                _ = tokio::time::sleep(heartbeat) => break Settled::Heartbeat,
            }
        };

        let wall_ms = started.elapsed().as_millis() as u64;
        let output = String::from_utf8_lossy(&collected).into_owned();

        match settled {
            Settled::Eof => {
                let status = child.wait().await?;
                let mut result = AgentRunResult::parse_output(&output, status.success());
                result.wall_ms = wall_ms;
                info!(
                    agent = %invocation.agent_name,
                    success = result.success,
                    wall_ms,
                    "agent run completed"
                );
                Ok(result)
            }
            Settled::Heartbeat => {
                warn!(
                    agent = %invocation.agent_name,
                    silent_ms = self.config.heartbeat_ms,
                    "heartbeat expired, killing agent"
                );
                kill_and_reap(&mut child).await;
                let mut result = AgentRunResult::parse_output(&output, false);
                result.wall_ms = wall_ms;
                result.heartbeat_expired = true;
                Ok(result)
            }
            Settled::HardTimeout => {
                warn!(
                    agent = %invocation.agent_name,
                    timeout_ms = self.config.timeout_ms,
                    "hard timeout, killing agent"
                );
                kill_and_reap(&mut child).await;
                Err(DomainError::AgentTimeout(self.config.timeout_ms))
            }
            Settled::ReadError(e) => {
                warn!(agent = %invocation.agent_name, error = %e, "stdout read failed, killing agent");
                kill_and_reap(&mut child).await;
                let mut result = AgentRunResult::parse_output(&output, false);
                result.wall_ms = wall_ms;
                Ok(result)
            }
        }
    }
}

async fn kill_and_reap(child: &mut tokio::process::Child) {
    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill agent subprocess");
    }
    // kill() waits on success, but wait() again is harmless and covers the
    // kill-error path.
    let _ = child.wait().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::process::Stdio;
    use tokio::process::Command;

    /// Fake spawner that runs a shell script instead of the agent CLI.
    struct ScriptSpawner {
        script: String,
    }

    impl ScriptSpawner {
        fn new(script: impl Into<String>) -> Arc<Self> {
            Arc::new(Self {
                script: script.into(),
            })
        }
    }

    #[async_trait]
    impl AgentSpawner for ScriptSpawner {
        async fn spawn(&self, _invocation: &AgentInvocation) -> DomainResult<tokio::process::Child> {
            Command::new("sh")
                .arg("-c")
                .arg(&self.script)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| DomainError::ExternalCallFailed(e.to_string()))
        }
    }

    fn supervisor(spawner: Arc<dyn AgentSpawner>, timeout_ms: u64, heartbeat_ms: u64) -> AgentSupervisor {
        AgentSupervisor::new(
            spawner,
            WorktreeManager::new("."),
            SupervisorConfig {
                timeout_ms,
                heartbeat_ms,
            },
        )
    }

    #[tokio::test]
    async fn completion_parses_json_output() {
        let spawner = ScriptSpawner::new(
            r#"cat > /dev/null; printf '{"result":"done","num_turns":3,"cost_usd":0.5}'"#,
        );
        let sup = supervisor(spawner, 5_000, 2_000);

        let result = sup.run(&AgentInvocation::new("architect", "prompt")).await.unwrap();
        assert!(result.success);
        assert_eq!(result.result.as_deref(), Some("done"));
        assert_eq!(result.num_turns, Some(3));
        assert_eq!(result.cost_usd, Some(0.5));
        assert!(!result.heartbeat_expired);
    }

    #[tokio::test]
    async fn nonzero_exit_is_failure_with_output_kept() {
        let spawner = ScriptSpawner::new(r#"cat > /dev/null; printf 'broke'; exit 3"#);
        let sup = supervisor(spawner, 5_000, 2_000);

        let result = sup.run(&AgentInvocation::new("architect", "prompt")).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.result.as_deref(), Some("broke"));
    }

    #[tokio::test]
    async fn heartbeat_kills_a_silent_process() {
        // Emits nothing and sleeps far past the heartbeat.
        let spawner = ScriptSpawner::new("cat > /dev/null; sleep 30");
        let sup = supervisor(spawner, 5_000, 50);

        let started = std::time::Instant::now();
        let result = sup.run(&AgentInvocation::new("architect", "prompt")).await.unwrap();
        assert!(!result.success);
        assert!(result.heartbeat_expired);
        assert!(result.wall_ms >= 50);
        assert!(started.elapsed() < Duration::from_secs(5), "must not wait for the sleep");
    }

    #[tokio::test]
    async fn heartbeat_resets_on_each_chunk() {
        // Three chunks 60 ms apart, each within the 100 ms window.
        let spawner = ScriptSpawner::new(
            "cat > /dev/null; for i in 1 2 3; do printf x; sleep 0.06; done",
        );
        let sup = supervisor(spawner, 5_000, 100);

        let result = sup.run(&AgentInvocation::new("architect", "prompt")).await.unwrap();
        assert!(result.success);
        assert!(!result.heartbeat_expired);
        assert_eq!(result.result.as_deref(), Some("xxx"));
    }

    #[tokio::test]
    async fn hard_timeout_is_fatal_even_with_output() {
        // Keeps emitting, so the heartbeat never fires; the deadline must.
        let spawner = ScriptSpawner::new(
            "cat > /dev/null; while true; do printf x; sleep 0.02; done",
        );
        let sup = supervisor(spawner, 150, 1_000);

        let err = sup.run(&AgentInvocation::new("architect", "prompt")).await;
        assert!(matches!(err, Err(DomainError::AgentTimeout(150))));
    }

    #[tokio::test]
    async fn heartbeat_fires_before_timeout_when_smaller() {
        let spawner = ScriptSpawner::new("cat > /dev/null; sleep 30");
        let sup = supervisor(spawner, 5_000, 50);

        let result = sup.run(&AgentInvocation::new("architect", "prompt")).await.unwrap();
        assert!(result.heartbeat_expired, "heartbeat settles first on a silent process");
    }

    #[tokio::test]
    async fn prompt_reaches_stdin() {
        let spawner = ScriptSpawner::new(r#"text=$(cat); printf '{"result":"%s"}' "$text""#);
        let sup = supervisor(spawner, 5_000, 2_000);

        let result = sup
            .run(&AgentInvocation::new("architect", "echo-me"))
            .await
            .unwrap();
        assert_eq!(result.result.as_deref(), Some("echo-me"));
    }
}
