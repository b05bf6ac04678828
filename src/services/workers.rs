//! Workers for the three agent queues.
//!
//! Each worker drains one queue: it turns an ingested event or routed job
//! into a supervised agent run, materialises the agent's output on disk,
//! and reports back by pushing an `agent:completed` event for the
//! orchestrator queue. All routing decisions live in the router; workers
//! only execute.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    design_doc_key, AgentInvocation, AgentJob, AgentKind, Config, Design, Envelope, IntakeRecord,
    OrchestratorEvent, TaskKind,
};
use crate::domain::ports::{
    ChatNotifier, DesignOutputRepository, DesignRepository, DocStore, IssueTracker,
    PrStateRepository, SourceControl,
};

use super::queue::QueueItem;
use super::supervisor::AgentSupervisor;

/// Shared handles every worker and the router need.
pub struct PipelineContext {
    pub config: Config,
    pub designs: Arc<dyn DesignRepository>,
    pub outputs: Arc<dyn DesignOutputRepository>,
    pub prs: Arc<dyn PrStateRepository>,
    pub issues: Arc<dyn IssueTracker>,
    pub docs: Arc<dyn DocStore>,
    pub source: Arc<dyn SourceControl>,
    pub chat: Arc<dyn ChatNotifier>,
    pub supervisor: Arc<AgentSupervisor>,
    /// Feeds internal events back into the dispatch loop.
    pub events: mpsc::UnboundedSender<Envelope>,
}

impl PipelineContext {
    pub fn emit(&self, event: OrchestratorEvent) {
        if self.events.send(Envelope::internal(event)).is_err() {
            warn!("event channel closed, dropping internal event");
        }
    }

    /// Thread a notification under the design's originating chat message
    /// when intake metadata exists; otherwise fall back to the webhook.
    /// Notification failures are logged, never raised.
    pub async fn notify(&self, design_id: &str, text: &str) {
        let intake = match self.designs.get_intake(design_id).await {
            Ok(intake) => intake,
            Err(e) => {
                warn!(design_id, error = %e, "intake lookup failed for notification");
                None
            }
        };

        let outcome = match intake {
            Some(intake) => {
                self.chat
                    .post_message(&intake.channel, text, intake.thread_ts.as_deref())
                    .await
            }
            None => self.chat.send(text, None).await,
        };
        if let Err(e) = outcome {
            warn!(design_id, error = %e, "chat notification failed");
        }
    }

    /// `{base}/{design_id}/design/{key}.md`
    pub fn design_doc_path(&self, design_id: &str, key: &str) -> PathBuf {
        Path::new(&self.config.outputs.base_path)
            .join(design_id)
            .join("design")
            .join(format!("{key}.md"))
    }

    /// `{base}/{design_id}/implementation/{foundation|features}/{issue_key}`
    pub fn implementation_path(
        &self,
        design_id: &str,
        issue_key: &str,
        foundation: bool,
    ) -> PathBuf {
        Path::new(&self.config.outputs.base_path)
            .join(design_id)
            .join("implementation")
            .join(if foundation { "foundation" } else { "features" })
            .join(issue_key)
    }

    fn base_invocation(&self, agent_name: &str, prompt: String) -> AgentInvocation {
        let mut invocation = AgentInvocation::new(agent_name, prompt);
        if let Some(ref tools) = self.config.agent.allowed_tools {
            invocation = invocation.with_allowed_tools(tools.clone());
        }
        invocation
    }
}

/// Next `design_doc` revision for a design, derived from what exists.
pub async fn next_revision(ctx: &PipelineContext, design_id: &str) -> DomainResult<u32> {
    let outputs = ctx.outputs.list_by_design(design_id).await?;
    Ok(outputs
        .iter()
        .filter(|o| o.output_key.starts_with("design_doc"))
        .count() as u32)
}

/// Write the agent's collected result to its output path. The content is
/// opaque to the orchestrator; only the path travels onward.
async fn materialize_output(path: &Path, content: &str) -> DomainResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Architect
// ---------------------------------------------------------------------------

pub async fn architect_worker(ctx: Arc<PipelineContext>, item: QueueItem) -> DomainResult<()> {
    match item {
        QueueItem::Event(envelope) => match envelope.event {
            OrchestratorEvent::TaskRequested {
                message,
                sender_id,
                sender_name,
                channel,
                thread_ts,
            } => intake(ctx, message, sender_id, sender_name, channel, thread_ts).await,
            OrchestratorEvent::PageComment {
                design_id,
                comments,
                ..
            } => {
                let job = AgentJob::new(AgentKind::Architect, TaskKind::Feedback, design_id)
                    .with_comments(comments);
                run_architect_job(ctx, job).await
            }
            other => {
                warn!(event = other.kind(), "architect queue got an unexpected event");
                Ok(())
            }
        },
        QueueItem::Job(job) => run_architect_job(ctx, job).await,
    }
}

async fn intake(
    ctx: Arc<PipelineContext>,
    message: String,
    sender_id: String,
    sender_name: String,
    channel: String,
    thread_ts: Option<String>,
) -> DomainResult<()> {
    let design_id = Uuid::new_v4().to_string();
    let design = Design::new(&design_id, &message);
    ctx.designs.create(&design).await?;
    ctx.designs
        .record_intake(&IntakeRecord {
            design_id: design_id.clone(),
            channel,
            thread_ts,
            user_id: sender_id,
            user_name: sender_name.clone(),
            created_at: chrono::Utc::now(),
        })
        .await?;

    info!(design_id = %design_id, "design created from chat intake");
    ctx.notify(
        &design_id,
        &format!("Got it, {sender_name} — starting design for: {message}"),
    )
    .await;

    let job = AgentJob::new(AgentKind::Architect, TaskKind::Design, design_id);
    run_architect_job(ctx, job).await
}

async fn run_architect_job(ctx: Arc<PipelineContext>, mut job: AgentJob) -> DomainResult<()> {
    let design = ctx
        .designs
        .get(&job.design_id)
        .await?
        .ok_or_else(|| DomainError::DesignNotFound(job.design_id.clone()))?;

    let (key, prompt) = match job.task {
        TaskKind::Design => {
            let key = design_doc_key(0);
            let path = ctx.design_doc_path(&job.design_id, &key);
            job.revision = 0;
            let prompt = format!(
                "Produce a design document for the following request.\n\n\
                 Request: {}\n\n\
                 End the document with an '## Implementation Plan' section \
                 listing at most one '- [foundation]' bullet and one \
                 '- [feature]' bullet per independent piece of work.\n\
                 Target file: {}",
                design.description,
                path.display()
            );
            (key, prompt)
        }
        TaskKind::Feedback => {
            let revision = if job.revision > 0 {
                job.revision
            } else {
                next_revision(&ctx, &job.design_id).await?
            };
            job.revision = revision;
            let key = design_doc_key(revision);
            let path = ctx.design_doc_path(&job.design_id, &key);
            let previous = ctx
                .outputs
                .get(&job.design_id, &design_doc_key(revision.saturating_sub(1)))
                .await?;
            let prompt = format!(
                "Revise the design document at {} to address this feedback:\n\n{}\n\n\
                 Keep the '## Implementation Plan' section up to date.\n\
                 Target file: {}",
                previous.map(|o| o.path).unwrap_or_default(),
                job.comments.join("\n---\n"),
                path.display()
            );
            (key, prompt)
        }
        other => {
            warn!(task = %other, "architect queue got a non-architect task");
            return Ok(());
        }
    };

    let invocation = ctx
        .base_invocation("architect", prompt)
        .in_dir(&ctx.config.agent.repo_path);
    let result = ctx.supervisor.run(&invocation).await?;

    if result.success {
        let path = ctx.design_doc_path(&job.design_id, &key);
        materialize_output(&path, result.result_text()).await?;
    }

    ctx.emit(OrchestratorEvent::AgentCompleted { job, result });
    Ok(())
}

// ---------------------------------------------------------------------------
// Code writer
// ---------------------------------------------------------------------------

pub async fn code_writer_worker(ctx: Arc<PipelineContext>, item: QueueItem) -> DomainResult<()> {
    match item {
        QueueItem::Event(envelope) => match envelope.event {
            OrchestratorEvent::PrChangesRequested {
                pr_number,
                branch,
                comments,
            }
            | OrchestratorEvent::PrComment {
                pr_number,
                branch,
                comments,
            } => {
                let Some(pr) = ctx.prs.get(pr_number).await? else {
                    warn!(pr_number, "feedback for unknown PR, dropping");
                    return Ok(());
                };
                if pr.stage.is_terminal() {
                    return Ok(());
                }
                // Comment events may not carry the branch; resolve it.
                let branch = if branch.is_empty() {
                    match ctx.source.get_pr_branch(pr_number).await {
                        Ok(Some(branch)) => branch,
                        _ => {
                            warn!(pr_number, "could not resolve PR branch, dropping feedback");
                            return Ok(());
                        }
                    }
                } else {
                    branch
                };
                // Inline review comments give the agent the full picture,
                // not just the triggering message.
                let mut comments = comments;
                match ctx.source.get_pr_review_comments(pr_number).await {
                    Ok(inline) => {
                        let existing = comments.clone();
                        comments.extend(inline.into_iter().filter(|c| !existing.contains(c)))
                    }
                    Err(e) => warn!(pr_number, error = %e, "review comment fetch failed"),
                }
                let job = AgentJob::new(
                    AgentKind::CodeWriter,
                    TaskKind::HumanFeedback,
                    pr.design_id.clone(),
                )
                .with_pr(pr_number)
                .with_issue_key(pr.issue_key.clone())
                .with_branch(branch)
                .with_comments(comments);
                run_code_writer_job(ctx, job).await
            }
            other => {
                warn!(event = other.kind(), "code-writer queue got an unexpected event");
                Ok(())
            }
        },
        QueueItem::Job(job) => run_code_writer_job(ctx, job).await,
    }
}

async fn run_code_writer_job(ctx: Arc<PipelineContext>, job: AgentJob) -> DomainResult<()> {
    let branch = job.branch.clone().ok_or_else(|| {
        DomainError::ValidationFailed(format!(
            "code-writer {} job without a branch",
            job.task
        ))
    })?;

    let prompt = match job.task {
        TaskKind::Implementation => {
            let issue = job.issue_key.as_deref().unwrap_or("unknown");
            // Scratch output is scoped per issue key so parallel feature
            // work never collides on disk.
            let notes_dir =
                ctx.implementation_path(&job.design_id, issue, job.feature_slug.is_none());
            format!(
                "Implement issue {issue} on branch {branch} and open a pull request \
                 for it. The design document describes the intended behavior.\n\
                 Issue: {issue}\n\
                 Notes directory: {}\n\
                 Comments:\n{}",
                notes_dir.display(),
                job.comments.join("\n")
            )
        }
        TaskKind::CiFix => format!(
            "CI is failing on branch {branch} (PR #{}). Inspect the failure, fix it, \
             and push to the same branch.",
            job.pr_number.unwrap_or_default()
        ),
        TaskKind::ReviewFix => format!(
            "The automated review of PR #{} on branch {branch} found problems. \
             Address them and push to the same branch.\nFindings:\n{}",
            job.pr_number.unwrap_or_default(),
            job.comments.join("\n")
        ),
        TaskKind::HumanFeedback => format!(
            "A human reviewer left feedback on PR #{} (branch {branch}). Address \
             every comment and push to the same branch.\nComments:\n{}",
            job.pr_number.unwrap_or_default(),
            job.comments.join("\n")
        ),
        other => {
            warn!(task = %other, "code-writer queue got a non-code task");
            return Ok(());
        }
    };

    // Implementation creates the branch; every fix task works on it.
    let fresh_branch = job.task == TaskKind::Implementation && job.attempt == 0;
    let invocation = {
        let base = ctx
            .base_invocation("code_writer", prompt)
            .in_dir(&ctx.config.agent.repo_path);
        if fresh_branch {
            base.in_worktree(&branch, ctx.config.agent.keep_worktrees)
        } else {
            base.in_existing_worktree(&branch, ctx.config.agent.keep_worktrees)
        }
    };

    let result = ctx.supervisor.run(&invocation).await?;
    ctx.emit(OrchestratorEvent::AgentCompleted { job, result });
    Ok(())
}

// ---------------------------------------------------------------------------
// Reviewer
// ---------------------------------------------------------------------------

pub async fn reviewer_worker(ctx: Arc<PipelineContext>, item: QueueItem) -> DomainResult<()> {
    let job = match item {
        QueueItem::Job(job) => job,
        QueueItem::Event(envelope) => {
            warn!(event = envelope.event.kind(), "reviewer queue got an event");
            return Ok(());
        }
    };

    let prompt = match job.task {
        TaskKind::DesignReview => {
            let key = job
                .input_key
                .clone()
                .unwrap_or_else(|| design_doc_key(job.revision));
            let doc = ctx.outputs.get(&job.design_id, &key).await?;
            let Some(doc) = doc else {
                warn!(design_id = %job.design_id, key = %key, "design review without an output row");
                return Ok(());
            };
            format!(
                "Review the design document at {}. Answer PASS on the first line \
                 if it is ready for human review, otherwise FAIL followed by one \
                 finding per line.",
                doc.path
            )
        }
        TaskKind::CodeReview => format!(
            "Review pull request #{} on branch {}. Answer PASS on the first line \
             if the change is ready for human review, otherwise FAIL followed by \
             one finding per line.{}",
            job.pr_number.unwrap_or_default(),
            job.branch.as_deref().unwrap_or("unknown"),
            if job.comments.is_empty() {
                String::new()
            } else {
                format!("\nRe-review context:\n{}", job.comments.join("\n"))
            }
        ),
        other => {
            warn!(task = %other, "reviewer queue got a non-review task");
            return Ok(());
        }
    };

    let invocation = ctx
        .base_invocation("reviewer", prompt)
        .in_dir(&ctx.config.agent.repo_path);
    let result = ctx.supervisor.run(&invocation).await?;
    ctx.emit(OrchestratorEvent::AgentCompleted { job, result });
    Ok(())
}
