//! The orchestrator brain.
//!
//! Runs as the worker of the orchestrator queue, whose concurrency of 1
//! serialises every route decision and state mutation — no locking is
//! needed anywhere below. Two kinds of input arrive here: `agent:completed`
//! events, routed through the `(agent, task)` table, and external pipeline
//! events (page approvals, CI results, PR reviews and merges).

use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    design_doc_key, review_passed, AgentJob, AgentKind, AgentRunResult, CheckStatus, Design,
    DesignOutput, DesignStage, DesignStatus, IssueFields, OrchestratorEvent, PrStage, PrState,
    TaskKind,
};
use crate::infrastructure::http::parsers::extract_issue_key;

use super::classifier::{classify_ci_failure, FailureClass};
use super::plan::{parse_plan, ImplementationPlan, PlanItem};
use super::queue::{JobQueue, QueueItem};
use super::workers::PipelineContext;

/// Handles to the three agent queues the router feeds.
#[derive(Clone)]
pub struct AgentQueues {
    pub architect: JobQueue,
    pub code_writer: JobQueue,
    pub reviewer: JobQueue,
}

impl AgentQueues {
    fn for_agent(&self, agent: AgentKind) -> &JobQueue {
        match agent {
            AgentKind::Architect => &self.architect,
            AgentKind::CodeWriter => &self.code_writer,
            AgentKind::Reviewer => &self.reviewer,
        }
    }
}

pub struct Router {
    ctx: Arc<PipelineContext>,
    queues: AgentQueues,
}

impl Router {
    pub fn new(ctx: Arc<PipelineContext>, queues: AgentQueues) -> Self {
        Self { ctx, queues }
    }

    /// Entry point bound to the orchestrator queue.
    pub async fn handle(&self, item: QueueItem) -> DomainResult<()> {
        match item {
            QueueItem::Event(envelope) => self.route_event(envelope.event).await,
            QueueItem::Job(job) => {
                warn!(agent = %job.agent, task = %job.task, "orchestrator queue got a job");
                Ok(())
            }
        }
    }

    async fn route_event(&self, event: OrchestratorEvent) -> DomainResult<()> {
        match event {
            OrchestratorEvent::AgentCompleted { job, result } => {
                self.on_agent_completed(job, result).await
            }
            OrchestratorEvent::PageApproved {
                page_id,
                design_id,
            } => self.on_page_approved(&page_id, &design_id).await,
            OrchestratorEvent::StageCompleted {
                design_id,
                from,
                to,
            } => self.on_stage_completed(&design_id, from, to).await,
            OrchestratorEvent::CiFailed {
                pr_number,
                check_run_id,
                ..
            } => self.on_ci_failed(pr_number, check_run_id).await,
            OrchestratorEvent::CiPassed { pr_number, .. } => self.on_ci_passed(pr_number).await,
            OrchestratorEvent::PrApproved { pr_number, .. } => {
                self.on_pr_approved(pr_number).await
            }
            OrchestratorEvent::PrMerged { pr_number, .. } => self.on_pr_merged(pr_number).await,
            other => {
                warn!(event = other.kind(), "orchestrator queue got an unroutable event");
                Ok(())
            }
        }
    }

    // -----------------------------------------------------------------------
    // (agent, task) route map
    // -----------------------------------------------------------------------

    async fn on_agent_completed(
        &self,
        job: AgentJob,
        result: AgentRunResult,
    ) -> DomainResult<()> {
        info!(
            agent = %job.agent,
            task = %job.task,
            design_id = %job.design_id,
            success = result.success,
            "routing agent completion"
        );

        match (job.agent, job.task) {
            (AgentKind::Architect, TaskKind::Design)
            | (AgentKind::Architect, TaskKind::Feedback) => {
                self.architect_output_done(job, result).await
            }
            (AgentKind::Reviewer, TaskKind::DesignReview) => {
                self.design_review_done(job, result).await
            }
            (AgentKind::CodeWriter, TaskKind::Implementation) => {
                self.implementation_done(job, result).await
            }
            (AgentKind::CodeWriter, TaskKind::CiFix) => self.ci_fix_done(job, result).await,
            (AgentKind::CodeWriter, TaskKind::ReviewFix)
            | (AgentKind::CodeWriter, TaskKind::HumanFeedback) => {
                self.review_fix_done(job, result).await
            }
            (AgentKind::Reviewer, TaskKind::CodeReview) => {
                self.code_review_done(job, result).await
            }
            (agent, task) => {
                warn!(agent = %agent, task = %task, "unknown route key, ignoring");
                Ok(())
            }
        }
    }

    /// `architect:design` / `architect:feedback` — persist the output path
    /// and hand the document to the review gate.
    async fn architect_output_done(
        &self,
        job: AgentJob,
        result: AgentRunResult,
    ) -> DomainResult<()> {
        if !result.success {
            return self.retry_or_fail(job, "architect run failed").await;
        }

        let key = design_doc_key(job.revision);
        let path = self.ctx.design_doc_path(&job.design_id, &key);
        self.ctx
            .outputs
            .upsert(&DesignOutput::new(
                &job.design_id,
                &key,
                path.to_string_lossy(),
            ))
            .await?;

        let review = AgentJob::new(AgentKind::Reviewer, TaskKind::DesignReview, &job.design_id)
            .with_revision(job.revision)
            .with_input_key(key);
        self.queues.reviewer.push_job(review);
        Ok(())
    }

    /// `reviewer:design_review` — publish on pass, cycle feedback on fail.
    async fn design_review_done(
        &self,
        job: AgentJob,
        result: AgentRunResult,
    ) -> DomainResult<()> {
        let design = self.design(&job.design_id).await?;

        if review_passed(&result) {
            self.publish_design_page(&design, &job).await?;
            return Ok(());
        }

        // Cap check happens before the increment so the counter never
        // exceeds the configured maximum.
        if design.review_attempts >= self.ctx.config.retries.max_review_retries {
            self.ctx
                .designs
                .update_status(&design.id, DesignStatus::Failed)
                .await?;
            self.ctx
                .notify(
                    &design.id,
                    "Failed: design review attempts exhausted, giving up.",
                )
                .await;
            return Ok(());
        }
        let attempts = self
            .ctx
            .designs
            .increment_review_attempts(&design.id)
            .await?;
        info!(design_id = %design.id, attempts, "design review failed, cycling feedback");

        let feedback = AgentJob::new(AgentKind::Architect, TaskKind::Feedback, &design.id)
            .with_comments(findings(&result));
        self.queues.architect.push_job(feedback);
        Ok(())
    }

    async fn publish_design_page(&self, design: &Design, job: &AgentJob) -> DomainResult<()> {
        let key = job
            .input_key
            .clone()
            .unwrap_or_else(|| design_doc_key(job.revision));
        let body = match self.ctx.outputs.get(&design.id, &key).await? {
            Some(output) => tokio::fs::read_to_string(&output.path)
                .await
                .unwrap_or_else(|e| {
                    warn!(path = %output.path, error = %e, "design doc unreadable, publishing stub");
                    design.description.clone()
                }),
            None => design.description.clone(),
        };
        let title = page_title(design);

        // Find-before-create keeps page publication idempotent.
        let page_id = match self.ctx.docs.find_page(&title).await? {
            Some(page) => {
                self.ctx
                    .docs
                    .update_page(&page.id, &title, &body, page.version + 1)
                    .await?;
                page.id
            }
            None => {
                let page = self
                    .ctx
                    .docs
                    .create_page(
                        &title,
                        &body,
                        self.ctx.config.doc_store.parent_page_id.as_deref(),
                    )
                    .await?;
                page.id
            }
        };

        if design.page_id.as_deref() != Some(page_id.as_str()) {
            self.ctx.designs.set_page_id(&design.id, &page_id).await?;
        }
        self.ctx
            .docs
            .set_content_state(&page_id, "content-state", "In Review")
            .await?;

        let link = format!(
            "{}/wiki/pages/{page_id}",
            self.ctx.config.doc_store.base_url.trim_end_matches('/')
        );
        self.ctx
            .notify(&design.id, &format!("Design ready for review: {link}"))
            .await;
        Ok(())
    }

    /// `code_writer:implementation` — verify the PR exists, create its
    /// state record, and start the automated review.
    async fn implementation_done(
        &self,
        job: AgentJob,
        result: AgentRunResult,
    ) -> DomainResult<()> {
        if !result.success {
            return self.retry_or_fail(job, "implementation run failed").await;
        }
        let Some(branch) = job.branch.clone() else {
            warn!(design_id = %job.design_id, "implementation job without branch");
            return Ok(());
        };

        let Some(pr) = self.ctx.source.find_pr(&branch).await? else {
            return self.retry_or_fail(job, "agent did not open a pull request").await;
        };

        if self.ctx.prs.get(pr.number).await?.is_none() {
            let design = self.design(&job.design_id).await?;
            // The job carries the issue key; the branch convention is the
            // fallback when it does not.
            let issue_key = job
                .issue_key
                .clone()
                .or_else(|| extract_issue_key(&branch))
                .unwrap_or_default();
            let parent_key = design.parent_key.clone().unwrap_or_default();
            let mut state = PrState::new(pr.number, &job.design_id, issue_key, parent_key);
            if let Some(ref slug) = job.feature_slug {
                state = state.with_feature_slug(slug.clone());
            }
            self.ctx.prs.create(&state).await?;
        }

        // CI starts on push in the source-control system; the code review
        // is ours to run.
        let review = AgentJob::new(AgentKind::Reviewer, TaskKind::CodeReview, &job.design_id)
            .with_pr(pr.number)
            .with_branch(branch);
        self.queues.reviewer.push_job(review);

        self.ctx
            .notify(
                &job.design_id,
                &format!("Pull request opened for {}: {}", state_issue(&job), pr.url),
            )
            .await;
        Ok(())
    }

    /// `code_writer:ci_fix` — a fix was pushed; CI reports the rest.
    async fn ci_fix_done(&self, job: AgentJob, result: AgentRunResult) -> DomainResult<()> {
        if !result.success {
            return self.retry_or_fail(job, "CI fix run failed").await;
        }
        let Some(pr_number) = job.pr_number else {
            return Ok(());
        };
        self.ctx
            .prs
            .update_ci_status(pr_number, CheckStatus::Pending)
            .await?;
        self.ctx
            .notify(&job.design_id, &format!("CI fix pushed for PR #{pr_number}."))
            .await;
        Ok(())
    }

    /// `code_writer:review_fix` / `code_writer:human_feedback` — re-run
    /// the automated review over the updated branch.
    async fn review_fix_done(&self, job: AgentJob, result: AgentRunResult) -> DomainResult<()> {
        if !result.success {
            return self.retry_or_fail(job, "review fix run failed").await;
        }
        let review = AgentJob::new(AgentKind::Reviewer, TaskKind::CodeReview, &job.design_id)
            .with_pr(job.pr_number.unwrap_or_default())
            .with_branch(job.branch.clone().unwrap_or_default())
            .with_comments(job.comments.clone());
        self.queues.reviewer.push_job(review);
        Ok(())
    }

    /// `reviewer:code_review` — record the verdict and either surface the
    /// PR to humans or cycle a fix.
    async fn code_review_done(&self, job: AgentJob, result: AgentRunResult) -> DomainResult<()> {
        let Some(pr_number) = job.pr_number else {
            warn!(design_id = %job.design_id, "code review without a PR number");
            return Ok(());
        };
        let Some(pr) = self.ctx.prs.get(pr_number).await? else {
            warn!(pr_number, "code review for unknown PR");
            return Ok(());
        };
        if pr.stage.is_terminal() {
            return Ok(());
        }

        if review_passed(&result) {
            self.ctx
                .prs
                .update_review_status(pr_number, CheckStatus::Passing)
                .await?;
            self.check_ready_for_human(pr_number).await?;
            return Ok(());
        }

        self.ctx
            .prs
            .update_review_status(pr_number, CheckStatus::Failing)
            .await?;

        if pr.review_attempts >= self.ctx.config.retries.max_review_retries {
            self.ctx.prs.update_stage(pr_number, PrStage::Failed).await?;
            self.ctx
                .notify(
                    &job.design_id,
                    &format!("Failed: PR #{pr_number} exhausted automated review attempts."),
                )
                .await;
            return Ok(());
        }
        self.ctx.prs.increment_review_attempts(pr_number).await?;

        let fix = AgentJob::new(AgentKind::CodeWriter, TaskKind::ReviewFix, &job.design_id)
            .with_pr(pr_number)
            .with_issue_key(pr.issue_key.clone())
            .with_branch(job.branch.clone().unwrap_or(pr_branch_fallback(&pr)))
            .with_comments(findings(&result));
        self.queues.code_writer.push_job(fix);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // External pipeline events
    // -----------------------------------------------------------------------

    /// `page:approved` — the human approved the design; move the design
    /// into implementation and announce the stage change.
    async fn on_page_approved(&self, page_id: &str, design_id: &str) -> DomainResult<()> {
        let design = match self.ctx.designs.get(design_id).await? {
            Some(design) => design,
            None => {
                warn!(design_id, page_id, "approval for unknown design");
                return Ok(());
            }
        };
        // The poller re-reports approval every tick; only the first one acts.
        if design.status == DesignStatus::Approved || design.stage != DesignStage::Design {
            return Ok(());
        }

        self.ctx
            .designs
            .update_status(design_id, DesignStatus::Approved)
            .await?;
        self.ctx
            .designs
            .update_stage(design_id, DesignStage::Implementation)
            .await?;
        self.ctx.emit(OrchestratorEvent::StageCompleted {
            design_id: design_id.to_string(),
            from: DesignStage::Design,
            to: DesignStage::Implementation,
        });
        Ok(())
    }

    /// `stage:completed (design → implementation)` — parse the plan,
    /// create tracker issues, and start the foundation (or fan out).
    async fn on_stage_completed(
        &self,
        design_id: &str,
        from: DesignStage,
        to: DesignStage,
    ) -> DomainResult<()> {
        if !(from == DesignStage::Design && to == DesignStage::Implementation) {
            warn!(design_id, %from, %to, "unhandled stage transition");
            return Ok(());
        }
        let design = self.design(design_id).await?;

        let plan = self.load_plan(design_id).await?;
        if plan.is_empty() {
            self.ctx
                .notify(
                    design_id,
                    "Design approved, but no implementation plan was found in the document.",
                )
                .await;
            return Ok(());
        }

        // Parent issue, created once.
        let parent_key = match design.parent_key.clone() {
            Some(key) => key,
            None => {
                let key = self
                    .ctx
                    .issues
                    .create_issue(&IssueFields::new(
                        page_title(&design),
                        design.description.clone(),
                    ))
                    .await?;
                self.ctx.designs.set_parent_key(design_id, &key).await?;
                key
            }
        };

        // Sub-task per plan item, skipping summary matches already there.
        let existing = self.ctx.issues.get_sub_tasks(&parent_key).await?;
        let resolve = |item: &PlanItem| -> Option<String> {
            existing
                .iter()
                .find(|sub| sub.summary == item.summary)
                .map(|sub| sub.key.clone())
        };

        let mut foundation_job = None;
        if let Some(ref item) = plan.foundation {
            let key = match resolve(item) {
                Some(key) => key,
                None => {
                    self.ctx
                        .issues
                        .create_sub_task(&parent_key, &IssueFields::new(&item.summary, &item.summary))
                        .await?
                }
            };
            foundation_job = Some(implementation_job(design_id, &key, item, None));
        }

        let mut feature_jobs = Vec::new();
        for item in &plan.features {
            let key = match resolve(item) {
                Some(key) => key,
                None => {
                    self.ctx
                        .issues
                        .create_sub_task(&parent_key, &IssueFields::new(&item.summary, &item.summary))
                        .await?
                }
            };
            feature_jobs.push(implementation_job(design_id, &key, item, Some(&item.slug)));
        }

        // The foundation PR gates the feature fan-out.
        if let Some(job) = foundation_job {
            self.queues.code_writer.push_job(job);
            self.ctx
                .notify(design_id, "Implementation started: foundation PR first.")
                .await;
        } else {
            let count = feature_jobs.len();
            for job in feature_jobs {
                self.queues.code_writer.push_job(job);
            }
            self.ctx
                .notify(
                    design_id,
                    &format!("Implementation started: {count} feature PR(s) in parallel."),
                )
                .await;
        }
        Ok(())
    }

    /// `ci:failed` — triage by log text, then bound the fix loop with the
    /// attempt counter.
    async fn on_ci_failed(&self, pr_number: i64, check_run_id: Option<i64>) -> DomainResult<()> {
        let Some(pr) = self.ctx.prs.get(pr_number).await? else {
            warn!(pr_number, "CI failure for unknown PR");
            return Ok(());
        };
        if pr.stage.is_terminal() {
            return Ok(());
        }

        self.ctx
            .prs
            .update_ci_status(pr_number, CheckStatus::Failing)
            .await?;

        let logs = match check_run_id {
            Some(id) => match self.ctx.source.get_check_run_logs(id).await {
                Ok(logs) => logs.unwrap_or_default(),
                Err(e) => {
                    warn!(pr_number, error = %e, "check-run log fetch failed");
                    String::new()
                }
            },
            None => String::new(),
        };

        let class = classify_ci_failure(&logs);
        info!(pr_number, class = %class, "CI failure triaged");

        match class {
            FailureClass::Environment => {
                self.ctx
                    .notify(
                        &pr.design_id,
                        &format!(
                            "CI failed for PR #{pr_number}: environment problem, manual fix needed.\n{}",
                            first_line(&logs)
                        ),
                    )
                    .await;
                Ok(())
            }
            FailureClass::Flaky if pr.ci_attempts >= 1 => {
                self.ctx
                    .notify(
                        &pr.design_id,
                        &format!("CI for PR #{pr_number} keeps flaking; escalating to a human."),
                    )
                    .await;
                Ok(())
            }
            FailureClass::AgentFixable | FailureClass::Flaky => {
                if pr.ci_attempts >= self.ctx.config.retries.max_ci_retries {
                    self.ctx.prs.update_stage(pr_number, PrStage::Failed).await?;
                    if let Err(e) = self
                        .ctx
                        .issues
                        .add_comment(
                            &pr.issue_key,
                            &format!("PR #{pr_number} exhausted its automated CI fix attempts."),
                        )
                        .await
                    {
                        warn!(issue_key = %pr.issue_key, error = %e, "issue comment failed");
                    }
                    self.ctx
                        .notify(
                            &pr.design_id,
                            &format!("Failed: PR #{pr_number} exhausted CI fix attempts."),
                        )
                        .await;
                    return Ok(());
                }
                self.ctx.prs.increment_ci_attempts(pr_number).await?;

                let branch = match self.ctx.source.get_pr_branch(pr_number).await {
                    Ok(Some(branch)) => branch,
                    _ => pr_branch_fallback(&pr),
                };
                let fix = AgentJob::new(AgentKind::CodeWriter, TaskKind::CiFix, &pr.design_id)
                    .with_pr(pr_number)
                    .with_issue_key(pr.issue_key.clone())
                    .with_branch(branch);
                self.queues.code_writer.push_job(fix);
                Ok(())
            }
        }
    }

    /// `ci:passed` — record it and check the ready-for-human gate.
    async fn on_ci_passed(&self, pr_number: i64) -> DomainResult<()> {
        let Some(pr) = self.ctx.prs.get(pr_number).await? else {
            warn!(pr_number, "CI pass for unknown PR");
            return Ok(());
        };
        if pr.stage.is_terminal() {
            return Ok(());
        }
        self.ctx
            .prs
            .update_ci_status(pr_number, CheckStatus::Passing)
            .await?;
        self.check_ready_for_human(pr_number).await
    }

    /// `pr:approved` — squash-merge (idempotently) and advance.
    async fn on_pr_approved(&self, pr_number: i64) -> DomainResult<()> {
        let Some(pr) = self.ctx.prs.get(pr_number).await? else {
            warn!(pr_number, "approval for unknown PR");
            return Ok(());
        };
        if pr.stage == PrStage::Merged {
            return Ok(());
        }

        // get-before-merge: skip the API call when already merged upstream.
        let already_merged = self
            .ctx
            .source
            .get_pr(pr_number)
            .await?
            .map(|p| p.merged)
            .unwrap_or(false);
        if !already_merged {
            self.ctx.source.merge_pr(pr_number).await?;
        }
        self.after_merge(pr).await
    }

    /// `pr:merged` — webhook confirmation, also covers manual merges.
    async fn on_pr_merged(&self, pr_number: i64) -> DomainResult<()> {
        let Some(pr) = self.ctx.prs.get(pr_number).await? else {
            warn!(pr_number, "merge event for unknown PR");
            return Ok(());
        };
        if pr.stage == PrStage::Merged {
            return Ok(());
        }
        self.after_merge(pr).await
    }

    /// Shared post-merge path: record the stage, close the sub-task, fan
    /// out features after a foundation merge, and complete the design when
    /// the last sibling lands.
    async fn after_merge(&self, pr: PrState) -> DomainResult<()> {
        self.ctx.prs.update_stage(pr.pr_number, PrStage::Merged).await?;

        if let Err(e) = self.ctx.issues.transition(&pr.issue_key, "Done").await {
            warn!(issue_key = %pr.issue_key, error = %e, "sub-task transition failed");
        }

        // A foundation merge unlocks the feature fan-out.
        if pr.feature_slug.is_none() {
            let fanned_out = self.fan_out_features(&pr).await?;
            if fanned_out > 0 {
                self.ctx
                    .notify(
                        &pr.design_id,
                        &format!(
                            "Foundation PR #{} merged — starting {fanned_out} feature PR(s).",
                            pr.pr_number
                        ),
                    )
                    .await;
                return Ok(());
            }
        }

        if self.ctx.prs.check_all_siblings_merged(&pr.design_id).await? {
            if let Err(e) = self.ctx.issues.transition(&pr.parent_key, "Done").await {
                warn!(parent_key = %pr.parent_key, error = %e, "parent transition failed");
            }
            self.ctx
                .designs
                .update_stage(&pr.design_id, DesignStage::Complete)
                .await?;
            self.ctx
                .notify(
                    &pr.design_id,
                    &format!("PR #{} merged. All PRs merged — design complete.", pr.pr_number),
                )
                .await;
        } else {
            self.ctx
                .notify(&pr.design_id, &format!("PR #{} merged.", pr.pr_number))
                .await;
        }
        Ok(())
    }

    async fn fan_out_features(&self, foundation: &PrState) -> DomainResult<usize> {
        let plan = self.load_plan(&foundation.design_id).await?;
        if plan.features.is_empty() {
            return Ok(0);
        }

        let existing_prs = self.ctx.prs.list_by_design(&foundation.design_id).await?;
        let sub_tasks = self
            .ctx
            .issues
            .get_sub_tasks(&foundation.parent_key)
            .await?;

        let mut started = 0;
        for item in &plan.features {
            let already_running = existing_prs
                .iter()
                .any(|pr| pr.feature_slug.as_deref() == Some(item.slug.as_str()));
            if already_running {
                continue;
            }

            let key = match sub_tasks.iter().find(|sub| sub.summary == item.summary) {
                Some(sub) => sub.key.clone(),
                None => {
                    self.ctx
                        .issues
                        .create_sub_task(
                            &foundation.parent_key,
                            &IssueFields::new(&item.summary, &item.summary),
                        )
                        .await?
                }
            };

            self.queues.code_writer.push_job(implementation_job(
                &foundation.design_id,
                &key,
                item,
                Some(&item.slug),
            ));
            started += 1;
        }
        Ok(started)
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn design(&self, design_id: &str) -> DomainResult<Design> {
        self.ctx
            .designs
            .get(design_id)
            .await?
            .ok_or_else(|| DomainError::DesignNotFound(design_id.to_string()))
    }

    async fn check_ready_for_human(&self, pr_number: i64) -> DomainResult<()> {
        if !self.ctx.prs.check_ready_for_human(pr_number).await? {
            return Ok(());
        }
        let Some(pr) = self.ctx.prs.get(pr_number).await? else {
            return Ok(());
        };
        if pr.stage == PrStage::Implementation {
            self.ctx.prs.update_stage(pr_number, PrStage::InReview).await?;
        }
        let url = match self.ctx.source.get_pr(pr_number).await {
            Ok(Some(upstream)) => upstream.url,
            _ => format!("PR #{pr_number}"),
        };
        self.ctx
            .notify(
                &pr.design_id,
                &format!("PR ready for human review: {url}"),
            )
            .await;
        Ok(())
    }

    /// Read and parse the newest design document revision.
    async fn load_plan(&self, design_id: &str) -> DomainResult<ImplementationPlan> {
        let outputs = self.ctx.outputs.list_by_design(design_id).await?;
        let latest = outputs
            .iter()
            .filter_map(|o| revision_of_key(&o.output_key).map(|rev| (rev, o)))
            .max_by_key(|(rev, _)| *rev)
            .map(|(_, o)| o);

        let Some(output) = latest else {
            return Ok(ImplementationPlan::default());
        };
        match tokio::fs::read_to_string(&output.path).await {
            Ok(document) => Ok(parse_plan(&document)),
            Err(e) => {
                warn!(path = %output.path, error = %e, "design doc unreadable");
                Ok(ImplementationPlan::default())
            }
        }
    }

    /// Re-queue a failed agent run once; after that, mark the owning
    /// design or PR failed and tell the humans.
    async fn retry_or_fail(&self, job: AgentJob, reason: &str) -> DomainResult<()> {
        if job.attempt == 0 {
            warn!(
                agent = %job.agent,
                task = %job.task,
                design_id = %job.design_id,
                reason,
                "agent run failed, retrying once"
            );
            let retried = job.retried();
            self.queues.for_agent(retried.agent).push_job(retried);
            return Ok(());
        }

        warn!(
            agent = %job.agent,
            task = %job.task,
            design_id = %job.design_id,
            reason,
            "agent run failed twice, giving up"
        );
        if let Some(pr_number) = job.pr_number {
            self.ctx.prs.update_stage(pr_number, PrStage::Failed).await?;
        } else {
            self.ctx
                .designs
                .update_status(&job.design_id, DesignStatus::Failed)
                .await?;
        }
        self.ctx
            .notify(&job.design_id, &format!("Failed: {reason}."))
            .await;
        Ok(())
    }
}

/// `[designId] first line of the description`, matching what the design-id
/// extraction on the polling side expects.
fn page_title(design: &Design) -> String {
    let summary = design.description.lines().next().unwrap_or("").trim();
    let summary = if summary.len() > 80 {
        &summary[..80]
    } else {
        summary
    };
    format!("[{}] {}", design.id, summary)
}

/// Revision encoded in an output key: `design_doc` → 0, `design_doc.rN` → N.
fn revision_of_key(key: &str) -> Option<u32> {
    if key == "design_doc" {
        return Some(0);
    }
    key.strip_prefix("design_doc.r")?.parse().ok()
}

/// Review findings: every non-empty line after the verdict line.
fn findings(result: &AgentRunResult) -> Vec<String> {
    let mut lines = result.result_text().lines();
    let first = lines.next().unwrap_or("").trim().to_string();
    let mut out: Vec<String> = lines
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect();
    let verdictish = first.to_ascii_uppercase();
    if !first.is_empty() && !verdictish.starts_with("PASS") && !verdictish.starts_with("FAIL") {
        out.insert(0, first);
    }
    if out.is_empty() {
        out.push("Review failed without findings.".to_string());
    }
    out
}

fn implementation_job(
    design_id: &str,
    issue_key: &str,
    item: &PlanItem,
    feature_slug: Option<&str>,
) -> AgentJob {
    let branch = format!("feature/{}-{}", issue_key.to_lowercase(), item.slug);
    let mut job = AgentJob::new(AgentKind::CodeWriter, TaskKind::Implementation, design_id)
        .with_issue_key(issue_key)
        .with_branch(branch)
        .with_comments(vec![item.summary.clone()]);
    if let Some(slug) = feature_slug {
        job = job.with_feature_slug(slug);
    }
    job
}

fn state_issue(job: &AgentJob) -> String {
    job.issue_key.clone().unwrap_or_else(|| "issue".to_string())
}

fn pr_branch_fallback(pr: &PrState) -> String {
    format!(
        "feature/{}-{}",
        pr.issue_key.to_lowercase(),
        pr.feature_slug.as_deref().unwrap_or("foundation")
    )
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::AgentRunResult;

    #[test]
    fn revision_parsing_round_trips_the_key_convention() {
        assert_eq!(revision_of_key("design_doc"), Some(0));
        assert_eq!(revision_of_key("design_doc.r3"), Some(3));
        assert_eq!(revision_of_key("design_doc.rx"), None);
        assert_eq!(revision_of_key("other"), None);
    }

    #[test]
    fn findings_drop_the_verdict_line() {
        let result =
            AgentRunResult::parse_output(r#"{"result":"FAIL\nmissing tests\n\nno error path"}"#, true);
        assert_eq!(findings(&result), vec!["missing tests", "no error path"]);
    }

    #[test]
    fn findings_keep_non_verdict_first_line() {
        let result = AgentRunResult::parse_output(r#"{"result":"timeout talking to API"}"#, false);
        assert_eq!(findings(&result), vec!["timeout talking to API"]);
    }

    #[test]
    fn empty_findings_get_a_placeholder() {
        let result = AgentRunResult::parse_output(r#"{"result":"FAIL"}"#, true);
        assert_eq!(findings(&result), vec!["Review failed without findings."]);
    }

    #[test]
    fn branch_names_embed_the_issue_key() {
        let item = PlanItem {
            summary: "Card payments".into(),
            slug: "card-payments".into(),
        };
        let job = implementation_job("d-1", "TOS-40", &item, Some("card-payments"));
        assert_eq!(job.branch.as_deref(), Some("feature/tos-40-card-payments"));
        assert_eq!(job.feature_slug.as_deref(), Some("card-payments"));
    }

    #[test]
    fn page_title_brackets_the_design_id() {
        let design = Design::new("d-1", "Build payments\nmore detail");
        assert_eq!(page_title(&design), "[d-1] Build payments");
    }
}
