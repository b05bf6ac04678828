//! End-to-end pipeline tests.
//!
//! Real queues, workers, router, and SQLite store; fake external clients
//! and a scripted agent spawner. Chat intake is driven all the way to
//! design publication, approval fan-out, CI triage, and the final merge
//! gate.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use maestro::adapters::sqlite::{
    all_embedded_migrations, create_test_pool, Migrator, SqliteDesignOutputRepository,
    SqliteDesignRepository, SqlitePrStateRepository,
};
use maestro::domain::errors::{DomainError, DomainResult};
use maestro::domain::models::{
    AgentInvocation, CheckStatus, Config, DesignStatus, Envelope, EventSource, IssueFields,
    IssueSummary, OrchestratorEvent, Page, PageComment, PrStage, PullRequest,
};
use maestro::domain::ports::{
    AgentSpawner, ChatNotifier, DesignRepository, DocStore, IssueTracker, PrStateRepository,
    SourceControl,
};
use maestro::services::queue::{JobQueue, QueueName};
use maestro::services::router::{AgentQueues, Router};
use maestro::services::supervisor::{AgentSupervisor, SupervisorConfig};
use maestro::services::workers::{
    architect_worker, code_writer_worker, reviewer_worker, PipelineContext,
};
use maestro::services::worktree::WorktreeManager;
use maestro::services::Dispatcher;
use tempfile::TempDir;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Replays scripted stdout per agent name through real `sh` subprocesses,
/// so the supervisor races real pipes and exits.
struct ScriptedSpawner {
    tmp: TempDir,
    outputs: Mutex<HashMap<String, Vec<String>>>,
    invocations: Mutex<Vec<AgentInvocation>>,
}

impl ScriptedSpawner {
    fn new() -> Self {
        Self {
            tmp: TempDir::new().expect("spawner tmp dir"),
            outputs: Mutex::new(HashMap::new()),
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Queue one more scripted output for the named agent. The last
    /// output is reused once the queue empties.
    fn script(&self, agent: &str, result: serde_json::Value) {
        self.outputs
            .lock()
            .unwrap()
            .entry(agent.to_string())
            .or_default()
            .push(result.to_string());
    }

    fn ran(&self, agent: &str) -> usize {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .filter(|inv| inv.agent_name == agent)
            .count()
    }
}

#[async_trait]
impl AgentSpawner for ScriptedSpawner {
    async fn spawn(&self, invocation: &AgentInvocation) -> DomainResult<tokio::process::Child> {
        let output = {
            let mut outputs = self.outputs.lock().unwrap();
            let queue = outputs.entry(invocation.agent_name.clone()).or_default();
            if queue.len() > 1 {
                queue.remove(0)
            } else {
                queue
                    .first()
                    .cloned()
                    .unwrap_or_else(|| r#"{"result":"ok"}"#.to_string())
            }
        };
        self.invocations.lock().unwrap().push(invocation.clone());

        let path = self
            .tmp
            .path()
            .join(format!("out-{}.json", uuid::Uuid::new_v4()));
        std::fs::write(&path, output).map_err(|e| DomainError::IoError(e.to_string()))?;

        tokio::process::Command::new("sh")
            .arg("-c")
            .arg(format!("cat > /dev/null; cat '{}'", path.display()))
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DomainError::ExternalCallFailed(e.to_string()))
    }
}

#[derive(Default)]
struct FakeChat {
    messages: Mutex<Vec<String>>,
}

impl FakeChat {
    fn contains(&self, needle: &str) -> bool {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .any(|m| m.contains(needle))
    }
}

#[async_trait]
impl ChatNotifier for FakeChat {
    async fn send(&self, text: &str, _thread_ts: Option<&str>) -> DomainResult<()> {
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn post_message(
        &self,
        _channel: &str,
        text: &str,
        _thread_ts: Option<&str>,
    ) -> DomainResult<()> {
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn get_user_name(&self, _user_id: &str) -> DomainResult<String> {
        Ok("Ada".to_string())
    }
}

#[derive(Default)]
struct FakeDocStore {
    pages: Mutex<HashMap<String, Page>>,
    states: Mutex<HashMap<String, String>>,
    next_id: AtomicI64,
}

#[async_trait]
impl DocStore for FakeDocStore {
    async fn create_page(
        &self,
        title: &str,
        _body: &str,
        _parent_id: Option<&str>,
    ) -> DomainResult<Page> {
        let id = format!("p-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let page = Page {
            id: id.clone(),
            title: title.to_string(),
            version: 1,
        };
        self.pages.lock().unwrap().insert(id, page.clone());
        Ok(page)
    }

    async fn update_page(
        &self,
        page_id: &str,
        _title: &str,
        _body: &str,
        version: u32,
    ) -> DomainResult<()> {
        let mut pages = self.pages.lock().unwrap();
        let page = pages
            .get_mut(page_id)
            .ok_or_else(|| DomainError::ExternalCallFailed("no such page".into()))?;
        page.version = version;
        Ok(())
    }

    async fn find_page(&self, title: &str) -> DomainResult<Option<Page>> {
        Ok(self
            .pages
            .lock()
            .unwrap()
            .values()
            .find(|p| p.title == title)
            .cloned())
    }

    async fn get_content_state(&self, page_id: &str) -> DomainResult<Option<String>> {
        Ok(self.states.lock().unwrap().get(page_id).cloned())
    }

    async fn set_content_state(&self, page_id: &str, _key: &str, value: &str) -> DomainResult<()> {
        self.states
            .lock()
            .unwrap()
            .insert(page_id.to_string(), value.to_string());
        Ok(())
    }

    async fn get_pages_in_review(&self) -> DomainResult<Vec<Page>> {
        Ok(self.pages.lock().unwrap().values().cloned().collect())
    }

    async fn get_new_comments(
        &self,
        _page_id: &str,
        _since: DateTime<Utc>,
    ) -> DomainResult<Vec<PageComment>> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct FakeIssueTracker {
    next: AtomicI64,
    issues: Mutex<Vec<IssueSummary>>,
    sub_tasks: Mutex<HashMap<String, Vec<IssueSummary>>>,
    transitions: Mutex<Vec<(String, String)>>,
}

impl FakeIssueTracker {
    fn next_key(&self) -> String {
        format!("TOS-{}", self.next.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn transitioned(&self, key: &str, name: &str) -> bool {
        self.transitions
            .lock()
            .unwrap()
            .iter()
            .any(|(k, n)| k == key && n == name)
    }
}

#[async_trait]
impl IssueTracker for FakeIssueTracker {
    async fn create_issue(&self, fields: &IssueFields) -> DomainResult<String> {
        let key = self.next_key();
        self.issues.lock().unwrap().push(IssueSummary {
            key: key.clone(),
            summary: fields.summary.clone(),
            status: "To Do".into(),
        });
        Ok(key)
    }

    async fn create_sub_task(
        &self,
        parent_key: &str,
        fields: &IssueFields,
    ) -> DomainResult<String> {
        let key = self.next_key();
        self.sub_tasks
            .lock()
            .unwrap()
            .entry(parent_key.to_string())
            .or_default()
            .push(IssueSummary {
                key: key.clone(),
                summary: fields.summary.clone(),
                status: "To Do".into(),
            });
        Ok(key)
    }

    async fn get_sub_tasks(&self, parent_key: &str) -> DomainResult<Vec<IssueSummary>> {
        Ok(self
            .sub_tasks
            .lock()
            .unwrap()
            .get(parent_key)
            .cloned()
            .unwrap_or_default())
    }

    async fn transition(&self, issue_key: &str, transition_name: &str) -> DomainResult<()> {
        self.transitions
            .lock()
            .unwrap()
            .push((issue_key.to_string(), transition_name.to_string()));
        Ok(())
    }

    async fn add_comment(&self, _issue_key: &str, _body: &str) -> DomainResult<()> {
        Ok(())
    }
}

/// Hands out a PR per branch on `find_pr`, as if the code-writer agent
/// had opened one.
#[derive(Default)]
struct FakeSourceControl {
    next_number: AtomicI64,
    prs: Mutex<HashMap<i64, PullRequest>>,
    logs: Mutex<HashMap<i64, String>>,
    merges: Mutex<Vec<i64>>,
}

impl FakeSourceControl {
    fn set_logs(&self, run_id: i64, logs: &str) {
        self.logs.lock().unwrap().insert(run_id, logs.to_string());
    }

    fn merged(&self, number: i64) -> bool {
        self.merges.lock().unwrap().contains(&number)
    }
}

#[async_trait]
impl SourceControl for FakeSourceControl {
    async fn get_pr(&self, number: i64) -> DomainResult<Option<PullRequest>> {
        Ok(self.prs.lock().unwrap().get(&number).cloned())
    }

    async fn find_pr(&self, branch: &str) -> DomainResult<Option<PullRequest>> {
        let mut prs = self.prs.lock().unwrap();
        if let Some(existing) = prs.values().find(|pr| pr.branch == branch) {
            return Ok(Some(existing.clone()));
        }
        let number = 200 + self.next_number.fetch_add(1, Ordering::SeqCst);
        let pr = PullRequest {
            number,
            branch: branch.to_string(),
            title: format!("PR for {branch}"),
            merged: false,
            url: format!("https://example.test/pr/{number}"),
        };
        prs.insert(number, pr.clone());
        Ok(Some(pr))
    }

    async fn merge_pr(&self, number: i64) -> DomainResult<()> {
        let mut prs = self.prs.lock().unwrap();
        let pr = prs
            .get_mut(&number)
            .ok_or(DomainError::PrNotFound(number))?;
        pr.merged = true;
        self.merges.lock().unwrap().push(number);
        Ok(())
    }

    async fn get_pr_review_comments(&self, _number: i64) -> DomainResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn get_check_run_logs(&self, run_id: i64) -> DomainResult<Option<String>> {
        Ok(self.logs.lock().unwrap().get(&run_id).cloned())
    }

    async fn get_pr_branch(&self, number: i64) -> DomainResult<Option<String>> {
        Ok(self
            .prs
            .lock()
            .unwrap()
            .get(&number)
            .map(|pr| pr.branch.clone()))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    events: mpsc::UnboundedSender<Envelope>,
    designs: Arc<SqliteDesignRepository>,
    prs: Arc<SqlitePrStateRepository>,
    spawner: Arc<ScriptedSpawner>,
    chat: Arc<FakeChat>,
    docs: Arc<FakeDocStore>,
    issues: Arc<FakeIssueTracker>,
    source: Arc<FakeSourceControl>,
    _outputs_dir: TempDir,
    _repo_dir: TempDir,
}

fn git(repo: &PathBuf, args: &[&str]) {
    let status = std::process::Command::new("git")
        .args(args)
        .current_dir(repo)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .expect("git available");
    assert!(status.success(), "git {args:?} failed");
}

async fn start_pipeline() -> Harness {
    let outputs_dir = TempDir::new().unwrap();
    let repo_dir = TempDir::new().unwrap();
    let repo_path = repo_dir.path().to_path_buf();
    git(&repo_path, &["init", "-q", "-b", "main"]);
    git(&repo_path, &["config", "user.email", "test@example.test"]);
    git(&repo_path, &["config", "user.name", "Test"]);
    git(&repo_path, &["commit", "-q", "--allow-empty", "-m", "init"]);

    let mut config = Config::default();
    config.outputs.base_path = outputs_dir.path().to_string_lossy().into_owned();
    config.agent.repo_path = repo_path.to_string_lossy().into_owned();
    config.agent.timeout_ms = 10_000;
    config.agent.heartbeat_ms = 5_000;
    // Serialised code-writer keeps concurrent worktree setup out of the test.
    config.queues.code_writer = 1;

    let pool = create_test_pool().await.unwrap();
    Migrator::new(pool.clone())
        .run_embedded_migrations(all_embedded_migrations())
        .await
        .unwrap();
    let designs = Arc::new(SqliteDesignRepository::new(pool.clone()));
    let outputs = Arc::new(SqliteDesignOutputRepository::new(pool.clone()));
    let prs = Arc::new(SqlitePrStateRepository::new(pool));

    let spawner = Arc::new(ScriptedSpawner::new());
    let chat = Arc::new(FakeChat::default());
    let docs = Arc::new(FakeDocStore::default());
    let issues = Arc::new(FakeIssueTracker::default());
    let source = Arc::new(FakeSourceControl::default());

    let supervisor = Arc::new(AgentSupervisor::new(
        spawner.clone(),
        WorktreeManager::new(&repo_path),
        SupervisorConfig {
            timeout_ms: config.agent.timeout_ms,
            heartbeat_ms: config.agent.heartbeat_ms,
        },
    ));

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let ctx = Arc::new(PipelineContext {
        config: config.clone(),
        designs: designs.clone(),
        outputs,
        prs: prs.clone(),
        issues: issues.clone(),
        docs: docs.clone(),
        source: source.clone(),
        chat: chat.clone(),
        supervisor,
        events: events_tx.clone(),
    });

    let architect = {
        let ctx = ctx.clone();
        JobQueue::new(QueueName::Architect, config.queues.architect, move |item| {
            architect_worker(ctx.clone(), item)
        })
    };
    let code_writer = {
        let ctx = ctx.clone();
        JobQueue::new(QueueName::CodeWriter, config.queues.code_writer, move |item| {
            code_writer_worker(ctx.clone(), item)
        })
    };
    let reviewer = {
        let ctx = ctx.clone();
        JobQueue::new(QueueName::Reviewer, config.queues.reviewer, move |item| {
            reviewer_worker(ctx.clone(), item)
        })
    };
    let agent_queues = AgentQueues {
        architect: architect.clone(),
        code_writer: code_writer.clone(),
        reviewer: reviewer.clone(),
    };
    let router = Arc::new(Router::new(ctx, agent_queues.clone()));
    let orchestrator = JobQueue::new(QueueName::Orchestrator, 1, move |item| {
        let router = router.clone();
        async move { router.handle(item).await }
    });

    let mut queue_map = HashMap::new();
    queue_map.insert(QueueName::Architect, architect);
    queue_map.insert(QueueName::CodeWriter, code_writer);
    queue_map.insert(QueueName::Reviewer, reviewer);
    queue_map.insert(QueueName::Orchestrator, orchestrator);
    let dispatcher = Dispatcher::with_default_handlers(queue_map);

    tokio::spawn(async move {
        while let Some(envelope) = events_rx.recv().await {
            dispatcher.dispatch(envelope);
        }
    });

    Harness {
        events: events_tx,
        designs,
        prs,
        spawner,
        chat,
        docs,
        issues,
        source,
        _outputs_dir: outputs_dir,
        _repo_dir: repo_dir,
    }
}

impl Harness {
    fn dispatch(&self, source: EventSource, event: OrchestratorEvent) {
        self.events
            .send(Envelope::new(source, event))
            .expect("dispatch loop alive");
    }

    fn request_task(&self, message: &str) {
        self.dispatch(
            EventSource::Chat,
            OrchestratorEvent::TaskRequested {
                message: message.into(),
                sender_id: "U1".into(),
                sender_name: "Ada".into(),
                channel: "C1".into(),
                thread_ts: Some("1700000000.0001".into()),
            },
        );
    }

    async fn running_design_id(&self) -> String {
        let designs = self
            .designs
            .list_by_status(DesignStatus::Running)
            .await
            .unwrap();
        designs.first().expect("a running design").id.clone()
    }
}

async fn wait_for<F, Fut>(what: &str, condition: F)
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if condition().await {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for: {what}");
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

fn design_doc(plan_bullets: &str) -> serde_json::Value {
    serde_json::json!({
        "result": format!("# Design\n\nApproach prose.\n\n## Implementation Plan\n\n{plan_bullets}"),
        "num_turns": 4
    })
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn chat_intake_publishes_a_reviewed_design_page() {
    let harness = start_pipeline().await;
    harness
        .spawner
        .script("architect", design_doc("- [feature] Payments flow"));
    harness
        .spawner
        .script("reviewer", serde_json::json!({"result": "PASS\nlooks solid"}));

    harness.request_task("Build payments");

    wait_for("design page published", || async {
        let Some(id) = harness
            .designs
            .list_by_status(DesignStatus::Running)
            .await
            .unwrap()
            .first()
            .map(|d| d.id.clone())
        else {
            return false;
        };
        harness
            .designs
            .get(&id)
            .await
            .unwrap()
            .unwrap()
            .page_id
            .is_some()
    })
    .await;

    let design_id = harness.running_design_id().await;
    let design = harness.designs.get(&design_id).await.unwrap().unwrap();
    let page_id = design.page_id.unwrap();

    // Page title carries the bracketed design id the poller extracts.
    let pages = harness.docs.pages.lock().unwrap();
    let page = pages.get(&page_id).unwrap();
    assert!(page.title.starts_with(&format!("[{design_id}]")));
    drop(pages);

    assert_eq!(
        harness.docs.states.lock().unwrap().get(&page_id).unwrap(),
        "In Review"
    );
    assert!(harness.chat.contains("starting design"));
    assert!(harness.chat.contains("Design ready for review"));
    assert_eq!(harness.spawner.ran("architect"), 1);
    assert_eq!(harness.spawner.ran("reviewer"), 1);
}

#[tokio::test]
async fn failed_design_review_cycles_feedback_then_publishes() {
    let harness = start_pipeline().await;
    harness
        .spawner
        .script("architect", design_doc("- [feature] Payments flow"));
    harness
        .spawner
        .script("reviewer", serde_json::json!({"result": "FAIL\nmissing failure modes"}));
    harness
        .spawner
        .script("reviewer", serde_json::json!({"result": "PASS"}));

    harness.request_task("Build payments");

    wait_for("revised design published", || async {
        harness
            .designs
            .list_by_status(DesignStatus::Running)
            .await
            .unwrap()
            .first()
            .map(|d| d.page_id.is_some() && d.review_attempts == 1)
            .unwrap_or(false)
    })
    .await;

    // One original run plus one feedback revision.
    assert_eq!(harness.spawner.ran("architect"), 2);
    assert_eq!(harness.spawner.ran("reviewer"), 2);
}

#[tokio::test]
async fn approval_fans_out_and_merge_gate_completes_the_design() {
    let harness = start_pipeline().await;
    harness
        .spawner
        .script("architect", design_doc("- [feature] Payments flow"));
    harness
        .spawner
        .script("reviewer", serde_json::json!({"result": "PASS"}));
    harness
        .spawner
        .script("code_writer", serde_json::json!({"result": "implemented"}));

    harness.request_task("Build payments");
    wait_for("design page published", || async {
        harness
            .designs
            .list_by_status(DesignStatus::Running)
            .await
            .unwrap()
            .first()
            .map(|d| d.page_id.is_some())
            .unwrap_or(false)
    })
    .await;
    let design_id = harness.running_design_id().await;
    let page_id = harness
        .designs
        .get(&design_id)
        .await
        .unwrap()
        .unwrap()
        .page_id
        .unwrap();

    // Human approves the page (as the polling bridge would report).
    harness.dispatch(
        EventSource::DocStore,
        OrchestratorEvent::PageApproved {
            page_id,
            design_id: design_id.clone(),
        },
    );

    wait_for("PR state created and reviewed", || async {
        let prs = harness.prs.list_by_design(&design_id).await.unwrap();
        prs.first()
            .map(|pr| pr.review_status == CheckStatus::Passing)
            .unwrap_or(false)
    })
    .await;

    let pr = harness.prs.list_by_design(&design_id).await.unwrap()[0].clone();
    let design = harness.designs.get(&design_id).await.unwrap().unwrap();
    assert_eq!(design.status, DesignStatus::Approved);
    assert_eq!(design.parent_key.as_deref(), Some(pr.parent_key.as_str()));
    assert_eq!(pr.stage, PrStage::Implementation);
    assert!(pr.issue_key.starts_with("TOS-"));

    // CI reports green; both checks now pass.
    harness.dispatch(
        EventSource::SourceControl,
        OrchestratorEvent::CiPassed {
            pr_number: pr.pr_number,
            branch: String::new(),
        },
    );
    wait_for("PR ready for human review", || async {
        harness.prs.get(pr.pr_number).await.unwrap().unwrap().stage == PrStage::InReview
    })
    .await;
    assert!(harness.chat.contains("PR ready for human review"));

    // Human approves the PR: squash-merge, issue transitions, completion.
    harness.dispatch(
        EventSource::SourceControl,
        OrchestratorEvent::PrApproved {
            pr_number: pr.pr_number,
            branch: String::new(),
        },
    );
    wait_for("design complete", || async {
        harness
            .designs
            .get(&design_id)
            .await
            .unwrap()
            .unwrap()
            .stage
            == maestro::domain::models::DesignStage::Complete
    })
    .await;

    assert!(harness.source.merged(pr.pr_number));
    assert!(harness.issues.transitioned(&pr.issue_key, "Done"));
    assert!(harness.issues.transitioned(&pr.parent_key, "Done"));
    assert_eq!(
        harness.prs.get(pr.pr_number).await.unwrap().unwrap().stage,
        PrStage::Merged
    );
    assert!(harness.chat.contains("design complete"));
}

#[tokio::test]
async fn foundation_merge_unlocks_the_feature_fan_out() {
    let harness = start_pipeline().await;
    harness.spawner.script(
        "architect",
        design_doc("- [foundation] Schema\n- [feature] Payments\n- [feature] Refunds"),
    );
    harness
        .spawner
        .script("reviewer", serde_json::json!({"result": "PASS"}));
    harness
        .spawner
        .script("code_writer", serde_json::json!({"result": "implemented"}));

    harness.request_task("Build payments");
    wait_for("design page published", || async {
        harness
            .designs
            .list_by_status(DesignStatus::Running)
            .await
            .unwrap()
            .first()
            .map(|d| d.page_id.is_some())
            .unwrap_or(false)
    })
    .await;
    let design_id = harness.running_design_id().await;
    let page_id = harness
        .designs
        .get(&design_id)
        .await
        .unwrap()
        .unwrap()
        .page_id
        .unwrap();

    harness.dispatch(
        EventSource::DocStore,
        OrchestratorEvent::PageApproved {
            page_id,
            design_id: design_id.clone(),
        },
    );

    // Only the foundation PR starts before its merge.
    wait_for("foundation PR created", || async {
        harness.prs.list_by_design(&design_id).await.unwrap().len() == 1
    })
    .await;
    let foundation = harness.prs.list_by_design(&design_id).await.unwrap()[0].clone();
    assert!(foundation.feature_slug.is_none());
    assert!(harness.chat.contains("foundation PR first"));

    harness.dispatch(
        EventSource::SourceControl,
        OrchestratorEvent::PrMerged {
            pr_number: foundation.pr_number,
            branch: String::new(),
        },
    );

    wait_for("both feature PRs created", || async {
        harness.prs.list_by_design(&design_id).await.unwrap().len() == 3
    })
    .await;
    let prs = harness.prs.list_by_design(&design_id).await.unwrap();
    let slugs: Vec<_> = prs.iter().filter_map(|pr| pr.feature_slug.clone()).collect();
    assert!(slugs.contains(&"payments".to_string()));
    assert!(slugs.contains(&"refunds".to_string()));
    assert!(harness.chat.contains("Foundation PR"));
}

#[tokio::test]
async fn agent_fixable_ci_failure_triggers_a_bounded_fix_loop() {
    let harness = start_pipeline().await;
    harness
        .spawner
        .script("architect", design_doc("- [feature] Payments flow"));
    harness
        .spawner
        .script("reviewer", serde_json::json!({"result": "PASS"}));
    harness
        .spawner
        .script("code_writer", serde_json::json!({"result": "implemented"}));

    harness.request_task("Build payments");
    wait_for("design page published", || async {
        harness
            .designs
            .list_by_status(DesignStatus::Running)
            .await
            .unwrap()
            .first()
            .map(|d| d.page_id.is_some())
            .unwrap_or(false)
    })
    .await;
    let design_id = harness.running_design_id().await;
    let page_id = harness
        .designs
        .get(&design_id)
        .await
        .unwrap()
        .unwrap()
        .page_id
        .unwrap();
    harness.dispatch(
        EventSource::DocStore,
        OrchestratorEvent::PageApproved {
            page_id,
            design_id: design_id.clone(),
        },
    );
    wait_for("PR state created", || async {
        !harness.prs.list_by_design(&design_id).await.unwrap().is_empty()
    })
    .await;
    let pr = harness.prs.list_by_design(&design_id).await.unwrap()[0].clone();

    // A type error in the CI logs is agent-fixable.
    harness.source.set_logs(
        31,
        "src/pay.ts(4,3): error TS2322: Type 'string' is not assignable to type 'number'.",
    );
    let fixes_before = harness.spawner.ran("code_writer");
    harness.dispatch(
        EventSource::SourceControl,
        OrchestratorEvent::CiFailed {
            pr_number: pr.pr_number,
            branch: String::new(),
            check_run_id: Some(31),
        },
    );

    wait_for("CI fix pushed", || async {
        let pr = harness.prs.get(pr.pr_number).await.unwrap().unwrap();
        pr.ci_attempts == 1 && pr.ci_status == CheckStatus::Pending
    })
    .await;
    assert!(harness.spawner.ran("code_writer") > fixes_before);
    assert!(harness.chat.contains("CI fix pushed"));
}

#[tokio::test]
async fn environment_ci_failure_notifies_without_retry() {
    let harness = start_pipeline().await;
    harness
        .spawner
        .script("architect", design_doc("- [feature] Payments flow"));
    harness
        .spawner
        .script("reviewer", serde_json::json!({"result": "PASS"}));
    harness
        .spawner
        .script("code_writer", serde_json::json!({"result": "implemented"}));

    harness.request_task("Build payments");
    wait_for("design page published", || async {
        harness
            .designs
            .list_by_status(DesignStatus::Running)
            .await
            .unwrap()
            .first()
            .map(|d| d.page_id.is_some())
            .unwrap_or(false)
    })
    .await;
    let design_id = harness.running_design_id().await;
    let page_id = harness
        .designs
        .get(&design_id)
        .await
        .unwrap()
        .unwrap()
        .page_id
        .unwrap();
    harness.dispatch(
        EventSource::DocStore,
        OrchestratorEvent::PageApproved {
            page_id,
            design_id: design_id.clone(),
        },
    );
    wait_for("PR state created", || async {
        !harness.prs.list_by_design(&design_id).await.unwrap().is_empty()
    })
    .await;
    let pr = harness.prs.list_by_design(&design_id).await.unwrap()[0].clone();

    harness
        .source
        .set_logs(32, "Error: missing secret STRIPE_KEY in job context");
    harness.dispatch(
        EventSource::SourceControl,
        OrchestratorEvent::CiFailed {
            pr_number: pr.pr_number,
            branch: String::new(),
            check_run_id: Some(32),
        },
    );

    wait_for("environment notification", || async {
        harness.chat.contains("environment problem")
    })
    .await;
    // No fix attempt was spent on it.
    let pr = harness.prs.get(pr.pr_number).await.unwrap().unwrap();
    assert_eq!(pr.ci_attempts, 0);
    assert_eq!(pr.ci_status, CheckStatus::Failing);
}
