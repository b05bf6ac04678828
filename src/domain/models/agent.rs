//! Agent job and run-result models.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The three agent roles the pipeline drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Architect,
    CodeWriter,
    Reviewer,
}

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Architect => "architect",
            Self::CodeWriter => "code_writer",
            Self::Reviewer => "reviewer",
        }
    }
}

impl std::fmt::Display for AgentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a given agent run is for. Paired with [`AgentKind`] this keys the
/// route map that decides the next pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Design,
    Feedback,
    DesignReview,
    Implementation,
    CiFix,
    ReviewFix,
    HumanFeedback,
    CodeReview,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Design => "design",
            Self::Feedback => "feedback",
            Self::DesignReview => "design_review",
            Self::Implementation => "implementation",
            Self::CiFix => "ci_fix",
            Self::ReviewFix => "review_fix",
            Self::HumanFeedback => "human_feedback",
            Self::CodeReview => "code_review",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of agent work placed on one of the agent queues.
///
/// Jobs carry identifiers and output paths only — file content never
/// crosses a queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentJob {
    pub agent: AgentKind,
    pub task: TaskKind,
    pub design_id: String,
    /// Design-doc revision this job reads or produces (0 = original).
    #[serde(default)]
    pub revision: u32,
    #[serde(default)]
    pub pr_number: Option<i64>,
    #[serde(default)]
    pub issue_key: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    /// Human or reviewer comments the agent should address.
    #[serde(default)]
    pub comments: Vec<String>,
    /// Output key of the artifact this job consumes, when any.
    #[serde(default)]
    pub input_key: Option<String>,
    /// How many times this exact job has already run and failed.
    #[serde(default)]
    pub attempt: u32,
    /// Feature slug for parallel feature work; `None` marks the
    /// foundation PR.
    #[serde(default)]
    pub feature_slug: Option<String>,
}

impl AgentJob {
    pub fn new(agent: AgentKind, task: TaskKind, design_id: impl Into<String>) -> Self {
        Self {
            agent,
            task,
            design_id: design_id.into(),
            revision: 0,
            pr_number: None,
            issue_key: None,
            branch: None,
            comments: Vec::new(),
            input_key: None,
            attempt: 0,
            feature_slug: None,
        }
    }

    pub fn with_feature_slug(mut self, slug: impl Into<String>) -> Self {
        self.feature_slug = Some(slug.into());
        self
    }

    /// The same job, marked as one more failed attempt.
    pub fn retried(mut self) -> Self {
        self.attempt += 1;
        self
    }

    pub fn with_revision(mut self, revision: u32) -> Self {
        self.revision = revision;
        self
    }

    pub fn with_pr(mut self, pr_number: i64) -> Self {
        self.pr_number = Some(pr_number);
        self
    }

    pub fn with_issue_key(mut self, key: impl Into<String>) -> Self {
        self.issue_key = Some(key.into());
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn with_comments(mut self, comments: Vec<String>) -> Self {
        self.comments = comments;
        self
    }

    pub fn with_input_key(mut self, key: impl Into<String>) -> Self {
        self.input_key = Some(key.into());
        self
    }
}

/// Isolated-workspace request for a single agent run.
#[derive(Debug, Clone)]
pub struct WorktreeSpec {
    /// Branch the worktree is created on.
    pub branch: String,
    /// Create the branch fresh; false checks out an existing branch.
    pub create_branch: bool,
    /// Skip removal after the run settles.
    pub keep: bool,
}

/// Everything the supervisor needs to launch one subprocess.
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    /// Value passed to `--agent`.
    pub agent_name: String,
    /// Prompt written to the subprocess's stdin.
    pub prompt: String,
    /// Comma-joined into `--allowedTools` when present.
    pub allowed_tools: Option<Vec<String>>,
    pub working_dir: PathBuf,
    pub worktree: Option<WorktreeSpec>,
}

impl AgentInvocation {
    pub fn new(agent_name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            prompt: prompt.into(),
            allowed_tools: None,
            working_dir: PathBuf::from("."),
            worktree: None,
        }
    }

    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = Some(tools);
        self
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    pub fn in_worktree(mut self, branch: impl Into<String>, keep: bool) -> Self {
        self.worktree = Some(WorktreeSpec {
            branch: branch.into(),
            create_branch: true,
            keep,
        });
        self
    }

    /// Worktree over a branch that already exists.
    pub fn in_existing_worktree(mut self, branch: impl Into<String>, keep: bool) -> Self {
        self.worktree = Some(WorktreeSpec {
            branch: branch.into(),
            create_branch: false,
            keep,
        });
        self
    }

    /// CLI argument list, excluding the binary itself.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            "--output-format".to_string(),
            "json".to_string(),
            "--agent".to_string(),
            self.agent_name.clone(),
        ];
        if let Some(ref tools) = self.allowed_tools {
            args.push("--allowedTools".to_string());
            args.push(tools.join(","));
        }
        args
    }
}

/// Outcome of a supervised agent run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRunResult {
    /// Exit code was zero and neither watchdog fired.
    pub success: bool,
    pub result: Option<String>,
    pub cost_usd: Option<f64>,
    pub duration_ms: Option<u64>,
    pub duration_api_ms: Option<u64>,
    pub num_turns: Option<u64>,
    pub is_error: Option<bool>,
    pub session_id: Option<String>,
    /// Wall-clock time measured by the supervisor.
    pub wall_ms: u64,
    /// The liveness watchdog killed the process.
    pub heartbeat_expired: bool,
}

impl AgentRunResult {
    /// Decode the subprocess's stdout.
    ///
    /// Fields are taken only when their runtime type matches; wrong-typed
    /// fields are dropped rather than coerced. Non-JSON output becomes
    /// `{result: raw}`. This never fails.
    pub fn parse_output(raw: &str, success: bool) -> Self {
        let mut out = Self {
            success,
            ..Self::default()
        };

        let trimmed = raw.trim();
        let parsed: Option<serde_json::Value> = serde_json::from_str(trimmed).ok();
        match parsed {
            Some(serde_json::Value::Object(map)) => {
                out.result = map.get("result").and_then(|v| v.as_str()).map(String::from);
                out.cost_usd = map.get("cost_usd").and_then(|v| v.as_f64());
                out.duration_ms = map.get("duration_ms").and_then(|v| v.as_u64());
                out.duration_api_ms = map.get("duration_api_ms").and_then(|v| v.as_u64());
                out.num_turns = map.get("num_turns").and_then(|v| v.as_u64());
                out.is_error = map.get("is_error").and_then(|v| v.as_bool());
                out.session_id = map
                    .get("session_id")
                    .and_then(|v| v.as_str())
                    .map(String::from);
            }
            _ => {
                if !trimmed.is_empty() {
                    out.result = Some(trimmed.to_string());
                }
            }
        }
        out
    }

    /// The agent's textual result, or empty when it produced none.
    pub fn result_text(&self) -> &str {
        self.result.as_deref().unwrap_or("")
    }
}

/// A review agent signals its verdict in the first line of its result.
///
/// `PASS` (any case, optionally followed by commentary) approves; anything
/// else is a list of findings to feed back.
pub fn review_passed(result: &AgentRunResult) -> bool {
    result.success
        && result
            .result_text()
            .lines()
            .next()
            .map(|line| line.trim().to_ascii_uppercase().starts_with("PASS"))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_output_takes_matching_fields() {
        let raw = r#"{"result":"done","cost_usd":0.42,"duration_ms":1200,"num_turns":7,"is_error":false,"session_id":"s-1"}"#;
        let out = AgentRunResult::parse_output(raw, true);
        assert!(out.success);
        assert_eq!(out.result.as_deref(), Some("done"));
        assert_eq!(out.cost_usd, Some(0.42));
        assert_eq!(out.duration_ms, Some(1200));
        assert_eq!(out.num_turns, Some(7));
        assert_eq!(out.is_error, Some(false));
        assert_eq!(out.session_id.as_deref(), Some("s-1"));
    }

    #[test]
    fn parse_output_drops_wrong_typed_fields() {
        let raw = r#"{"result":17,"cost_usd":"free","duration_ms":"fast","num_turns":3}"#;
        let out = AgentRunResult::parse_output(raw, true);
        assert!(out.result.is_none());
        assert!(out.cost_usd.is_none());
        assert!(out.duration_ms.is_none());
        assert_eq!(out.num_turns, Some(3));
    }

    #[test]
    fn parse_output_falls_back_to_raw_text() {
        let out = AgentRunResult::parse_output("not json at all", false);
        assert!(!out.success);
        assert_eq!(out.result.as_deref(), Some("not json at all"));
    }

    #[test]
    fn parse_output_empty_input() {
        let out = AgentRunResult::parse_output("", true);
        assert!(out.result.is_none());
    }

    #[test]
    fn review_verdict_reads_first_line() {
        let mut r = AgentRunResult::parse_output(r#"{"result":"PASS\nlooks good"}"#, true);
        assert!(review_passed(&r));
        r = AgentRunResult::parse_output(r#"{"result":"FAIL: missing error handling"}"#, true);
        assert!(!review_passed(&r));
        r = AgentRunResult::parse_output(r#"{"result":"PASS"}"#, false);
        assert!(!review_passed(&r), "exit failure overrides verdict");
    }

    #[test]
    fn invocation_args_shape() {
        let inv = AgentInvocation::new("architect", "do the thing")
            .with_allowed_tools(vec!["Read".into(), "Write".into()]);
        let args = inv.args();
        assert_eq!(
            args,
            vec!["-p", "--output-format", "json", "--agent", "architect", "--allowedTools", "Read,Write"]
        );
    }
}
