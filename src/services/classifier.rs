//! CI failure classification.
//!
//! Decides, from raw CI log text, whether a failure is something the
//! code-writer agent can fix, an environment problem a human must solve,
//! or a flake worth one blind retry.

use regex::Regex;
use std::sync::OnceLock;

/// Failure classes in triage-priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Test failures, lint errors, type errors, missing imports.
    AgentFixable,
    /// Missing secrets, image builds, dependency resolution. Never retried.
    Environment,
    /// Intermittent timeouts and network blips. Retried once, then escalated.
    Flaky,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentFixable => "agent-fixable",
            Self::Environment => "environment",
            Self::Flaky => "flaky",
        }
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const ENVIRONMENT_MARKERS: &[&str] = &[
    "missing secret",
    "secret not found",
    "env var not set",
    "environment variable",
    "docker build failed",
    "failed to build image",
    "could not resolve dependencies",
    "unable to resolve dependency",
    "eresolve",
    "authentication failed",
    "permission denied",
    "401 unauthorized",
    "403 forbidden",
];

const FLAKY_MARKERS: &[&str] = &[
    "etimedout",
    "econnreset",
    "econnrefused",
    "socket hang up",
    "network error",
    "temporarily unavailable",
    "503 service unavailable",
    "rate limit",
    "timed out waiting",
    "connection timed out",
];

const AGENT_FIXABLE_MARKERS: &[&str] = &[
    "test failed",
    "tests failed",
    "assertion",
    "expected",
    "lint",
    "eslint",
    "clippy",
    "cannot find module",
    "module not found",
    "modulenotfounderror",
    "importerror",
    "is not assignable",
    "syntaxerror",
    "type error",
    "compile error",
    "compilation failed",
    "undefined reference",
    "unresolved import",
];

fn type_error_code() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Compiler diagnostics like `error TS2322` or `error[E0308]`.
    RE.get_or_init(|| Regex::new(r"(?i)error\s+(TS\d+|\[E\d+\])").expect("static regex"))
}

/// Classify CI log text.
///
/// Environment problems dominate (retrying cannot help), agent-fixable
/// diagnostics come next, then flake markers. Logs matching nothing are
/// treated as agent-fixable so the attempt cap still bounds them.
pub fn classify_ci_failure(logs: &str) -> FailureClass {
    let lower = logs.to_lowercase();

    if ENVIRONMENT_MARKERS.iter().any(|m| lower.contains(m)) {
        return FailureClass::Environment;
    }
    if type_error_code().is_match(logs) || AGENT_FIXABLE_MARKERS.iter().any(|m| lower.contains(m))
    {
        return FailureClass::AgentFixable;
    }
    if FLAKY_MARKERS.iter().any(|m| lower.contains(m)) {
        return FailureClass::Flaky;
    }
    FailureClass::AgentFixable
}
