//! maestro — chat-driven multi-agent engineering pipeline orchestrator.
//!
//! A task request enters through chat, an architect agent produces a
//! design document that cycles through an automated review gate into the
//! document store, and once a human approves the page the orchestrator
//! fans implementation out over code-writer agents, supervising their
//! subprocesses and shepherding every pull request through CI, automated
//! review, and merge.

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::{DomainError, DomainResult};
pub use domain::models::Config;
