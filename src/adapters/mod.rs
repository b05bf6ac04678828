//! Adapters: persistence and external-system clients.

pub mod agent_cli;
pub mod clients;
pub mod sqlite;
