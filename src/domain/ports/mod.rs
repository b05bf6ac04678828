//! Port traits implemented by the adapters layer.

pub mod clients;
pub mod repositories;
pub mod spawner;

pub use clients::{ChatNotifier, DocStore, IssueTracker, SourceControl};
pub use repositories::{DesignOutputRepository, DesignRepository, PrStateRepository};
pub use spawner::AgentSpawner;
