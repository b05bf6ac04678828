//! Orchestration services: queues, dispatch, supervision, and routing.

pub mod classifier;
pub mod dispatcher;
pub mod plan;
pub mod poller;
pub mod queue;
pub mod router;
pub mod supervisor;
pub mod workers;
pub mod worktree;

pub use classifier::{classify_ci_failure, FailureClass};
pub use dispatcher::{Dispatcher, Handler, KindHandler};
pub use plan::{parse_plan, slugify, ImplementationPlan, PlanItem};
pub use poller::{extract_design_id, PollingBridge};
pub use queue::{JobQueue, QueueItem, QueueName};
pub use router::{AgentQueues, Router};
pub use supervisor::{AgentSupervisor, SupervisorConfig};
pub use workers::PipelineContext;
pub use worktree::WorktreeManager;
