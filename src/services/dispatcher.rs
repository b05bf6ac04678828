//! Event dispatch fabric.
//!
//! Handlers self-declare what they match and which queue they feed.
//! Dispatch walks the registry in registration order and enqueues the
//! event on the FIRST matching handler's queue — handlers are never
//! invoked at dispatch time, and at most one queue receives any event.
//! Unmatched events are logged and dropped.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::domain::models::{Envelope, OrchestratorEvent};

use super::queue::{JobQueue, QueueName};

/// A self-declaring routing rule.
pub trait Handler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Pure predicate over the event; must not touch state.
    fn matches(&self, event: &OrchestratorEvent) -> bool;

    fn queue(&self) -> QueueName;
}

/// Routes any of a fixed set of event kinds to one queue.
pub struct KindHandler {
    name: &'static str,
    kinds: &'static [&'static str],
    queue: QueueName,
}

impl KindHandler {
    pub fn new(name: &'static str, kinds: &'static [&'static str], queue: QueueName) -> Self {
        Self { name, kinds, queue }
    }
}

impl Handler for KindHandler {
    fn name(&self) -> &'static str {
        self.name
    }

    fn matches(&self, event: &OrchestratorEvent) -> bool {
        self.kinds.contains(&event.kind())
    }

    fn queue(&self) -> QueueName {
        self.queue
    }
}

/// Ordered handler registry plus the queues it feeds.
pub struct Dispatcher {
    handlers: Vec<Box<dyn Handler>>,
    queues: HashMap<QueueName, JobQueue>,
}

impl Dispatcher {
    pub fn new(queues: HashMap<QueueName, JobQueue>) -> Self {
        Self {
            handlers: Vec::new(),
            queues,
        }
    }

    /// Registration order is the tie-break between overlapping handlers.
    pub fn register(&mut self, handler: Box<dyn Handler>) {
        self.handlers.push(handler);
    }

    /// The default registry for the pipeline.
    pub fn with_default_handlers(queues: HashMap<QueueName, JobQueue>) -> Self {
        let mut dispatcher = Self::new(queues);
        dispatcher.register(Box::new(KindHandler::new(
            "intake",
            &["task:requested"],
            QueueName::Architect,
        )));
        dispatcher.register(Box::new(KindHandler::new(
            "design_feedback",
            &["page:comment"],
            QueueName::Architect,
        )));
        dispatcher.register(Box::new(KindHandler::new(
            "pr_feedback",
            &["pr:changes_requested", "pr:comment"],
            QueueName::CodeWriter,
        )));
        dispatcher.register(Box::new(KindHandler::new(
            "pipeline_progress",
            &[
                "page:approved",
                "stage:completed",
                "agent:completed",
                "ci:failed",
                "ci:passed",
                "pr:approved",
                "pr:merged",
            ],
            QueueName::Orchestrator,
        )));
        dispatcher
    }

    /// Route one event to at most one queue.
    pub fn dispatch(&self, envelope: Envelope) {
        for handler in &self.handlers {
            if handler.matches(&envelope.event) {
                let queue_name = handler.queue();
                match self.queues.get(&queue_name) {
                    Some(queue) => {
                        debug!(
                            event = envelope.event.kind(),
                            handler = handler.name(),
                            queue = %queue_name,
                            "dispatching event"
                        );
                        queue.push_event(envelope);
                    }
                    None => warn!(
                        event = envelope.event.kind(),
                        queue = %queue_name,
                        "handler targets unknown queue, dropping event"
                    ),
                }
                return;
            }
        }
        warn!(event = envelope.event.kind(), "no handler matched, dropping event");
    }
}
