//! Named job queues with bounded worker pools.
//!
//! Each queue is an ordered stream drained by a single worker function
//! running with bounded parallelism. Jobs start in push order; the
//! concurrency cap trades order for throughput only among
//! simultaneously-ready jobs. Worker errors are logged and swallowed so
//! one bad job never stalls the stream.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Notify, Semaphore};
use tracing::{debug, error, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{AgentJob, Envelope};

/// The four queues of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueName {
    Architect,
    CodeWriter,
    Reviewer,
    Orchestrator,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Architect => "architect",
            Self::CodeWriter => "code_writer",
            Self::Reviewer => "reviewer",
            Self::Orchestrator => "orchestrator",
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What travels over a queue: an ingested event or an agent job produced
/// by a route decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueueItem {
    Event(Envelope),
    Job(AgentJob),
}

struct QueueShared {
    name: QueueName,
    pending: AtomicUsize,
    drained: Notify,
    destroyed: AtomicBool,
}

/// Handle to a running queue. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<QueueItem>,
    shared: Arc<QueueShared>,
}

impl JobQueue {
    /// Create a queue and start its worker pool.
    ///
    /// `concurrency` caps how many invocations of `worker` run at once;
    /// jobs are started strictly in push order.
    pub fn new<F, Fut>(name: QueueName, concurrency: usize, worker: F) -> Self
    where
        F: Fn(QueueItem) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DomainResult<()>> + Send + 'static,
    {
        let (tx, mut rx) = mpsc::unbounded_channel::<QueueItem>();
        let shared = Arc::new(QueueShared {
            name,
            pending: AtomicUsize::new(0),
            drained: Notify::new(),
            destroyed: AtomicBool::new(false),
        });

        let worker = Arc::new(worker);
        let pool = Arc::new(Semaphore::new(concurrency.max(1)));
        let loop_shared = shared.clone();

        tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                if loop_shared.destroyed.load(Ordering::SeqCst) {
                    finish_one(&loop_shared);
                    continue;
                }
                let Ok(permit) = pool.clone().acquire_owned().await else {
                    break;
                };
                let worker = worker.clone();
                let task_shared = loop_shared.clone();
                tokio::spawn(async move {
                    if let Err(e) = (*worker)(item).await {
                        error!(queue = %task_shared.name, error = %e, "queue worker failed");
                    }
                    drop(permit);
                    finish_one(&task_shared);
                });
            }
            debug!(queue = %loop_shared.name, "queue channel closed");
        });

        Self { tx, shared }
    }

    pub fn name(&self) -> QueueName {
        self.shared.name
    }

    /// Non-blocking append at tail.
    pub fn push(&self, item: QueueItem) {
        if self.shared.destroyed.load(Ordering::SeqCst) {
            warn!(queue = %self.shared.name, "push after destroy, dropping");
            return;
        }
        self.shared.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(item).is_err() {
            self.shared.pending.fetch_sub(1, Ordering::SeqCst);
            warn!(queue = %self.shared.name, "queue loop gone, dropping");
        }
    }

    pub fn push_event(&self, envelope: Envelope) {
        self.push(QueueItem::Event(envelope));
    }

    pub fn push_job(&self, job: AgentJob) {
        self.push(QueueItem::Job(job));
    }

    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::SeqCst)
    }

    /// Wait until every pushed job has finished.
    pub async fn drain(&self) {
        loop {
            let notified = self.shared.drained.notified();
            if self.shared.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Halt further processing. In-flight jobs run to completion; queued
    /// jobs are discarded. Safe to call repeatedly.
    pub fn destroy(&self) {
        self.shared.destroyed.store(true, Ordering::SeqCst);
    }
}

fn finish_one(shared: &QueueShared) {
    if shared.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
        shared.drained.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::DomainError;
    use crate::domain::models::{AgentJob, AgentKind, TaskKind};
    use std::sync::Mutex;
    use std::time::Duration;

    fn job(n: u32) -> QueueItem {
        QueueItem::Job(AgentJob::new(AgentKind::Architect, TaskKind::Design, format!("d-{n}")))
    }

    #[tokio::test]
    async fn jobs_run_in_push_order_at_concurrency_one() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in = seen.clone();
        let queue = JobQueue::new(QueueName::Orchestrator, 1, move |item| {
            let seen = seen_in.clone();
            async move {
                if let QueueItem::Job(j) = item {
                    seen.lock().unwrap().push(j.design_id);
                }
                Ok(())
            }
        });

        for n in 0..5 {
            queue.push(job(n));
        }
        queue.drain().await;

        let order = seen.lock().unwrap().clone();
        assert_eq!(order, vec!["d-0", "d-1", "d-2", "d-3", "d-4"]);
    }

    #[tokio::test]
    async fn worker_error_does_not_stop_the_next_job() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in = seen.clone();
        let queue = JobQueue::new(QueueName::Architect, 2, move |item| {
            let seen = seen_in.clone();
            async move {
                if let QueueItem::Job(j) = item {
                    if j.design_id == "d-0" {
                        return Err(DomainError::ValidationFailed("boom".into()));
                    }
                    seen.lock().unwrap().push(j.design_id);
                }
                Ok(())
            }
        });

        queue.push(job(0));
        queue.push(job(1));
        queue.drain().await;

        assert_eq!(seen.lock().unwrap().clone(), vec!["d-1"]);
    }

    #[tokio::test]
    async fn concurrency_cap_is_respected() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let (running_in, peak_in) = (running.clone(), peak.clone());

        let queue = JobQueue::new(QueueName::CodeWriter, 3, move |_item| {
            let running = running_in.clone();
            let peak = peak_in.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        });

        for n in 0..10 {
            queue.push(job(n));
        }
        queue.drain().await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 2, "pool should actually run in parallel");
    }

    #[tokio::test]
    async fn destroy_discards_queued_jobs_and_is_idempotent() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in = seen.clone();
        let queue = JobQueue::new(QueueName::Reviewer, 1, move |_item| {
            let seen = seen_in.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        queue.push(job(0));
        queue.drain().await;
        queue.destroy();
        queue.destroy();
        queue.push(job(1));
        queue.drain().await;

        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
