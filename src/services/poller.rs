//! Polling bridge for the document store.
//!
//! The document store emits no webhooks, so a periodic puller synthesises
//! the `page:approved` and `page:comment` events the pipeline would
//! otherwise receive. The comment watermark advances only when a tick
//! completes, and the created-at filter is strictly greater-than, so a
//! comment is delivered exactly once.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::OnceLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::{Envelope, EventSource, OrchestratorEvent};
use crate::domain::ports::DocStore;

/// Content-state name that approves a design page.
const APPROVED_STATE: &str = "approved";

fn bracket_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*\[([^\]\s][^\]]*)\]").expect("static regex"))
}

fn uuid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
            .expect("static regex")
    })
}

/// Extract a design id from a page title.
///
/// A bracketed `[designId]` prefix wins; otherwise a whole-title UUID is
/// taken as the id. Anything else yields `None` and the page is skipped.
pub fn extract_design_id(title: &str) -> Option<String> {
    if let Some(caps) = bracket_re().captures(title) {
        return Some(caps[1].trim().to_string());
    }
    let trimmed = title.trim();
    if uuid_re().is_match(trimmed) {
        return Some(trimmed.to_lowercase());
    }
    None
}

pub struct PollingBridge {
    doc_store: Arc<dyn DocStore>,
    events: mpsc::UnboundedSender<Envelope>,
    interval: Duration,
}

impl PollingBridge {
    pub fn new(
        doc_store: Arc<dyn DocStore>,
        events: mpsc::UnboundedSender<Envelope>,
        interval: Duration,
    ) -> Self {
        Self {
            doc_store,
            events,
            interval,
        }
    }

    /// Run forever. Transient errors are absorbed; the watermark only
    /// moves forward on a completed tick.
    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "polling bridge started");
        let mut last_since = Utc::now();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of tokio's interval fires immediately; skip it so
        // startup does not race the migrations.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let next_since = Utc::now();
            match self.tick(last_since).await {
                Ok(emitted) => {
                    debug!(emitted, "poll tick completed");
                    last_since = next_since;
                }
                Err(e) => {
                    warn!(error = %e, "poll tick failed, keeping watermark");
                }
            }
        }
    }

    /// One pass over the pages in review. Returns how many events were
    /// synthesised. Per-page failures are absorbed so one bad page does
    /// not starve the rest.
    pub async fn tick(&self, since: DateTime<Utc>) -> DomainResult<usize> {
        let pages = self.doc_store.get_pages_in_review().await?;
        let mut emitted = 0;

        for page in pages {
            let Some(design_id) = extract_design_id(&page.title) else {
                debug!(page_id = %page.id, title = %page.title, "no design id in title, skipping");
                continue;
            };

            match self.doc_store.get_content_state(&page.id).await {
                Ok(Some(state)) if state.eq_ignore_ascii_case(APPROVED_STATE) => {
                    self.emit(OrchestratorEvent::PageApproved {
                        page_id: page.id.clone(),
                        design_id: design_id.clone(),
                    });
                    emitted += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(page_id = %page.id, error = %e, "content state fetch failed");
                    continue;
                }
            }

            match self.doc_store.get_new_comments(&page.id, since).await {
                Ok(comments) => {
                    // Strictly greater than the watermark; the client
                    // filters too, but the invariant is cheap to hold here.
                    for comment in comments.into_iter().filter(|c| c.created_at > since) {
                        self.emit(OrchestratorEvent::PageComment {
                            page_id: page.id.clone(),
                            design_id: design_id.clone(),
                            comments: vec![comment.body],
                        });
                        emitted += 1;
                    }
                }
                Err(e) => {
                    warn!(page_id = %page.id, error = %e, "comment fetch failed");
                }
            }
        }

        Ok(emitted)
    }

    fn emit(&self, event: OrchestratorEvent) {
        let envelope = Envelope::new(EventSource::DocStore, event);
        if self.events.send(envelope).is_err() {
            warn!("event channel closed, dropping polled event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Page, PageComment};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    #[test]
    fn bracketed_prefix_wins_over_uuid() {
        assert_eq!(
            extract_design_id("[d-42] Payments design"),
            Some("d-42".to_string())
        );
        assert_eq!(
            extract_design_id("0193a1f2-1111-4abc-8def-0123456789ab"),
            Some("0193a1f2-1111-4abc-8def-0123456789ab".to_string())
        );
        assert_eq!(extract_design_id("Payments design"), None);
        assert_eq!(extract_design_id("[] empty"), None);
    }

    struct FakeDocStore {
        pages: Vec<Page>,
        state: Option<String>,
        comments: Vec<PageComment>,
        comment_calls: Mutex<Vec<DateTime<Utc>>>,
    }

    #[async_trait]
    impl DocStore for FakeDocStore {
        async fn create_page(
            &self,
            _title: &str,
            _body: &str,
            _parent_id: Option<&str>,
        ) -> DomainResult<Page> {
            unimplemented!()
        }

        async fn update_page(
            &self,
            _page_id: &str,
            _title: &str,
            _body: &str,
            _version: u32,
        ) -> DomainResult<()> {
            unimplemented!()
        }

        async fn find_page(&self, _title: &str) -> DomainResult<Option<Page>> {
            Ok(None)
        }

        async fn get_content_state(&self, _page_id: &str) -> DomainResult<Option<String>> {
            Ok(self.state.clone())
        }

        async fn set_content_state(
            &self,
            _page_id: &str,
            _key: &str,
            _value: &str,
        ) -> DomainResult<()> {
            Ok(())
        }

        async fn get_pages_in_review(&self) -> DomainResult<Vec<Page>> {
            Ok(self.pages.clone())
        }

        async fn get_new_comments(
            &self,
            _page_id: &str,
            since: DateTime<Utc>,
        ) -> DomainResult<Vec<PageComment>> {
            self.comment_calls.lock().unwrap().push(since);
            Ok(self
                .comments
                .iter()
                .filter(|c| c.created_at > since)
                .cloned()
                .collect())
        }
    }

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn approved_page_and_new_comments_become_events() {
        let store = Arc::new(FakeDocStore {
            pages: vec![Page {
                id: "p-1".into(),
                title: "[d-1] Payments".into(),
                version: 3,
            }],
            state: Some("approved".into()),
            comments: vec![
                PageComment {
                    body: "old".into(),
                    author: "Ada".into(),
                    created_at: ts(0),
                },
                PageComment {
                    body: "new".into(),
                    author: "Ada".into(),
                    created_at: ts(10),
                },
            ],
            comment_calls: Mutex::new(Vec::new()),
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let bridge = PollingBridge::new(store, tx, Duration::from_secs(60));

        let emitted = bridge.tick(ts(0)).await.unwrap();
        assert_eq!(emitted, 2);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event.kind(), "page:approved");
        assert_eq!(first.source, EventSource::DocStore);

        let second = rx.recv().await.unwrap();
        match second.event {
            OrchestratorEvent::PageComment { comments, design_id, .. } => {
                assert_eq!(design_id, "d-1");
                // One event per comment, each carrying a singleton list.
                assert_eq!(comments, vec!["new".to_string()]);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn comment_at_exact_watermark_is_excluded() {
        let store = Arc::new(FakeDocStore {
            pages: vec![Page {
                id: "p-1".into(),
                title: "[d-1] Payments".into(),
                version: 1,
            }],
            state: Some("In Review".into()),
            comments: vec![PageComment {
                body: "boundary".into(),
                author: "Ada".into(),
                created_at: ts(0),
            }],
            comment_calls: Mutex::new(Vec::new()),
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let bridge = PollingBridge::new(store, tx, Duration::from_secs(60));

        let emitted = bridge.tick(ts(0)).await.unwrap();
        assert_eq!(emitted, 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn pages_without_design_id_are_skipped() {
        let store = Arc::new(FakeDocStore {
            pages: vec![Page {
                id: "p-1".into(),
                title: "Untitled scratch page".into(),
                version: 1,
            }],
            state: Some("approved".into()),
            comments: vec![],
            comment_calls: Mutex::new(Vec::new()),
        });

        let (tx, _rx) = mpsc::unbounded_channel();
        let bridge = PollingBridge::new(store.clone(), tx, Duration::from_secs(60));

        let emitted = bridge.tick(ts(0)).await.unwrap();
        assert_eq!(emitted, 0);
        // The comment feed was never consulted for a skipped page.
        assert!(store.comment_calls.lock().unwrap().is_empty());
    }
}
