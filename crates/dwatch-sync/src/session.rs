use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::driver::{ImportDriver, ImportKind, PageRequest, PageStatus};

/// Cumulative outcome of walking one session page by page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub kind: Option<ImportKind>,
    pub session: u32,
    pub pages: u32,
    pub total: u64,
    pub fetched: u64,
    pub speakers: u64,
    pub inserted: u64,
    pub updated: u64,
    pub imported: u64,
    pub skipped: u64,
    pub failed: u64,
    /// Cursor a later run should start from when the session did not finish.
    pub resume_from: Option<u32>,
    pub done: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionPlan {
    pub kind: ImportKind,
    pub session: u32,
    pub start: u32,
    pub page_size: u32,
    /// Pause between pages to stay polite to the upstream API.
    pub delay: Duration,
    pub max_pages: Option<u32>,
}

/// Calls the driver until the session is done, fails, or `max_pages` is reached.
pub async fn run_session(driver: &ImportDriver, plan: SessionPlan) -> SessionSummary {
    let mut summary = SessionSummary {
        kind: Some(plan.kind),
        session: plan.session,
        ..Default::default()
    };
    let mut cursor = plan.start.max(1);

    loop {
        let report = driver
            .run_page(PageRequest {
                kind: plan.kind,
                session: plan.session,
                cursor,
                page_size: plan.page_size,
            })
            .await;

        summary.pages += 1;
        summary.total = summary.total.max(report.total);
        summary.fetched += report.fetched;
        summary.speakers += report.speakers.unwrap_or(0);
        summary.inserted += report.inserted.unwrap_or(0);
        summary.updated += report.updated.unwrap_or(0);
        summary.imported += report.imported.unwrap_or(0);
        summary.skipped += report.skipped.unwrap_or(0);
        summary.failed += report.failed.unwrap_or(0);
        if report.error.is_some() {
            summary.error = report.error.clone();
        }

        match (report.status, report.next_start) {
            (PageStatus::Done, _) => {
                summary.done = true;
                summary.resume_from = None;
                break;
            }
            (PageStatus::Failed, next) => {
                summary.resume_from = next;
                warn!(session = plan.session, kind = %plan.kind, cursor, "session halted");
                break;
            }
            (PageStatus::Advanced, Some(next)) => {
                summary.resume_from = Some(next);
                cursor = next;
            }
            (PageStatus::Advanced, None) => {
                summary.done = true;
                break;
            }
        }

        if plan.max_pages.is_some_and(|max| summary.pages >= max) {
            info!(session = plan.session, pages = summary.pages, "page limit reached");
            break;
        }
        if !plan.delay.is_zero() {
            tokio::time::sleep(plan.delay).await;
        }
    }

    info!(
        session = plan.session,
        kind = %plan.kind,
        pages = summary.pages,
        fetched = summary.fetched,
        done = summary.done,
        "session finished"
    );
    summary
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use dwatch_adapters::{FixtureRecordSource, RecordSource, SourceError, SpeechPage};
    use dwatch_storage::{ImportStore, MemoryStore};

    use super::*;
    use crate::config::ClassificationRules;

    fn fixtures() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../fixtures/kokkai")
    }

    fn plan(kind: ImportKind, session: u32) -> SessionPlan {
        SessionPlan {
            kind,
            session,
            start: 1,
            page_size: 5,
            delay: Duration::ZERO,
            max_pages: None,
        }
    }

    fn fixture_driver(store: Arc<MemoryStore>) -> ImportDriver {
        ImportDriver::new(
            Arc::new(FixtureRecordSource::new(fixtures())),
            store,
            Arc::new(ClassificationRules::default()),
        )
    }

    #[tokio::test]
    async fn fixture_session_walks_both_pages() {
        let store = Arc::new(MemoryStore::new());
        let driver = fixture_driver(Arc::clone(&store));

        let legislators = run_session(&driver, plan(ImportKind::Legislators, 215)).await;
        assert!(legislators.done);
        assert_eq!(legislators.pages, 2);
        assert_eq!(legislators.fetched, 7);
        assert_eq!(legislators.inserted, 3);
        assert_eq!(legislators.updated, 1);
        assert_eq!(legislators.skipped, 2);

        let speeches = run_session(&driver, plan(ImportKind::Speeches, 215)).await;
        assert!(speeches.done);
        assert_eq!((speeches.imported, speeches.skipped), (5, 2));

        let status = store.import_status(&ClassificationRules::default().answerer_keywords).await.unwrap();
        assert_eq!(status.legislators, 3);
        assert_eq!(status.speeches, 5);
        assert_eq!(status.answerers, 1);
    }

    #[tokio::test]
    async fn missing_page_halts_with_a_resume_cursor() {
        let store = Arc::new(MemoryStore::new());
        let driver = fixture_driver(store);
        let summary = run_session(
            &driver,
            SessionPlan {
                start: 2,
                ..plan(ImportKind::Speeches, 215)
            },
        )
        .await;
        assert!(!summary.done);
        assert_eq!(summary.resume_from, Some(2));
        assert!(summary.error.is_some());
    }

    #[tokio::test]
    async fn page_limit_stops_early() {
        let store = Arc::new(MemoryStore::new());
        let driver = fixture_driver(store);
        let summary = run_session(
            &driver,
            SessionPlan {
                max_pages: Some(1),
                ..plan(ImportKind::Legislators, 215)
            },
        )
        .await;
        assert!(!summary.done);
        assert_eq!(summary.resume_from, Some(6));
    }

    #[tokio::test]
    async fn error_envelope_finishes_the_session() {
        let store = Arc::new(MemoryStore::new());
        let driver = fixture_driver(store);
        let summary = run_session(&driver, plan(ImportKind::Legislators, 999)).await;
        assert!(summary.done);
        assert_eq!(summary.pages, 1);
        assert!(summary.error.unwrap().contains("該当する会議録がありません"));
    }

    /// Always answers with an empty page pointing back at the requested cursor.
    #[derive(Default)]
    struct StuckSource {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RecordSource for StuckSource {
        fn source_id(&self) -> &'static str {
            "stuck"
        }

        async fn fetch_page(&self, session: u32, cursor: u32, _page_size: u32) -> Result<SpeechPage, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(SpeechPage {
                session,
                cursor,
                total_available: 250,
                next_cursor: Some(cursor),
                records: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn non_advancing_source_stops_after_one_page() {
        let source = Arc::new(StuckSource::default());
        let driver = ImportDriver::new(
            source.clone(),
            Arc::new(MemoryStore::new()),
            Arc::new(ClassificationRules::default()),
        );
        let summary = run_session(
            &driver,
            SessionPlan {
                start: 201,
                ..plan(ImportKind::Speeches, 215)
            },
        )
        .await;

        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(summary.pages, 1);
        assert!(summary.done);
        assert_eq!(summary.resume_from, None);
        assert!(summary.error.unwrap().contains("did not advance"));
    }
}
