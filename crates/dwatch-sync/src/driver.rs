//! One-page-per-call import driver.
//!
//! Each call walks `Fetching -> Processing -> (Fetching(next) | Done)` or ends in
//! `Failed`, writes what it can and reports the cursor to resume from. Looping,
//! pacing and retries across pages belong to the caller.

use std::fmt;
use std::sync::Arc;

use dwatch_adapters::{RecordSource, SourceError, SpeechPage, MAX_PAGE_SIZE};
use dwatch_storage::{ImportStore, NameIndex, StoreError};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, info_span, warn, Instrument};

use crate::config::ClassificationRules;
use crate::extract::extract_speakers;
use crate::writer::{import_speeches, upsert_legislators};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportKind {
    Legislators,
    Speeches,
}

impl ImportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Legislators => "legislators",
            Self::Speeches => "speeches",
        }
    }
}

impl fmt::Display for ImportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub kind: ImportKind,
    pub session: u32,
    /// 1-based start record.
    pub cursor: u32,
    pub page_size: u32,
}

impl PageRequest {
    pub fn first(kind: ImportKind, session: u32) -> Self {
        Self {
            kind,
            session,
            cursor: 1,
            page_size: MAX_PAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverState {
    Fetching { cursor: u32 },
    Processing(SpeechPage),
    Done,
    Failed { reason: String },
}

/// Where a processed page leaves the cursor. A next cursor that does not move
/// past the current one ends the session.
pub fn state_after_page(cursor: u32, fetched: usize, total_available: u64, next_cursor: Option<u32>) -> DriverState {
    let reached_total = u64::from(cursor) + fetched as u64 >= total_available;
    match next_cursor {
        Some(next) if !reached_total && next > cursor => DriverState::Fetching { cursor: next },
        _ => DriverState::Done,
    }
}

fn is_stalled(cursor: u32, fetched: usize, total_available: u64, next_cursor: Option<u32>) -> bool {
    let reached_total = u64::from(cursor) + fetched as u64 >= total_available;
    !reached_total && next_cursor.is_some_and(|next| next <= cursor)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    /// More pages remain; resume at `next_start`.
    Advanced,
    Done,
    /// Upstream failure; nothing was written and the same cursor should be retried later.
    Failed,
}

/// Per-call status line for the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageReport {
    pub kind: ImportKind,
    pub session: u32,
    pub cursor: u32,
    pub status: PageStatus,
    pub total: u64,
    pub fetched: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speakers: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inserted: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imported: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<u64>,
    pub next_start: Option<u32>,
    pub done: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PageReport {
    fn empty(request: PageRequest, status: PageStatus) -> Self {
        Self {
            kind: request.kind,
            session: request.session,
            cursor: request.cursor,
            status,
            total: 0,
            fetched: 0,
            speakers: None,
            inserted: None,
            updated: None,
            imported: None,
            skipped: None,
            failed: None,
            next_start: None,
            done: status == PageStatus::Done,
            error: None,
        }
    }

    fn upstream_error(request: PageRequest, message: String) -> Self {
        Self {
            error: Some(message),
            ..Self::empty(request, PageStatus::Done)
        }
    }

    fn failed(request: PageRequest, reason: String) -> Self {
        Self {
            next_start: Some(request.cursor),
            error: Some(reason),
            ..Self::empty(request, PageStatus::Failed)
        }
    }
}

#[derive(Debug)]
struct CachedIndex {
    session: u32,
    names: Arc<NameIndex>,
}

/// Drives fetch, extract, classify and write for one page at a time.
pub struct ImportDriver {
    source: Arc<dyn RecordSource>,
    store: Arc<dyn ImportStore>,
    rules: Arc<ClassificationRules>,
    name_index: Mutex<Option<CachedIndex>>,
}

impl ImportDriver {
    pub fn new(source: Arc<dyn RecordSource>, store: Arc<dyn ImportStore>, rules: Arc<ClassificationRules>) -> Self {
        Self {
            source,
            store,
            rules,
            name_index: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<dyn ImportStore> {
        &self.store
    }

    pub fn rules(&self) -> &Arc<ClassificationRules> {
        &self.rules
    }

    pub async fn run_page(&self, request: PageRequest) -> PageReport {
        let request = PageRequest {
            cursor: request.cursor.max(1),
            page_size: request.page_size.clamp(1, MAX_PAGE_SIZE),
            ..request
        };
        let span = info_span!(
            "import_page",
            kind = %request.kind,
            session = request.session,
            cursor = request.cursor,
            source = self.source.source_id()
        );
        self.step(request).instrument(span).await
    }

    async fn step(&self, request: PageRequest) -> PageReport {
        let mut state = DriverState::Fetching { cursor: request.cursor };
        let mut report = PageReport::empty(request, PageStatus::Advanced);
        let mut processed = false;

        loop {
            state = match state {
                DriverState::Fetching { cursor } if !processed => {
                    match self.source.fetch_page(request.session, cursor, request.page_size).await {
                        Ok(page) => DriverState::Processing(page),
                        Err(SourceError::ErrorEnvelope(message)) => {
                            info!(%message, "source returned an error envelope; nothing to import");
                            return PageReport::upstream_error(request, message);
                        }
                        Err(err) => DriverState::Failed {
                            reason: err.to_string(),
                        },
                    }
                }
                DriverState::Fetching { cursor } => {
                    report.next_start = Some(cursor);
                    break;
                }
                DriverState::Processing(page) => {
                    processed = true;
                    report = self.process(request, &page).await;
                    let fetched = page.records.len();
                    if is_stalled(request.cursor, fetched, page.total_available, page.next_cursor) {
                        warn!(next = ?page.next_cursor, total = page.total_available, "source cursor did not advance");
                        report.error = Some(format!(
                            "source did not advance past cursor {} (total {})",
                            request.cursor, page.total_available
                        ));
                        report.next_start = None;
                    }
                    state_after_page(request.cursor, fetched, page.total_available, page.next_cursor)
                }
                DriverState::Done => {
                    report.status = PageStatus::Done;
                    report.done = true;
                    break;
                }
                DriverState::Failed { reason } => {
                    warn!(%reason, "page fetch failed; session halted at this cursor");
                    return PageReport::failed(request, reason);
                }
            };
        }

        info!(
            status = ?report.status,
            fetched = report.fetched,
            total = report.total,
            next_start = ?report.next_start,
            "page processed"
        );
        report
    }

    async fn process(&self, request: PageRequest, page: &SpeechPage) -> PageReport {
        let mut report = PageReport {
            total: page.total_available,
            fetched: page.records.len() as u64,
            next_start: page.next_cursor,
            ..PageReport::empty(request, PageStatus::Advanced)
        };

        match request.kind {
            ImportKind::Legislators => {
                let speakers = extract_speakers(&page.records, &self.rules);
                let tally = upsert_legislators(self.store.as_ref(), &speakers, &self.rules).await;
                if tally.inserted > 0 {
                    self.invalidate_name_index().await;
                }
                report.speakers = Some(speakers.len() as u64);
                report.inserted = Some(tally.inserted);
                report.updated = Some(tally.updated);
                report.skipped = Some(tally.skipped);
                report.failed = Some(tally.failed);
            }
            ImportKind::Speeches => {
                let tally = match self.name_index_for(request.session, request.cursor).await {
                    Ok(index) => import_speeches(self.store.as_ref(), &page.records, &index, &self.rules).await,
                    Err(err) => {
                        warn!(error = %err, "loading legislator names failed; importing without links");
                        import_speeches(self.store.as_ref(), &page.records, &NameIndex::new(), &self.rules).await
                    }
                };
                report.imported = Some(tally.imported);
                report.skipped = Some(tally.skipped);
                report.failed = Some(tally.failed);
            }
        }

        report
    }

    /// Reloaded per session, on the first page, or after this driver inserts legislators.
    /// Names added by other processes stay unlinked until `link_unmatched_speeches` runs.
    async fn name_index_for(&self, session: u32, cursor: u32) -> Result<Arc<NameIndex>, StoreError> {
        let mut cached = self.name_index.lock().await;
        if let Some(hit) = cached.as_ref() {
            if hit.session == session && cursor != 1 {
                return Ok(Arc::clone(&hit.names));
            }
        }
        let names = Arc::new(self.store.legislator_name_index().await?);
        info!(session, legislators = names.len(), "legislator name index loaded");
        *cached = Some(CachedIndex {
            session,
            names: Arc::clone(&names),
        });
        Ok(names)
    }

    pub async fn invalidate_name_index(&self) {
        self.name_index.lock().await.take();
    }
}
