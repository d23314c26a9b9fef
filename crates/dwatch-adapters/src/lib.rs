//! Record source contracts and the Diet proceedings speech API adapter.

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use dwatch_core::SpeechRecord;
use dwatch_storage::{FetchError, HttpClientConfig, HttpFetcher, PageArchive};
use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

pub const CRATE_NAME: &str = "dwatch-adapters";

pub const DEFAULT_KOKKAI_API_BASE: &str = "https://kokkai.ndl.go.jp/api";
/// Largest page the speech endpoint serves.
pub const MAX_PAGE_SIZE: u32 = 100;

/// One page of speech records plus the upstream paging metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechPage {
    pub session: u32,
    pub cursor: u32,
    pub total_available: u64,
    /// `None` once the page reached the end of the result set.
    pub next_cursor: Option<u32>,
    pub records: Vec<SpeechRecord>,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(#[from] FetchError),
    /// The upstream answered with a `message` envelope instead of records.
    #[error("upstream reported: {0}")]
    ErrorEnvelope(String),
    #[error("malformed speech envelope: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid source configuration: {0}")]
    Config(String),
}

#[async_trait]
pub trait RecordSource: Send + Sync {
    fn source_id(&self) -> &'static str;

    /// Fetches the records of `session` starting at the 1-based `cursor`.
    async fn fetch_page(&self, session: u32, cursor: u32, page_size: u32) -> Result<SpeechPage, SourceError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SpeechEnvelope {
    #[serde(default)]
    number_of_records: Option<u64>,
    #[serde(default)]
    next_record_position: Option<u64>,
    #[serde(default)]
    speech_record: Vec<SpeechRecord>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Vec<String>,
}

/// Parses a speech endpoint response body.
pub fn parse_speech_envelope(session: u32, cursor: u32, body: &[u8]) -> Result<SpeechPage, SourceError> {
    let envelope: SpeechEnvelope = serde_json::from_slice(body)?;

    if let Some(message) = envelope.message {
        let message = if envelope.details.is_empty() {
            message
        } else {
            format!("{message} ({})", envelope.details.join("; "))
        };
        return Err(SourceError::ErrorEnvelope(message));
    }

    let next_cursor = envelope
        .next_record_position
        .filter(|pos| *pos > 0)
        .and_then(|pos| u32::try_from(pos).ok());

    Ok(SpeechPage {
        session,
        cursor,
        total_available: envelope.number_of_records.unwrap_or(0),
        next_cursor,
        records: envelope.speech_record,
    })
}

#[derive(Debug, Clone)]
pub struct KokkaiSourceConfig {
    pub base_url: String,
    pub http: HttpClientConfig,
}

impl Default for KokkaiSourceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_KOKKAI_API_BASE.to_string(),
            http: HttpClientConfig {
                user_agent: Some("DemocracyWatcher/1.0".to_string()),
                ..Default::default()
            },
        }
    }
}

/// Live adapter for the National Diet Library proceedings speech API.
#[derive(Debug, Clone)]
pub struct KokkaiSpeechSource {
    http: HttpFetcher,
    base_url: String,
    archive: Option<PageArchive>,
}

impl KokkaiSpeechSource {
    pub fn new(config: KokkaiSourceConfig) -> Result<Self> {
        Ok(Self {
            http: HttpFetcher::new(config.http)?,
            base_url: config.base_url,
            archive: None,
        })
    }

    /// Keeps every raw response body before it is parsed.
    pub fn with_archive(mut self, archive: PageArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    pub fn page_url(&self, session: u32, cursor: u32, page_size: u32) -> Result<Url, SourceError> {
        let endpoint = format!("{}/speech", self.base_url.trim_end_matches('/'));
        let session = session.to_string();
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE).to_string();
        let cursor = cursor.max(1).to_string();
        Url::parse_with_params(
            &endpoint,
            [
                ("recordPacking", "json"),
                ("sessionFrom", session.as_str()),
                ("sessionTo", session.as_str()),
                ("maximumRecords", page_size.as_str()),
                ("startRecord", cursor.as_str()),
            ],
        )
        .map_err(|e| SourceError::Config(format!("{endpoint}: {e}")))
    }
}

#[async_trait]
impl RecordSource for KokkaiSpeechSource {
    fn source_id(&self) -> &'static str {
        "kokkai-speech"
    }

    async fn fetch_page(&self, session: u32, cursor: u32, page_size: u32) -> Result<SpeechPage, SourceError> {
        let url = self.page_url(session, cursor, page_size)?;
        let fetched_at = Utc::now();
        let response = self.http.fetch_bytes(self.source_id(), url.as_str()).await?;

        if let Some(archive) = &self.archive {
            if let Err(err) = archive
                .store_page(fetched_at, session, cursor, &response.body)
                .await
            {
                warn!(session, cursor, error = %err, "failed to archive raw page");
            }
        }

        parse_speech_envelope(session, cursor, &response.body)
    }
}

/// Serves captured envelopes named `session-{S}-start-{C}.json` from a directory.
#[derive(Debug, Clone)]
pub struct FixtureRecordSource {
    dir: PathBuf,
}

impl FixtureRecordSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn page_path(&self, session: u32, cursor: u32) -> PathBuf {
        self.dir.join(format!("session-{session}-start-{cursor}.json"))
    }
}

#[async_trait]
impl RecordSource for FixtureRecordSource {
    fn source_id(&self) -> &'static str {
        "fixture"
    }

    async fn fetch_page(&self, session: u32, cursor: u32, _page_size: u32) -> Result<SpeechPage, SourceError> {
        let path = self.page_path(session, cursor);
        let body = tokio::fs::read(&path)
            .await
            .map_err(|source| SourceError::Io { path, source })?;
        parse_speech_envelope(session, cursor, &body)
    }
}
