use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dwatch_core::{House, Legislator, LegislatorUpdate, NewLegislator, NewSpeech};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Upper bound of answerer rows the status query looks at.
pub const ANSWERER_SCAN_LIMIT: usize = 50;
/// Answerer rows echoed back in the status report.
pub const ANSWERER_SAMPLE_SIZE: usize = 10;

pub type NameIndex = HashMap<String, Uuid>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unexpected stored value: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegislatorInsert {
    Inserted(Uuid),
    /// Another writer created the same name first.
    AlreadyExists(Uuid),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechInsert {
    Inserted,
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnswererRow {
    pub name: String,
    pub current_position: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportStatus {
    pub legislators: u64,
    pub speeches: u64,
    pub representatives: u64,
    pub councillors: u64,
    pub answerers: u64,
    pub answerer_sample: Vec<AnswererRow>,
}

/// Speech projection used by in-memory breakdowns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpeechWindowRow {
    pub speech_id: String,
    pub legislator_id: Option<Uuid>,
    pub speaker_name: String,
    pub speaker_group: Option<String>,
    pub legislator_party: Option<String>,
    pub meeting_name: Option<String>,
    pub date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LegislatorSpeechCount {
    pub id: Uuid,
    pub name: String,
    pub current_party: Option<String>,
    pub house: Option<House>,
    pub speech_count: u64,
}

/// Row store used by the importer and the read-only views.
///
/// Every call is its own statement; callers never rely on cross-call transactions.
#[async_trait]
pub trait ImportStore: Send + Sync {
    async fn find_legislator_id(&self, name: &str) -> Result<Option<Uuid>, StoreError>;

    async fn insert_legislator(&self, row: &NewLegislator) -> Result<LegislatorInsert, StoreError>;

    /// Absent fields keep the stored value; seen dates only widen.
    async fn update_legislator(&self, id: Uuid, update: &LegislatorUpdate) -> Result<(), StoreError>;

    async fn legislator_name_index(&self) -> Result<NameIndex, StoreError>;

    async fn get_legislator(&self, id: Uuid) -> Result<Option<Legislator>, StoreError>;

    /// `None` clears the override and hands display back to the inferred position.
    async fn set_position_override(
        &self,
        id: Uuid,
        value: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Legislator, StoreError>;

    /// Never overwrites an existing row with the same `speech_id`.
    async fn insert_speech_ignore_conflict(&self, row: &NewSpeech) -> Result<SpeechInsert, StoreError>;

    /// Attaches speeches stored without a legislator to a legislator of the same name.
    async fn link_unmatched_speeches(&self) -> Result<u64, StoreError>;

    async fn import_status(&self, answerer_keywords: &[String]) -> Result<ImportStatus, StoreError>;

    /// Most recent speeches first.
    async fn speech_window(&self, limit: usize) -> Result<Vec<SpeechWindowRow>, StoreError>;

    /// Legislators ordered by speech count, highest first.
    async fn legislator_speech_counts(&self, limit: usize) -> Result<Vec<LegislatorSpeechCount>, StoreError>;
}
