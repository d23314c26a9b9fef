//! Import pipeline for Diet speeches: speaker extraction and merging, legislator
//! classification, idempotent writes, the page-at-a-time driver and the
//! read-only aggregation views.

mod classify;
mod config;
mod driver;
mod extract;
mod reports;
mod scheduler;
mod session;
mod views;
mod writer;

use std::sync::Arc;

use anyhow::{Context, Result};
use dwatch_adapters::{KokkaiSourceConfig, KokkaiSpeechSource, RecordSource};
use dwatch_storage::{BackoffPolicy, HttpClientConfig, PageArchive};

pub use classify::{classify, is_answerer, Classification, SkipReason};
pub use config::{parse_sessions, ClassificationRules, SyncConfig, DEFAULT_SESSIONS};
pub use driver::{state_after_page, DriverState, ImportDriver, ImportKind, PageReport, PageRequest, PageStatus};
pub use extract::{extract_speakers, merge_profile, seed_profile, MergeRule, ProfileField, SpeakerMap, MERGE_POLICY};
pub use reports::{render_brief, write_run_report, ImportRunRecord};
pub use scheduler::{maybe_build_scheduler, ScheduledImport};
pub use session::{run_session, SessionPlan, SessionSummary};
pub use views::{
    committee_counts, inactive_months, load_committee_counts, load_monthly_activity, load_party_speech_counts,
    load_party_stats, load_top_legislators, monthly_activity, monthly_counts, party_speech_counts, party_stats,
    top_legislators, MonthCount, MonthlyActivity, NamedCount, PartyCount, PartyStat, RankedLegislator,
    LEGISLATOR_WINDOW, SPEECH_WINDOW, TOP_LEGISLATORS,
};
pub use writer::{
    clean_utterance, import_speeches, speech_row, upsert_legislators, LegislatorTally, SpeechTally,
    MAX_UTTERANCE_CHARS, MIN_UTTERANCE_CHARS,
};

pub const CRATE_NAME: &str = "dwatch-sync";

/// Live Kokkai source wired from `config`, archiving raw pages when `ARTIFACTS_DIR` is set.
pub fn kokkai_source_from_config(config: &SyncConfig) -> Result<Arc<dyn RecordSource>> {
    let source = KokkaiSpeechSource::new(KokkaiSourceConfig {
        base_url: config.kokkai_api_base.clone(),
        http: HttpClientConfig {
            timeout: config.http_timeout(),
            user_agent: Some(config.user_agent.clone()),
            backoff: BackoffPolicy::default(),
        },
    })
    .context("building kokkai http client")?;

    Ok(match &config.artifacts_dir {
        Some(dir) => Arc::new(source.with_archive(PageArchive::new(dir.clone()))),
        None => Arc::new(source),
    })
}

pub fn load_rules(config: &SyncConfig) -> Result<Arc<ClassificationRules>> {
    ClassificationRules::load_or_default(&config.rules_path).map(Arc::new)
}
