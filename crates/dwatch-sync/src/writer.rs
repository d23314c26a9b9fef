//! Idempotent writes of legislators and speeches.

use dwatch_core::{non_empty, LegislatorUpdate, NewLegislator, NewSpeech, SpeakerProfile, SpeechRecord};
use dwatch_storage::{ImportStore, LegislatorInsert, NameIndex, SpeechInsert, StoreError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{debug, warn};

use crate::classify::{classify, Classification};
use crate::config::ClassificationRules;
use crate::extract::SpeakerMap;

/// Utterances shorter than this after prefix stripping are procedural noise.
pub const MIN_UTTERANCE_CHARS: usize = 10;
pub const MAX_UTTERANCE_CHARS: usize = 50_000;

static SPEAKER_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^○\S*\s*").expect("speaker prefix pattern is valid"));

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LegislatorTally {
    pub inserted: u64,
    pub updated: u64,
    /// Classifier skips plus rows the store refused.
    pub skipped: u64,
    /// The store-refused subset of `skipped`.
    pub failed: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SpeechTally {
    /// Rows written or already present under the same speech id.
    pub imported: u64,
    pub skipped: u64,
    pub failed: u64,
}

/// Strips the leading `○Speaker　` marker and caps the length in characters.
/// `None` when the remaining text is too short to keep.
pub fn clean_utterance(raw: &str) -> Option<String> {
    let stripped = SPEAKER_PREFIX.replace(raw, "");
    let len = stripped.chars().count();
    if len < MIN_UTTERANCE_CHARS {
        return None;
    }
    if len > MAX_UTTERANCE_CHARS {
        return Some(stripped.chars().take(MAX_UTTERANCE_CHARS).collect());
    }
    Some(stripped.into_owned())
}

/// Creates or refreshes one legislator per registrable speaker, matched by exact name.
pub async fn upsert_legislators(
    store: &dyn ImportStore,
    speakers: &SpeakerMap,
    rules: &ClassificationRules,
) -> LegislatorTally {
    let mut tally = LegislatorTally::default();

    for profile in speakers.values() {
        if let Classification::Skip(reason) = classify(profile, rules) {
            debug!(speaker = %profile.name, ?reason, "speaker not registered");
            tally.skipped += 1;
            continue;
        }

        match upsert_one(store, profile).await {
            Ok(Upserted::Inserted) => tally.inserted += 1,
            Ok(Upserted::Updated) => tally.updated += 1,
            Err(err) => {
                warn!(speaker = %profile.name, error = %err, "legislator upsert failed");
                tally.skipped += 1;
                tally.failed += 1;
            }
        }
    }

    tally
}

enum Upserted {
    Inserted,
    Updated,
}

async fn upsert_one(store: &dyn ImportStore, profile: &SpeakerProfile) -> Result<Upserted, StoreError> {
    if let Some(id) = store.find_legislator_id(&profile.name).await? {
        store.update_legislator(id, &LegislatorUpdate::from(profile)).await?;
        return Ok(Upserted::Updated);
    }

    match store.insert_legislator(&NewLegislator::from(profile)).await? {
        LegislatorInsert::Inserted(_) => Ok(Upserted::Inserted),
        LegislatorInsert::AlreadyExists(id) => {
            store.update_legislator(id, &LegislatorUpdate::from(profile)).await?;
            Ok(Upserted::Updated)
        }
    }
}

/// Builds the stored row for one record, or `None` when it is filtered out.
pub fn speech_row(rec: &SpeechRecord, index: &NameIndex, rules: &ClassificationRules) -> Option<NewSpeech> {
    let speaker = rec.speaker_name();
    if rules.is_excluded_speaker(speaker) {
        return None;
    }
    let content = clean_utterance(&rec.speech)?;

    Some(NewSpeech {
        speech_id: rec.speech_id.clone(),
        legislator_id: index.get(speaker).copied(),
        session: rec.session,
        house: rec.house(),
        meeting_name: non_empty(Some(rec.name_of_meeting.as_str())).map(str::to_string),
        speech_order: rec.speech_order,
        speaker_name: speaker.to_string(),
        speaker_group: non_empty(rec.speaker_group.as_deref()).map(str::to_string),
        speaker_position: non_empty(rec.speaker_position.as_deref()).map(str::to_string),
        content,
        speech_url: non_empty(rec.speech_url.as_deref()).map(str::to_string),
        date: rec.date,
    })
}

/// Inserts every keepable record, never overwriting an existing speech.
pub async fn import_speeches(
    store: &dyn ImportStore,
    records: &[SpeechRecord],
    index: &NameIndex,
    rules: &ClassificationRules,
) -> SpeechTally {
    let mut tally = SpeechTally::default();

    for rec in records {
        let Some(row) = speech_row(rec, index, rules) else {
            tally.skipped += 1;
            continue;
        };

        match store.insert_speech_ignore_conflict(&row).await {
            Ok(SpeechInsert::Inserted) | Ok(SpeechInsert::Conflict) => tally.imported += 1,
            Err(err) => {
                warn!(speech_id = %row.speech_id, error = %err, "speech insert failed");
                tally.skipped += 1;
                tally.failed += 1;
            }
        }
    }

    tally
}
