//! Folds a page of speech records into one profile per distinct speaker.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use dwatch_core::{non_empty, House, SpeakerProfile, SpeechRecord};

use crate::config::ClassificationRules;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileField {
    Yomi,
    Group,
    Position,
    House,
    Role,
    FirstSeen,
    LastSeen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeRule {
    /// A later non-empty value replaces the current one.
    OverwriteIfPresent,
    /// The first non-empty value sticks.
    KeepFirstNonEmpty,
    WidenMin,
    WidenMax,
}

/// How each profile attribute absorbs a further record of the same speaker.
pub const MERGE_POLICY: &[(ProfileField, MergeRule)] = &[
    (ProfileField::Yomi, MergeRule::OverwriteIfPresent),
    (ProfileField::Group, MergeRule::OverwriteIfPresent),
    (ProfileField::Position, MergeRule::OverwriteIfPresent),
    (ProfileField::House, MergeRule::OverwriteIfPresent),
    (ProfileField::Role, MergeRule::KeepFirstNonEmpty),
    (ProfileField::FirstSeen, MergeRule::WidenMin),
    (ProfileField::LastSeen, MergeRule::WidenMax),
];

pub type SpeakerMap = BTreeMap<String, SpeakerProfile>;

/// Builds the speaker map for one page. Excluded and blank speaker names are dropped.
pub fn extract_speakers(records: &[SpeechRecord], rules: &ClassificationRules) -> SpeakerMap {
    records
        .iter()
        .filter(|rec| !rules.is_excluded_speaker(rec.speaker_name()))
        .fold(SpeakerMap::new(), |mut speakers, rec| {
            let name = rec.speaker_name();
            let merged = match speakers.remove(name) {
                Some(existing) => merge_profile(existing, rec),
                None => seed_profile(rec),
            };
            speakers.insert(name.to_string(), merged);
            speakers
        })
}

pub fn seed_profile(rec: &SpeechRecord) -> SpeakerProfile {
    SpeakerProfile {
        name: rec.speaker_name().to_string(),
        yomi: owned(rec.speaker_yomi.as_deref()),
        group: owned(rec.speaker_group.as_deref()),
        position: owned(rec.speaker_position.as_deref()),
        house: rec.house(),
        role: owned(rec.speaker_role.as_deref()),
        first_seen: rec.date,
        last_seen: rec.date,
    }
}

/// Applies [`MERGE_POLICY`] field by field.
pub fn merge_profile(mut profile: SpeakerProfile, rec: &SpeechRecord) -> SpeakerProfile {
    for &(field, rule) in MERGE_POLICY {
        match field {
            ProfileField::Yomi => {
                profile.yomi = merge_value(rule, profile.yomi, owned(rec.speaker_yomi.as_deref()))
            }
            ProfileField::Group => {
                profile.group = merge_value(rule, profile.group, owned(rec.speaker_group.as_deref()))
            }
            ProfileField::Position => {
                profile.position =
                    merge_value(rule, profile.position, owned(rec.speaker_position.as_deref()))
            }
            ProfileField::House => profile.house = merge_value::<House>(rule, profile.house, rec.house()),
            ProfileField::Role => {
                profile.role = merge_value(rule, profile.role, owned(rec.speaker_role.as_deref()))
            }
            ProfileField::FirstSeen => profile.first_seen = merge_date(rule, profile.first_seen, rec.date),
            ProfileField::LastSeen => profile.last_seen = merge_date(rule, profile.last_seen, rec.date),
        }
    }
    profile
}

fn owned(value: Option<&str>) -> Option<String> {
    non_empty(value).map(str::to_string)
}

fn merge_value<T>(rule: MergeRule, current: Option<T>, incoming: Option<T>) -> Option<T> {
    match rule {
        MergeRule::OverwriteIfPresent => incoming.or(current),
        MergeRule::KeepFirstNonEmpty => current.or(incoming),
        // Dates only; optional attributes fall back to overwrite.
        MergeRule::WidenMin | MergeRule::WidenMax => incoming.or(current),
    }
}

fn merge_date(rule: MergeRule, current: NaiveDate, incoming: NaiveDate) -> NaiveDate {
    match rule {
        MergeRule::WidenMin => current.min(incoming),
        MergeRule::WidenMax => current.max(incoming),
        MergeRule::OverwriteIfPresent => incoming,
        MergeRule::KeepFirstNonEmpty => current,
    }
}
