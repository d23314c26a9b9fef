//! Read-only rankings and breakdowns over stored rows.
//!
//! Every projection is a pure function over a bounded row window and returns an
//! empty list when there is nothing to count.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{Datelike, NaiveDate};
use dwatch_core::{non_empty, normalize_party, House, PartyCategory};
use dwatch_storage::{ImportStore, LegislatorSpeechCount, SpeechWindowRow, StoreError};
use serde::Serialize;
use uuid::Uuid;

/// Rows loaded for in-memory breakdowns.
pub const SPEECH_WINDOW: usize = 5_000;
pub const LEGISLATOR_WINDOW: usize = 5_000;
pub const TOP_LEGISLATORS: usize = 30;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartyStat {
    pub party: String,
    pub category: PartyCategory,
    pub css_class: &'static str,
    pub member_count: u64,
    pub speech_count: u64,
    /// Rounded speeches per member.
    pub avg_speeches: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedLegislator {
    pub rank: usize,
    pub id: Uuid,
    pub name: String,
    pub current_party: Option<String>,
    pub party_short_name: String,
    pub house: Option<House>,
    pub speech_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedCount {
    pub name: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartyCount {
    pub party: String,
    pub category: PartyCategory,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthCount {
    /// `YYYY-MM`.
    pub month: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthlyActivity {
    pub months: Vec<MonthCount>,
    /// Calendar months without a speech between the first and last active month.
    pub inactive_months: Vec<String>,
}

/// Members and speeches per short party name, busiest party first.
pub fn party_stats(rows: &[LegislatorSpeechCount]) -> Vec<PartyStat> {
    let mut grouped: BTreeMap<String, (PartyCategory, u64, u64)> = BTreeMap::new();
    for row in rows {
        let label = normalize_party(row.current_party.as_deref());
        let entry = grouped.entry(label.short_name).or_insert((label.category, 0, 0));
        entry.1 += 1;
        entry.2 += row.speech_count;
    }

    let mut stats = grouped
        .into_iter()
        .map(|(party, (category, members, speeches))| PartyStat {
            party,
            category,
            css_class: category.css_class(),
            member_count: members,
            speech_count: speeches,
            avg_speeches: rounded_ratio(speeches, members),
        })
        .collect::<Vec<_>>();
    stats.sort_by(|a, b| b.speech_count.cmp(&a.speech_count).then_with(|| a.party.cmp(&b.party)));
    stats
}

fn rounded_ratio(numerator: u64, denominator: u64) -> u64 {
    if denominator == 0 {
        return 0;
    }
    (numerator + denominator / 2) / denominator
}

/// Legislators with at least one speech, most active first.
pub fn top_legislators(rows: &[LegislatorSpeechCount], limit: usize) -> Vec<RankedLegislator> {
    let mut active = rows.iter().filter(|r| r.speech_count > 0).collect::<Vec<_>>();
    active.sort_by(|a, b| b.speech_count.cmp(&a.speech_count).then_with(|| a.name.cmp(&b.name)));
    active
        .into_iter()
        .take(limit)
        .enumerate()
        .map(|(i, r)| RankedLegislator {
            rank: i + 1,
            id: r.id,
            name: r.name.clone(),
            current_party: r.current_party.clone(),
            party_short_name: normalize_party(r.current_party.as_deref()).short_name,
            house: r.house,
            speech_count: r.speech_count,
        })
        .collect()
}

/// Speeches per proceeding name.
pub fn committee_counts(rows: &[SpeechWindowRow]) -> Vec<NamedCount> {
    let mut counts: HashMap<&str, u64> = HashMap::new();
    for name in rows.iter().filter_map(|r| non_empty(r.meeting_name.as_deref())) {
        *counts.entry(name).or_default() += 1;
    }
    let mut out = counts
        .into_iter()
        .map(|(name, count)| NamedCount {
            name: name.to_string(),
            count,
        })
        .collect::<Vec<_>>();
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    out
}

/// Speeches per short party name, using the linked legislator's party when known.
pub fn party_speech_counts(rows: &[SpeechWindowRow]) -> Vec<PartyCount> {
    let mut counts: HashMap<String, (PartyCategory, u64)> = HashMap::new();
    for row in rows {
        let raw = non_empty(row.legislator_party.as_deref()).or(non_empty(row.speaker_group.as_deref()));
        let label = normalize_party(raw);
        counts.entry(label.short_name).or_insert((label.category, 0)).1 += 1;
    }
    let mut out = counts
        .into_iter()
        .map(|(party, (category, count))| PartyCount { party, category, count })
        .collect::<Vec<_>>();
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.party.cmp(&b.party)));
    out
}

/// Speeches per calendar month, oldest first.
pub fn monthly_counts(rows: &[SpeechWindowRow]) -> Vec<MonthCount> {
    let mut counts: BTreeMap<(i32, u32), u64> = BTreeMap::new();
    for row in rows {
        *counts.entry((row.date.year(), row.date.month())).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|((year, month), count)| MonthCount {
            month: format!("{year:04}-{month:02}"),
            count,
        })
        .collect()
}

/// Gaps between the first and last month present in `months`.
pub fn inactive_months(months: &[MonthCount]) -> Vec<String> {
    let active = months
        .iter()
        .filter_map(|m| parse_month(&m.month))
        .collect::<BTreeSet<_>>();
    let (Some(&first), Some(&last)) = (active.first(), active.last()) else {
        return Vec::new();
    };

    let mut gaps = Vec::new();
    let mut current = first;
    while current < last {
        current = next_month(current);
        if !active.contains(&current) {
            gaps.push(format!("{:04}-{:02}", current.0, current.1));
        }
    }
    gaps
}

fn parse_month(value: &str) -> Option<(i32, u32)> {
    let date = NaiveDate::parse_from_str(&format!("{value}-01"), "%Y-%m-%d").ok()?;
    Some((date.year(), date.month()))
}

fn next_month((year, month): (i32, u32)) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

pub fn monthly_activity(rows: &[SpeechWindowRow]) -> MonthlyActivity {
    let months = monthly_counts(rows);
    let inactive = inactive_months(&months);
    MonthlyActivity {
        months,
        inactive_months: inactive,
    }
}

pub async fn load_party_stats(store: &dyn ImportStore) -> Result<Vec<PartyStat>, StoreError> {
    Ok(party_stats(&store.legislator_speech_counts(LEGISLATOR_WINDOW).await?))
}

pub async fn load_top_legislators(store: &dyn ImportStore) -> Result<Vec<RankedLegislator>, StoreError> {
    let rows = store.legislator_speech_counts(LEGISLATOR_WINDOW).await?;
    Ok(top_legislators(&rows, TOP_LEGISLATORS))
}

pub async fn load_committee_counts(store: &dyn ImportStore) -> Result<Vec<NamedCount>, StoreError> {
    Ok(committee_counts(&store.speech_window(SPEECH_WINDOW).await?))
}

pub async fn load_party_speech_counts(store: &dyn ImportStore) -> Result<Vec<PartyCount>, StoreError> {
    Ok(party_speech_counts(&store.speech_window(SPEECH_WINDOW).await?))
}

pub async fn load_monthly_activity(store: &dyn ImportStore) -> Result<MonthlyActivity, StoreError> {
    Ok(monthly_activity(&store.speech_window(SPEECH_WINDOW).await?))
}
