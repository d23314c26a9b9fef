//! Core domain model for Democracy Watcher: Diet speech records, speaker
//! identities, legislators and stored speeches.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod party;

pub use party::{normalize_party, PartyCategory, PartyLabel, UNAFFILIATED_SHORT_NAME};

pub const CRATE_NAME: &str = "dwatch-core";

/// One of the two chambers of the Diet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum House {
    Representatives,
    Councillors,
}

impl House {
    /// Maps the upstream chamber label. Unknown labels are not an error.
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "衆議院" => Some(Self::Representatives),
            "参議院" => Some(Self::Councillors),
            _ => None,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "representatives" => Some(Self::Representatives),
            "councillors" => Some(Self::Councillors),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Representatives => "representatives",
            Self::Councillors => "councillors",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Representatives => "衆議院",
            Self::Councillors => "参議院",
        }
    }
}

/// One utterance as delivered by the Diet proceedings API. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechRecord {
    #[serde(rename = "speechID")]
    pub speech_id: String,
    #[serde(rename = "issueID", default)]
    pub issue_id: Option<String>,
    pub session: u32,
    pub name_of_house: String,
    pub name_of_meeting: String,
    #[serde(default)]
    pub issue: Option<String>,
    pub date: NaiveDate,
    #[serde(default)]
    pub speech_order: Option<u32>,
    #[serde(default)]
    pub speaker: String,
    #[serde(default)]
    pub speaker_yomi: Option<String>,
    #[serde(default)]
    pub speaker_group: Option<String>,
    #[serde(default)]
    pub speaker_position: Option<String>,
    #[serde(default)]
    pub speaker_role: Option<String>,
    #[serde(default)]
    pub speech: String,
    #[serde(rename = "speechURL", default)]
    pub speech_url: Option<String>,
    #[serde(rename = "meetingURL", default)]
    pub meeting_url: Option<String>,
}

impl SpeechRecord {
    pub fn speaker_name(&self) -> &str {
        self.speaker.trim()
    }

    pub fn house(&self) -> Option<House> {
        House::from_label(&self.name_of_house)
    }
}

/// Trimmed value, or `None` for absent and blank strings.
pub fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Deduplicated identity of one speaker within an import batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeakerProfile {
    pub name: String,
    pub yomi: Option<String>,
    pub group: Option<String>,
    pub position: Option<String>,
    pub house: Option<House>,
    pub role: Option<String>,
    pub first_seen: NaiveDate,
    pub last_seen: NaiveDate,
}

/// Where the displayed position of a legislator comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSource {
    Manual,
    SpeechInferred,
}

impl PositionSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::SpeechInferred => "speech_inferred",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "manual" => Some(Self::Manual),
            "speech_inferred" => Some(Self::SpeechInferred),
            _ => None,
        }
    }
}

/// Persisted political figure or officeholder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Legislator {
    pub id: Uuid,
    pub name: String,
    pub name_yomi: Option<String>,
    pub current_party: Option<String>,
    pub current_position: Option<String>,
    pub house: Option<House>,
    pub current_position_override: Option<String>,
    pub current_position_source: Option<PositionSource>,
    pub current_position_updated_at: Option<DateTime<Utc>>,
    pub first_seen: Option<NaiveDate>,
    pub last_seen: Option<NaiveDate>,
}

impl Legislator {
    /// The curated override always wins over the position inferred from speeches.
    pub fn display_position(&self) -> Option<&str> {
        non_empty(self.current_position_override.as_deref())
            .or_else(|| non_empty(self.current_position.as_deref()))
    }
}

/// Row seeded from a speaker profile on first encounter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewLegislator {
    pub name: String,
    pub name_yomi: Option<String>,
    pub current_party: Option<String>,
    pub current_position: Option<String>,
    pub house: Option<House>,
    pub first_seen: NaiveDate,
    pub last_seen: NaiveDate,
}

impl From<&SpeakerProfile> for NewLegislator {
    fn from(profile: &SpeakerProfile) -> Self {
        Self {
            name: profile.name.clone(),
            name_yomi: profile.yomi.clone(),
            current_party: profile.group.clone(),
            current_position: profile.position.clone(),
            house: profile.house,
            first_seen: profile.first_seen,
            last_seen: profile.last_seen,
        }
    }
}

/// Refresh applied to an existing legislator. `None` fields keep the stored value;
/// seen dates only ever widen the stored range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LegislatorUpdate {
    pub name_yomi: Option<String>,
    pub current_party: Option<String>,
    pub current_position: Option<String>,
    pub house: Option<House>,
    pub first_seen: NaiveDate,
    pub last_seen: NaiveDate,
}

impl From<&SpeakerProfile> for LegislatorUpdate {
    fn from(profile: &SpeakerProfile) -> Self {
        Self {
            name_yomi: profile.yomi.clone(),
            current_party: profile.group.clone(),
            current_position: profile.position.clone(),
            house: profile.house,
            first_seen: profile.first_seen,
            last_seen: profile.last_seen,
        }
    }
}

/// Speech row ready to be written with insert-or-ignore semantics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSpeech {
    pub speech_id: String,
    pub legislator_id: Option<Uuid>,
    pub session: u32,
    pub house: Option<House>,
    pub meeting_name: Option<String>,
    pub speech_order: Option<u32>,
    pub speaker_name: String,
    pub speaker_group: Option<String>,
    pub speaker_position: Option<String>,
    pub content: String,
    pub speech_url: Option<String>,
    pub date: NaiveDate,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legislator(position: Option<&str>, override_position: Option<&str>) -> Legislator {
        Legislator {
            id: Uuid::new_v4(),
            name: "山田太郎".into(),
            name_yomi: None,
            current_party: Some("自由民主党".into()),
            current_position: position.map(Into::into),
            house: Some(House::Representatives),
            current_position_override: override_position.map(Into::into),
            current_position_source: None,
            current_position_updated_at: None,
            first_seen: None,
            last_seen: None,
        }
    }

    #[test]
    fn house_labels_map_both_ways() {
        assert_eq!(House::from_label("衆議院"), Some(House::Representatives));
        assert_eq!(House::from_label("参議院"), Some(House::Councillors));
        assert_eq!(House::from_label("両院協議会"), None);
        assert_eq!(House::parse(House::Councillors.as_str()), Some(House::Councillors));
        assert_eq!(House::Representatives.label(), "衆議院");
    }

    #[test]
    fn override_position_takes_precedence() {
        let leg = legislator(Some("外務大臣"), Some("内閣総理大臣"));
        assert_eq!(leg.display_position(), Some("内閣総理大臣"));

        let leg = legislator(Some("外務大臣"), None);
        assert_eq!(leg.display_position(), Some("外務大臣"));

        let leg = legislator(Some("外務大臣"), Some("  "));
        assert_eq!(leg.display_position(), Some("外務大臣"));
    }

    #[test]
    fn speech_record_deserializes_api_field_names() {
        let json = r#"{
            "speechID": "121505261X00120240126001",
            "issueID": "121505261X00120240126",
            "session": 215,
            "nameOfHouse": "衆議院",
            "nameOfMeeting": "予算委員会",
            "issue": "第1号",
            "date": "2024-01-26",
            "speechOrder": 1,
            "speaker": " 大川一郎 ",
            "speakerYomi": "おおかわいちろう",
            "speakerGroup": "自由民主党・無所属の会",
            "speakerPosition": "委員長",
            "speakerRole": null,
            "speech": "○大川委員長　これより会議を開きます。",
            "speechURL": "https://kokkai.ndl.go.jp/txt/121505261X00120240126/1",
            "meetingURL": "https://kokkai.ndl.go.jp/txt/121505261X00120240126"
        }"#;
        let rec: SpeechRecord = serde_json::from_str(json).unwrap();
        assert_eq!(rec.speaker_name(), "大川一郎");
        assert_eq!(rec.house(), Some(House::Representatives));
        assert_eq!(rec.speech_order, Some(1));
        assert_eq!(rec.date, NaiveDate::from_ymd_opt(2024, 1, 26).unwrap());
        assert!(rec.speaker_role.is_none());
    }

    #[test]
    fn non_empty_trims_and_drops_blank_values() {
        assert_eq!(non_empty(Some("  立憲民主党 ")), Some("立憲民主党"));
        assert_eq!(non_empty(Some("   ")), None);
        assert_eq!(non_empty(None), None);
    }
}
