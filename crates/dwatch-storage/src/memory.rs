use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dwatch_core::{House, Legislator, LegislatorUpdate, NewLegislator, NewSpeech, PositionSource};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::store::{
    AnswererRow, ImportStatus, ImportStore, LegislatorInsert, LegislatorSpeechCount, NameIndex,
    SpeechInsert, SpeechWindowRow, StoreError, ANSWERER_SAMPLE_SIZE, ANSWERER_SCAN_LIMIT,
};

#[derive(Debug, Default)]
struct Tables {
    legislators: Vec<Legislator>,
    speeches: HashMap<String, NewSpeech>,
}

impl Tables {
    fn legislator_mut(&mut self, id: Uuid) -> Option<&mut Legislator> {
        self.legislators.iter_mut().find(|l| l.id == id)
    }
}

/// Process-local store with the same semantics as the Postgres schema,
/// including the unique legislator name. Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn legislators(&self) -> Vec<Legislator> {
        self.tables.lock().await.legislators.clone()
    }

    pub async fn speeches(&self) -> Vec<NewSpeech> {
        let tables = self.tables.lock().await;
        let mut rows = tables.speeches.values().cloned().collect::<Vec<_>>();
        rows.sort_by(|a, b| a.speech_id.cmp(&b.speech_id));
        rows
    }
}

fn widen<T: Ord + Copy>(current: Option<T>, incoming: T, pick: fn(T, T) -> T) -> Option<T> {
    Some(current.map_or(incoming, |c| pick(c, incoming)))
}

#[async_trait]
impl ImportStore for MemoryStore {
    async fn find_legislator_id(&self, name: &str) -> Result<Option<Uuid>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.legislators.iter().find(|l| l.name == name).map(|l| l.id))
    }

    async fn insert_legislator(&self, row: &NewLegislator) -> Result<LegislatorInsert, StoreError> {
        let mut tables = self.tables.lock().await;
        if let Some(existing) = tables.legislators.iter().find(|l| l.name == row.name) {
            return Ok(LegislatorInsert::AlreadyExists(existing.id));
        }
        let id = Uuid::new_v4();
        tables.legislators.push(Legislator {
            id,
            name: row.name.clone(),
            name_yomi: row.name_yomi.clone(),
            current_party: row.current_party.clone(),
            current_position: row.current_position.clone(),
            house: row.house,
            current_position_override: None,
            current_position_source: None,
            current_position_updated_at: None,
            first_seen: Some(row.first_seen),
            last_seen: Some(row.last_seen),
        });
        Ok(LegislatorInsert::Inserted(id))
    }

    async fn update_legislator(&self, id: Uuid, update: &LegislatorUpdate) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        let leg = tables
            .legislator_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("legislator {id}")))?;
        if let Some(yomi) = &update.name_yomi {
            leg.name_yomi = Some(yomi.clone());
        }
        if let Some(party) = &update.current_party {
            leg.current_party = Some(party.clone());
        }
        if let Some(position) = &update.current_position {
            leg.current_position = Some(position.clone());
        }
        if let Some(house) = update.house {
            leg.house = Some(house);
        }
        leg.first_seen = widen(leg.first_seen, update.first_seen, std::cmp::min);
        leg.last_seen = widen(leg.last_seen, update.last_seen, std::cmp::max);
        Ok(())
    }

    async fn legislator_name_index(&self) -> Result<NameIndex, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .legislators
            .iter()
            .map(|l| (l.name.clone(), l.id))
            .collect())
    }

    async fn get_legislator(&self, id: Uuid) -> Result<Option<Legislator>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables.legislators.iter().find(|l| l.id == id).cloned())
    }

    async fn set_position_override(
        &self,
        id: Uuid,
        value: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Legislator, StoreError> {
        let mut tables = self.tables.lock().await;
        let leg = tables
            .legislator_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("legislator {id}")))?;
        match value {
            Some(value) => {
                leg.current_position_override = Some(value.to_string());
                leg.current_position_source = Some(PositionSource::Manual);
                leg.current_position_updated_at = Some(at);
            }
            None => {
                leg.current_position_override = None;
                leg.current_position_source = Some(PositionSource::SpeechInferred);
                leg.current_position_updated_at = None;
            }
        }
        Ok(leg.clone())
    }

    async fn insert_speech_ignore_conflict(&self, row: &NewSpeech) -> Result<SpeechInsert, StoreError> {
        let mut tables = self.tables.lock().await;
        if tables.speeches.contains_key(&row.speech_id) {
            return Ok(SpeechInsert::Conflict);
        }
        tables.speeches.insert(row.speech_id.clone(), row.clone());
        Ok(SpeechInsert::Inserted)
    }

    async fn link_unmatched_speeches(&self) -> Result<u64, StoreError> {
        let mut tables = self.tables.lock().await;
        let index: NameIndex = tables
            .legislators
            .iter()
            .map(|l| (l.name.clone(), l.id))
            .collect();
        let mut linked = 0u64;
        for speech in tables.speeches.values_mut() {
            if speech.legislator_id.is_some() {
                continue;
            }
            if let Some(id) = index.get(&speech.speaker_name) {
                speech.legislator_id = Some(*id);
                linked += 1;
            }
        }
        Ok(linked)
    }

    async fn import_status(&self, answerer_keywords: &[String]) -> Result<ImportStatus, StoreError> {
        let tables = self.tables.lock().await;
        let count_house = |house: House| {
            tables
                .legislators
                .iter()
                .filter(|l| l.house == Some(house))
                .count() as u64
        };

        let mut answerers = tables
            .legislators
            .iter()
            .filter(|l| {
                l.current_position
                    .as_deref()
                    .is_some_and(|p| answerer_keywords.iter().any(|k| p.contains(k.as_str())))
            })
            .map(|l| AnswererRow {
                name: l.name.clone(),
                current_position: l.current_position.clone(),
            })
            .collect::<Vec<_>>();
        answerers.sort_by(|a, b| a.name.cmp(&b.name));
        answerers.truncate(ANSWERER_SCAN_LIMIT);

        Ok(ImportStatus {
            legislators: tables.legislators.len() as u64,
            speeches: tables.speeches.len() as u64,
            representatives: count_house(House::Representatives),
            councillors: count_house(House::Councillors),
            answerers: answerers.len() as u64,
            answerer_sample: answerers.into_iter().take(ANSWERER_SAMPLE_SIZE).collect(),
        })
    }

    async fn speech_window(&self, limit: usize) -> Result<Vec<SpeechWindowRow>, StoreError> {
        let tables = self.tables.lock().await;
        let party_by_id: HashMap<Uuid, Option<String>> = tables
            .legislators
            .iter()
            .map(|l| (l.id, l.current_party.clone()))
            .collect();
        let mut rows = tables
            .speeches
            .values()
            .map(|s| SpeechWindowRow {
                speech_id: s.speech_id.clone(),
                legislator_id: s.legislator_id,
                speaker_name: s.speaker_name.clone(),
                speaker_group: s.speaker_group.clone(),
                legislator_party: s
                    .legislator_id
                    .and_then(|id| party_by_id.get(&id).cloned().flatten()),
                meeting_name: s.meeting_name.clone(),
                date: s.date,
            })
            .collect::<Vec<_>>();
        rows.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.speech_id.cmp(&b.speech_id)));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn legislator_speech_counts(&self, limit: usize) -> Result<Vec<LegislatorSpeechCount>, StoreError> {
        let tables = self.tables.lock().await;
        let mut counts: HashMap<Uuid, u64> = HashMap::new();
        for speech in tables.speeches.values() {
            if let Some(id) = speech.legislator_id {
                *counts.entry(id).or_default() += 1;
            }
        }
        let mut rows = tables
            .legislators
            .iter()
            .map(|l| LegislatorSpeechCount {
                id: l.id,
                name: l.name.clone(),
                current_party: l.current_party.clone(),
                house: l.house,
                speech_count: counts.get(&l.id).copied().unwrap_or(0),
            })
            .collect::<Vec<_>>();
        rows.sort_by(|a, b| b.speech_count.cmp(&a.speech_count).then_with(|| a.name.cmp(&b.name)));
        rows.truncate(limit);
        Ok(rows)
    }
}
