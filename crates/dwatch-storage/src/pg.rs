use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use dwatch_core::{House, Legislator, LegislatorUpdate, NewLegislator, NewSpeech, PositionSource};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::store::{
    AnswererRow, ImportStatus, ImportStore, LegislatorInsert, LegislatorSpeechCount, NameIndex,
    SpeechInsert, SpeechWindowRow, StoreError, ANSWERER_SAMPLE_SIZE, ANSWERER_SCAN_LIMIT,
};

const LEGISLATOR_COLUMNS: &str = r#"
    id, name, name_yomi, current_party, current_position, house,
    current_position_override, current_position_source, current_position_updated_at,
    first_seen, last_seen
"#;

/// Postgres-backed store. `legislators.name` and `speeches.speech_id` carry
/// unique constraints, so concurrent importers cannot duplicate rows.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }

    async fn count(&self, sql: &str) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(sql).fetch_one(&self.pool).await?;
        Ok(count.max(0) as u64)
    }
}

fn to_i32(value: u32, what: &str) -> Result<i32, StoreError> {
    i32::try_from(value).map_err(|_| StoreError::Corrupt(format!("{what} {value} out of range")))
}

fn house_from_row(row: &PgRow, column: &str) -> Result<Option<House>, StoreError> {
    let raw: Option<String> = row.try_get(column)?;
    match raw {
        None => Ok(None),
        Some(raw) => House::parse(&raw)
            .map(Some)
            .ok_or_else(|| StoreError::Corrupt(format!("house {raw}"))),
    }
}

fn legislator_from_row(row: &PgRow) -> Result<Legislator, StoreError> {
    let source: Option<String> = row.try_get("current_position_source")?;
    Ok(Legislator {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        name_yomi: row.try_get("name_yomi")?,
        current_party: row.try_get("current_party")?,
        current_position: row.try_get("current_position")?,
        house: house_from_row(row, "house")?,
        current_position_override: row.try_get("current_position_override")?,
        current_position_source: source.as_deref().and_then(PositionSource::parse),
        current_position_updated_at: row.try_get("current_position_updated_at")?,
        first_seen: row.try_get("first_seen")?,
        last_seen: row.try_get("last_seen")?,
    })
}

#[async_trait]
impl ImportStore for PgStore {
    async fn find_legislator_id(&self, name: &str) -> Result<Option<Uuid>, StoreError> {
        let id = sqlx::query_scalar("SELECT id FROM legislators WHERE name = $1 LIMIT 1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn insert_legislator(&self, row: &NewLegislator) -> Result<LegislatorInsert, StoreError> {
        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO legislators
                (id, name, name_yomi, current_party, current_position, house, first_seen, last_seen)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (name) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&row.name)
        .bind(&row.name_yomi)
        .bind(&row.current_party)
        .bind(&row.current_position)
        .bind(row.house.map(House::as_str))
        .bind(row.first_seen)
        .bind(row.last_seen)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(id) = inserted {
            return Ok(LegislatorInsert::Inserted(id));
        }
        self.find_legislator_id(&row.name)
            .await?
            .map(LegislatorInsert::AlreadyExists)
            .ok_or_else(|| StoreError::NotFound(format!("legislator {}", row.name)))
    }

    async fn update_legislator(&self, id: Uuid, update: &LegislatorUpdate) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE legislators
               SET name_yomi = COALESCE($2, name_yomi),
                   current_party = COALESCE($3, current_party),
                   current_position = COALESCE($4, current_position),
                   house = COALESCE($5, house),
                   first_seen = LEAST(first_seen, $6),
                   last_seen = GREATEST(last_seen, $7),
                   updated_at = NOW()
             WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&update.name_yomi)
        .bind(&update.current_party)
        .bind(&update.current_position)
        .bind(update.house.map(House::as_str))
        .bind(update.first_seen)
        .bind(update.last_seen)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("legislator {id}")));
        }
        Ok(())
    }

    async fn legislator_name_index(&self) -> Result<NameIndex, StoreError> {
        let rows = sqlx::query("SELECT id, name FROM legislators")
            .fetch_all(&self.pool)
            .await?;
        let mut index = NameIndex::with_capacity(rows.len());
        for row in rows {
            index.insert(row.try_get("name")?, row.try_get("id")?);
        }
        Ok(index)
    }

    async fn get_legislator(&self, id: Uuid) -> Result<Option<Legislator>, StoreError> {
        let row = sqlx::query(&format!("SELECT {LEGISLATOR_COLUMNS} FROM legislators WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(legislator_from_row).transpose()
    }

    async fn set_position_override(
        &self,
        id: Uuid,
        value: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Legislator, StoreError> {
        let (source, updated_at) = match value {
            Some(_) => (PositionSource::Manual, Some(at)),
            None => (PositionSource::SpeechInferred, None),
        };
        let row = sqlx::query(&format!(
            r#"
            UPDATE legislators
               SET current_position_override = $2,
                   current_position_source = $3,
                   current_position_updated_at = $4,
                   updated_at = NOW()
             WHERE id = $1
            RETURNING {LEGISLATOR_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(value)
        .bind(source.as_str())
        .bind(updated_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => legislator_from_row(&row),
            None => Err(StoreError::NotFound(format!("legislator {id}"))),
        }
    }

    async fn insert_speech_ignore_conflict(&self, row: &NewSpeech) -> Result<SpeechInsert, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO speeches
                (id, speech_id, legislator_id, session, house, meeting_name, speech_order,
                 speaker_name, speaker_group, speaker_position, content, speech_url, date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (speech_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&row.speech_id)
        .bind(row.legislator_id)
        .bind(to_i32(row.session, "session")?)
        .bind(row.house.map(House::as_str))
        .bind(&row.meeting_name)
        .bind(row.speech_order.map(|o| to_i32(o, "speech order")).transpose()?)
        .bind(&row.speaker_name)
        .bind(&row.speaker_group)
        .bind(&row.speaker_position)
        .bind(&row.content)
        .bind(&row.speech_url)
        .bind(row.date)
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 0 {
            SpeechInsert::Conflict
        } else {
            SpeechInsert::Inserted
        })
    }

    async fn link_unmatched_speeches(&self) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE speeches s
               SET legislator_id = l.id
              FROM legislators l
             WHERE s.legislator_id IS NULL
               AND s.speaker_name = l.name
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn import_status(&self, answerer_keywords: &[String]) -> Result<ImportStatus, StoreError> {
        let patterns = answerer_keywords
            .iter()
            .map(|k| format!("%{k}%"))
            .collect::<Vec<_>>();
        let rows = sqlx::query(
            r#"
            SELECT name, current_position
              FROM legislators
             WHERE current_position ILIKE ANY($1)
             ORDER BY name
             LIMIT $2
            "#,
        )
        .bind(&patterns)
        .bind(ANSWERER_SCAN_LIMIT as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut answerers = Vec::with_capacity(rows.len());
        for row in rows {
            answerers.push(AnswererRow {
                name: row.try_get("name")?,
                current_position: row.try_get("current_position")?,
            });
        }

        Ok(ImportStatus {
            legislators: self.count("SELECT COUNT(*) FROM legislators").await?,
            speeches: self.count("SELECT COUNT(*) FROM speeches").await?,
            representatives: self
                .count("SELECT COUNT(*) FROM legislators WHERE house = 'representatives'")
                .await?,
            councillors: self
                .count("SELECT COUNT(*) FROM legislators WHERE house = 'councillors'")
                .await?,
            answerers: answerers.len() as u64,
            answerer_sample: answerers.into_iter().take(ANSWERER_SAMPLE_SIZE).collect(),
        })
    }

    async fn speech_window(&self, limit: usize) -> Result<Vec<SpeechWindowRow>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT s.speech_id,
                   s.legislator_id,
                   s.speaker_name,
                   s.speaker_group,
                   l.current_party AS legislator_party,
                   s.meeting_name,
                   s.date
              FROM speeches s
              LEFT JOIN legislators l ON l.id = s.legislator_id
             ORDER BY s.date DESC, s.speech_id
             LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let date: NaiveDate = row.try_get("date")?;
            out.push(SpeechWindowRow {
                speech_id: row.try_get("speech_id")?,
                legislator_id: row.try_get("legislator_id")?,
                speaker_name: row.try_get("speaker_name")?,
                speaker_group: row.try_get("speaker_group")?,
                legislator_party: row.try_get("legislator_party")?,
                meeting_name: row.try_get("meeting_name")?,
                date,
            });
        }
        Ok(out)
    }

    async fn legislator_speech_counts(&self, limit: usize) -> Result<Vec<LegislatorSpeechCount>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, current_party, house, speech_count
              FROM legislators_with_counts
             ORDER BY speech_count DESC, name
             LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let speech_count: i64 = row.try_get("speech_count")?;
            out.push(LegislatorSpeechCount {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                current_party: row.try_get("current_party")?,
                house: house_from_row(&row, "house")?,
                speech_count: speech_count.max(0) as u64,
            });
        }
        Ok(out)
    }
}
