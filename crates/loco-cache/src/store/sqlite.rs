//! SQLite cache store
//!
//! Every row carries the generation number it was written under, and a
//! single-row `cache_generation` table points at the current one. A swap
//! writes the new generation, moves the pointer and deletes older rows inside
//! one transaction; reads run inside one transaction as well, so each query is
//! answered from exactly one generation. The cache survives restarts: the last
//! committed generation is served until the next successful sync.

use crate::model::{
    CacheSnapshot, CollectionCounts, DetailRecord, FailureRecord, LocoEntry, LocoKey, MatchPolicy,
    ScheduleRecord,
};
use crate::store::{CacheStore, GenerationInfo, LocoRecords, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqlitePool, SqlitePoolOptions,
    SqliteRow,
};
use sqlx::Row;
use std::str::FromStr;
use tracing::debug;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS cache_generation (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        generation INTEGER NOT NULL,
        last_updated TEXT,
        details_count INTEGER NOT NULL DEFAULT 0,
        schedules_count INTEGER NOT NULL DEFAULT 0,
        failures_count INTEGER NOT NULL DEFAULT 0,
        modifications_count INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS loco_keys (
        generation INTEGER NOT NULL,
        loco_no TEXT NOT NULL,
        PRIMARY KEY (generation, loco_no)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS detail_data (
        generation INTEGER NOT NULL,
        loco_no TEXT NOT NULL,
        ordinal INTEGER NOT NULL,
        field TEXT NOT NULL,
        value TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS modification_data (
        generation INTEGER NOT NULL,
        loco_no TEXT NOT NULL,
        ordinal INTEGER NOT NULL,
        field TEXT NOT NULL,
        value TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS schedule_data (
        generation INTEGER NOT NULL,
        loco_no TEXT NOT NULL,
        ordinal INTEGER NOT NULL,
        incoming_date TEXT,
        sch TEXT,
        outgoing_date TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS failure_data (
        generation INTEGER NOT NULL,
        loco_no TEXT NOT NULL,
        ordinal INTEGER NOT NULL,
        date_failed TEXT,
        icms_message TEXT,
        mu_with TEXT,
        div TEXT,
        rly TEXT,
        brief_message TEXT,
        cause_of_failure TEXT,
        component TEXT,
        system TEXT
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_detail_data_key ON detail_data(generation, loco_no)",
    "CREATE INDEX IF NOT EXISTS idx_modification_data_key ON modification_data(generation, loco_no)",
    "CREATE INDEX IF NOT EXISTS idx_schedule_data_key ON schedule_data(generation, loco_no)",
    "CREATE INDEX IF NOT EXISTS idx_failure_data_key ON failure_data(generation, loco_no)",
];

const KEYS_CONTAINING: &str = r#"
    SELECT k.loco_no FROM loco_keys k
    JOIN cache_generation g ON g.id = 1 AND k.generation = g.generation
    WHERE instr(k.loco_no, ?) > 0
    ORDER BY k.loco_no
    LIMIT ?
"#;

const KEYS_WITH_PREFIX: &str = r#"
    SELECT k.loco_no FROM loco_keys k
    JOIN cache_generation g ON g.id = 1 AND k.generation = g.generation
    WHERE substr(k.loco_no, 1, length(?)) = ?
    ORDER BY k.loco_no
    LIMIT ?
"#;

/// Tables whose rows belong to a generation
const GENERATION_TABLES: &[&str] = &[
    "loco_keys",
    "detail_data",
    "modification_data",
    "schedule_data",
    "failure_data",
];

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

/// Pointer row of the current generation
struct CurrentGeneration {
    generation: i64,
    last_updated: Option<DateTime<Utc>>,
    counts: CollectionCounts,
}

impl SqliteStore {
    /// Connect to `url`, creating the database and schema when missing.
    ///
    /// The database must be a file. Readers rely on WAL snapshots to keep
    /// answering from the current generation while a swap is being written;
    /// in-memory SQLite databases have no WAL, so they are refused in favour
    /// of the memory store.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        if is_in_memory(url) {
            return Err(StoreError::Backend(format!(
                "'{url}' is an in-memory SQLite database; use the memory store backend instead"
            )));
        }

        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool_options = SqlitePoolOptions::new().max_connections(8);

        let pool = pool_options.connect_with(options).await?;
        let store = Self { pool };
        store.init_schema().await?;

        debug!(url, "sqlite cache store ready");
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn current_generation(
        conn: &mut SqliteConnection,
    ) -> Result<Option<CurrentGeneration>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT generation, last_updated, details_count, schedules_count,
                   failures_count, modifications_count
            FROM cache_generation WHERE id = 1
            "#,
        )
        .fetch_optional(&mut *conn)
        .await?;

        row.map(|row| -> Result<CurrentGeneration, StoreError> {
            Ok(CurrentGeneration {
                generation: row.try_get("generation")?,
                last_updated: row.try_get("last_updated")?,
                counts: CollectionCounts {
                    details: count(&row, "details_count")?,
                    schedules: count(&row, "schedules_count")?,
                    failures: count(&row, "failures_count")?,
                    modifications: count(&row, "modifications_count")?,
                },
            })
        })
        .transpose()
    }

    async fn insert_entry(
        conn: &mut SqliteConnection,
        generation: i64,
        key: &LocoKey,
        entry: &LocoEntry,
    ) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO loco_keys (generation, loco_no) VALUES (?, ?)")
            .bind(generation)
            .bind(key.as_str())
            .execute(&mut *conn)
            .await?;

        for (table, records) in [
            ("detail_data", &entry.details),
            ("modification_data", &entry.modifications),
        ] {
            let sql = format!(
                "INSERT INTO {table} (generation, loco_no, ordinal, field, value) VALUES (?, ?, ?, ?, ?)"
            );
            for (ordinal, record) in records.iter().enumerate() {
                sqlx::query(&sql)
                    .bind(generation)
                    .bind(key.as_str())
                    .bind(ordinal as i64)
                    .bind(&record.field)
                    .bind(&record.value)
                    .execute(&mut *conn)
                    .await?;
            }
        }

        for (ordinal, schedule) in entry.schedules.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO schedule_data
                    (generation, loco_no, ordinal, incoming_date, sch, outgoing_date)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(generation)
            .bind(key.as_str())
            .bind(ordinal as i64)
            .bind(schedule.incoming_date)
            .bind(&schedule.sch)
            .bind(schedule.outgoing_date)
            .execute(&mut *conn)
            .await?;
        }

        for (ordinal, failure) in entry.failures.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO failure_data
                    (generation, loco_no, ordinal, date_failed, icms_message, mu_with, div, rly,
                     brief_message, cause_of_failure, component, system)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(generation)
            .bind(key.as_str())
            .bind(ordinal as i64)
            .bind(failure.date_failed)
            .bind(&failure.icms_message)
            .bind(&failure.mu_with)
            .bind(&failure.div)
            .bind(&failure.rly)
            .bind(&failure.brief_message)
            .bind(&failure.cause_of_failure)
            .bind(&failure.component)
            .bind(&failure.system)
            .execute(&mut *conn)
            .await?;
        }

        Ok(())
    }

    async fn fetch_attributes(
        conn: &mut SqliteConnection,
        table: &str,
        generation: i64,
        key: &LocoKey,
    ) -> Result<Vec<DetailRecord>, StoreError> {
        let sql = format!(
            "SELECT field, value FROM {table} WHERE generation = ? AND loco_no = ? ORDER BY ordinal"
        );
        let rows = sqlx::query(&sql)
            .bind(generation)
            .bind(key.as_str())
            .fetch_all(&mut *conn)
            .await?;

        rows.iter()
            .map(|row| -> Result<DetailRecord, StoreError> {
                Ok(DetailRecord {
                    field: row.try_get("field")?,
                    value: row.try_get("value")?,
                })
            })
            .collect()
    }

    async fn fetch_entry(
        conn: &mut SqliteConnection,
        generation: i64,
        key: &LocoKey,
    ) -> Result<LocoEntry, StoreError> {
        let details = Self::fetch_attributes(conn, "detail_data", generation, key).await?;
        let modifications =
            Self::fetch_attributes(conn, "modification_data", generation, key).await?;

        let schedules = sqlx::query(
            r#"
            SELECT incoming_date, sch, outgoing_date FROM schedule_data
            WHERE generation = ? AND loco_no = ? ORDER BY ordinal
            "#,
        )
        .bind(generation)
        .bind(key.as_str())
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(|row| -> Result<ScheduleRecord, StoreError> {
            Ok(ScheduleRecord {
                incoming_date: date(row, "incoming_date")?,
                sch: row.try_get("sch")?,
                outgoing_date: date(row, "outgoing_date")?,
            })
        })
        .collect::<Result<Vec<_>, StoreError>>()?;

        let failures = sqlx::query(
            r#"
            SELECT date_failed, icms_message, mu_with, div, rly, brief_message,
                   cause_of_failure, component, system
            FROM failure_data
            WHERE generation = ? AND loco_no = ? ORDER BY ordinal
            "#,
        )
        .bind(generation)
        .bind(key.as_str())
        .fetch_all(&mut *conn)
        .await?
        .iter()
        .map(|row| -> Result<FailureRecord, StoreError> {
            Ok(FailureRecord {
                date_failed: date(row, "date_failed")?,
                icms_message: row.try_get("icms_message")?,
                loco_no: key.clone(),
                mu_with: row.try_get("mu_with")?,
                div: row.try_get("div")?,
                rly: row.try_get("rly")?,
                brief_message: row.try_get("brief_message")?,
                cause_of_failure: row.try_get("cause_of_failure")?,
                component: row.try_get("component")?,
                system: row.try_get("system")?,
            })
        })
        .collect::<Result<Vec<_>, StoreError>>()?;

        Ok(LocoEntry {
            details,
            schedules,
            failures,
            modifications,
        })
    }
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

fn count(row: &SqliteRow, column: &str) -> Result<usize, StoreError> {
    let value: i64 = row.try_get(column)?;
    usize::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative {column}: {value}")))
}

fn date(row: &SqliteRow, column: &str) -> Result<Option<NaiveDate>, StoreError> {
    Ok(row.try_get(column)?)
}

#[async_trait]
impl CacheStore for SqliteStore {
    async fn replace_generation(&self, snapshot: CacheSnapshot) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let previous = Self::current_generation(&mut *tx).await?;
        let generation = previous.map_or(1, |current| current.generation + 1);

        for (key, entry) in snapshot.entries() {
            Self::insert_entry(&mut *tx, generation, key, entry).await?;
        }

        let counts = snapshot.counts();
        sqlx::query(
            r#"
            INSERT INTO cache_generation
                (id, generation, last_updated, details_count, schedules_count,
                 failures_count, modifications_count)
            VALUES (1, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                generation = excluded.generation,
                last_updated = excluded.last_updated,
                details_count = excluded.details_count,
                schedules_count = excluded.schedules_count,
                failures_count = excluded.failures_count,
                modifications_count = excluded.modifications_count
            "#,
        )
        .bind(generation)
        .bind(snapshot.last_updated())
        .bind(counts.details as i64)
        .bind(counts.schedules as i64)
        .bind(counts.failures as i64)
        .bind(counts.modifications as i64)
        .execute(&mut *tx)
        .await?;

        for table in GENERATION_TABLES {
            sqlx::query(&format!("DELETE FROM {table} WHERE generation <> ?"))
                .bind(generation)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        debug!(generation, keys = snapshot.key_count(), "sqlite generation committed");
        Ok(())
    }

    async fn query_exact(&self, key: &LocoKey) -> Result<LocoRecords, StoreError> {
        let mut tx = self.pool.begin().await?;

        let records = match Self::current_generation(&mut *tx).await? {
            Some(current) => LocoRecords {
                key: key.clone(),
                entry: Self::fetch_entry(&mut *tx, current.generation, key).await?,
                last_updated: current.last_updated,
            },
            None => LocoRecords {
                key: key.clone(),
                entry: LocoEntry::default(),
                last_updated: None,
            },
        };

        tx.commit().await?;
        Ok(records)
    }

    async fn query_keys(
        &self,
        partial: &str,
        policy: MatchPolicy,
        limit: usize,
    ) -> Result<Vec<LocoKey>, StoreError> {
        let query = match policy {
            MatchPolicy::Contains => sqlx::query(KEYS_CONTAINING).bind(partial),
            MatchPolicy::Prefix => sqlx::query(KEYS_WITH_PREFIX).bind(partial).bind(partial),
        };

        let rows = query
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<LocoKey, StoreError> {
                let raw: String = row.try_get("loco_no")?;
                LocoKey::parse(&raw)
                    .ok_or_else(|| StoreError::Corrupt(format!("unusable cached key '{raw}'")))
            })
            .collect()
    }

    async fn generation_info(&self) -> Result<GenerationInfo, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let info = Self::current_generation(&mut *conn)
            .await?
            .map(|current| GenerationInfo {
                last_updated: current.last_updated,
                counts: current.counts,
            })
            .unwrap_or_default();
        Ok(info)
    }

    fn name(&self) -> &'static str {
        "sqlite"
    }
}
