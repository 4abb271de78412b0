//! Event record storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{EventDraft, EventRecord, EventRow, SyncStatus};
use crate::Result;

const EVENT_COLUMNS: &str = r#"
    id, event_name, event_date, start_time, end_time,
    officiant, sound, emcee, reception, comment,
    google_event_id, sync_status, created_at, updated_at
"#;

/// Durable store of event records.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<EventRecord>>;

    /// All records, ordered by start time.
    async fn list(&self) -> Result<Vec<EventRecord>>;

    /// Records starting in `[from, to)`, ordered by start time.
    async fn list_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<EventRecord>>;

    /// Records starting in `[from, to)` that have no remote id or are pending sync.
    async fn list_unsynced_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<EventRecord>>;

    async fn insert(&self, draft: &EventDraft) -> Result<EventRecord>;

    /// Replace the content of a record; `None` when it does not exist.
    async fn update(&self, id: Uuid, draft: &EventDraft) -> Result<Option<EventRecord>>;

    /// Returns whether a row was deleted.
    async fn delete(&self, id: Uuid) -> Result<bool>;

    /// Store (or clear) the remote back-reference together with the sync status.
    async fn set_remote_id(&self, id: Uuid, remote_id: Option<&str>, status: SyncStatus) -> Result<()>;

    async fn set_sync_status(&self, id: Uuid, status: SyncStatus) -> Result<()>;
}

/// Postgres-backed event store.
#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
}

impl PgEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn get(&self, id: Uuid) -> Result<Option<EventRecord>> {
        let row: Option<EventRow> =
            sqlx::query_as(&format!("SELECT {} FROM events WHERE id = $1", EVENT_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(EventRecord::from))
    }

    async fn list(&self) -> Result<Vec<EventRecord>> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            "SELECT {} FROM events ORDER BY start_time ASC",
            EVENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(EventRecord::from).collect())
    }

    async fn list_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<EventRecord>> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM events
            WHERE start_time >= $1 AND start_time < $2
            ORDER BY start_time ASC
            "#,
            EVENT_COLUMNS
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(EventRecord::from).collect())
    }

    async fn list_unsynced_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<EventRecord>> {
        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM events
            WHERE start_time >= $1 AND start_time < $2
            AND (google_event_id IS NULL OR sync_status = 'pending_sync')
            ORDER BY start_time ASC
            "#,
            EVENT_COLUMNS
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(EventRecord::from).collect())
    }

    async fn insert(&self, draft: &EventDraft) -> Result<EventRecord> {
        let row: EventRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO events (
                id, event_name, event_date, start_time, end_time,
                officiant, sound, emcee, reception, comment, sync_status
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'local_only')
            RETURNING {}
            "#,
            EVENT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&draft.event_name)
        .bind(draft.date)
        .bind(draft.start_time)
        .bind(draft.end_time)
        .bind(&draft.roles.officiant)
        .bind(&draft.roles.sound)
        .bind(&draft.roles.emcee)
        .bind(&draft.roles.reception)
        .bind(&draft.comment)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }

    async fn update(&self, id: Uuid, draft: &EventDraft) -> Result<Option<EventRecord>> {
        let row: Option<EventRow> = sqlx::query_as(&format!(
            r#"
            UPDATE events
            SET event_name = $2, event_date = $3, start_time = $4, end_time = $5,
                officiant = $6, sound = $7, emcee = $8, reception = $9, comment = $10,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            EVENT_COLUMNS
        ))
        .bind(id)
        .bind(&draft.event_name)
        .bind(draft.date)
        .bind(draft.start_time)
        .bind(draft.end_time)
        .bind(&draft.roles.officiant)
        .bind(&draft.roles.sound)
        .bind(&draft.roles.emcee)
        .bind(&draft.roles.reception)
        .bind(&draft.comment)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(EventRecord::from))
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM events WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_remote_id(&self, id: Uuid, remote_id: Option<&str>, status: SyncStatus) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE events
            SET google_event_id = $2, sync_status = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(remote_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_sync_status(&self, id: Uuid, status: SyncStatus) -> Result<()> {
        sqlx::query("UPDATE events SET sync_status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
