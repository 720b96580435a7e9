//! SQLite session store. The whole [`SessionState`] is kept as one JSON document per
//! conversation so a turn persists with a single statement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use fixdesk_core::domain::session::{ConversationId, SessionRecord, SessionState};

use super::{RepositoryError, SessionRepository};
use crate::DbPool;

pub struct SqlSessionRepository {
    pool: DbPool,
}

impl SqlSessionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionRepository for SqlSessionRepository {
    async fn get_or_create(
        &self,
        channel: &str,
        contact_handle: &str,
    ) -> Result<SessionRecord, RepositoryError> {
        let fresh = SessionRecord::new(channel, contact_handle, Utc::now());
        let state_json = encode_state(&fresh.state)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO conversation_session (
                id, channel, contact_handle, state_json, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (channel, contact_handle) DO NOTHING
            "#,
        )
        .bind(&fresh.id.0)
        .bind(channel)
        .bind(contact_handle)
        .bind(state_json)
        .bind(fresh.created_at.to_rfc3339())
        .bind(fresh.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 1 {
            tracing::debug!(
                event_name = "session.created",
                conversation_id = %fresh.id.0,
                channel,
                "created conversation session"
            );
        }

        let row = sqlx::query(
            r#"
            SELECT id, channel, contact_handle, state_json, created_at, updated_at
            FROM conversation_session
            WHERE channel = ? AND contact_handle = ?
            "#,
        )
        .bind(channel)
        .bind(contact_handle)
        .fetch_one(&self.pool)
        .await?;

        session_from_row(&row)
    }

    async fn set_state(
        &self,
        id: &ConversationId,
        state: &SessionState,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"
            UPDATE conversation_session
            SET state_json = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(encode_state(state)?)
        .bind(Utc::now().to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(id.0.clone()));
        }
        Ok(())
    }
}

fn encode_state(state: &SessionState) -> Result<String, RepositoryError> {
    serde_json::to_string(state)
        .map_err(|error| RepositoryError::Decode(format!("could not encode state: {error}")))
}

fn session_from_row(row: &SqliteRow) -> Result<SessionRecord, RepositoryError> {
    let id: String = row.try_get("id")?;
    let state_json: String = row.try_get("state_json")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(SessionRecord {
        id: ConversationId(id),
        channel: row.try_get("channel")?,
        contact_handle: row.try_get("contact_handle")?,
        state: serde_json::from_str(&state_json).map_err(|error| {
            RepositoryError::Decode(format!("invalid state_json: {error}"))
        })?,
        created_at: parse_timestamp("created_at", created_at)?,
        updated_at: parse_timestamp("updated_at", updated_at)?,
    })
}

fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("invalid timestamp in `{column}`: {e}")))
}
