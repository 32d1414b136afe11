use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row};

use conduit_core::domain::agent::AgentId;
use conduit_core::domain::message::{MessageId, MessageRecord, MessageRole};

use super::agent::parse_timestamp;
use super::{MessageRepository, RepositoryError};
use crate::DbPool;

pub struct SqlMessageRepository {
    pool: DbPool,
}

impl SqlMessageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MessageRepository for SqlMessageRepository {
    async fn append(&self, message: MessageRecord) -> Result<(), RepositoryError> {
        let metadata = serde_json::to_string(&message.metadata)
            .map_err(|error| RepositoryError::Decode(format!("message metadata: {error}")))?;

        sqlx::query(
            "INSERT INTO messages (id, agent_id, role, content, created_at, metadata)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&message.id.0)
        .bind(&message.agent_id.0)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(message.created_at.to_rfc3339())
        .bind(metadata)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_agent(
        &self,
        agent_id: &AgentId,
        limit: u32,
    ) -> Result<Vec<MessageRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, agent_id, role, content, created_at, metadata FROM (
                 SELECT id, agent_id, role, content, created_at, metadata, rowid AS seq
                 FROM messages
                 WHERE agent_id = ?
                 ORDER BY created_at DESC, seq DESC
                 LIMIT ?
             ) ORDER BY created_at ASC, seq ASC",
        )
        .bind(&agent_id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }
}

fn message_from_row(row: SqliteRow) -> Result<MessageRecord, RepositoryError> {
    let role_raw = row.try_get::<String, _>("role")?;
    let role = MessageRole::parse(&role_raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown message role `{role_raw}`")))?;
    let metadata_raw = row.try_get::<String, _>("metadata")?;
    let metadata = serde_json::from_str::<Value>(&metadata_raw).map_err(|error| {
        RepositoryError::Decode(format!("invalid json in `metadata`: {error}"))
    })?;

    Ok(MessageRecord {
        id: MessageId(row.try_get("id")?),
        agent_id: AgentId(row.try_get("agent_id")?),
        role,
        content: row.try_get("content")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        metadata,
    })
}
