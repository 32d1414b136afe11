use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row};

use conduit_core::domain::agent::{AgentId, AgentRecord};

use super::{AgentRepository, RepositoryError};
use crate::DbPool;

pub struct SqlAgentRepository {
    pool: DbPool,
}

impl SqlAgentRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl AgentRepository for SqlAgentRepository {
    async fn find_by_id(&self, id: &AgentId) -> Result<Option<AgentRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, description, system_prompt, metadata, created_at, updated_at
             FROM agents WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(agent_from_row).transpose()
    }

    async fn list_all(&self) -> Result<Vec<AgentRecord>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, description, system_prompt, metadata, created_at, updated_at
             FROM agents ORDER BY created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(agent_from_row).collect()
    }

    async fn upsert(&self, record: AgentRecord) -> Result<(), RepositoryError> {
        let metadata = serde_json::to_string(&record.metadata)
            .map_err(|error| RepositoryError::Decode(format!("agent metadata: {error}")))?;

        sqlx::query(
            "INSERT INTO agents (id, name, description, system_prompt, metadata, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 description = excluded.description,
                 system_prompt = excluded.system_prompt,
                 metadata = excluded.metadata,
                 updated_at = excluded.updated_at",
        )
        .bind(&record.id.0)
        .bind(&record.name)
        .bind(&record.description)
        .bind(&record.system_prompt)
        .bind(metadata)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, id: &AgentId) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM agents WHERE id = ?").bind(&id.0).execute(&self.pool).await?;

        Ok(result.rows_affected() > 0)
    }
}

fn agent_from_row(row: SqliteRow) -> Result<AgentRecord, RepositoryError> {
    let metadata_raw = row.try_get::<String, _>("metadata")?;
    let metadata = serde_json::from_str::<Value>(&metadata_raw).map_err(|error| {
        RepositoryError::Decode(format!("invalid json in `metadata`: {error}"))
    })?;

    Ok(AgentRecord {
        id: AgentId(row.try_get("id")?),
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        system_prompt: row.try_get("system_prompt")?,
        metadata,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}
