use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;
use taskwire_core::ports::{IssueMapping, MappingStore, MappingStoreError};

use super::RepositoryError;
use crate::DbPool;

/// Chat message to issue links in the `issue_mapping` table.
pub struct SqlMappingStore {
    pool: DbPool,
}

impl SqlMappingStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, mapping: &IssueMapping) -> Result<(), RepositoryError> {
        let metadata = serde_json::to_string(&mapping.metadata)
            .map_err(|error| RepositoryError::Decode(error.to_string()))?;
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO issue_mapping (
                chat_id, message_id, issue_key, group_chat_id, reply_message_id,
                metadata_json, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (chat_id, message_id) DO UPDATE SET
                issue_key = excluded.issue_key,
                group_chat_id = excluded.group_chat_id,
                reply_message_id = excluded.reply_message_id,
                metadata_json = excluded.metadata_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(mapping.chat_id)
        .bind(mapping.message_id)
        .bind(&mapping.issue_key)
        .bind(mapping.group_chat_id)
        .bind(mapping.reply_message_id)
        .bind(metadata)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find(
        &self,
        chat_id: i64,
        message_id: i64,
    ) -> Result<Option<IssueMapping>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT chat_id, message_id, issue_key, group_chat_id, reply_message_id, metadata_json
            FROM issue_mapping
            WHERE chat_id = ? AND message_id = ?
            "#,
        )
        .bind(chat_id)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<IssueMapping, RepositoryError> {
            let metadata: String = row.try_get("metadata_json")?;
            Ok(IssueMapping {
                chat_id: row.try_get("chat_id")?,
                message_id: row.try_get("message_id")?,
                issue_key: row.try_get("issue_key")?,
                group_chat_id: row.try_get("group_chat_id")?,
                reply_message_id: row.try_get("reply_message_id")?,
                metadata: serde_json::from_str(&metadata)
                    .map_err(|error| RepositoryError::Decode(error.to_string()))?,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl MappingStore for SqlMappingStore {
    async fn save_mapping(&self, mapping: &IssueMapping) -> Result<(), MappingStoreError> {
        Ok(self.upsert(mapping).await?)
    }

    async fn issue_key_for_message(
        &self,
        chat_id: i64,
        message_id: i64,
    ) -> Result<Option<String>, MappingStoreError> {
        Ok(self.find(chat_id, message_id).await?.map(|mapping| mapping.issue_key))
    }
}
