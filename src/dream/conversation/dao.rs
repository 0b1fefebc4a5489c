//! Hidden-conversation flags (client-local; hiding never deletes messages).

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashSet;
use tracing::debug;

pub struct HiddenConversationDao {
    db: Pool<Sqlite>,
    user_id: String,
}

impl HiddenConversationDao {
    pub fn new(db: Pool<Sqlite>, user_id: String) -> Self {
        Self { db, user_id }
    }

    pub async fn hide(&self, counterpart_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO local_hidden_conversations (owner_user_id, counterpart_id, hidden_at)
            VALUES (?, ?, ?)
            ON CONFLICT(owner_user_id, counterpart_id) DO UPDATE SET hidden_at = excluded.hidden_at
            "#,
        )
        .bind(&self.user_id)
        .bind(counterpart_id)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.db)
        .await
        .context("failed to hide conversation")?;
        debug!("[HiddenDAO] hid conversation with {}", counterpart_id);
        Ok(())
    }

    pub async fn unhide(&self, counterpart_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM local_hidden_conversations
            WHERE owner_user_id = ? AND counterpart_id = ?
            "#,
        )
        .bind(&self.user_id)
        .bind(counterpart_id)
        .execute(&self.db)
        .await
        .context("failed to unhide conversation")?;
        Ok(())
    }

    pub async fn hidden_ids(&self) -> Result<HashSet<String>> {
        let rows = sqlx::query(
            r#"
            SELECT counterpart_id FROM local_hidden_conversations WHERE owner_user_id = ?
            "#,
        )
        .bind(&self.user_id)
        .fetch_all(&self.db)
        .await
        .context("failed to load hidden conversations")?;

        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("counterpart_id"))
            .collect())
    }
}
