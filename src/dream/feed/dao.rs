//! Favourite dream entries, kept on this device only.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashSet;
use tracing::debug;

pub struct FavoritesDao {
    db: Pool<Sqlite>,
    user_id: String,
}

impl FavoritesDao {
    pub fn new(db: Pool<Sqlite>, user_id: String) -> Self {
        Self { db, user_id }
    }

    pub async fn add(&self, dream_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO local_favorites (owner_user_id, dream_id, created_at)
            VALUES (?, ?, ?)
            "#,
        )
        .bind(&self.user_id)
        .bind(dream_id)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.db)
        .await
        .context("failed to save favorite")?;
        Ok(())
    }

    pub async fn remove(&self, dream_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM local_favorites WHERE owner_user_id = ? AND dream_id = ?")
            .bind(&self.user_id)
            .bind(dream_id)
            .execute(&self.db)
            .await
            .context("failed to remove favorite")?;
        Ok(())
    }

    /// Flip the favourite flag; returns whether the entry is now a favourite.
    pub async fn toggle(&self, dream_id: &str) -> Result<bool> {
        let mut tx = self.db.begin().await.context("failed to begin transaction")?;
        let removed = sqlx::query(
            "DELETE FROM local_favorites WHERE owner_user_id = ? AND dream_id = ?",
        )
        .bind(&self.user_id)
        .bind(dream_id)
        .execute(&mut *tx)
        .await
        .context("failed to toggle favorite")?
        .rows_affected();

        if removed == 0 {
            sqlx::query(
                "INSERT INTO local_favorites (owner_user_id, dream_id, created_at) VALUES (?, ?, ?)",
            )
            .bind(&self.user_id)
            .bind(dream_id)
            .bind(Utc::now().timestamp_millis())
            .execute(&mut *tx)
            .await
            .context("failed to toggle favorite")?;
        }
        tx.commit().await.context("failed to commit favorite")?;
        debug!("[FavoritesDAO] {} favorite={}", dream_id, removed == 0);
        Ok(removed == 0)
    }

    pub async fn ids(&self) -> Result<HashSet<String>> {
        let rows = sqlx::query("SELECT dream_id FROM local_favorites WHERE owner_user_id = ?")
            .bind(&self.user_id)
            .fetch_all(&self.db)
            .await
            .context("failed to load favorites")?;
        Ok(rows
            .into_iter()
            .map(|row| row.get::<String, _>("dream_id"))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dream::db::create_sqlite_pool_with_migration;

    #[tokio::test]
    async fn toggle_flips_and_add_is_idempotent() -> Result<()> {
        let pool = create_sqlite_pool_with_migration("sqlite::memory:").await?;
        let dao = FavoritesDao::new(pool, "me".into());

        assert!(dao.toggle("d1").await?);
        assert!(!dao.toggle("d1").await?);
        assert!(dao.ids().await?.is_empty());

        dao.add("d2").await?;
        dao.add("d2").await?;
        assert_eq!(dao.ids().await?.len(), 1);
        dao.remove("d2").await?;
        assert!(dao.ids().await?.is_empty());
        Ok(())
    }
}
