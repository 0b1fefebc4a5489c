//! Feed HTTP API: dream entries, likes and comments.

use crate::dream::error::{is_duplicate, SdkError};
use crate::dream::feed::models::{default_stale_after, Comment, DreamEntry, RawDreamRow};
use crate::dream::rest::{eq, in_list, Filter, RestClient};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;
use tracing::{debug, info, warn};

const DREAM_SELECT: &str = "*,profiles(id,username,display_name,avatar_url,read_receipts_enabled),likes(count),comments(count)";
const MAX_COMMENT_CHARS: usize = 1000;

/// Source of feed entries, as the feed view needs it.
#[async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_public(&self, limit: usize) -> Result<Vec<DreamEntry>>;

    async fn fetch_by_authors(&self, author_ids: &[String], limit: usize) -> Result<Vec<DreamEntry>>;
}

pub struct FeedApi {
    rest: RestClient,
    user_id: String,
    stale_after: Duration,
}

impl FeedApi {
    pub fn new(rest: RestClient, user_id: String) -> Self {
        Self {
            rest,
            user_id,
            stale_after: default_stale_after(),
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    async fn fetch(&self, mut filters: Vec<Filter>, limit: usize) -> Result<Vec<DreamEntry>> {
        filters.push(("select", DREAM_SELECT.to_string()));
        filters.push(("order", "created_at.desc".to_string()));
        filters.push(("limit", limit.to_string()));
        let rows: Vec<RawDreamRow> = self
            .rest
            .select("dreams", &filters)
            .await
            .context("failed to fetch dreams")?;
        Ok(map_rows(rows, self.stale_after))
    }

    /// Public, completed entries from everyone.
    pub async fn fetch_public(&self, limit: usize) -> Result<Vec<DreamEntry>> {
        self.fetch(
            vec![eq("is_public", true), eq("status", "completed")],
            limit,
        )
        .await
    }

    /// The viewer's own library, private entries included.
    pub async fn fetch_own(&self, limit: usize) -> Result<Vec<DreamEntry>> {
        self.fetch(vec![eq("user_id", &self.user_id)], limit).await
    }

    pub async fn fetch_by_authors(&self, author_ids: &[String], limit: usize) -> Result<Vec<DreamEntry>> {
        if author_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.fetch(
            vec![
                in_list("user_id", author_ids),
                eq("is_public", true),
                eq("status", "completed"),
            ],
            limit,
        )
        .await
    }

    /// Like an entry; liking twice is not an error.
    pub async fn like(&self, dream_id: &str) -> Result<()> {
        let result: Result<Vec<serde_json::Value>> = self
            .rest
            .insert("likes", &json!({ "user_id": self.user_id, "dream_id": dream_id }))
            .await;
        like_outcome(result.map(drop), dream_id)
    }

    pub async fn unlike(&self, dream_id: &str) -> Result<()> {
        self.rest
            .delete(
                "likes",
                &[eq("user_id", &self.user_id), eq("dream_id", dream_id)],
            )
            .await
            .context("failed to unlike dream")
    }

    pub async fn comment(&self, dream_id: &str, content: &str) -> Result<Comment> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SdkError::validation("Comment can't be empty").into());
        }
        if content.chars().count() > MAX_COMMENT_CHARS {
            return Err(SdkError::validation(format!(
                "Comment is longer than {MAX_COMMENT_CHARS} characters"
            ))
            .into());
        }
        let mut rows: Vec<Comment> = self
            .rest
            .insert(
                "comments",
                &json!({ "user_id": self.user_id, "dream_id": dream_id, "content": content }),
            )
            .await
            .context("failed to post comment")?;
        let comment = rows
            .pop()
            .ok_or_else(|| SdkError::Decode("insert returned no row".into()))?;
        info!("[Feed] 💬 commented on {}", dream_id);
        Ok(comment)
    }

    pub async fn fetch_comments(&self, dream_id: &str) -> Result<Vec<Comment>> {
        let filters: Vec<Filter> = vec![
            eq("dream_id", dream_id),
            ("order", "created_at.asc".to_string()),
        ];
        self.rest
            .select("comments", &filters)
            .await
            .context("failed to fetch comments")
    }
}

#[async_trait]
impl FeedSource for FeedApi {
    async fn fetch_public(&self, limit: usize) -> Result<Vec<DreamEntry>> {
        FeedApi::fetch_public(self, limit).await
    }

    async fn fetch_by_authors(&self, author_ids: &[String], limit: usize) -> Result<Vec<DreamEntry>> {
        FeedApi::fetch_by_authors(self, author_ids, limit).await
    }
}

/// Map raw rows, skipping the ones that do not decode.
pub(crate) fn map_rows(rows: Vec<RawDreamRow>, stale_after: Duration) -> Vec<DreamEntry> {
    let now = Utc::now();
    let total = rows.len();
    let entries: Vec<DreamEntry> = rows
        .into_iter()
        .filter_map(|row| match row.into_entry(now, stale_after) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("[Feed] skipping row: {}", e);
                None
            }
        })
        .collect();
    debug!("[Feed] mapped {}/{} dream rows", entries.len(), total);
    entries
}

/// A like that already exists counts as done.
fn like_outcome(inserted: Result<()>, dream_id: &str) -> Result<()> {
    match inserted {
        Ok(()) => {
            debug!("[Feed] liked {}", dream_id);
            Ok(())
        }
        Err(e) if is_duplicate(&e) => {
            debug!("[Feed] {} already liked", dream_id);
            Ok(())
        }
        Err(e) => Err(e.context("failed to like dream")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dream::error::ConflictKind;

    #[test]
    fn bad_rows_are_skipped_not_fatal() {
        let rows: Vec<RawDreamRow> = serde_json::from_value(json!([
            {"id": "d1", "user_id": "u1", "status": "completed", "created_at": "2025-06-01T10:00:00Z"},
            {"id": "d2", "user_id": "u1", "status": "exploded", "created_at": "2025-06-01T10:00:00Z"}
        ]))
        .unwrap();
        let entries = map_rows(rows, default_stale_after());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "d1");
    }

    #[test]
    fn duplicate_detection_sees_through_context() {
        let err = anyhow::Error::from(SdkError::Conflict {
            kind: ConflictKind::Other,
            detail: "duplicate key".into(),
        })
        .context("like");
        assert!(is_duplicate(&err));
        assert!(!is_duplicate(&anyhow::anyhow!("timeout")));
    }

    #[test]
    fn liking_twice_succeeds() {
        use crate::dream::error::{classify_remote_failure, ErrorKind, RemoteErrorBody};

        let body = RemoteErrorBody {
            code: Some("23505".into()),
            message: Some("duplicate key value violates unique constraint \"likes_pkey\"".into()),
            details: None,
            hint: None,
        };
        let repeat = anyhow::Error::from(classify_remote_failure(409, &body)).context("POST likes failed");
        assert!(like_outcome(Err(repeat), "d1").is_ok());

        let denied = RemoteErrorBody {
            code: Some("42501".into()),
            ..RemoteErrorBody::default()
        };
        let err = like_outcome(Err(classify_remote_failure(403, &denied).into()), "d1").unwrap_err();
        assert_eq!(ErrorKind::of(&err), ErrorKind::Unauthorized);
    }

    #[tokio::test]
    async fn empty_comment_is_rejected_locally() {
        let rest = RestClient::new("http://127.0.0.1:9", "anon", "token").unwrap();
        let api = FeedApi::new(rest, "me".into());
        let err = api.comment("d1", "   ").await.unwrap_err();
        assert_eq!(
            crate::dream::error::ErrorKind::of(&err),
            crate::dream::error::ErrorKind::Validation
        );
    }
}
