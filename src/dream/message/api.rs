//! Message HTTP API.

use crate::dream::error::SdkError;
use crate::dream::message::models::{Message, NewMessage};
use crate::dream::rest::{eq, is_null, Filter, RestClient};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

const TABLE: &str = "messages";
const MAX_BODY_CHARS: usize = 2000;

/// Message operations the open-conversation syncer depends on.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn fetch_thread(&self, counterpart_id: &str, limit: usize) -> Result<Vec<Message>>;

    async fn send(
        &self,
        receiver_id: &str,
        body: &str,
        reply_to_id: Option<&str>,
    ) -> Result<Message>;

    async fn mark_read(&self, counterpart_id: &str, share_receipts: bool) -> Result<usize>;
}

pub struct MessageApi {
    rest: RestClient,
    user_id: String,
}

impl MessageApi {
    pub fn new(rest: RestClient, user_id: String) -> Self {
        Self { rest, user_id }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Messages exchanged with `counterpart_id`, oldest first.
    pub async fn fetch_thread(&self, counterpart_id: &str, limit: usize) -> Result<Vec<Message>> {
        let me = &self.user_id;
        let filters: Vec<Filter> = vec![
            (
                "or",
                format!(
                    "(and(sender_id.eq.{me},receiver_id.eq.{counterpart_id}),and(sender_id.eq.{counterpart_id},receiver_id.eq.{me}))"
                ),
            ),
            ("order", "created_at.desc".to_string()),
            ("limit", limit.to_string()),
        ];
        let mut rows: Vec<Message> = self
            .rest
            .select(TABLE, &filters)
            .await
            .context("failed to fetch conversation messages")?;
        // Fetched newest-first so the limit keeps the tail; display is ascending.
        rows.reverse();
        debug!("[MsgAPI] fetched {} messages with {}", rows.len(), counterpart_id);
        Ok(rows)
    }

    /// Write a message and return the stored row, id included.
    pub async fn send(
        &self,
        receiver_id: &str,
        body: &str,
        reply_to_id: Option<&str>,
    ) -> Result<Message> {
        let body = validate_body(body)?;
        if receiver_id == self.user_id {
            return Err(SdkError::validation("You can't message yourself").into());
        }
        let new = NewMessage {
            sender_id: self.user_id.clone(),
            receiver_id: receiver_id.to_string(),
            content: body,
            reply_to_id: reply_to_id.map(str::to_string),
        };
        let mut rows: Vec<Message> = self
            .rest
            .insert(TABLE, &new)
            .await
            .context("failed to send message")?;
        let msg = rows
            .pop()
            .ok_or_else(|| SdkError::Decode("insert returned no row".into()))?;
        info!("[MsgAPI] 📤 sent message {} to {}", msg.id, receiver_id);
        Ok(msg)
    }

    /// Stamp `read_at` (and `seen_at` when `share_receipts`) on unread incoming
    /// messages from `counterpart_id`. Returns the number of rows touched.
    pub async fn mark_read(&self, counterpart_id: &str, share_receipts: bool) -> Result<usize> {
        let now = Utc::now();
        let base = [
            eq("sender_id", counterpart_id),
            eq("receiver_id", &self.user_id),
        ];

        let mut filters = base.to_vec();
        filters.push(is_null("read_at"));
        let read: Vec<Message> = self
            .rest
            .update(TABLE, &filters, &serde_json::json!({ "read_at": now }))
            .await
            .context("failed to mark messages as read")?;
        let mut touched = read.len();

        if share_receipts {
            let mut filters = base.to_vec();
            filters.push(is_null("seen_at"));
            let seen: Vec<Message> = self
                .rest
                .update(TABLE, &filters, &serde_json::json!({ "seen_at": now }))
                .await
                .context("failed to mark messages as seen")?;
            touched = touched.max(seen.len());
        }
        Ok(touched)
    }
}

#[async_trait]
impl MessageStore for MessageApi {
    async fn fetch_thread(&self, counterpart_id: &str, limit: usize) -> Result<Vec<Message>> {
        MessageApi::fetch_thread(self, counterpart_id, limit).await
    }

    async fn send(
        &self,
        receiver_id: &str,
        body: &str,
        reply_to_id: Option<&str>,
    ) -> Result<Message> {
        MessageApi::send(self, receiver_id, body, reply_to_id).await
    }

    async fn mark_read(&self, counterpart_id: &str, share_receipts: bool) -> Result<usize> {
        MessageApi::mark_read(self, counterpart_id, share_receipts).await
    }
}

pub(crate) fn validate_body(body: &str) -> Result<String, SdkError> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return Err(SdkError::validation("Message can't be empty"));
    }
    if trimmed.chars().count() > MAX_BODY_CHARS {
        return Err(SdkError::validation(format!(
            "Message is longer than {MAX_BODY_CHARS} characters"
        )));
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_and_oversized_bodies() {
        assert!(validate_body("   ").is_err());
        assert!(validate_body(&"a".repeat(MAX_BODY_CHARS + 1)).is_err());
        assert_eq!(validate_body("  hello \n").unwrap(), "hello");
    }

    #[tokio::test]
    async fn refuses_to_message_self_before_any_request() {
        let rest = RestClient::new("http://127.0.0.1:9", "anon", "token").unwrap();
        let api = MessageApi::new(rest, "me".into());
        let err = api.send("me", "hi", None).await.unwrap_err();
        assert_eq!(
            crate::dream::error::ErrorKind::of(&err),
            crate::dream::error::ErrorKind::Validation
        );
    }
}
