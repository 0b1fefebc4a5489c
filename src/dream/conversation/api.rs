//! Conversation HTTP API.
//!
//! There is no conversation table: the inbox is built from the user's
//! recent message rows plus the counterparts' profiles.

use crate::dream::conversation::reducer::summarize;
use crate::dream::conversation::types::ConversationSummary;
use crate::dream::message::models::Message;
use crate::dream::rest::{in_list, Filter, RestClient};
use crate::dream::types::Profile;
use anyhow::{Context, Result};
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

const OVERVIEW_LIMIT: usize = 500;

pub struct ConversationApi {
    rest: RestClient,
    user_id: String,
}

impl ConversationApi {
    pub fn new(rest: RestClient, user_id: String) -> Self {
        Self { rest, user_id }
    }

    /// Fetch the full inbox, most recent first.
    pub async fn fetch_summaries(&self) -> Result<Vec<ConversationSummary>> {
        let me = &self.user_id;
        let filters: Vec<Filter> = vec![
            ("or", format!("(sender_id.eq.{me},receiver_id.eq.{me})")),
            ("order", "created_at.desc".to_string()),
            ("limit", OVERVIEW_LIMIT.to_string()),
        ];
        let messages: Vec<Message> = self
            .rest
            .select("messages", &filters)
            .await
            .context("failed to fetch messages for inbox")?;

        let counterpart_ids: Vec<String> = messages
            .iter()
            .map(|m| m.counterpart(me).to_string())
            .filter(|id| id != me)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let profiles = self.fetch_profiles(&counterpart_ids).await?;

        let summaries = summarize(&messages, me, &profiles);
        info!(
            "[ConvAPI] 📥 inbox fetched: {} messages, {} conversations",
            messages.len(),
            summaries.len()
        );
        Ok(summaries)
    }

    pub async fn fetch_profiles(&self, ids: &[String]) -> Result<HashMap<String, Profile>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let filters: Vec<Filter> = vec![
            (
                "select",
                "id,username,display_name,avatar_url,read_receipts_enabled".to_string(),
            ),
            in_list("id", ids),
        ];
        let rows: Vec<Profile> = self
            .rest
            .select("profiles", &filters)
            .await
            .context("failed to fetch profiles")?;
        debug!("[ConvAPI] fetched {} of {} profiles", rows.len(), ids.len());
        Ok(rows.into_iter().map(|p| (p.id.clone(), p)).collect())
    }
}
