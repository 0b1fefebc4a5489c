//! Conversation view types.

use crate::dream::message::models::Message;
use crate::dream::types::Profile;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One row of the inbox: the latest exchange with a counterpart.
///
/// Derived on the client from message rows; never stored remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversationSummary {
    pub counterpart_id: String,
    pub counterpart: Profile,
    pub last_message: String,
    pub last_message_at: DateTime<Utc>,
    pub unread_count: u32,
}

/// Partial update for a single conversation row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationDelta {
    pub counterpart_id: String,
    pub last_message: String,
    pub last_message_at: DateTime<Utc>,
    pub unread_delta: i32,
}

impl ConversationDelta {
    /// Delta for a newly arrived message. Incoming messages count as unread
    /// unless that conversation is open.
    pub fn from_message(msg: &Message, me: &str, conversation_open: bool) -> Self {
        let unread_delta = if msg.is_incoming(me) && msg.read_at.is_none() && !conversation_open {
            1
        } else {
            0
        };
        Self {
            counterpart_id: msg.counterpart(me).to_string(),
            last_message: msg.body.clone(),
            last_message_at: msg.created_at,
            unread_delta,
        }
    }
}
