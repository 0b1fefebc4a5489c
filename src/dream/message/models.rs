//! Direct message rows.

use crate::dream::error::SdkError;
use crate::dream::serialization::null_as_default;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One direct message as stored remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    #[serde(rename = "content", default, deserialize_with = "null_as_default")]
    pub body: String,
    /// One-level reply reference; replies to replies are not threaded further.
    #[serde(default)]
    pub reply_to_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set when the receiver's client fetched the message.
    #[serde(default)]
    pub read_at: Option<DateTime<Utc>>,
    /// Set when the receiver has read receipts enabled and viewed it.
    #[serde(default)]
    pub seen_at: Option<DateTime<Utc>>,
}

impl Message {
    /// Decode a raw row (REST response item or change-feed record).
    pub fn from_row(row: serde_json::Value) -> Result<Self, SdkError> {
        serde_json::from_value(row).map_err(|e| SdkError::Decode(format!("message row: {e}")))
    }

    /// The other party of this message from `me`'s point of view.
    pub fn counterpart<'a>(&'a self, me: &str) -> &'a str {
        if self.sender_id == me {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }

    pub fn is_incoming(&self, me: &str) -> bool {
        self.receiver_id == me && self.sender_id != me
    }

    pub fn involves(&self, a: &str, b: &str) -> bool {
        (self.sender_id == a && self.receiver_id == b) || (self.sender_id == b && self.receiver_id == a)
    }
}

/// Insert payload for a new message.
#[derive(Debug, Clone, Serialize)]
pub struct NewMessage {
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    pub fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_760_000_000 + secs, 0).unwrap()
    }

    pub fn msg(id: &str, from: &str, to: &str, body: &str, secs: i64) -> Message {
        Message {
            id: id.to_string(),
            sender_id: from.to_string(),
            receiver_id: to.to_string(),
            body: body.to_string(),
            reply_to_id: None,
            created_at: at(secs),
            read_at: None,
            seen_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_row_with_nullable_columns() {
        let row = serde_json::json!({
            "id": "m1",
            "sender_id": "alice",
            "receiver_id": "bob",
            "content": null,
            "reply_to_id": null,
            "created_at": "2025-10-01T08:30:00Z",
            "read_at": "2025-10-01T08:31:00+00:00",
            "seen_at": null
        });
        let msg = Message::from_row(row).unwrap();
        assert_eq!(msg.body, "");
        assert!(msg.read_at.is_some());
        assert!(msg.seen_at.is_none());
        assert_eq!(msg.counterpart("bob"), "alice");
        assert!(msg.is_incoming("bob"));
        assert!(!msg.is_incoming("alice"));
    }

    #[test]
    fn rejects_rows_without_required_fields() {
        let err = Message::from_row(serde_json::json!({ "id": "m1" })).unwrap_err();
        assert!(matches!(err, SdkError::Decode(_)));
    }
}
