//! Delivery indicators derived from `read_at` / `seen_at`.

use crate::dream::message::api::MessageStore;
use crate::dream::message::models::Message;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// What the sender sees next to an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeliveryStatus {
    /// Not fetched by the receiver yet.
    Sent,
    /// Fetched (single check).
    Delivered,
    /// Viewed with receipts enabled (double check).
    Seen,
}

/// Indicator for `msg` as shown to `viewer_id`.
///
/// Returns `None` unless the viewer sent the message; receivers never see an
/// indicator on incoming messages. `receiver_receipts_enabled` is the
/// receiver's read-receipt preference.
pub fn delivery_status(
    msg: &Message,
    viewer_id: &str,
    receiver_receipts_enabled: bool,
) -> Option<DeliveryStatus> {
    if msg.sender_id != viewer_id {
        return None;
    }
    let status = match (msg.read_at, msg.seen_at) {
        (None, None) => DeliveryStatus::Sent,
        (Some(_), Some(_)) if receiver_receipts_enabled => DeliveryStatus::Seen,
        // seen_at without read_at still proves delivery
        _ => DeliveryStatus::Delivered,
    };
    Some(status)
}

/// Mark the active conversation's incoming messages as read (and seen when
/// the viewer shares receipts).
///
/// Best effort: the update runs in the background and failures are only
/// logged, so rendering never waits on it.
pub fn spawn_mark_read(
    store: Arc<dyn MessageStore>,
    counterpart_id: String,
    share_receipts: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match store.mark_read(&counterpart_id, share_receipts).await {
            Ok(count) => debug!(
                "[Receipt] marked {} messages from {} (seen={})",
                count, counterpart_id, share_receipts
            ),
            Err(e) => warn!(
                "[Receipt] failed to mark messages from {} as read: {:#}",
                counterpart_id, e
            ),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dream::message::models::fixtures::{at, msg};

    #[test]
    fn unread_message_is_sent() {
        let m = msg("m1", "alice", "bob", "hi", 0);
        assert_eq!(delivery_status(&m, "alice", true), Some(DeliveryStatus::Sent));
    }

    #[test]
    fn read_but_not_seen_is_delivered_for_sender_and_hidden_for_receiver() {
        let mut m = msg("m1", "alice", "bob", "hi", 0);
        m.read_at = Some(at(5));
        assert_eq!(delivery_status(&m, "alice", true), Some(DeliveryStatus::Delivered));
        assert_eq!(delivery_status(&m, "bob", true), None);
    }

    #[test]
    fn seen_requires_receiver_receipts() {
        let mut m = msg("m1", "alice", "bob", "hi", 0);
        m.read_at = Some(at(5));
        m.seen_at = Some(at(6));
        assert_eq!(delivery_status(&m, "alice", true), Some(DeliveryStatus::Seen));
        assert_eq!(delivery_status(&m, "alice", false), Some(DeliveryStatus::Delivered));
        assert_eq!(delivery_status(&m, "bob", true), None);
    }

    #[test]
    fn seen_without_read_counts_as_delivered() {
        let mut m = msg("m1", "alice", "bob", "hi", 0);
        m.seen_at = Some(at(6));
        assert_eq!(delivery_status(&m, "alice", true), Some(DeliveryStatus::Delivered));
    }
}
