//! Conversation merge reducer.
//!
//! The inbox is fed by an initial bulk load, single-row realtime deltas and a
//! periodic poll that re-fetches the bulk list. All three go through
//! [`ConversationList`]. Rules:
//!
//! - a known counterpart is patched in place; its position only changes on an
//!   explicit [`ConversationList::sort_by_recency`];
//! - an unknown counterpart yields [`MergeOutcome::NeedsRefetch`] instead of a
//!   guessed row (the client lacks the counterpart profile);
//! - a delta older than the stored row never overwrites it, and re-applying a
//!   delta is a no-op;
//! - an update that changes nothing keeps the same `Arc`, so views can skip
//!   re-rendering by pointer comparison.

use crate::dream::conversation::types::{ConversationDelta, ConversationSummary};
use crate::dream::message::models::Message;
use crate::dream::types::Profile;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Unchanged,
    Updated,
    /// The counterpart is not in the list; re-fetch the bulk list.
    NeedsRefetch,
}

#[derive(Debug, Clone, Default)]
pub struct ConversationList {
    items: Arc<Vec<ConversationSummary>>,
}

impl ConversationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items(items: Vec<ConversationSummary>) -> Self {
        Self {
            items: Arc::new(items),
        }
    }

    /// Shared snapshot; unchanged merges return the same allocation.
    pub fn snapshot(&self) -> Arc<Vec<ConversationSummary>> {
        Arc::clone(&self.items)
    }

    pub fn items(&self) -> &[ConversationSummary] {
        &self.items
    }

    pub fn get(&self, counterpart_id: &str) -> Option<&ConversationSummary> {
        self.items.iter().find(|c| c.counterpart_id == counterpart_id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total_unread(&self) -> u32 {
        self.items.iter().map(|c| c.unread_count).sum()
    }

    pub fn apply_delta(&mut self, delta: &ConversationDelta) -> MergeOutcome {
        let Some(idx) = self
            .items
            .iter()
            .position(|c| c.counterpart_id == delta.counterpart_id)
        else {
            return MergeOutcome::NeedsRefetch;
        };

        let current = &self.items[idx];
        if delta.last_message_at < current.last_message_at {
            return MergeOutcome::Unchanged;
        }
        if delta.last_message_at == current.last_message_at
            && delta.last_message == current.last_message
        {
            // Same message delivered again (push + poll, or a replayed event).
            return MergeOutcome::Unchanged;
        }

        let unread_count = apply_unread_delta(current.unread_count, delta.unread_delta);
        let patched = ConversationSummary {
            last_message: delta.last_message.clone(),
            last_message_at: delta.last_message_at,
            unread_count,
            ..current.clone()
        };
        Arc::make_mut(&mut self.items)[idx] = patched;
        MergeOutcome::Updated
    }

    /// Replace the list with a bulk fetch.
    ///
    /// A locally held row whose last message is newer than the fetched one
    /// (a delta that raced the fetch) keeps its message fields.
    pub fn replace_all(&mut self, bulk: Vec<ConversationSummary>) -> MergeOutcome {
        self.replace_all_with_open(bulk, None)
    }

    /// Like [`replace_all`](Self::replace_all), but the open conversation
    /// stays read whatever count the fetch carries.
    pub fn replace_all_with_open(
        &mut self,
        bulk: Vec<ConversationSummary>,
        open: Option<&str>,
    ) -> MergeOutcome {
        let local: HashMap<&str, &ConversationSummary> = self
            .items
            .iter()
            .map(|c| (c.counterpart_id.as_str(), c))
            .collect();

        let mut seen = HashSet::new();
        let next: Vec<ConversationSummary> = bulk
            .into_iter()
            .filter(|c| seen.insert(c.counterpart_id.clone()))
            .map(|fetched| match local.get(fetched.counterpart_id.as_str()) {
                Some(held) if held.last_message_at > fetched.last_message_at => {
                    ConversationSummary {
                        last_message: held.last_message.clone(),
                        last_message_at: held.last_message_at,
                        unread_count: held.unread_count,
                        ..fetched
                    }
                }
                _ => fetched,
            })
            .map(|mut row| {
                if open == Some(row.counterpart_id.as_str()) {
                    row.unread_count = 0;
                }
                row
            })
            .collect();

        if next == *self.items {
            return MergeOutcome::Unchanged;
        }
        self.items = Arc::new(next);
        MergeOutcome::Updated
    }

    pub fn reset_unread(&mut self, counterpart_id: &str) -> MergeOutcome {
        let Some(idx) = self
            .items
            .iter()
            .position(|c| c.counterpart_id == counterpart_id && c.unread_count > 0)
        else {
            return MergeOutcome::Unchanged;
        };
        Arc::make_mut(&mut self.items)[idx].unread_count = 0;
        MergeOutcome::Updated
    }

    /// Most recent first; ties keep their current relative order.
    pub fn sort_by_recency(&mut self) -> MergeOutcome {
        let sorted = self
            .items
            .windows(2)
            .all(|w| w[0].last_message_at >= w[1].last_message_at);
        if sorted {
            return MergeOutcome::Unchanged;
        }
        Arc::make_mut(&mut self.items).sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        MergeOutcome::Updated
    }

    /// Rows to display: hidden and blocked counterparts are skipped, the
    /// stored rows stay untouched.
    pub fn visible(
        &self,
        hidden: &HashSet<String>,
        blocked: &HashSet<String>,
    ) -> Vec<ConversationSummary> {
        self.items
            .iter()
            .filter(|c| !hidden.contains(&c.counterpart_id) && !blocked.contains(&c.counterpart_id))
            .cloned()
            .collect()
    }
}

fn apply_unread_delta(current: u32, delta: i32) -> u32 {
    if delta >= 0 {
        current.saturating_add(delta.unsigned_abs())
    } else {
        current.saturating_sub(delta.unsigned_abs())
    }
}

/// Build the inbox from raw message rows involving `me`.
///
/// One row per counterpart with its latest message; unread counts incoming
/// messages without `read_at`. Result is most recent first.
pub fn summarize(
    messages: &[Message],
    me: &str,
    profiles: &HashMap<String, Profile>,
) -> Vec<ConversationSummary> {
    let mut by_counterpart: HashMap<&str, ConversationSummary> = HashMap::new();

    for msg in messages {
        if msg.sender_id != me && msg.receiver_id != me {
            continue;
        }
        let counterpart = msg.counterpart(me);
        if counterpart == me {
            continue;
        }
        let unread = u32::from(msg.is_incoming(me) && msg.read_at.is_none());

        let entry = by_counterpart
            .entry(counterpart)
            .or_insert_with(|| ConversationSummary {
                counterpart_id: counterpart.to_string(),
                counterpart: profiles
                    .get(counterpart)
                    .cloned()
                    .unwrap_or_else(|| Profile::unknown(counterpart)),
                last_message: msg.body.clone(),
                last_message_at: msg.created_at,
                unread_count: 0,
            });
        entry.unread_count += unread;
        if msg.created_at > entry.last_message_at {
            entry.last_message = msg.body.clone();
            entry.last_message_at = msg.created_at;
        }
    }

    let mut list: Vec<ConversationSummary> = by_counterpart.into_values().collect();
    list.sort_by(|a, b| {
        b.last_message_at
            .cmp(&a.last_message_at)
            .then_with(|| a.counterpart_id.cmp(&b.counterpart_id))
    });
    list
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dream::message::models::fixtures::{at, msg};

    fn row(id: &str, text: &str, secs: i64, unread: u32) -> ConversationSummary {
        ConversationSummary {
            counterpart_id: id.to_string(),
            counterpart: Profile::unknown(id),
            last_message: text.to_string(),
            last_message_at: at(secs),
            unread_count: unread,
        }
    }

    fn delta(id: &str, text: &str, secs: i64, unread: i32) -> ConversationDelta {
        ConversationDelta {
            counterpart_id: id.to_string(),
            last_message: text.to_string(),
            last_message_at: at(secs),
            unread_delta: unread,
        }
    }

    fn list() -> ConversationList {
        ConversationList::from_items(vec![row("luna", "hi", 100, 0), row("sol", "yo", 50, 2)])
    }

    #[test]
    fn updates_in_place_without_reordering() {
        let mut l = list();
        assert_eq!(l.apply_delta(&delta("sol", "new dream", 200, 1)), MergeOutcome::Updated);
        assert_eq!(l.items()[1].counterpart_id, "sol");
        assert_eq!(l.items()[1].last_message, "new dream");
        assert_eq!(l.items()[1].unread_count, 3);

        assert_eq!(l.sort_by_recency(), MergeOutcome::Updated);
        assert_eq!(l.items()[0].counterpart_id, "sol");
    }

    #[test]
    fn applying_a_delta_twice_equals_applying_once() {
        let d = delta("luna", "did you sleep?", 150, 1);
        let mut once = list();
        once.apply_delta(&d);

        let mut twice = list();
        twice.apply_delta(&d);
        let before = twice.snapshot();
        assert_eq!(twice.apply_delta(&d), MergeOutcome::Unchanged);
        assert!(Arc::ptr_eq(&before, &twice.snapshot()));
        assert_eq!(once.items(), twice.items());
    }

    #[test]
    fn older_delta_never_overwrites_newer_value() {
        let mut l = list();
        let before = l.snapshot();
        assert_eq!(l.apply_delta(&delta("luna", "stale", 99, 1)), MergeOutcome::Unchanged);
        assert!(Arc::ptr_eq(&before, &l.snapshot()));
        assert_eq!(l.get("luna").unwrap().last_message, "hi");
    }

    #[test]
    fn unknown_counterpart_requests_refetch() {
        let mut l = list();
        assert_eq!(l.apply_delta(&delta("nova", "hello", 300, 1)), MergeOutcome::NeedsRefetch);
        assert_eq!(l.len(), 2);
    }

    #[test]
    fn bulk_refetch_keeps_newer_local_delta() {
        let mut l = list();
        l.apply_delta(&delta("luna", "fresh", 400, 1));

        // Fetch started before "fresh" was written.
        let outcome = l.replace_all(vec![
            row("luna", "hi", 100, 0),
            row("sol", "yo", 50, 2),
            row("nova", "welcome", 20, 1),
        ]);
        assert_eq!(outcome, MergeOutcome::Updated);
        assert_eq!(l.get("luna").unwrap().last_message, "fresh");
        assert_eq!(l.get("luna").unwrap().unread_count, 1);
        assert!(l.get("nova").is_some());
    }

    #[test]
    fn identical_bulk_keeps_identity() {
        let mut l = list();
        let before = l.snapshot();
        let outcome = l.replace_all(vec![row("luna", "hi", 100, 0), row("sol", "yo", 50, 2)]);
        assert_eq!(outcome, MergeOutcome::Unchanged);
        assert!(Arc::ptr_eq(&before, &l.snapshot()));
    }

    #[test]
    fn unread_never_goes_negative() {
        let mut l = list();
        l.apply_delta(&delta("sol", "read elsewhere", 60, -5));
        assert_eq!(l.get("sol").unwrap().unread_count, 0);
        assert_eq!(l.total_unread(), 0);
    }

    #[test]
    fn reset_unread_is_noop_when_already_zero() {
        let mut l = list();
        assert_eq!(l.reset_unread("luna"), MergeOutcome::Unchanged);
        assert_eq!(l.reset_unread("sol"), MergeOutcome::Updated);
        assert_eq!(l.total_unread(), 0);
    }

    #[test]
    fn hidden_and_blocked_are_filtered_but_kept() {
        let l = list();
        let hidden: HashSet<String> = ["luna".to_string()].into();
        let blocked: HashSet<String> = ["sol".to_string()].into();
        assert!(l.visible(&hidden, &blocked).is_empty());
        assert_eq!(l.visible(&hidden, &HashSet::new()).len(), 1);
        assert_eq!(l.len(), 2);
    }

    #[test]
    fn summarizes_messages_per_counterpart() {
        let mut read = msg("m2", "luna", "me", "second", 20);
        read.read_at = Some(at(21));
        let messages = vec![
            msg("m3", "me", "sol", "to sol", 30),
            read,
            msg("m1", "luna", "me", "first", 10),
            msg("m4", "luna", "me", "third", 25),
            msg("x", "nova", "sol", "not mine", 40),
        ];
        let mut profiles = HashMap::new();
        let mut luna = Profile::unknown("luna");
        luna.username = "luna".into();
        profiles.insert("luna".to_string(), luna);

        let summary = summarize(&messages, "me", &profiles);
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[0].counterpart_id, "sol");
        assert_eq!(summary[0].unread_count, 0);
        assert_eq!(summary[1].counterpart_id, "luna");
        assert_eq!(summary[1].last_message, "third");
        assert_eq!(summary[1].unread_count, 2);
        assert_eq!(summary[1].counterpart.username, "luna");
    }
}
