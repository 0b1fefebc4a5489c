//! Message list of the open conversation.
//!
//! Realtime inserts, polls and locally sent messages all go through
//! [`MessageThread`], which keeps the list ordered by `created_at` ascending
//! and unique by message id.

use crate::dream::message::models::Message;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadChange {
    Unchanged,
    Inserted,
    Updated,
}

#[derive(Debug, Clone)]
pub struct MessageThread {
    me: String,
    counterpart_id: String,
    messages: Vec<Message>,
    /// Locally sent messages not yet seen in a server read.
    unconfirmed: HashSet<String>,
}

impl MessageThread {
    pub fn new(me: impl Into<String>, counterpart_id: impl Into<String>) -> Self {
        Self {
            me: me.into(),
            counterpart_id: counterpart_id.into(),
            messages: Vec::new(),
            unconfirmed: HashSet::new(),
        }
    }

    pub fn counterpart_id(&self) -> &str {
        &self.counterpart_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn latest(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Incoming messages the viewer has not read yet.
    pub fn unread_incoming(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.is_incoming(&self.me) && m.read_at.is_none())
            .count()
    }

    /// The message `msg` replies to, if it is loaded.
    pub fn reply_target(&self, msg: &Message) -> Option<&Message> {
        let target = msg.reply_to_id.as_deref()?;
        self.messages.iter().find(|m| m.id == target)
    }

    /// Append a message the server acknowledged for a local send, before its
    /// realtime echo arrives.
    pub fn push_local(&mut self, msg: Message) -> ThreadChange {
        let id = msg.id.clone();
        let change = self.upsert(msg);
        if change == ThreadChange::Inserted {
            self.unconfirmed.insert(id);
        }
        change
    }

    /// Insert a new message or merge it into the existing copy with the same id.
    pub fn upsert(&mut self, msg: Message) -> ThreadChange {
        if !msg.involves(&self.me, &self.counterpart_id) {
            return ThreadChange::Unchanged;
        }
        self.unconfirmed.remove(&msg.id);

        if let Some(existing) = self.messages.iter_mut().find(|m| m.id == msg.id) {
            let merged = merge_receipts(existing, msg);
            if *existing == merged {
                return ThreadChange::Unchanged;
            }
            let moved = existing.created_at != merged.created_at;
            *existing = merged;
            if moved {
                self.sort();
            }
            return ThreadChange::Updated;
        }

        let key = (msg.created_at, msg.id.clone());
        let idx = self
            .messages
            .partition_point(|m| (m.created_at, m.id.clone()) <= key);
        self.messages.insert(idx, msg);
        ThreadChange::Inserted
    }

    /// Apply an update event; unknown ids are ignored since an update never
    /// introduces a message.
    pub fn apply_update(&mut self, msg: Message) -> ThreadChange {
        if self.messages.iter().any(|m| m.id == msg.id) {
            self.upsert(msg)
        } else {
            ThreadChange::Unchanged
        }
    }

    pub fn remove(&mut self, id: &str) -> ThreadChange {
        let before = self.messages.len();
        self.messages.retain(|m| m.id != id);
        self.unconfirmed.remove(id);
        if self.messages.len() == before {
            ThreadChange::Unchanged
        } else {
            ThreadChange::Updated
        }
    }

    /// Replace the list with a polled snapshot, keeping locally sent messages
    /// the snapshot does not contain yet and never regressing receipt fields.
    pub fn merge_poll(&mut self, bulk: Vec<Message>) -> ThreadChange {
        let mut current: HashMap<String, Message> = self
            .messages
            .iter()
            .map(|m| (m.id.clone(), m.clone()))
            .collect();

        let mut next: Vec<Message> = Vec::with_capacity(bulk.len() + self.unconfirmed.len());
        let mut seen_ids = HashSet::new();
        for msg in bulk {
            if !msg.involves(&self.me, &self.counterpart_id) || !seen_ids.insert(msg.id.clone()) {
                continue;
            }
            self.unconfirmed.remove(&msg.id);
            let merged = match current.remove(&msg.id) {
                Some(existing) => merge_receipts(&existing, msg),
                None => msg,
            };
            next.push(merged);
        }
        for id in &self.unconfirmed {
            if let Some(local) = current.remove(id) {
                next.push(local);
            }
        }
        next.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));

        if next == self.messages {
            ThreadChange::Unchanged
        } else {
            self.messages = next;
            ThreadChange::Updated
        }
    }

    fn sort(&mut self) {
        self.messages
            .sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
    }
}

/// Take `incoming` but keep receipt timestamps that are already set, so an
/// older snapshot cannot clear a newer read/seen mark.
fn merge_receipts(existing: &Message, incoming: Message) -> Message {
    Message {
        read_at: existing.read_at.max(incoming.read_at),
        seen_at: existing.seen_at.max(incoming.seen_at),
        ..incoming
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dream::message::models::fixtures::{at, msg};

    fn thread() -> MessageThread {
        MessageThread::new("me", "luna")
    }

    #[test]
    fn keeps_ascending_order_regardless_of_arrival() {
        let mut t = thread();
        t.upsert(msg("m3", "luna", "me", "third", 30));
        t.upsert(msg("m1", "me", "luna", "first", 10));
        t.upsert(msg("m2", "luna", "me", "second", 20));
        let ids: Vec<_> = t.messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["m1", "m2", "m3"]);
    }

    #[test]
    fn echo_of_local_send_does_not_duplicate() {
        let mut t = thread();
        t.upsert(msg("m1", "luna", "me", "hey", 0));
        assert_eq!(t.push_local(msg("m2", "me", "luna", "hi!", 5)), ThreadChange::Inserted);
        assert_eq!(t.len(), 2);

        assert_eq!(t.upsert(msg("m2", "me", "luna", "hi!", 5)), ThreadChange::Unchanged);
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn ignores_messages_from_other_conversations() {
        let mut t = thread();
        assert_eq!(t.upsert(msg("x", "sol", "me", "yo", 0)), ThreadChange::Unchanged);
        assert!(t.is_empty());
    }

    #[test]
    fn poll_keeps_unconfirmed_local_messages() {
        let mut t = thread();
        t.upsert(msg("m1", "luna", "me", "hey", 0));
        t.push_local(msg("m2", "me", "luna", "on my way", 5));

        // Snapshot taken before m2 was written.
        let change = t.merge_poll(vec![msg("m1", "luna", "me", "hey", 0)]);
        assert_eq!(change, ThreadChange::Unchanged);
        assert_eq!(t.len(), 2);

        // Once the server returns m2 it is no longer tracked as local.
        t.merge_poll(vec![
            msg("m1", "luna", "me", "hey", 0),
            msg("m2", "me", "luna", "on my way", 5),
        ]);
        let change = t.merge_poll(vec![msg("m1", "luna", "me", "hey", 0)]);
        assert_eq!(change, ThreadChange::Updated);
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn stale_snapshot_cannot_clear_receipts() {
        let mut t = thread();
        t.upsert(msg("m1", "me", "luna", "hi", 0));

        let mut read = msg("m1", "me", "luna", "hi", 0);
        read.read_at = Some(at(3));
        read.seen_at = Some(at(4));
        assert_eq!(t.apply_update(read), ThreadChange::Updated);

        let change = t.merge_poll(vec![msg("m1", "me", "luna", "hi", 0)]);
        assert_eq!(change, ThreadChange::Unchanged);
        assert_eq!(t.messages()[0].seen_at, Some(at(4)));
    }

    #[test]
    fn update_for_unknown_message_is_ignored() {
        let mut t = thread();
        assert_eq!(t.apply_update(msg("m9", "luna", "me", "?", 0)), ThreadChange::Unchanged);
        assert!(t.is_empty());
    }

    #[test]
    fn resolves_one_level_reply() {
        let mut t = thread();
        t.upsert(msg("m1", "luna", "me", "dreamt of the sea", 0));
        let mut reply = msg("m2", "me", "luna", "again?", 10);
        reply.reply_to_id = Some("m1".into());
        t.upsert(reply.clone());

        assert_eq!(t.reply_target(&reply).map(|m| m.body.as_str()), Some("dreamt of the sea"));
        assert!(t.reply_target(&t.messages()[0]).is_none());
        assert_eq!(t.unread_incoming(), 1);
    }
}
