//! Conversation sync service.
//!
//! Owns the inbox state and is the only writer to it: the initial load,
//! realtime message events and the fallback poll all end up in
//! [`ConversationList`] through this service.

use crate::dream::conversation::api::ConversationApi;
use crate::dream::conversation::dao::HiddenConversationDao;
use crate::dream::conversation::listener::{ConversationListener, EmptyConversationListener};
use crate::dream::conversation::models::ConversationSyncerConfig;
use crate::dream::conversation::reducer::{ConversationList, MergeOutcome};
use crate::dream::conversation::types::{ConversationDelta, ConversationSummary};
use crate::dream::guard::{PollHandle, RequestGuard};
use crate::dream::message::models::Message;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Where the bulk inbox comes from.
#[async_trait]
pub trait InboxSource: Send + Sync {
    async fn fetch_summaries(&self) -> Result<Vec<ConversationSummary>>;
}

#[async_trait]
impl InboxSource for ConversationApi {
    async fn fetch_summaries(&self) -> Result<Vec<ConversationSummary>> {
        ConversationApi::fetch_summaries(self).await
    }
}

#[derive(Default)]
struct InboxState {
    list: ConversationList,
    hidden: HashSet<String>,
    blocked: HashSet<String>,
    active: Option<String>,
}

impl InboxState {
    fn visible(&self) -> Vec<ConversationSummary> {
        self.list.visible(&self.hidden, &self.blocked)
    }
}

pub struct ConversationSyncer {
    config: ConversationSyncerConfig,
    source: Arc<dyn InboxSource>,
    hidden_dao: Option<HiddenConversationDao>,
    listener: Arc<dyn ConversationListener>,
    state: Mutex<InboxState>,
    guard: RequestGuard,
}

impl ConversationSyncer {
    pub fn new(config: ConversationSyncerConfig, source: Arc<dyn InboxSource>) -> Self {
        Self::with_listener(config, source, None, Arc::new(EmptyConversationListener))
    }

    pub fn with_listener(
        config: ConversationSyncerConfig,
        source: Arc<dyn InboxSource>,
        hidden_dao: Option<HiddenConversationDao>,
        listener: Arc<dyn ConversationListener>,
    ) -> Self {
        info!("[ConvSync] creating conversation syncer for {}", config.user_id);
        Self {
            config,
            source,
            hidden_dao,
            listener,
            state: Mutex::new(InboxState::default()),
            guard: RequestGuard::new(),
        }
    }

    /// Load hidden flags and the inbox.
    pub async fn init(&self) -> Result<()> {
        if let Some(dao) = &self.hidden_dao {
            let hidden = dao.hidden_ids().await?;
            debug!("[ConvSync] {} hidden conversations", hidden.len());
            self.state.lock().await.hidden = hidden;
        }
        self.refresh().await
    }

    /// Re-fetch the bulk inbox and merge it.
    pub async fn refresh(&self) -> Result<()> {
        let ticket = self.guard.ticket();
        self.listener.on_sync_server_start().await;

        let bulk = match self.source.fetch_summaries().await {
            Ok(bulk) => bulk,
            Err(e) => {
                error!("[ConvSync] ❌ inbox fetch failed: {:#}", e);
                self.listener.on_sync_server_failed().await;
                return Err(e);
            }
        };

        let mut state = self.state.lock().await;
        if !self.guard.is_current(ticket) {
            debug!("[ConvSync] discarding inbox fetched for a closed view");
            return Ok(());
        }
        let open = state.active.clone();
        let outcome = state.list.replace_all_with_open(bulk, open.as_deref());
        let changed = self.changed_payload(&state, outcome);
        drop(state);

        self.notify(changed).await;
        self.listener.on_sync_server_finish().await;
        Ok(())
    }

    /// Apply a single-row delta; unknown counterparts trigger a refetch.
    pub async fn apply_delta(&self, delta: &ConversationDelta) -> Result<MergeOutcome> {
        let mut state = self.state.lock().await;
        let outcome = state.list.apply_delta(delta);
        let changed = self.changed_payload(&state, outcome);
        drop(state);

        match outcome {
            MergeOutcome::NeedsRefetch => {
                info!(
                    "[ConvSync] new counterpart {}, refetching inbox",
                    delta.counterpart_id
                );
                self.refresh().await?;
            }
            MergeOutcome::Updated => self.notify(changed).await,
            MergeOutcome::Unchanged => {
                debug!("[ConvSync] delta for {} changed nothing", delta.counterpart_id)
            }
        }
        Ok(outcome)
    }

    /// Fold a message (realtime insert or local send) into the inbox.
    pub async fn on_message(&self, msg: &Message) -> Result<MergeOutcome> {
        let me = &self.config.user_id;
        if msg.sender_id != *me && msg.receiver_id != *me {
            return Ok(MergeOutcome::Unchanged);
        }
        let open = {
            let state = self.state.lock().await;
            state.active.as_deref() == Some(msg.counterpart(me))
        };
        let delta = ConversationDelta::from_message(msg, me, open);
        self.apply_delta(&delta).await
    }

    /// Fold a read receipt into the inbox. Reads are marked per conversation,
    /// so a message the viewer received turning read clears that row.
    pub async fn on_message_read(&self, msg: &Message) -> MergeOutcome {
        if msg.receiver_id != self.config.user_id || msg.read_at.is_none() {
            return MergeOutcome::Unchanged;
        }
        let mut state = self.state.lock().await;
        let outcome = state.list.reset_unread(&msg.sender_id);
        let changed = self.changed_payload(&state, outcome);
        drop(state);
        if outcome == MergeOutcome::Updated {
            debug!("[ConvSync] {} read elsewhere, unread cleared", msg.sender_id);
        }
        self.notify(changed).await;
        outcome
    }

    /// Mark which conversation is on screen; its unread count drops to zero.
    ///
    /// Inbox fetches already in flight are discarded, since they predate the reset.
    pub async fn set_active(&self, counterpart_id: Option<&str>) {
        let mut state = self.state.lock().await;
        self.guard.invalidate();
        state.active = counterpart_id.map(str::to_string);
        let outcome = match counterpart_id {
            Some(id) => state.list.reset_unread(id),
            None => MergeOutcome::Unchanged,
        };
        let changed = self.changed_payload(&state, outcome);
        drop(state);
        self.notify(changed).await;
    }

    pub async fn hide(&self, counterpart_id: &str) -> Result<()> {
        if let Some(dao) = &self.hidden_dao {
            dao.hide(counterpart_id).await?;
        }
        let mut state = self.state.lock().await;
        let changed = if state.hidden.insert(counterpart_id.to_string()) {
            self.changed_payload(&state, MergeOutcome::Updated)
        } else {
            None
        };
        drop(state);
        self.notify(changed).await;
        Ok(())
    }

    pub async fn unhide(&self, counterpart_id: &str) -> Result<()> {
        if let Some(dao) = &self.hidden_dao {
            dao.unhide(counterpart_id).await?;
        }
        let mut state = self.state.lock().await;
        let changed = if state.hidden.remove(counterpart_id) {
            self.changed_payload(&state, MergeOutcome::Updated)
        } else {
            None
        };
        drop(state);
        self.notify(changed).await;
        Ok(())
    }

    /// Replace the set of users blocked in either direction.
    pub async fn set_blocked(&self, blocked: HashSet<String>) {
        let mut state = self.state.lock().await;
        if state.blocked == blocked {
            return;
        }
        state.blocked = blocked;
        let changed = self.changed_payload(&state, MergeOutcome::Updated);
        drop(state);
        self.notify(changed).await;
    }

    pub async fn visible_conversations(&self) -> Vec<ConversationSummary> {
        self.state.lock().await.visible()
    }

    /// Shared snapshot of every stored row, hidden ones included.
    pub async fn snapshot(&self) -> Arc<Vec<ConversationSummary>> {
        self.state.lock().await.list.snapshot()
    }

    /// Start the fallback poll. Dropping the handle stops it.
    pub fn start_polling(self: &Arc<Self>) -> PollHandle {
        let syncer = Arc::clone(self);
        PollHandle::spawn("conversations", self.config.poll_interval, move || {
            let syncer = Arc::clone(&syncer);
            async move {
                if let Err(e) = syncer.refresh().await {
                    warn!("[ConvSync] poll failed: {:#}", e);
                }
            }
        })
    }

    /// Drop results of requests still in flight.
    pub fn shutdown(&self) {
        self.guard.invalidate();
    }

    fn changed_payload(
        &self,
        state: &InboxState,
        outcome: MergeOutcome,
    ) -> Option<(Vec<ConversationSummary>, u32)> {
        if outcome != MergeOutcome::Updated {
            return None;
        }
        let visible = state.visible();
        let total = visible.iter().map(|c| c.unread_count).sum();
        Some((visible, total))
    }

    async fn notify(&self, changed: Option<(Vec<ConversationSummary>, u32)>) {
        if let Some((visible, total)) = changed {
            self.listener.on_conversation_changed(visible).await;
            self.listener.on_total_unread_message_count_changed(total).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dream::message::models::fixtures::{at, msg};
    use crate::dream::types::Profile;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Once;

    static INIT_LOGGER: Once = Once::new();

    fn init_test_logger() {
        INIT_LOGGER.call_once(|| {
            use tracing_subscriber::prelude::*;
            use tracing_subscriber::EnvFilter;

            let filter_layer = EnvFilter::new("info,dreamlog_sdk_core=debug");
            let fmt_layer = tracing_subscriber::fmt::layer()
                .with_file(true)
                .with_line_number(true)
                .with_target(false)
                .with_test_writer();

            let _ = tracing_subscriber::registry()
                .with(filter_layer)
                .with(fmt_layer)
                .try_init();
        });
    }

    fn row(id: &str, text: &str, secs: i64, unread: u32) -> ConversationSummary {
        ConversationSummary {
            counterpart_id: id.to_string(),
            counterpart: Profile::unknown(id),
            last_message: text.to_string(),
            last_message_at: at(secs),
            unread_count: unread,
        }
    }

    /// Serves a fixed inbox and counts fetches.
    struct FakeInbox {
        rows: std::sync::Mutex<Vec<ConversationSummary>>,
        fetches: AtomicUsize,
    }

    impl FakeInbox {
        fn new(rows: Vec<ConversationSummary>) -> Arc<Self> {
            Arc::new(Self {
                rows: std::sync::Mutex::new(rows),
                fetches: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl InboxSource for FakeInbox {
        async fn fetch_summaries(&self) -> Result<Vec<ConversationSummary>> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(self.rows.lock().unwrap().clone())
        }
    }

    #[derive(Default)]
    struct RecordingListener {
        changes: std::sync::Mutex<Vec<Vec<ConversationSummary>>>,
        totals: std::sync::Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl ConversationListener for RecordingListener {
        async fn on_sync_server_start(&self) {}
        async fn on_sync_server_finish(&self) {}
        async fn on_sync_server_failed(&self) {}
        async fn on_conversation_changed(&self, conversations: Vec<ConversationSummary>) {
            self.changes.lock().unwrap().push(conversations);
        }
        async fn on_total_unread_message_count_changed(&self, total_unread_count: u32) {
            self.totals.lock().unwrap().push(total_unread_count);
        }
    }

    fn syncer(
        inbox: Arc<FakeInbox>,
        listener: Arc<RecordingListener>,
    ) -> ConversationSyncer {
        ConversationSyncer::with_listener(
            ConversationSyncerConfig::new("me".into()),
            inbox,
            None,
            listener,
        )
    }

    #[tokio::test]
    async fn message_from_unknown_counterpart_refetches() -> Result<()> {
        init_test_logger();
        let inbox = FakeInbox::new(vec![row("luna", "hi", 10, 0)]);
        let listener = Arc::new(RecordingListener::default());
        let s = syncer(inbox.clone(), listener.clone());
        s.init().await?;
        assert_eq!(inbox.fetches.load(Ordering::SeqCst), 1);

        inbox
            .rows
            .lock()
            .unwrap()
            .insert(0, row("nova", "first contact", 20, 1));
        let outcome = s.on_message(&msg("m1", "nova", "me", "first contact", 20)).await?;
        assert_eq!(outcome, MergeOutcome::NeedsRefetch);
        assert_eq!(inbox.fetches.load(Ordering::SeqCst), 2);
        assert_eq!(s.visible_conversations().await.len(), 2);
        assert_eq!(listener.totals.lock().unwrap().last(), Some(&1));
        Ok(())
    }

    #[tokio::test]
    async fn open_conversation_does_not_accumulate_unread() -> Result<()> {
        let inbox = FakeInbox::new(vec![row("luna", "hi", 10, 2)]);
        let listener = Arc::new(RecordingListener::default());
        let s = syncer(inbox, listener.clone());
        s.init().await?;

        s.set_active(Some("luna")).await;
        s.on_message(&msg("m1", "luna", "me", "are you there", 30)).await?;
        let visible = s.visible_conversations().await;
        assert_eq!(visible[0].unread_count, 0);
        assert_eq!(visible[0].last_message, "are you there");

        s.set_active(None).await;
        s.on_message(&msg("m2", "luna", "me", "ok bye", 40)).await?;
        assert_eq!(s.visible_conversations().await[0].unread_count, 1);
        Ok(())
    }

    #[tokio::test]
    async fn repeated_event_notifies_once() -> Result<()> {
        let inbox = FakeInbox::new(vec![row("luna", "hi", 10, 0)]);
        let listener = Arc::new(RecordingListener::default());
        let s = syncer(inbox, listener.clone());
        s.init().await?;
        let baseline = listener.changes.lock().unwrap().len();

        let m = msg("m1", "luna", "me", "echo", 30);
        s.on_message(&m).await?;
        s.on_message(&m).await?;
        assert_eq!(listener.changes.lock().unwrap().len(), baseline + 1);
        assert_eq!(s.visible_conversations().await[0].unread_count, 1);
        Ok(())
    }

    #[tokio::test]
    async fn blocked_and_hidden_are_not_visible() -> Result<()> {
        let inbox = FakeInbox::new(vec![row("luna", "hi", 10, 3), row("sol", "yo", 5, 1)]);
        let listener = Arc::new(RecordingListener::default());
        let s = syncer(inbox, listener.clone());
        s.init().await?;

        s.hide("luna").await?;
        assert_eq!(listener.totals.lock().unwrap().last(), Some(&1));
        s.set_blocked(["sol".to_string()].into()).await;
        assert!(s.visible_conversations().await.is_empty());
        assert_eq!(s.snapshot().await.len(), 2);

        s.unhide("luna").await?;
        assert_eq!(s.visible_conversations().await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn open_conversation_stays_read_across_polls() -> Result<()> {
        let inbox = FakeInbox::new(vec![row("luna", "hi", 10, 3), row("sol", "yo", 5, 1)]);
        let listener = Arc::new(RecordingListener::default());
        let s = syncer(inbox.clone(), listener.clone());
        s.init().await?;

        s.set_active(Some("luna")).await;
        let notified = listener.changes.lock().unwrap().len();

        // The server has not seen the read yet and still reports 3.
        s.refresh().await?;
        let visible = s.visible_conversations().await;
        assert_eq!(visible[0].counterpart_id, "luna");
        assert_eq!(visible[0].unread_count, 0);
        assert_eq!(visible[1].unread_count, 1);
        assert_eq!(listener.changes.lock().unwrap().len(), notified);

        // Once closed, the server count applies again.
        s.set_active(None).await;
        s.refresh().await?;
        assert_eq!(s.visible_conversations().await[0].unread_count, 3);
        Ok(())
    }

    #[tokio::test]
    async fn fetch_started_before_open_is_discarded() -> Result<()> {
        let inbox = Arc::new(GatedInbox {
            entered: tokio::sync::Notify::new(),
            gate: tokio::sync::Notify::new(),
        });
        let s = Arc::new(ConversationSyncer::new(
            ConversationSyncerConfig::new("me".into()),
            inbox.clone(),
        ));

        let task = tokio::spawn({
            let s = Arc::clone(&s);
            async move { s.refresh().await }
        });
        inbox.entered.notified().await;
        s.set_active(Some("luna")).await;
        inbox.gate.notify_one();
        task.await??;

        assert!(s.visible_conversations().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn read_receipt_for_received_message_clears_unread() -> Result<()> {
        let inbox = FakeInbox::new(vec![row("luna", "hi", 10, 2), row("sol", "yo", 5, 1)]);
        let listener = Arc::new(RecordingListener::default());
        let s = syncer(inbox, listener.clone());
        s.init().await?;

        // Still unread: nothing changes.
        let incoming = msg("m1", "luna", "me", "hi", 10);
        assert_eq!(s.on_message_read(&incoming).await, MergeOutcome::Unchanged);

        // The viewer's own message being read by sol says nothing about the inbox.
        let mut outgoing = msg("m2", "me", "sol", "yo", 5);
        outgoing.read_at = Some(at(20));
        assert_eq!(s.on_message_read(&outgoing).await, MergeOutcome::Unchanged);

        let mut read = incoming;
        read.read_at = Some(at(30));
        assert_eq!(s.on_message_read(&read).await, MergeOutcome::Updated);
        let visible = s.visible_conversations().await;
        assert_eq!(visible[0].unread_count, 0);
        assert_eq!(visible[1].unread_count, 1);
        assert_eq!(listener.totals.lock().unwrap().last(), Some(&1));

        assert_eq!(s.on_message_read(&read).await, MergeOutcome::Unchanged);
        Ok(())
    }

    /// Blocks each fetch until the test releases it.
    struct GatedInbox {
        entered: tokio::sync::Notify,
        gate: tokio::sync::Notify,
    }

    #[async_trait]
    impl InboxSource for GatedInbox {
        async fn fetch_summaries(&self) -> Result<Vec<ConversationSummary>> {
            self.entered.notify_one();
            self.gate.notified().await;
            Ok(vec![row("luna", "late", 10, 4)])
        }
    }

    #[tokio::test]
    async fn fetch_completing_after_shutdown_is_discarded() -> Result<()> {
        let inbox = Arc::new(GatedInbox {
            entered: tokio::sync::Notify::new(),
            gate: tokio::sync::Notify::new(),
        });
        let listener = Arc::new(RecordingListener::default());
        let s = Arc::new(ConversationSyncer::with_listener(
            ConversationSyncerConfig::new("me".into()),
            inbox.clone(),
            None,
            listener.clone(),
        ));

        let task = tokio::spawn({
            let s = Arc::clone(&s);
            async move { s.refresh().await }
        });
        inbox.entered.notified().await;
        s.shutdown();
        inbox.gate.notify_one();
        task.await??;

        assert!(s.visible_conversations().await.is_empty());
        assert!(listener.changes.lock().unwrap().is_empty());
        Ok(())
    }
}
