//! Open-conversation sync.
//!
//! Realtime inserts/updates, the fallback poll and local sends all funnel
//! into one [`MessageThread`]. Responses that come back after the user
//! switched or closed the conversation are dropped.

use crate::dream::error::SdkError;
use crate::dream::guard::{PollHandle, RequestGuard};
use crate::dream::message::api::MessageStore;
use crate::dream::message::listener::{EmptyMessageListener, MessageListener};
use crate::dream::message::models::Message;
use crate::dream::message::receipt::{delivery_status, spawn_mark_read, DeliveryStatus};
use crate::dream::message::thread::{MessageThread, ThreadChange};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct MessageSyncerConfig {
    pub user_id: String,
    /// Messages fetched per open/poll.
    pub page_size: usize,
    pub poll_interval: Duration,
    /// The viewer's own read-receipt preference.
    pub share_receipts: bool,
}

impl MessageSyncerConfig {
    pub fn new(user_id: String) -> Self {
        Self {
            user_id,
            page_size: 100,
            poll_interval: Duration::from_secs(10),
            share_receipts: true,
        }
    }
}

pub struct MessageSyncer {
    config: MessageSyncerConfig,
    store: Arc<dyn MessageStore>,
    listener: Arc<dyn MessageListener>,
    active: Mutex<Option<MessageThread>>,
    guard: RequestGuard,
    poll: std::sync::Mutex<Option<PollHandle>>,
}

impl MessageSyncer {
    pub fn new(config: MessageSyncerConfig, store: Arc<dyn MessageStore>) -> Self {
        Self::with_listener(config, store, Arc::new(EmptyMessageListener))
    }

    pub fn with_listener(
        config: MessageSyncerConfig,
        store: Arc<dyn MessageStore>,
        listener: Arc<dyn MessageListener>,
    ) -> Self {
        Self {
            config,
            store,
            listener,
            active: Mutex::new(None),
            guard: RequestGuard::new(),
            poll: std::sync::Mutex::new(None),
        }
    }

    /// Id of the open conversation's counterpart.
    pub async fn active_counterpart(&self) -> Option<String> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|t| t.counterpart_id().to_string())
    }

    /// Switch to `counterpart_id`, load its messages and mark them read.
    ///
    /// Returns an empty list if another `open`/`close` happened while the
    /// fetch was in flight.
    pub async fn open(&self, counterpart_id: &str) -> Result<Vec<Message>> {
        let ticket = self.guard.invalidate();
        *self.active.lock().await = Some(MessageThread::new(
            self.config.user_id.clone(),
            counterpart_id,
        ));
        info!("[MsgSync] opening conversation with {}", counterpart_id);

        let rows = self
            .store
            .fetch_thread(counterpart_id, self.config.page_size)
            .await
            .with_context(|| format!("failed to open conversation with {counterpart_id}"))?;

        let mut active = self.active.lock().await;
        if !self.guard.is_current(ticket) {
            debug!("[MsgSync] dropping stale thread for {}", counterpart_id);
            return Ok(Vec::new());
        }
        let Some(thread) = active.as_mut() else {
            return Ok(Vec::new());
        };
        thread.merge_poll(rows);
        let messages = thread.messages().to_vec();
        let unread = thread.unread_incoming();
        drop(active);

        if unread > 0 {
            self.mark_read(counterpart_id);
        }
        self.listener
            .on_thread_refreshed(counterpart_id.to_string(), messages.clone())
            .await;
        Ok(messages)
    }

    /// Leave the open conversation; in-flight responses are discarded.
    pub async fn close(&self) {
        self.guard.invalidate();
        self.stop_polling();
        if let Some(thread) = self.active.lock().await.take() {
            debug!("[MsgSync] closed conversation with {}", thread.counterpart_id());
        }
    }

    /// Send to the open conversation and append the stored row right away.
    pub async fn send(&self, body: &str, reply_to_id: Option<&str>) -> Result<Message> {
        let counterpart_id = self
            .active_counterpart()
            .await
            .ok_or_else(|| SdkError::validation("No conversation is open"))?;
        let ticket = self.guard.ticket();
        let msg = self.store.send(&counterpart_id, body, reply_to_id).await?;

        let mut active = self.active.lock().await;
        if self.guard.is_current(ticket) {
            if let Some(thread) = active.as_mut() {
                thread.push_local(msg.clone());
            }
        }
        Ok(msg)
    }

    /// Realtime insert. Returns what changed in the open thread.
    pub async fn on_insert(&self, msg: Message) -> ThreadChange {
        let mut active = self.active.lock().await;
        let Some(thread) = active.as_mut() else {
            return ThreadChange::Unchanged;
        };
        let counterpart_id = thread.counterpart_id().to_string();
        let incoming = msg.is_incoming(&self.config.user_id);
        let change = thread.upsert(msg.clone());
        drop(active);

        if change == ThreadChange::Inserted {
            if incoming {
                // The conversation is on screen, so the message counts as read.
                self.mark_read(&counterpart_id);
            }
            self.listener.on_recv_new_message(msg).await;
        } else if change == ThreadChange::Updated {
            self.listener.on_message_updated(msg).await;
        }
        change
    }

    /// Realtime update; only receipts of loaded messages change.
    pub async fn on_update(&self, msg: Message) -> ThreadChange {
        let mut active = self.active.lock().await;
        let Some(thread) = active.as_mut() else {
            return ThreadChange::Unchanged;
        };
        let change = thread.apply_update(msg.clone());
        drop(active);
        if change == ThreadChange::Updated {
            self.listener.on_message_updated(msg).await;
        }
        change
    }

    pub async fn on_delete(&self, message_id: &str) -> ThreadChange {
        match self.active.lock().await.as_mut() {
            Some(thread) => thread.remove(message_id),
            None => ThreadChange::Unchanged,
        }
    }

    /// Re-fetch the open thread and merge it.
    pub async fn poll_once(&self) -> Result<ThreadChange> {
        let ticket = self.guard.ticket();
        let Some(counterpart_id) = self.active_counterpart().await else {
            return Ok(ThreadChange::Unchanged);
        };
        let rows = self
            .store
            .fetch_thread(&counterpart_id, self.config.page_size)
            .await?;

        let mut active = self.active.lock().await;
        if !self.guard.is_current(ticket) {
            debug!("[MsgSync] dropping stale poll for {}", counterpart_id);
            return Ok(ThreadChange::Unchanged);
        }
        let Some(thread) = active.as_mut() else {
            return Ok(ThreadChange::Unchanged);
        };
        let change = thread.merge_poll(rows);
        let unread = thread.unread_incoming();
        let messages = thread.messages().to_vec();
        drop(active);

        if change == ThreadChange::Updated {
            if unread > 0 {
                self.mark_read(&counterpart_id);
            }
            self.listener
                .on_thread_refreshed(counterpart_id, messages)
                .await;
        }
        Ok(change)
    }

    /// Start polling the open thread; replaces any previous poll.
    pub fn start_polling(self: &Arc<Self>) {
        let syncer = Arc::clone(self);
        let handle = PollHandle::spawn("messages", self.config.poll_interval, move || {
            let syncer = Arc::clone(&syncer);
            async move {
                if let Err(e) = syncer.poll_once().await {
                    warn!("[MsgSync] poll failed: {:#}", e);
                }
            }
        });
        if let Ok(mut slot) = self.poll.lock() {
            *slot = Some(handle);
        }
    }

    pub fn stop_polling(&self) {
        if let Ok(mut slot) = self.poll.lock() {
            slot.take();
        }
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|t| t.messages().to_vec())
            .unwrap_or_default()
    }

    /// Indicators for the viewer's outgoing messages in the open thread.
    pub async fn delivery_statuses(
        &self,
        counterpart_receipts_enabled: bool,
    ) -> Vec<(String, DeliveryStatus)> {
        let me = &self.config.user_id;
        self.active
            .lock()
            .await
            .as_ref()
            .map(|t| {
                t.messages()
                    .iter()
                    .filter_map(|m| {
                        delivery_status(m, me, counterpart_receipts_enabled)
                            .map(|s| (m.id.clone(), s))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn mark_read(&self, counterpart_id: &str) {
        spawn_mark_read(
            Arc::clone(&self.store),
            counterpart_id.to_string(),
            self.config.share_receipts,
        );
    }
}
