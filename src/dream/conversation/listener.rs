//! Conversation listener callbacks.

use crate::dream::conversation::types::ConversationSummary;
use async_trait::async_trait;

#[async_trait]
pub trait ConversationListener: Send + Sync {
    /// Sync started (initial load or a refetch).
    async fn on_sync_server_start(&self);

    async fn on_sync_server_finish(&self);

    async fn on_sync_server_failed(&self);

    /// The visible inbox changed; carries the full visible list.
    async fn on_conversation_changed(&self, conversations: Vec<ConversationSummary>);

    /// Total unread over visible conversations.
    async fn on_total_unread_message_count_changed(&self, total_unread_count: u32);
}

/// No-op listener.
pub struct EmptyConversationListener;

#[async_trait]
impl ConversationListener for EmptyConversationListener {
    async fn on_sync_server_start(&self) {}
    async fn on_sync_server_finish(&self) {}
    async fn on_sync_server_failed(&self) {}
    async fn on_conversation_changed(&self, _conversations: Vec<ConversationSummary>) {}
    async fn on_total_unread_message_count_changed(&self, _total_unread_count: u32) {}
}
