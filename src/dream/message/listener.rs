//! Message listener callbacks.

use crate::dream::message::models::Message;
use async_trait::async_trait;

#[async_trait]
pub trait MessageListener: Send + Sync {
    /// A message for the open conversation arrived (push or poll).
    async fn on_recv_new_message(&self, message: Message);

    /// Receipt fields of a loaded message changed.
    async fn on_message_updated(&self, message: Message);

    /// The open conversation's list was replaced by a poll.
    async fn on_thread_refreshed(&self, counterpart_id: String, messages: Vec<Message>);

    /// Realtime channel connected or dropped.
    async fn on_connection_status_changed(&self, connected: bool, message: String);
}

/// No-op listener.
pub struct EmptyMessageListener;

#[async_trait]
impl MessageListener for EmptyMessageListener {
    async fn on_recv_new_message(&self, _message: Message) {}
    async fn on_message_updated(&self, _message: Message) {}
    async fn on_thread_refreshed(&self, _counterpart_id: String, _messages: Vec<Message>) {}
    async fn on_connection_status_changed(&self, _connected: bool, _message: String) {}
}
