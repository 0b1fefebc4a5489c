//! Conversation syncer configuration.

use std::time::Duration;

pub struct ConversationSyncerConfig {
    /// Current user id.
    pub user_id: String,
    /// Fallback poll interval for the inbox.
    pub poll_interval: Duration,
}

impl ConversationSyncerConfig {
    pub fn new(user_id: String) -> Self {
        Self {
            user_id,
            poll_interval: Duration::from_secs(30),
        }
    }
}
