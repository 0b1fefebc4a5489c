//! Conversation inbox.
//!
//! One row per counterpart, kept in sync from a bulk load, realtime
//! message events and a fallback poll.

pub mod api;
pub mod dao;
pub mod listener;
pub mod models;
pub mod reducer;
pub mod service;
pub mod types;

pub use api::ConversationApi;
pub use dao::HiddenConversationDao;
pub use listener::{ConversationListener, EmptyConversationListener};
pub use models::ConversationSyncerConfig;
pub use reducer::{ConversationList, MergeOutcome};
pub use service::{ConversationSyncer, InboxSource};
pub use types::{ConversationDelta, ConversationSummary};
