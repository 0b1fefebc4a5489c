//! Direct messages.
//!
//! Rows, the open-conversation thread, delivery receipts and the syncer
//! that keeps the thread current.

pub mod api;
pub mod listener;
pub mod models;
pub mod receipt;
pub mod service;
pub mod thread;

pub use api::{MessageApi, MessageStore};
pub use listener::{EmptyMessageListener, MessageListener};
pub use models::{Message, NewMessage};
pub use receipt::{delivery_status, spawn_mark_read, DeliveryStatus};
pub use service::{MessageSyncer, MessageSyncerConfig};
pub use thread::{MessageThread, ThreadChange};
