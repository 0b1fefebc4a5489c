pub mod dream;

// Commonly used types, re-exported at the crate root.
pub use dream::{
    client::{ClientConfig, DreamClient},
    conversation::{ConversationSummary, ConversationSyncer, ConversationSyncerConfig},
    error::{ErrorKind, SdkError},
    feed::{DreamEntry, FeedQuery},
    message::Message,
    sign_in_async,
};
