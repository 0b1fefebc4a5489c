pub mod auth;
pub mod carousel;
pub mod client;
pub mod conversation;
pub mod db;
pub mod email;
pub mod error;
pub mod feed;
pub mod guard;
pub mod message;
pub mod notice;
pub mod realtime;
pub mod rest;
pub mod serialization;
pub mod social;
pub mod submission;
pub mod subscription;
pub mod types;
pub mod version;

pub use auth::{sign_in_async, Session};
pub use client::{ClientConfig, DreamClient};
pub use conversation::{ConversationSummary, ConversationSyncer, ConversationSyncerConfig};
pub use error::{ErrorKind, SdkError};
pub use notice::{Language, Toast};
