//! Social graph: follows, blocks and reports.

pub mod api;
pub mod models;

pub use api::SocialApi;
pub use models::{Block, Follow, NewReport, ReportTarget, SocialGraph};
