//! Dream entries and the social feed.

pub mod api;
pub mod dao;
pub mod models;
pub mod pipeline;
pub mod service;

pub use api::{FeedApi, FeedSource};
pub use dao::FavoritesDao;
pub use models::{AnalysisType, Comment, DreamEntry, DreamStatus, LocalizedText, RawDreamRow, Visibility};
pub use pipeline::{
    age_in_days, compose, favorite_library, favorites_only, popularity_score, trending_score, FeedFilter, FeedQuery,
    FeedSort,
};
pub use service::{FeedView, FeedViewConfig};
