//! Feed composition: filter, search, then a stable sort.
//!
//! The predicates commute, and the sort breaks ties by the position in the
//! fetched list, so the same inputs always give the same order.

use crate::dream::feed::models::DreamEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedFilter {
    #[default]
    All,
    /// Only authors the viewer follows; nothing when they follow nobody.
    Following,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedSort {
    #[default]
    Recent,
    Popular,
    Trending,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedQuery {
    pub filter: FeedFilter,
    pub search: String,
    pub sort: FeedSort,
}

/// `2 × likes + comments`.
pub fn popularity_score(entry: &DreamEntry) -> u64 {
    2 * u64::from(entry.like_count) + u64::from(entry.comment_count)
}

/// Fractional days between `created_at` and `now`, never negative.
pub fn age_in_days(created_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let millis = (now - created_at).num_milliseconds().max(0);
    millis as f64 / 86_400_000.0
}

/// Popularity divided by `age_in_days + 1`.
pub fn trending_score(entry: &DreamEntry, now: DateTime<Utc>) -> f64 {
    popularity_score(entry) as f64 / (age_in_days(entry.created_at, now) + 1.0)
}

fn passes_filter(entry: &DreamEntry, filter: FeedFilter, following: &HashSet<String>) -> bool {
    match filter {
        FeedFilter::All => true,
        FeedFilter::Following => following.contains(&entry.user_id),
    }
}

/// Order `entries` for display.
pub fn compose<'a>(
    entries: &'a [DreamEntry],
    query: &FeedQuery,
    following: &HashSet<String>,
    now: DateTime<Utc>,
) -> Vec<&'a DreamEntry> {
    let needle = query.search.trim().to_lowercase();
    let mut kept: Vec<(usize, &DreamEntry)> = entries
        .iter()
        .enumerate()
        .filter(|(_, e)| passes_filter(e, query.filter, following))
        .filter(|(_, e)| e.matches_search(&needle))
        .collect();

    match query.sort {
        FeedSort::Recent => kept.sort_by(|(ia, a), (ib, b)| {
            b.created_at.cmp(&a.created_at).then(ia.cmp(ib))
        }),
        FeedSort::Popular => kept.sort_by(|(ia, a), (ib, b)| {
            popularity_score(b)
                .cmp(&popularity_score(a))
                .then(ia.cmp(ib))
        }),
        FeedSort::Trending => {
            let mut scored: Vec<(f64, usize, &DreamEntry)> = kept
                .into_iter()
                .map(|(i, e)| (trending_score(e, now), i, e))
                .collect();
            scored.sort_by(|(sa, ia, _), (sb, ib, _)| {
                sb.total_cmp(sa).then(ia.cmp(ib))
            });
            return scored.into_iter().map(|(_, _, e)| e).collect();
        }
    }
    kept.into_iter().map(|(_, e)| e).collect()
}

/// Entries bookmarked by the viewer, in their original order.
pub fn favorites_only<'a>(
    entries: &'a [DreamEntry],
    favorites: &HashSet<String>,
) -> Vec<&'a DreamEntry> {
    entries
        .iter()
        .filter(|e| favorites.contains(&e.id))
        .collect()
}

/// The favourites library: the viewer's own entries (private ones included)
/// plus favourited feed entries, newest first, each id once.
pub fn favorite_library(
    own: Vec<DreamEntry>,
    feed: Vec<DreamEntry>,
    favorites: &HashSet<String>,
) -> Vec<DreamEntry> {
    let mut seen = HashSet::new();
    let merged: Vec<DreamEntry> = own
        .into_iter()
        .chain(feed)
        .filter(|e| seen.insert(e.id.clone()))
        .collect();
    let mut library: Vec<DreamEntry> = favorites_only(&merged, favorites)
        .into_iter()
        .cloned()
        .collect();
    library.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    library
}

/// Compare two entries the way `sort` would place them (ties stay equal).
pub fn compare(a: &DreamEntry, b: &DreamEntry, sort: FeedSort, now: DateTime<Utc>) -> Ordering {
    match sort {
        FeedSort::Recent => b.created_at.cmp(&a.created_at),
        FeedSort::Popular => popularity_score(b).cmp(&popularity_score(a)),
        FeedSort::Trending => trending_score(b, now).total_cmp(&trending_score(a, now)),
    }
}
