//! Feed view state: the fetched entries plus the current filter, search and
//! sort selections.

use crate::dream::feed::api::FeedSource;
use crate::dream::feed::models::DreamEntry;
use crate::dream::feed::pipeline::{compose, FeedFilter, FeedQuery};
use crate::dream::guard::{PollHandle, RequestGuard};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct FeedViewConfig {
    pub page_size: usize,
    pub poll_interval: Duration,
}

impl Default for FeedViewConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            poll_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Default)]
struct FeedState {
    entries: Arc<Vec<DreamEntry>>,
    query: FeedQuery,
    following: HashSet<String>,
    blocked: HashSet<String>,
}

pub struct FeedView {
    config: FeedViewConfig,
    source: Arc<dyn FeedSource>,
    state: Mutex<FeedState>,
    guard: RequestGuard,
}

impl FeedView {
    pub fn new(config: FeedViewConfig, source: Arc<dyn FeedSource>) -> Self {
        Self {
            config,
            source,
            state: Mutex::new(FeedState::default()),
            guard: RequestGuard::new(),
        }
    }

    /// Change the selections. Returns true when the entries must be
    /// re-fetched, i.e. the filter changed; results in flight for the old
    /// filter are then discarded.
    pub async fn set_query(&self, query: FeedQuery) -> bool {
        let mut state = self.state.lock().await;
        let refetch = state.query.filter != query.filter;
        if refetch {
            self.guard.invalidate();
            state.entries = Arc::new(Vec::new());
        }
        state.query = query;
        refetch
    }

    pub async fn set_social(&self, following: HashSet<String>, blocked: HashSet<String>) {
        let mut state = self.state.lock().await;
        state.following = following;
        state.blocked = blocked;
    }

    /// Fetch entries for the current filter.
    pub async fn refresh(&self) -> Result<usize> {
        let ticket = self.guard.ticket();
        let (filter, following) = {
            let state = self.state.lock().await;
            let mut ids: Vec<String> = state.following.iter().cloned().collect();
            ids.sort();
            (state.query.filter, ids)
        };

        let entries = match filter {
            FeedFilter::All => self.source.fetch_public(self.config.page_size).await?,
            FeedFilter::Following => {
                self.source
                    .fetch_by_authors(&following, self.config.page_size)
                    .await?
            }
        };

        let mut state = self.state.lock().await;
        if !self.guard.is_current(ticket) {
            debug!("[Feed] dropping entries fetched for {:?}", filter);
            return Ok(0);
        }
        let count = entries.len();
        state.entries = Arc::new(entries);
        info!("[Feed] 📰 {} entries for {:?}", count, filter);
        Ok(count)
    }

    /// The ordered list to render at `now`, without blocked authors.
    pub async fn view(&self, now: DateTime<Utc>) -> Vec<DreamEntry> {
        let state = self.state.lock().await;
        compose(&state.entries, &state.query, &state.following, now)
            .into_iter()
            .filter(|e| !state.blocked.contains(&e.user_id))
            .cloned()
            .collect()
    }

    pub fn start_polling(self: &Arc<Self>) -> PollHandle {
        let view = Arc::clone(self);
        PollHandle::spawn("feed", self.config.poll_interval, move || {
            let view = Arc::clone(&view);
            async move {
                if let Err(e) = view.refresh().await {
                    warn!("[Feed] poll failed: {:#}", e);
                }
            }
        })
    }

    pub fn shutdown(&self) {
        self.guard.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dream::feed::models::fixtures::entry;
    use crate::dream::feed::pipeline::FeedSort;
    use async_trait::async_trait;

    struct FakeFeed {
        entries: Vec<DreamEntry>,
        gate: Option<(tokio::sync::Notify, tokio::sync::Notify)>,
    }

    #[async_trait]
    impl FeedSource for FakeFeed {
        async fn fetch_public(&self, _limit: usize) -> Result<Vec<DreamEntry>> {
            if let Some((entered, release)) = &self.gate {
                entered.notify_one();
                release.notified().await;
            }
            Ok(self.entries.clone())
        }

        async fn fetch_by_authors(&self, author_ids: &[String], _limit: usize) -> Result<Vec<DreamEntry>> {
            Ok(self
                .entries
                .iter()
                .filter(|e| author_ids.contains(&e.user_id))
                .cloned()
                .collect())
        }
    }

    fn entries() -> Vec<DreamEntry> {
        vec![
            entry("d1", "luna", "ocean", 10),
            entry("d2", "sol", "forest", 20),
            entry("d3", "luna", "desert", 30),
        ]
    }

    #[tokio::test]
    async fn view_composes_and_hides_blocked_authors() -> Result<()> {
        let view = FeedView::new(
            FeedViewConfig::default(),
            Arc::new(FakeFeed { entries: entries(), gate: None }),
        );
        view.refresh().await?;
        let now = Utc::now();
        let ids: Vec<_> = view.view(now).await.into_iter().map(|e| e.id).collect();
        assert_eq!(ids, ["d3", "d2", "d1"]);

        view.set_social(HashSet::new(), ["luna".to_string()].into()).await;
        let ids: Vec<_> = view.view(now).await.into_iter().map(|e| e.id).collect();
        assert_eq!(ids, ["d2"]);
        Ok(())
    }

    #[tokio::test]
    async fn following_filter_fetches_followed_authors() -> Result<()> {
        let view = FeedView::new(
            FeedViewConfig::default(),
            Arc::new(FakeFeed { entries: entries(), gate: None }),
        );
        view.set_social(["sol".to_string()].into(), HashSet::new()).await;
        assert!(
            view.set_query(FeedQuery {
                filter: FeedFilter::Following,
                search: String::new(),
                sort: FeedSort::Recent,
            })
            .await
        );
        assert_eq!(view.refresh().await?, 1);
        assert_eq!(view.view(Utc::now()).await[0].id, "d2");

        // Changing only the sort keeps the entries.
        assert!(
            !view
                .set_query(FeedQuery {
                    filter: FeedFilter::Following,
                    search: String::new(),
                    sort: FeedSort::Popular,
                })
                .await
        );
        assert_eq!(view.view(Utc::now()).await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn filter_change_discards_in_flight_fetch() -> Result<()> {
        let source = Arc::new(FakeFeed {
            entries: entries(),
            gate: Some((tokio::sync::Notify::new(), tokio::sync::Notify::new())),
        });
        let view = Arc::new(FeedView::new(FeedViewConfig::default(), source.clone()));

        let task = tokio::spawn({
            let view = Arc::clone(&view);
            async move { view.refresh().await }
        });
        let (entered, release) = source.gate.as_ref().unwrap();
        entered.notified().await;
        view.set_query(FeedQuery {
            filter: FeedFilter::Following,
            ..Default::default()
        })
        .await;
        release.notify_one();

        assert_eq!(task.await??, 0);
        assert!(view.view(Utc::now()).await.is_empty());
        Ok(())
    }
}
