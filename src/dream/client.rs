//! Client façade.
//!
//! Owns the remote APIs, the local database, the syncers and every
//! background task started by [`DreamClient::connect`].

use crate::dream::carousel::CarouselState;
use crate::dream::conversation::{
    ConversationApi, ConversationListener, ConversationSyncer, ConversationSyncerConfig,
    EmptyConversationListener, HiddenConversationDao,
};
use crate::dream::db::create_sqlite_pool_with_migration;
use crate::dream::email::{EmailClient, EmailConfig};
use crate::dream::error::SdkError;
use crate::dream::feed::{favorite_library, DreamEntry, FavoritesDao, FeedApi, FeedQuery, FeedView, FeedViewConfig};
use crate::dream::guard::PollHandle;
use crate::dream::message::{
    EmptyMessageListener, Message, MessageApi, MessageListener, MessageSyncer, MessageSyncerConfig,
};
use crate::dream::notice::{Language, Toast};
use crate::dream::realtime::{ChangeEvent, ChangeKind, RealtimeClient, RealtimeConfig, RealtimeEvent};
use crate::dream::rest::RestClient;
use crate::dream::social::{SocialApi, SocialGraph};
use crate::dream::submission::{DreamDraft, DreamSubmitter, Submission};
use crate::dream::subscription::{PlanTier, SubscriptionApi};
use crate::dream::version::{HttpVersionSource, VersionEvent, VersionWatcher, VersionWatcherConfig};
use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Own entries fetched when building the favourites library.
const OWN_LIBRARY_LIMIT: usize = 200;

/// Client configuration.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub user_id: String,
    /// Access token of the signed-in session.
    pub access_token: String,
    /// Project key sent with every request.
    pub anon_key: String,
    /// REST and RPC base URL.
    pub api_base_url: String,
    /// Change feed base URL.
    pub realtime_url: String,
    /// Analysis webhook.
    pub webhook_url: String,
    pub email: EmailConfig,
    /// Deployed `version.json`; no watcher without it.
    pub version_url: Option<String>,
    /// SQLite database for favourites and hidden conversations.
    pub local_db_url: String,
    pub conversation_poll: Duration,
    pub message_poll: Duration,
    pub feed_poll: Duration,
    pub version_poll: Duration,
    pub language: Language,
    /// The viewer's read-receipt preference.
    pub share_receipts: bool,
}

impl ClientConfig {
    pub fn new(user_id: String, access_token: String, anon_key: String) -> Self {
        Self {
            user_id,
            access_token,
            anon_key,
            api_base_url: "http://localhost:54321".to_string(),
            realtime_url: "ws://localhost:54321".to_string(),
            webhook_url: "http://localhost:5678/webhook/analyze-dream".to_string(),
            email: EmailConfig::new(String::new(), String::new(), String::new()),
            version_url: None,
            local_db_url: "sqlite://dreamlog.db?mode=rwc".to_string(),
            conversation_poll: Duration::from_secs(30),
            message_poll: Duration::from_secs(10),
            feed_poll: Duration::from_secs(60),
            version_poll: Duration::from_secs(5 * 60),
            language: Language::En,
            share_receipts: true,
        }
    }
}

pub struct DreamClient {
    config: ClientConfig,
    rest: RestClient,
    conversation_listener: Arc<dyn ConversationListener>,
    message_listener: Arc<dyn MessageListener>,
    conversations: Option<Arc<ConversationSyncer>>,
    messages: Option<Arc<MessageSyncer>>,
    feed_api: Arc<FeedApi>,
    feed: Option<Arc<FeedView>>,
    favorites: Option<FavoritesDao>,
    graph: SocialGraph,
    social: SocialApi,
    subscriptions: SubscriptionApi,
    submitter: DreamSubmitter,
    email: EmailClient,
    carousel: std::sync::Mutex<CarouselState>,
    version: Option<VersionWatcher>,
    version_events: Option<mpsc::Receiver<VersionEvent>>,
    polls: Vec<PollHandle>,
    tasks: Vec<JoinHandle<()>>,
}

impl DreamClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let rest = RestClient::new(&config.api_base_url, &config.anon_key, &config.access_token)?;
        let user_id = config.user_id.clone();
        Ok(Self {
            social: SocialApi::new(rest.clone(), user_id.clone()),
            subscriptions: SubscriptionApi::new(rest.clone(), user_id.clone()),
            submitter: DreamSubmitter::new(rest.clone(), user_id.clone(), config.webhook_url.clone()),
            email: EmailClient::new(config.email.clone()),
            feed_api: Arc::new(FeedApi::new(rest.clone(), user_id.clone())),
            graph: SocialGraph::default(),
            rest,
            conversation_listener: Arc::new(EmptyConversationListener),
            message_listener: Arc::new(EmptyMessageListener),
            conversations: None,
            messages: None,
            feed: None,
            favorites: None,
            carousel: std::sync::Mutex::new(CarouselState::new()),
            version: None,
            version_events: None,
            polls: Vec::new(),
            tasks: Vec::new(),
            config,
        })
    }

    /// Register before [`connect`](Self::connect).
    pub fn set_conversation_listener(&mut self, listener: Arc<dyn ConversationListener>) {
        self.conversation_listener = listener;
    }

    /// Register before [`connect`](Self::connect).
    pub fn set_message_listener(&mut self, listener: Arc<dyn MessageListener>) {
        self.message_listener = listener;
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Open local storage, load the inbox and the feed, then start the
    /// change feed, the polls and the version watcher.
    pub async fn connect(&mut self) -> Result<()> {
        let user_id = self.config.user_id.clone();
        info!("[Client] 🔗 connecting as {}", user_id);

        let db = create_sqlite_pool_with_migration(&self.config.local_db_url)
            .await
            .context("failed to open local database")?;
        self.favorites = Some(FavoritesDao::new(db.clone(), user_id.clone()));

        self.graph = match self.social.load_graph().await {
            Ok(graph) => graph,
            Err(e) => {
                warn!("[Client] social graph unavailable, continuing without it: {:#}", e);
                SocialGraph {
                    user_id: user_id.clone(),
                    ..Default::default()
                }
            }
        };
        let hidden_users = self.graph.hidden_users();

        let conversations = Arc::new(ConversationSyncer::with_listener(
            ConversationSyncerConfig {
                user_id: user_id.clone(),
                poll_interval: self.config.conversation_poll,
            },
            Arc::new(ConversationApi::new(self.rest.clone(), user_id.clone())),
            Some(HiddenConversationDao::new(db, user_id.clone())),
            self.conversation_listener.clone(),
        ));
        conversations.set_blocked(hidden_users.clone()).await;
        if let Err(e) = conversations.init().await {
            warn!("[Client] initial inbox load failed, the poll will retry: {:#}", e);
        }

        let messages = Arc::new(MessageSyncer::with_listener(
            MessageSyncerConfig {
                poll_interval: self.config.message_poll,
                share_receipts: self.config.share_receipts,
                ..MessageSyncerConfig::new(user_id.clone())
            },
            Arc::new(MessageApi::new(self.rest.clone(), user_id.clone())),
            self.message_listener.clone(),
        ));

        let feed = Arc::new(FeedView::new(
            FeedViewConfig {
                poll_interval: self.config.feed_poll,
                ..FeedViewConfig::default()
            },
            self.feed_api.clone(),
        ));
        feed.set_social(self.graph.following.clone(), hidden_users).await;
        if let Err(e) = feed.refresh().await {
            warn!("[Client] initial feed load failed, the poll will retry: {:#}", e);
        }

        let realtime = RealtimeClient::new(RealtimeConfig::for_messages(
            &self.config.realtime_url,
            &self.config.anon_key,
            &self.config.access_token,
            &user_id,
        ));
        match realtime.connect().await {
            Ok(mut connection) => {
                let conv = conversations.clone();
                let msgs = messages.clone();
                let listener = self.message_listener.clone();
                self.tasks.push(tokio::spawn(async move {
                    while let Some(event) = connection.events.recv().await {
                        match event {
                            RealtimeEvent::Connected => {
                                listener
                                    .on_connection_status_changed(true, "connected".into())
                                    .await;
                            }
                            RealtimeEvent::Change(change) => route_change(change, &conv, &msgs).await,
                            RealtimeEvent::Disconnected(reason) => {
                                warn!("[Client] change feed closed ({}), relying on polls", reason);
                                listener.on_connection_status_changed(false, reason).await;
                                break;
                            }
                        }
                    }
                }));
            }
            Err(e) => warn!("[Client] change feed unavailable, relying on polls: {:#}", e),
        }

        self.polls.push(conversations.start_polling());
        self.polls.push(feed.start_polling());

        if let Some(url) = &self.config.version_url {
            let config = VersionWatcherConfig {
                url: url.clone(),
                interval: self.config.version_poll,
            };
            let (watcher, events) =
                VersionWatcher::start(&config, Arc::new(HttpVersionSource::new(url.clone())));
            self.version = Some(watcher);
            self.version_events = Some(events);
        }

        self.conversations = Some(conversations);
        self.messages = Some(messages);
        self.feed = Some(feed);
        info!("[Client] ✅ connected");
        Ok(())
    }

    fn conversations(&self) -> Result<&Arc<ConversationSyncer>> {
        self.conversations
            .as_ref()
            .ok_or_else(|| SdkError::validation("Client is not connected").into())
    }

    fn messages(&self) -> Result<&Arc<MessageSyncer>> {
        self.messages
            .as_ref()
            .ok_or_else(|| SdkError::validation("Client is not connected").into())
    }

    fn feed_view(&self) -> Result<&Arc<FeedView>> {
        self.feed
            .as_ref()
            .ok_or_else(|| SdkError::validation("Client is not connected").into())
    }

    fn favorites_dao(&self) -> Result<&FavoritesDao> {
        self.favorites
            .as_ref()
            .ok_or_else(|| SdkError::validation("Client is not connected").into())
    }

    pub fn conversation_syncer(&self) -> Option<Arc<ConversationSyncer>> {
        self.conversations.clone()
    }

    pub fn message_syncer(&self) -> Option<Arc<MessageSyncer>> {
        self.messages.clone()
    }

    pub fn social(&self) -> &SocialApi {
        &self.social
    }

    pub fn subscriptions(&self) -> &SubscriptionApi {
        &self.subscriptions
    }

    /// Reload events from the version watcher; can be taken once.
    pub fn take_version_events(&mut self) -> Option<mpsc::Receiver<VersionEvent>> {
        self.version_events.take()
    }

    /// Check the deployed version now, e.g. when the app regains focus.
    pub async fn check_version_now(&self) -> Result<bool> {
        match &self.version {
            Some(watcher) => watcher.check_now().await,
            None => Ok(false),
        }
    }

    /// Select a conversation: load it, mark it read and poll it.
    pub async fn open_conversation(&self, counterpart_id: &str) -> Result<Vec<Message>> {
        let conversations = self.conversations()?;
        let messages = self.messages()?;
        conversations.set_active(Some(counterpart_id)).await;
        let thread = messages.open(counterpart_id).await?;
        messages.start_polling();
        Ok(thread)
    }

    pub async fn close_conversation(&self) -> Result<()> {
        self.messages()?.close().await;
        self.conversations()?.set_active(None).await;
        Ok(())
    }

    /// Send to the open conversation; the inbox row updates right away.
    pub async fn send_message(&self, body: &str, reply_to_id: Option<&str>) -> Result<Message> {
        let msg = self.messages()?.send(body, reply_to_id).await?;
        if let Err(e) = self.conversations()?.on_message(&msg).await {
            warn!("[Client] inbox update after send failed: {:#}", e);
        }
        Ok(msg)
    }

    pub async fn hide_conversation(&self, counterpart_id: &str) -> Result<()> {
        self.conversations()?.hide(counterpart_id).await
    }

    /// Apply the selections and return the feed to render.
    pub async fn feed(&self, query: FeedQuery) -> Result<Vec<DreamEntry>> {
        let feed = self.feed_view()?;
        if feed.set_query(query).await {
            feed.refresh().await?;
        }
        Ok(feed.view(Utc::now()).await)
    }

    /// Favourited entries from the viewer's own library and the loaded feed.
    pub async fn favorites(&self) -> Result<Vec<DreamEntry>> {
        let ids = self.favorites_dao()?.ids().await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let own = self.feed_api.fetch_own(OWN_LIBRARY_LIMIT).await?;
        let feed = self.feed_view()?.view(Utc::now()).await;
        Ok(favorite_library(own, feed, &ids))
    }

    /// Returns whether the entry is a favourite afterwards.
    pub async fn toggle_favorite(&self, dream_id: &str) -> Result<bool> {
        self.favorites_dao()?.toggle(dream_id).await
    }

    pub async fn submit_dream(&self, mut draft: DreamDraft) -> Result<Submission> {
        draft.language = self.config.language;
        self.submitter.submit(draft).await
    }

    /// Make raw slot `slot` the cover image; carousels showing the entry
    /// start over from the new cover.
    pub async fn set_primary_image(&self, dream_id: &str, slot: usize) -> Result<()> {
        let plan = self.subscriptions.fetch_plan().await?;
        let tier = if plan.is_developer {
            PlanTier::Premium
        } else {
            plan.effective_tier(Utc::now())
        };
        self.submitter.dreams().set_primary_image(dream_id, slot, tier).await?;
        self.with_carousel(|c| c.reset_entity(dream_id));
        if let Some(feed) = &self.feed {
            if let Err(e) = feed.refresh().await {
                warn!("[Client] feed refresh after cover change failed: {:#}", e);
            }
        }
        Ok(())
    }

    pub fn with_carousel<R>(&self, f: impl FnOnce(&mut CarouselState) -> R) -> R {
        let mut carousel = self
            .carousel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut carousel)
    }

    pub async fn send_contact_email(&self, name: &str, email: &str, message: &str) -> Toast {
        self.email
            .send_contact(name, email, message, self.config.language)
            .await
    }

    /// Stop every background task; in-flight responses are discarded.
    pub async fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.polls.clear();
        if let Some(watcher) = self.version.as_mut() {
            watcher.stop();
        }
        if let Some(messages) = &self.messages {
            messages.close().await;
        }
        if let Some(conversations) = &self.conversations {
            conversations.shutdown();
        }
        if let Some(feed) = &self.feed {
            feed.shutdown();
        }
        info!("[Client] 👋 shut down");
    }
}

/// Route one change-feed event into the inbox and the open thread.
pub(crate) async fn route_change(
    change: ChangeEvent,
    conversations: &ConversationSyncer,
    messages: &MessageSyncer,
) {
    if change.table != "messages" {
        debug!("[Client] ignoring change on {}", change.table);
        return;
    }
    match change.kind {
        ChangeKind::Insert => match change.message() {
            Ok(msg) => {
                if let Err(e) = conversations.on_message(&msg).await {
                    warn!("[Client] inbox merge failed: {:#}", e);
                }
                messages.on_insert(msg).await;
            }
            Err(e) => warn!("[Client] undecodable insert: {}", e),
        },
        ChangeKind::Update => match change.message() {
            Ok(msg) => {
                conversations.on_message_read(&msg).await;
                messages.on_update(msg).await;
            }
            Err(e) => warn!("[Client] undecodable update: {}", e),
        },
        ChangeKind::Delete => match change.row_id() {
            Some(id) => {
                messages.on_delete(id).await;
            }
            None => warn!("[Client] delete without row id"),
        },
    }
}
