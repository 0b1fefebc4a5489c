//! Deployed-version watcher.
//!
//! Polls the static version file; the first answer is the baseline and any
//! later difference asks the host to reload, once.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BuildInfo {
    pub version: String,
    #[serde(rename = "buildTime", default)]
    pub build_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionEvent {
    ReloadRequired { from: BuildInfo, to: BuildInfo },
}

#[async_trait]
pub trait VersionSource: Send + Sync {
    async fn fetch(&self) -> Result<BuildInfo>;
}

/// Fetches `version.json` over HTTP, bypassing caches.
pub struct HttpVersionSource {
    client: reqwest::Client,
    url: String,
}

impl HttpVersionSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl VersionSource for HttpVersionSource {
    async fn fetch(&self) -> Result<BuildInfo> {
        let stamp = chrono::Utc::now().timestamp_millis().to_string();
        let response = self
            .client
            .get(&self.url)
            .query(&[("t", stamp)])
            .header("Cache-Control", "no-cache")
            .send()
            .await
            .context("version file request failed")?
            .error_for_status()
            .context("version file unavailable")?;
        response.json().await.context("invalid version file")
    }
}

#[derive(Debug, Clone)]
pub struct VersionWatcherConfig {
    pub url: String,
    pub interval: Duration,
}

impl VersionWatcherConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            interval: Duration::from_secs(5 * 60),
        }
    }
}

struct WatchState {
    source: Arc<dyn VersionSource>,
    baseline: Mutex<Option<BuildInfo>>,
    reloading: AtomicBool,
    events: mpsc::Sender<VersionEvent>,
}

impl WatchState {
    async fn check(&self) -> Result<bool> {
        if self.reloading.load(Ordering::SeqCst) {
            return Ok(true);
        }
        let current = self.source.fetch().await?;
        let mut baseline = self.baseline.lock().await;
        let Some(known) = baseline.as_ref() else {
            debug!("[Version] baseline {}", current.version);
            *baseline = Some(current);
            return Ok(false);
        };
        if *known == current {
            return Ok(false);
        }
        if self.reloading.swap(true, Ordering::SeqCst) {
            return Ok(true);
        }
        info!(
            "[Version] 🔄 new deployment {} -> {}, reload required",
            known.version, current.version
        );
        let event = VersionEvent::ReloadRequired {
            from: known.clone(),
            to: current,
        };
        if self.events.send(event).await.is_err() {
            warn!("[Version] nobody is listening for reload events");
        }
        Ok(true)
    }
}

/// Owns the polling task and the reload flag. Dropping it stops polling.
pub struct VersionWatcher {
    state: Arc<WatchState>,
    task: Option<JoinHandle<()>>,
}

impl VersionWatcher {
    /// Start polling right away; the first successful fetch sets the baseline.
    pub fn start(
        config: &VersionWatcherConfig,
        source: Arc<dyn VersionSource>,
    ) -> (Self, mpsc::Receiver<VersionEvent>) {
        let (tx, rx) = mpsc::channel(4);
        let state = Arc::new(WatchState {
            source,
            baseline: Mutex::new(None),
            reloading: AtomicBool::new(false),
            events: tx,
        });

        let every = config.interval;
        let task_state = state.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match task_state.check().await {
                    Ok(true) => break,
                    Ok(false) => {}
                    Err(e) => warn!("[Version] check failed: {:#}", e),
                }
            }
        });
        info!("[Version] watching {} every {:?}", config.url, every);

        (
            Self {
                state,
                task: Some(task),
            },
            rx,
        )
    }

    /// Check immediately, e.g. when the app regains focus.
    pub async fn check_now(&self) -> Result<bool> {
        self.state.check().await
    }

    pub fn is_reloading(&self) -> bool {
        self.state.reloading.load(Ordering::SeqCst)
    }

    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("[Version] stopped");
        }
    }
}

impl Drop for VersionWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
