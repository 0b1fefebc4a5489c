//! Staleness guards and lifecycle-scoped background tasks.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Snapshot of a [`RequestGuard`] taken when a request is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket(u64);

/// Generation counter that tells whether an in-flight response is still
/// relevant.
///
/// Every change of the thing a response belongs to (selected conversation,
/// feed filter, view teardown) calls [`RequestGuard::invalidate`]; a response
/// is applied only if the ticket captured before the request is still current.
#[derive(Debug, Clone, Default)]
pub struct RequestGuard {
    generation: Arc<AtomicU64>,
}

impl RequestGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ticket(&self) -> Ticket {
        Ticket(self.generation.load(Ordering::SeqCst))
    }

    /// Bump the generation, returning the ticket for the new one.
    pub fn invalidate(&self) -> Ticket {
        Ticket(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.generation.load(Ordering::SeqCst) == ticket.0
    }
}

/// Fixed-interval background task that is aborted when the handle drops.
pub struct PollHandle {
    name: &'static str,
    task: JoinHandle<()>,
}

impl PollHandle {
    /// Run `tick` every `every`, starting after the first interval.
    pub fn spawn<F, Fut>(name: &'static str, every: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; the initial load is done by the caller.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                tick().await;
            }
        });
        debug!("[Poll] started {} every {:?}", name, every);
        Self { name, task }
    }

    pub fn stop(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        debug!("[Poll] stopping {}", self.name);
        self.task.abort();
    }
}
