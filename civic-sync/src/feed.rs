//! Change-feed subscriber with resync-on-reconnect.
//!
//! One task per activation runs the connection cycle:
//!
//! 1. subscribe to the change channel
//! 2. bulk fetch and `load` into the store
//! 3. merge every delivered record with `apply_remote_change`
//!
//! Subscribing before fetching buffers events that race the fetch; the store's
//! last-write-wins `load` makes the overlap harmless. When the channel
//! disconnects the cycle restarts from step 1 after a backoff, so every
//! resubscription is paired with a fresh bulk fetch.

use crate::config::ReconnectConfig;
use crate::remote::{ChangeChannel, ChannelMessage, ReportFetcher, Subscription};
use chrono::Utc;
use civic_core::{ReportFilter, Timestamp};
use civic_store::EntityStore;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Observable lifecycle of a feed task.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedStatus {
    Idle,
    Connecting,
    Syncing,
    Live {
        resynced_at: Timestamp,
        records: usize,
    },
    Disconnected {
        reason: String,
        retry_in: Duration,
    },
    Stopped,
}

impl FeedStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, FeedStatus::Live { .. })
    }
}

/// Exponential reconnect delay with additive jitter.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    config: ReconnectConfig,
    current_ms: u64,
}

impl Backoff {
    pub(crate) fn new(config: ReconnectConfig) -> Self {
        let current_ms = config.initial_ms;
        Self { config, current_ms }
    }

    pub(crate) fn reset(&mut self) {
        self.current_ms = self.config.initial_ms;
    }

    /// Delay before the next attempt; advances the base delay.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let base = self.current_ms;
        let grown = (base as f64 * self.config.multiplier) as u64;
        self.current_ms = grown.min(self.config.max_ms);
        Duration::from_millis(base.saturating_add(self.jitter()))
    }

    /// Below `jitter_ms`, taken from the wall clock's sub-second nanos.
    fn jitter(&self) -> u64 {
        if self.config.jitter_ms == 0 {
            return 0;
        }
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.subsec_nanos())
            .unwrap_or(0);
        u64::from(nanos) % self.config.jitter_ms
    }
}

enum Exit {
    Stopped,
    Disconnected(String),
}

/// Feed configuration; call [`ChangeFeed::spawn`] to activate.
pub struct ChangeFeed {
    store: Arc<EntityStore>,
    fetcher: Arc<dyn ReportFetcher>,
    channel: Arc<dyn ChangeChannel>,
    reconnect: ReconnectConfig,
    hints: Option<ReportFilter>,
}

impl ChangeFeed {
    pub fn new(
        store: Arc<EntityStore>,
        fetcher: Arc<dyn ReportFetcher>,
        channel: Arc<dyn ChangeChannel>,
        reconnect: ReconnectConfig,
    ) -> Self {
        Self {
            store,
            fetcher,
            channel,
            reconnect,
            hints: None,
        }
    }

    /// Filter passed to every bulk fetch as a narrowing hint.
    pub fn with_hints(mut self, hints: ReportFilter) -> Self {
        self.hints = Some(hints);
        self
    }

    /// Start the feed task on the current tokio runtime.
    pub fn spawn(self) -> FeedHandle {
        let (stop_tx, stop_rx) = oneshot::channel();
        let (status_tx, status_rx) = watch::channel(FeedStatus::Idle);
        let task = tokio::spawn(self.run(stop_rx, status_tx));
        FeedHandle {
            stop: Some(stop_tx),
            task: Some(task),
            status: status_rx,
        }
    }

    async fn run(self, mut stop: oneshot::Receiver<()>, status: watch::Sender<FeedStatus>) {
        let mut backoff = Backoff::new(self.reconnect.clone());
        loop {
            status.send_replace(FeedStatus::Connecting);
            let subscribed = tokio::select! {
                biased;
                _ = &mut stop => break,
                result = self.channel.subscribe() => result,
            };

            let reason = match subscribed {
                Err(err) => err.to_string(),
                Ok(Subscription { handle, mut messages }) => {
                    debug!(handle = %handle, "Subscribed to change channel");
                    let exit = self
                        .sync_and_drain(&mut messages, &mut stop, &status, &mut backoff)
                        .await;
                    drop(messages);
                    if let Err(err) = self.channel.unsubscribe(handle).await {
                        warn!(handle = %handle, error = %err, "Failed to release subscription");
                    }
                    match exit {
                        Exit::Stopped => break,
                        Exit::Disconnected(reason) => reason,
                    }
                }
            };

            let retry_in = backoff.next_delay();
            warn!(
                reason = %reason,
                retry_in_ms = retry_in.as_millis() as u64,
                "Change feed disconnected"
            );
            status.send_replace(FeedStatus::Disconnected { reason, retry_in });

            tokio::select! {
                biased;
                _ = &mut stop => break,
                _ = tokio::time::sleep(retry_in) => {}
            }
        }
        status.send_replace(FeedStatus::Stopped);
        info!("Change feed stopped");
    }

    async fn sync_and_drain(
        &self,
        messages: &mut mpsc::Receiver<ChannelMessage>,
        stop: &mut oneshot::Receiver<()>,
        status: &watch::Sender<FeedStatus>,
        backoff: &mut Backoff,
    ) -> Exit {
        status.send_replace(FeedStatus::Syncing);
        let fetched = tokio::select! {
            biased;
            _ = &mut *stop => return Exit::Stopped,
            result = self.fetcher.fetch_all(self.hints.as_ref()) => result,
        };
        let records = match fetched {
            Ok(records) => records,
            Err(err) => return Exit::Disconnected(err.to_string()),
        };

        let count = records.len();
        let summary = self.store.load(records);
        backoff.reset();
        info!(
            records = count,
            applied = summary.applied(),
            version = self.store.version().sequence(),
            "Change feed resynced"
        );
        status.send_replace(FeedStatus::Live {
            resynced_at: Utc::now(),
            records: count,
        });

        loop {
            let message = tokio::select! {
                biased;
                _ = &mut *stop => return Exit::Stopped,
                message = messages.recv() => message,
            };
            match message {
                Some(ChannelMessage::Inserted(record)) | Some(ChannelMessage::Updated(record)) => {
                    let id = record.id;
                    let outcome = self.store.apply_remote_change(record);
                    debug!(id = %id, outcome = ?outcome, "Merged change notification");
                }
                Some(ChannelMessage::Disconnected { reason }) => return Exit::Disconnected(reason),
                None => return Exit::Disconnected("channel closed".to_string()),
            }
        }
    }
}

/// Owner of a running feed task.
///
/// [`FeedHandle::shutdown`] stops the task and waits until the subscription
/// is released. Dropping the handle sends the same stop signal without
/// waiting; the detached task still unsubscribes before it exits.
#[derive(Debug)]
pub struct FeedHandle {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    status: watch::Receiver<FeedStatus>,
}

impl FeedHandle {
    pub fn status(&self) -> watch::Receiver<FeedStatus> {
        self.status.clone()
    }

    pub fn current(&self) -> FeedStatus {
        self.status.borrow().clone()
    }

    /// Stop the task and wait for it to unsubscribe. No merge happens after
    /// this returns.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "Change feed task ended abnormally");
            }
        }
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        let Some(stop) = self.stop.take() else {
            return;
        };
        let _ = stop.send(());
        if self.task.take().is_some() {
            debug!("Change feed handle dropped; task releasing subscription");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(jitter_ms: u64) -> ReconnectConfig {
        ReconnectConfig {
            initial_ms: 100,
            max_ms: 1000,
            multiplier: 3.0,
            jitter_ms,
        }
    }

    #[test]
    fn test_backoff_grows_to_cap() {
        let mut backoff = Backoff::new(config(0));
        let delays: Vec<u64> = (0..4)
            .map(|_| backoff.next_delay().as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![100, 300, 900, 1000]);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let mut backoff = Backoff::new(config(50));
        let delay = backoff.next_delay().as_millis() as u64;
        assert!((100..150).contains(&delay));
    }
}
