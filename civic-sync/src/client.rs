//! The client facade views talk to.
//!
//! One `SyncClient` owns one store, one feed subscription and one mutation
//! coordinator. Any number of views share it; each brings its own filter.

use crate::config::{ReconnectConfig, SyncConfig};
use crate::feed::{ChangeFeed, FeedHandle, FeedStatus};
use crate::mutation::{MutationAttempt, MutationCoordinator};
use crate::remote::{ChangeChannel, ReportFetcher, ReportWriter};
use civic_core::{NewReport, Report, ReportFilter, ReportId, ReportPatch, ReportStatus, SyncResult};
use civic_store::{filtered, map_markers, Aggregates, EntityStore, MapMarker, Snapshot, StoreVersion};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Runtime knobs for a client, usually derived from [`SyncConfig`].
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub reconciliation_timeout: Duration,
    pub reconnect: ReconnectConfig,
    pub fetch_hints: Option<ReportFilter>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            reconciliation_timeout: Duration::from_secs(5),
            reconnect: ReconnectConfig {
                initial_ms: 500,
                max_ms: 30_000,
                multiplier: 2.0,
                jitter_ms: 250,
            },
            fetch_hints: None,
        }
    }
}

impl From<&SyncConfig> for SyncSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            reconciliation_timeout: config.reconciliation_timeout(),
            reconnect: config.reconnect.clone(),
            fetch_hints: None,
        }
    }
}

pub struct SyncClient {
    store: Arc<EntityStore>,
    coordinator: MutationCoordinator,
    feed: Mutex<Option<FeedHandle>>,
    feed_status: watch::Receiver<FeedStatus>,
    aggregates: Mutex<Option<Arc<Aggregates>>>,
}

impl SyncClient {
    /// Build a client on a fresh store and activate its feed.
    ///
    /// Must be called inside a tokio runtime.
    pub fn start(
        fetcher: Arc<dyn ReportFetcher>,
        channel: Arc<dyn ChangeChannel>,
        writer: Arc<dyn ReportWriter>,
        settings: SyncSettings,
    ) -> Self {
        Self::with_store(Arc::new(EntityStore::new()), fetcher, channel, writer, settings)
    }

    /// Build a client over an existing store.
    pub fn with_store(
        store: Arc<EntityStore>,
        fetcher: Arc<dyn ReportFetcher>,
        channel: Arc<dyn ChangeChannel>,
        writer: Arc<dyn ReportWriter>,
        settings: SyncSettings,
    ) -> Self {
        let mut feed = ChangeFeed::new(Arc::clone(&store), fetcher, channel, settings.reconnect);
        if let Some(hints) = settings.fetch_hints {
            feed = feed.with_hints(hints);
        }
        let feed = feed.spawn();
        let feed_status = feed.status();
        let coordinator =
            MutationCoordinator::new(Arc::clone(&store), writer, settings.reconciliation_timeout);
        info!("Sync client started");
        Self {
            store,
            coordinator,
            feed: Mutex::new(Some(feed)),
            feed_status,
            aggregates: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Arc<EntityStore> {
        &self.store
    }

    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }

    pub fn filtered(&self, filter: &ReportFilter) -> Vec<Report> {
        filtered(&self.store.snapshot(), filter)
    }

    pub fn map_markers(&self, filter: &ReportFilter) -> Vec<MapMarker> {
        map_markers(&self.store.snapshot(), filter)
    }

    /// Statistics for the current store version, computed at most once per version.
    pub fn aggregates(&self) -> Arc<Aggregates> {
        let snapshot = self.store.snapshot();
        let mut cached = self.cached_aggregates();
        if let Some(stats) = cached.as_ref() {
            if stats.version == snapshot.version() {
                return Arc::clone(stats);
            }
        }
        let stats = Arc::new(Aggregates::compute(&snapshot));
        *cached = Some(Arc::clone(&stats));
        stats
    }

    fn cached_aggregates(&self) -> MutexGuard<'_, Option<Arc<Aggregates>>> {
        self.aggregates.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub async fn request_mutation(&self, id: ReportId, patch: ReportPatch) -> SyncResult<Report> {
        self.coordinator.request_mutation(id, patch).await
    }

    pub async fn update_status(&self, id: ReportId, status: ReportStatus) -> SyncResult<Report> {
        self.coordinator.update_status(id, status).await
    }

    pub async fn create_report(&self, submission: NewReport) -> SyncResult<Report> {
        self.coordinator.create_report(submission).await
    }

    /// Re-render trigger: changes whenever the store version advances.
    pub fn changes(&self) -> watch::Receiver<StoreVersion> {
        self.store.subscribe()
    }

    pub fn feed_status(&self) -> watch::Receiver<FeedStatus> {
        self.feed_status.clone()
    }

    pub fn in_flight(&self) -> Vec<MutationAttempt> {
        self.coordinator.in_flight()
    }

    pub fn completed(&self) -> Vec<MutationAttempt> {
        self.coordinator.completed()
    }

    /// Stop the feed and cancel waiting mutations. Idempotent.
    ///
    /// Waiting mutations roll back and return `Cancelled`; no merge from the
    /// feed happens after this returns.
    pub async fn shutdown(&self) {
        self.coordinator.close();
        let feed = self
            .feed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(feed) = feed {
            feed.shutdown().await;
            info!("Sync client shut down");
        }
    }
}
