//! In-memory remote for tests and demos.
//!
//! `MockRemote` is an authoritative report collection implementing all three
//! collaborator traits. Failure injection covers the paths the sync layer has
//! to survive: failed or lost writes, dropped echoes, disconnects and slow
//! fetches.

use crate::remote::{
    ChangeChannel, ChannelMessage, ReportFetcher, ReportWriter, Subscription, SubscriptionHandle,
};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use civic_core::{
    NewReport, Report, ReportFilter, ReportId, ReportPatch, SyncError, SyncResult, Timestamp,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

/// How remote writes behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WriteMode {
    /// Apply, broadcast (if echo is on) and respond.
    #[default]
    Normal,
    /// Reject without applying.
    Fail,
    /// Never apply and never respond.
    Hang,
    /// Apply and broadcast, but never respond.
    LoseResponse,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct MockRemote {
    records: Mutex<HashMap<ReportId, Report>>,
    subscribers: Mutex<HashMap<SubscriptionHandle, mpsc::Sender<ChannelMessage>>>,
    clock: Mutex<Timestamp>,
    capacity: usize,
    next_handle: AtomicU64,
    write_mode: Mutex<WriteMode>,
    echo: AtomicBool,
    fail_fetch: AtomicBool,
    fetch_delay: Mutex<Option<Duration>>,
    fetches: AtomicUsize,
    subscribes: AtomicUsize,
    unsubscribes: AtomicUsize,
}

impl Default for MockRemote {
    fn default() -> Self {
        Self::with_capacity(1024)
    }
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remote with the given per-subscription buffer size.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            clock: Mutex::new(Utc::now()),
            capacity: capacity.max(1),
            next_handle: AtomicU64::new(1),
            write_mode: Mutex::new(WriteMode::Normal),
            echo: AtomicBool::new(true),
            fail_fetch: AtomicBool::new(false),
            fetch_delay: Mutex::new(None),
            fetches: AtomicUsize::new(0),
            subscribes: AtomicUsize::new(0),
            unsubscribes: AtomicUsize::new(0),
        }
    }

    /// Replace the authoritative collection without notifying subscribers.
    pub fn seed(&self, records: impl IntoIterator<Item = Report>) {
        let mut stored = lock(&self.records);
        stored.clear();
        for record in records {
            self.observe(record.updated_at);
            stored.insert(record.id, record);
        }
    }

    pub fn get(&self, id: ReportId) -> Option<Report> {
        lock(&self.records).get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_write_mode(&self, mode: WriteMode) {
        *lock(&self.write_mode) = mode;
    }

    /// Whether writes are broadcast to subscribers.
    pub fn set_echo(&self, echo: bool) {
        self.echo.store(echo, Ordering::SeqCst);
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        *lock(&self.fetch_delay) = delay;
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn subscribe_count(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    pub fn unsubscribe_count(&self) -> usize {
        self.unsubscribes.load(Ordering::SeqCst)
    }

    pub fn active_subscriptions(&self) -> usize {
        lock(&self.subscribers).len()
    }

    /// A submission from another client. Broadcast as an insert.
    pub fn insert_remote(&self, submission: &NewReport) -> Report {
        let record = Report::from_submission(ReportId::new_local(), submission, self.tick());
        lock(&self.records).insert(record.id, record.clone());
        self.broadcast(ChannelMessage::Inserted(record.clone()));
        record
    }

    /// A change made by another client. Broadcast as an update.
    pub fn update_remote(&self, id: ReportId, patch: &ReportPatch) -> SyncResult<Report> {
        let record = self.apply_patch(id, patch)?;
        self.broadcast(ChannelMessage::Updated(record.clone()));
        Ok(record)
    }

    /// Change the collection without notifying anyone, as if the
    /// notification was lost during an outage.
    pub fn update_silently(&self, id: ReportId, patch: &ReportPatch) -> SyncResult<Report> {
        self.apply_patch(id, patch)
    }

    /// Deliver an arbitrary message to every subscriber (duplicates, stale
    /// replays).
    pub fn broadcast(&self, message: ChannelMessage) {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|handle, sender| match sender.try_send(message.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(handle = %handle, "Dropping message for full subscriber");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Signal a disconnect on every live subscription and drop them.
    pub fn disconnect_all(&self, reason: &str) {
        let subscribers: Vec<_> = lock(&self.subscribers).drain().collect();
        for (_, sender) in subscribers {
            let _ = sender.try_send(ChannelMessage::Disconnected {
                reason: reason.to_string(),
            });
        }
    }

    /// Strictly increasing server clock.
    fn tick(&self) -> Timestamp {
        let mut clock = lock(&self.clock);
        let now = Utc::now();
        *clock = if now > *clock {
            now
        } else {
            *clock + ChronoDuration::milliseconds(1)
        };
        *clock
    }

    fn observe(&self, at: Timestamp) {
        let mut clock = lock(&self.clock);
        if at > *clock {
            *clock = at;
        }
    }

    fn apply_patch(&self, id: ReportId, patch: &ReportPatch) -> SyncResult<Report> {
        patch.validate()?;
        let mut records = lock(&self.records);
        let current = records.get(&id).ok_or(SyncError::NotFound { id })?;
        let mut next = patch.apply_to(current);
        next.updated_at = self.tick();
        records.insert(id, next.clone());
        Ok(next)
    }

    fn echo_enabled(&self) -> bool {
        self.echo.load(Ordering::SeqCst)
    }

    fn write_mode(&self) -> WriteMode {
        *lock(&self.write_mode)
    }
}

#[async_trait]
impl ReportFetcher for MockRemote {
    async fn fetch_all(&self, hints: Option<&ReportFilter>) -> SyncResult<Vec<Report>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.fetch_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(SyncError::transport("fetch_all", "injected fetch failure"));
        }
        let records = lock(&self.records)
            .values()
            .filter(|r| hints.map_or(true, |h| h.matches(r)))
            .cloned()
            .collect();
        Ok(records)
    }
}

#[async_trait]
impl ChangeChannel for MockRemote {
    async fn subscribe(&self) -> SyncResult<Subscription> {
        let handle = SubscriptionHandle::new(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let (sender, messages) = mpsc::channel(self.capacity);
        lock(&self.subscribers).insert(handle, sender);
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        Ok(Subscription { handle, messages })
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) -> SyncResult<()> {
        lock(&self.subscribers).remove(&handle);
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl ReportWriter for MockRemote {
    async fn write_patch(&self, id: ReportId, patch: &ReportPatch) -> SyncResult<Report> {
        let mode = self.write_mode();
        match mode {
            WriteMode::Fail => {
                return Err(SyncError::transport("write_patch", "injected write failure"))
            }
            WriteMode::Hang => std::future::pending::<()>().await,
            WriteMode::Normal | WriteMode::LoseResponse => {}
        }
        let record = self.apply_patch(id, patch)?;
        if self.echo_enabled() {
            self.broadcast(ChannelMessage::Updated(record.clone()));
        }
        if mode == WriteMode::LoseResponse {
            std::future::pending::<()>().await;
        }
        Ok(record)
    }

    async fn create_report(&self, report: &NewReport) -> SyncResult<Report> {
        let mode = self.write_mode();
        match mode {
            WriteMode::Fail => {
                return Err(SyncError::transport("create_report", "injected write failure"))
            }
            WriteMode::Hang => std::future::pending::<()>().await,
            WriteMode::Normal | WriteMode::LoseResponse => {}
        }
        report.validate()?;
        let record = Report::from_submission(ReportId::new_local(), report, self.tick());
        lock(&self.records).insert(record.id, record.clone());
        if self.echo_enabled() {
            self.broadcast(ChannelMessage::Inserted(record.clone()));
        }
        if mode == WriteMode::LoseResponse {
            std::future::pending::<()>().await;
        }
        Ok(record)
    }
}
