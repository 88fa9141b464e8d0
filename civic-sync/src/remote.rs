//! Boundary traits for the remote system.
//!
//! The sync layer never talks to a transport directly. It consumes a bulk
//! fetch, a subscribe/unsubscribe change channel and a write API through these
//! traits, so tests and demos can substitute [`crate::mock::MockRemote`].

use async_trait::async_trait;
use civic_core::{
    ChangeEvent, NewReport, Report, ReportFilter, ReportId, ReportPatch, ReportStatus, SyncResult,
};
use std::fmt;
use tokio::sync::mpsc;

/// One delivery on a change channel subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    Inserted(Report),
    Updated(Report),
    /// The channel dropped. Nothing missed during the outage is redelivered.
    Disconnected { reason: String },
}

impl From<ChangeEvent> for ChannelMessage {
    fn from(event: ChangeEvent) -> Self {
        match event {
            ChangeEvent::ReportInserted { report } => ChannelMessage::Inserted(report),
            ChangeEvent::ReportUpdated { report } => ChannelMessage::Updated(report),
        }
    }
}

/// Opaque handle identifying a live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A live subscription to report inserts and updates.
#[derive(Debug)]
pub struct Subscription {
    pub handle: SubscriptionHandle,
    pub messages: mpsc::Receiver<ChannelMessage>,
}

/// Bulk snapshot of the report collection.
#[async_trait]
pub trait ReportFetcher: Send + Sync {
    /// Fetch every report. `hints` may narrow the result server-side; callers
    /// must not rely on it doing so.
    async fn fetch_all(&self, hints: Option<&ReportFilter>) -> SyncResult<Vec<Report>>;
}

/// At-least-once, unordered notification stream of report changes.
#[async_trait]
pub trait ChangeChannel: Send + Sync {
    async fn subscribe(&self) -> SyncResult<Subscription>;

    /// Release a subscription. No message is delivered for `handle` once this
    /// returns.
    async fn unsubscribe(&self, handle: SubscriptionHandle) -> SyncResult<()>;
}

/// Remote writes. Each returns the authoritative record after the write.
#[async_trait]
pub trait ReportWriter: Send + Sync {
    async fn write_patch(&self, id: ReportId, patch: &ReportPatch) -> SyncResult<Report>;

    async fn write_status(&self, id: ReportId, status: ReportStatus) -> SyncResult<Report> {
        self.write_patch(id, &ReportPatch::status(status)).await
    }

    async fn create_report(&self, report: &NewReport) -> SyncResult<Report>;
}
