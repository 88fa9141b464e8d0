//! Optimistic mutation coordinator.
//!
//! Every attempt moves through an explicit state machine:
//!
//! ```text
//! Initiated -> OptimisticallyApplied -> Reconciled
//!                                    -> RolledBack
//! ```
//!
//! After the optimistic patch is staged, the coordinator races three events:
//! the remote write response, the store retiring the overlay because a
//! matching change arrived over the feed, and the reconciliation timeout.
//! Whichever fires first decides the outcome; the others are dropped.
//!
//! Creations are tagged with their mutation token so the feed echo can be
//! told apart from identical reports filed elsewhere. An echo never cancels
//! the creation request: the coordinator keeps waiting for the response until
//! the deadline and promotes from it when it arrives.

use crate::remote::ReportWriter;
use chrono::Utc;
use civic_core::{
    MutationToken, NewReport, Report, ReportId, ReportPatch, ReportStatus, SyncError, SyncResult,
    Timestamp,
};
use civic_store::EntityStore;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutationState {
    Initiated,
    OptimisticallyApplied,
    Reconciled,
    RolledBack,
}

impl MutationState {
    pub fn can_transition_to(self, next: MutationState) -> bool {
        matches!(
            (self, next),
            (MutationState::Initiated, MutationState::OptimisticallyApplied)
                | (MutationState::OptimisticallyApplied, MutationState::Reconciled)
                | (MutationState::OptimisticallyApplied, MutationState::RolledBack)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, MutationState::Reconciled | MutationState::RolledBack)
    }
}

impl fmt::Display for MutationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MutationState::Initiated => "initiated",
            MutationState::OptimisticallyApplied => "optimistically_applied",
            MutationState::Reconciled => "reconciled",
            MutationState::RolledBack => "rolled_back",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid mutation transition: {from} -> {to}")]
pub struct InvalidTransition {
    pub from: MutationState,
    pub to: MutationState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Patch,
    Create,
}

/// One mutation attempt. For creations `target` is the temporary id.
#[derive(Debug, Clone)]
pub struct MutationAttempt {
    pub token: MutationToken,
    pub target: ReportId,
    pub kind: MutationKind,
    pub state: MutationState,
    pub started_at: Timestamp,
    pub error: Option<SyncError>,
}

impl MutationAttempt {
    pub fn new(target: ReportId, kind: MutationKind) -> Self {
        Self {
            token: MutationToken::new(),
            target,
            kind,
            state: MutationState::Initiated,
            started_at: Utc::now(),
            error: None,
        }
    }

    pub fn transition(&mut self, next: MutationState) -> Result<(), InvalidTransition> {
        if !self.state.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

enum Settlement {
    Response(Report),
    Echo(ReportId),
    Failed(SyncError),
    TimedOut,
    Cancelled,
}

const COMPLETED_HISTORY: usize = 64;

/// Runs writes against the remote and keeps the store's overlays honest.
pub struct MutationCoordinator {
    store: Arc<EntityStore>,
    writer: Arc<dyn ReportWriter>,
    timeout: Duration,
    in_flight: Mutex<HashMap<MutationToken, MutationAttempt>>,
    completed: Mutex<VecDeque<MutationAttempt>>,
    closed: watch::Sender<bool>,
}

impl MutationCoordinator {
    pub fn new(store: Arc<EntityStore>, writer: Arc<dyn ReportWriter>, timeout: Duration) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            store,
            writer,
            timeout,
            in_flight: Mutex::new(HashMap::new()),
            completed: Mutex::new(VecDeque::with_capacity(COMPLETED_HISTORY)),
            closed,
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<MutationToken, MutationAttempt>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attempts that have not reached a terminal state, oldest first.
    pub fn in_flight(&self) -> Vec<MutationAttempt> {
        let mut attempts: Vec<MutationAttempt> = self.registry().values().cloned().collect();
        attempts.sort_by_key(|a| a.started_at);
        attempts
    }

    /// Most recently finished attempts, newest last.
    pub fn completed(&self) -> Vec<MutationAttempt> {
        self.completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Abort every waiting attempt (they roll back with `Cancelled`) and
    /// refuse new ones.
    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    /// Apply `patch` to `id` optimistically and write it remotely.
    pub async fn request_mutation(&self, id: ReportId, patch: ReportPatch) -> SyncResult<Report> {
        let writer = Arc::clone(&self.writer);
        let remote_patch = patch.clone();
        self.run_patch(id, patch, async move { writer.write_patch(id, &remote_patch).await })
            .await
    }

    pub async fn update_status(&self, id: ReportId, status: ReportStatus) -> SyncResult<Report> {
        let writer = Arc::clone(&self.writer);
        self.run_patch(id, ReportPatch::status(status), async move {
            writer.write_status(id, status).await
        })
        .await
    }

    /// Submit a new report, visible immediately under a temporary id.
    pub async fn create_report(&self, submission: NewReport) -> SyncResult<Report> {
        if self.is_closed() {
            return Err(SyncError::Cancelled);
        }
        submission.validate()?;

        let temp_id = ReportId::new_local();
        let mut attempt = MutationAttempt::new(temp_id, MutationKind::Create);
        let token = attempt.token;
        let submission = submission.with_client_token(token);
        let provisional = Report::from_submission(temp_id, &submission, Utc::now());
        self.store
            .stage_provisional(provisional, token)
            .map_err(SyncError::from)?;
        self.register(&mut attempt);

        let writer = Arc::clone(&self.writer);
        let write = async move { writer.create_report(&submission).await };
        match self.settle_creation(token, write).await {
            Settlement::Response(record) => {
                let id = record.id;
                self.store.promote_provisional(temp_id, token, record.clone());
                self.finish(token, MutationState::Reconciled, None);
                info!(temp_id = %temp_id, id = %id, "Report creation confirmed by response");
                Ok(self.store.confirmed(id).unwrap_or(record))
            }
            Settlement::Echo(id) => {
                self.finish(token, MutationState::Reconciled, None);
                info!(temp_id = %temp_id, id = %id, "Report creation confirmed by feed");
                self.store.confirmed(id).ok_or(SyncError::NotFound { id })
            }
            Settlement::Failed(err) => {
                self.store.discard_provisional(temp_id, token);
                Err(self.fail(token, temp_id, err))
            }
            Settlement::TimedOut => {
                self.store.discard_provisional(temp_id, token);
                let err = SyncError::ReconciliationTimeout {
                    id: temp_id,
                    waited: self.timeout,
                };
                Err(self.fail(token, temp_id, err))
            }
            Settlement::Cancelled => {
                self.store.discard_provisional(temp_id, token);
                Err(self.fail(token, temp_id, SyncError::Cancelled))
            }
        }
    }

    async fn run_patch<F>(&self, id: ReportId, patch: ReportPatch, write: F) -> SyncResult<Report>
    where
        F: Future<Output = SyncResult<Report>>,
    {
        if self.is_closed() {
            return Err(SyncError::Cancelled);
        }
        patch.validate()?;

        let mut attempt = MutationAttempt::new(id, MutationKind::Patch);
        let token = attempt.token;
        self.store
            .apply_optimistic_patch(id, patch, token)
            .map_err(SyncError::from)?;
        self.register(&mut attempt);

        let deadline = Instant::now() + self.timeout;
        match self.settle(token, write, deadline).await {
            Settlement::Response(record) => {
                // Last-write-wins: a slow response never beats a newer feed record.
                self.store.apply_remote_change(record.clone());
                self.store.reconcile(id, token);
                self.finish(token, MutationState::Reconciled, None);
                info!(id = %id, token = %token, "Mutation confirmed by response");
                Ok(self.store.confirmed(id).unwrap_or(record))
            }
            Settlement::Echo(_) => {
                self.store.reconcile(id, token);
                self.finish(token, MutationState::Reconciled, None);
                info!(id = %id, token = %token, "Mutation confirmed by feed");
                self.store.confirmed(id).ok_or(SyncError::NotFound { id })
            }
            Settlement::Failed(err) => {
                self.store.rollback(id, token);
                Err(self.fail(token, id, err))
            }
            Settlement::TimedOut => {
                self.store.rollback(id, token);
                let err = SyncError::ReconciliationTimeout {
                    id,
                    waited: self.timeout,
                };
                Err(self.fail(token, id, err))
            }
            Settlement::Cancelled => {
                self.store.rollback(id, token);
                Err(self.fail(token, id, SyncError::Cancelled))
            }
        }
    }

    fn register(&self, attempt: &mut MutationAttempt) {
        if let Err(err) = attempt.transition(MutationState::OptimisticallyApplied) {
            warn!(token = %attempt.token, error = %err, "Mutation state machine violated");
        }
        self.registry().insert(attempt.token, attempt.clone());
    }

    fn finish(&self, token: MutationToken, state: MutationState, error: Option<SyncError>) {
        let Some(mut attempt) = self.registry().remove(&token) else {
            return;
        };
        if let Err(err) = attempt.transition(state) {
            warn!(token = %token, error = %err, "Mutation state machine violated");
        }
        attempt.error = error;
        let mut completed = self.completed.lock().unwrap_or_else(PoisonError::into_inner);
        if completed.len() == COMPLETED_HISTORY {
            completed.pop_front();
        }
        completed.push_back(attempt);
    }

    fn fail(&self, token: MutationToken, id: ReportId, err: SyncError) -> SyncError {
        warn!(id = %id, token = %token, error = %err, "Mutation rolled back");
        self.finish(token, MutationState::RolledBack, Some(err.clone()));
        err
    }

    async fn settle<F>(&self, token: MutationToken, write: F, deadline: Instant) -> Settlement
    where
        F: Future<Output = SyncResult<Report>>,
    {
        let mut closed = self.closed.subscribe();
        tokio::select! {
            result = write => match result {
                Ok(record) => Settlement::Response(record),
                Err(err) => Settlement::Failed(err),
            },
            echo = self.echo(token) => match echo {
                Some(id) => Settlement::Echo(id),
                None => Settlement::Cancelled,
            },
            _ = tokio::time::sleep_until(deadline) => Settlement::TimedOut,
            _ = closed.wait_for(|closed| *closed) => Settlement::Cancelled,
        }
    }

    /// Like [`Self::settle`], but an echo only ends the wait for the store.
    /// The creation request keeps running until it answers or the deadline
    /// passes, and its response wins when it arrives.
    async fn settle_creation<F>(&self, token: MutationToken, write: F) -> Settlement
    where
        F: Future<Output = SyncResult<Report>>,
    {
        let deadline = Instant::now() + self.timeout;
        tokio::pin!(write);
        let id = match self.settle(token, write.as_mut(), deadline).await {
            Settlement::Echo(id) => id,
            other => return other,
        };

        let mut closed = self.closed.subscribe();
        tokio::select! {
            result = write => match result {
                Ok(record) => Settlement::Response(record),
                Err(err) => {
                    // The tagged insert already proves the remote stored it.
                    warn!(id = %id, token = %token, error = %err, "Creation echoed but response failed");
                    Settlement::Echo(id)
                }
            },
            _ = tokio::time::sleep_until(deadline) => Settlement::Echo(id),
            _ = closed.wait_for(|closed| *closed) => Settlement::Echo(id),
        }
    }

    /// Resolves once the store retires the staged state for `token`.
    ///
    /// `Some(id)` when a remote change settled it, `None` when it vanished
    /// otherwise (store cleared).
    async fn echo(&self, token: MutationToken) -> Option<ReportId> {
        let mut changes = self.store.subscribe();
        loop {
            if !self.store.is_pending(token) {
                return self.store.take_settled(token);
            }
            if changes.changed().await.is_err() {
                return None;
            }
        }
    }
}
