//! The process-wide entity store.
//!
//! Holds confirmed remote state per report id, stacks of optimistic overlays
//! staged by pending mutations, and provisional records for creations the
//! remote system has not confirmed yet. Readers only ever see [`Snapshot`]s.
//!
//! # Merge rule
//!
//! Remote records merge by last-write-wins on `updated_at` (see
//! [`crate::freshness`]). Overlays never touch confirmed state, so removing an
//! overlay restores the confirmed record exactly.
//!
//! # Echo detection
//!
//! When a merged remote record is newer than the baseline an overlay was
//! staged against and already carries every value the overlay sets, the
//! overlay is retired and its token is recorded as settled. The same happens
//! for a provisional record when an insert tagged with its mutation token
//! arrives. Identical content alone never settles a creation. Mutation coordinators poll [`EntityStore::is_pending`] and
//! [`EntityStore::take_settled`] to learn about settlements that came in over
//! the change feed before their own write response did.

use crate::error::StoreError;
use crate::freshness::{decide, LoadSummary, MergeOutcome};
use crate::snapshot::Snapshot;
use crate::watermark::StoreVersion;
use civic_core::{MutationToken, Report, ReportId, ReportPatch, Timestamp};
use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::watch;
use tracing::{debug, info};

#[derive(Debug, Clone)]
struct Overlay {
    token: MutationToken,
    patch: ReportPatch,
    /// `updated_at` of the confirmed record when the patch was staged.
    baseline: Timestamp,
}

#[derive(Debug, Clone)]
struct Provisional {
    token: MutationToken,
    record: Report,
}

#[derive(Debug, Default)]
struct StoreState {
    version: StoreVersion,
    confirmed: HashMap<ReportId, Report>,
    overlays: HashMap<ReportId, Vec<Overlay>>,
    provisional: HashMap<ReportId, Provisional>,
    settled: HashMap<MutationToken, ReportId>,
    cached: Option<Snapshot>,
}

impl StoreState {
    fn touch(&mut self) -> StoreVersion {
        self.version = self.version.next();
        self.cached = None;
        self.version
    }

    fn render(&self, id: ReportId) -> Option<Report> {
        let base = self
            .confirmed
            .get(&id)
            .or_else(|| self.provisional.get(&id).map(|p| &p.record))?;
        Some(match self.overlays.get(&id) {
            Some(stack) => stack
                .iter()
                .fold(base.clone(), |acc, overlay| overlay.patch.apply_to(&acc)),
            None => base.clone(),
        })
    }

    fn merge(&mut self, incoming: Report, match_provisional: bool) -> MergeOutcome {
        let id = incoming.id;
        let outcome = decide(self.confirmed.get(&id), &incoming);
        match outcome {
            MergeOutcome::Inserted | MergeOutcome::Replaced => {
                if match_provisional && outcome == MergeOutcome::Inserted {
                    self.settle_provisional(&incoming);
                }
                self.confirmed.insert(id, incoming);
                self.retire_satisfied(id);
            }
            MergeOutcome::Duplicate => {
                debug!(id = %id, "Ignoring duplicate change");
            }
            MergeOutcome::Stale { stored, incoming } => {
                debug!(id = %id, stored = %stored, incoming = %incoming, "Ignoring stale change");
            }
        }
        outcome
    }

    /// Drop the provisional record an insert confirms, if any.
    fn settle_provisional(&mut self, inserted: &Report) {
        let matched = if self.provisional.contains_key(&inserted.id) {
            Some(inserted.id)
        } else {
            self.provisional
                .iter()
                .find(|(_, p)| inserted.was_submitted_with(p.token))
                .map(|(temp_id, _)| *temp_id)
        };
        if let Some(temp_id) = matched {
            if let Some(provisional) = self.provisional.remove(&temp_id) {
                debug!(temp_id = %temp_id, id = %inserted.id, token = %provisional.token, "Provisional report confirmed by insert");
                self.settled.insert(provisional.token, inserted.id);
            }
        }
    }

    /// Retire overlays the confirmed record for `id` now supersedes.
    fn retire_satisfied(&mut self, id: ReportId) {
        let Some(confirmed) = self.confirmed.get(&id) else {
            return;
        };
        let Some(stack) = self.overlays.get_mut(&id) else {
            return;
        };
        let mut retired = Vec::new();
        stack.retain(|overlay| {
            let superseded =
                confirmed.updated_at > overlay.baseline && overlay.patch.is_satisfied_by(confirmed);
            if superseded {
                retired.push(overlay.token);
            }
            !superseded
        });
        if stack.is_empty() {
            self.overlays.remove(&id);
        }
        for token in retired {
            debug!(id = %id, token = %token, "Optimistic patch confirmed by remote change");
            self.settled.insert(token, id);
        }
    }

    fn stage_patch(
        &mut self,
        id: ReportId,
        patch: ReportPatch,
        token: MutationToken,
    ) -> Result<(), StoreError> {
        if patch.is_empty() {
            return Err(StoreError::EmptyPatch);
        }
        let baseline = match self.confirmed.get(&id) {
            Some(record) => record.updated_at,
            None if self.provisional.contains_key(&id) => {
                return Err(StoreError::Provisional { id });
            }
            None => return Err(StoreError::NotFound { id }),
        };
        self.overlays.entry(id).or_default().push(Overlay {
            token,
            patch,
            baseline,
        });
        Ok(())
    }

    fn remove_overlay(&mut self, id: ReportId, token: MutationToken) -> bool {
        self.settled.remove(&token);
        let Some(stack) = self.overlays.get_mut(&id) else {
            return false;
        };
        let before = stack.len();
        stack.retain(|overlay| overlay.token != token);
        let removed = stack.len() != before;
        if stack.is_empty() {
            self.overlays.remove(&id);
        }
        removed
    }

    fn remove_provisional(&mut self, temp_id: ReportId, token: MutationToken) -> bool {
        match self.provisional.get(&temp_id) {
            Some(provisional) if provisional.token == token => {
                self.provisional.remove(&temp_id);
                true
            }
            _ => false,
        }
    }

    fn holds_token(&self, token: MutationToken) -> bool {
        self.overlays
            .values()
            .flatten()
            .any(|overlay| overlay.token == token)
            || self.provisional.values().any(|p| p.token == token)
    }

    fn build_snapshot(&self) -> Snapshot {
        let ids: HashSet<ReportId> = self
            .confirmed
            .keys()
            .chain(self.provisional.keys())
            .copied()
            .collect();
        let records = ids.iter().filter_map(|id| self.render(*id)).collect();
        let pending = self.overlays.keys().copied().collect();
        let provisional = self.provisional.keys().copied().collect();
        Snapshot::new(self.version, records, pending, provisional)
    }
}

/// Authoritative in-memory collection of reports.
///
/// Explicitly constructed and shared through `Arc`; there is no global
/// instance. Every change to the rendered state advances the
/// [`StoreVersion`] published on [`EntityStore::subscribe`].
#[derive(Debug)]
pub struct EntityStore {
    state: RwLock<StoreState>,
    version_tx: watch::Sender<StoreVersion>,
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore {
    pub fn new() -> Self {
        let (version_tx, _) = watch::channel(StoreVersion::zero());
        Self {
            state: RwLock::new(StoreState::default()),
            version_tx,
        }
    }

    // State is consistent between statements, so a poisoned lock is still usable.
    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` under the write lock and publish a new version if it reports a change.
    fn mutate<R>(&self, f: impl FnOnce(&mut StoreState) -> (R, bool)) -> R {
        let mut guard = self.write();
        let (result, changed) = f(&mut *guard);
        if changed {
            let version = guard.touch();
            self.version_tx.send_replace(version);
        }
        result
    }

    /// Receiver that observes every version change.
    pub fn subscribe(&self) -> watch::Receiver<StoreVersion> {
        self.version_tx.subscribe()
    }

    pub fn version(&self) -> StoreVersion {
        self.read().version
    }

    /// Merge a bulk snapshot from the remote system.
    ///
    /// Entries are never dropped for being absent from `records`; each record
    /// merges under the same rule as [`EntityStore::apply_remote_change`], so a
    /// fetch that raced behind a fresher change event cannot roll it back.
    pub fn load<I>(&self, records: I) -> LoadSummary
    where
        I: IntoIterator<Item = Report>,
    {
        let summary = self.mutate(|state| {
            let mut summary = LoadSummary::default();
            for record in records {
                summary.record(state.merge(record, true));
            }
            (summary, summary.applied() > 0)
        });
        info!(
            inserted = summary.inserted,
            replaced = summary.replaced,
            duplicates = summary.duplicates,
            stale = summary.stale,
            "Loaded report snapshot"
        );
        summary
    }

    /// Merge one record delivered by the change feed or a write response.
    pub fn apply_remote_change(&self, record: Report) -> MergeOutcome {
        self.mutate(|state| {
            let outcome = state.merge(record, true);
            (outcome, outcome.is_applied())
        })
    }

    /// Stage an unconfirmed patch over the confirmed record for `id`.
    pub fn apply_optimistic_patch(
        &self,
        id: ReportId,
        patch: ReportPatch,
        token: MutationToken,
    ) -> Result<(), StoreError> {
        self.mutate(|state| {
            let result = state.stage_patch(id, patch, token);
            let changed = result.is_ok();
            (result, changed)
        })?;
        debug!(id = %id, token = %token, "Staged optimistic patch");
        Ok(())
    }

    /// Retire the overlay staged under `token` because remote state superseded it.
    ///
    /// Idempotent: returns `false` if the overlay is already gone.
    pub fn reconcile(&self, id: ReportId, token: MutationToken) -> bool {
        let removed = self.mutate(|state| {
            let removed = state.remove_overlay(id, token);
            (removed, removed)
        });
        if removed {
            debug!(id = %id, token = %token, "Reconciled optimistic patch");
        }
        removed
    }

    /// Discard the overlay staged under `token`, reverting to confirmed state.
    pub fn rollback(&self, id: ReportId, token: MutationToken) -> bool {
        let removed = self.mutate(|state| {
            let removed = state.remove_overlay(id, token);
            (removed, removed)
        });
        if removed {
            debug!(id = %id, token = %token, "Rolled back optimistic patch");
        }
        removed
    }

    /// Insert a locally created record under a temporary id.
    pub fn stage_provisional(
        &self,
        record: Report,
        token: MutationToken,
    ) -> Result<(), StoreError> {
        self.mutate(|state| {
            let id = record.id;
            if state.confirmed.contains_key(&id) || state.provisional.contains_key(&id) {
                return (Err(StoreError::AlreadyExists { id }), false);
            }
            state.provisional.insert(id, Provisional { token, record });
            (Ok(()), true)
        })
    }

    /// Replace a provisional record with the server-confirmed one.
    ///
    /// The confirmed record merges last-write-wins; if the feed already
    /// delivered a newer version, that version stays.
    pub fn promote_provisional(
        &self,
        temp_id: ReportId,
        token: MutationToken,
        confirmed: Report,
    ) -> MergeOutcome {
        self.mutate(|state| {
            let removed = state.remove_provisional(temp_id, token);
            state.settled.remove(&token);
            let outcome = state.merge(confirmed, false);
            (outcome, removed || outcome.is_applied())
        })
    }

    /// Remove a provisional record whose creation failed.
    pub fn discard_provisional(&self, temp_id: ReportId, token: MutationToken) -> bool {
        self.mutate(|state| {
            let removed = state.remove_provisional(temp_id, token);
            state.settled.remove(&token);
            (removed, removed)
        })
    }

    /// Whether the overlay or provisional record staged under `token` is still live.
    pub fn is_pending(&self, token: MutationToken) -> bool {
        self.read().holds_token(token)
    }

    /// Take the id a remote change settled `token` against, if one did.
    pub fn take_settled(&self, token: MutationToken) -> Option<ReportId> {
        self.write().settled.remove(&token)
    }

    /// Rendered record for `id`, overlays applied.
    pub fn get(&self, id: ReportId) -> Option<Report> {
        self.read().render(id)
    }

    /// Last confirmed remote record for `id`, ignoring overlays.
    pub fn confirmed(&self, id: ReportId) -> Option<Report> {
        self.read().confirmed.get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        let state = self.read();
        state.confirmed.len() + state.provisional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of records carrying an unconfirmed overlay or provisional state.
    pub fn pending_count(&self) -> usize {
        let state = self.read();
        state.overlays.len() + state.provisional.len()
    }

    /// Point-in-time read of every rendered record.
    pub fn snapshot(&self) -> Snapshot {
        if let Some(cached) = &self.read().cached {
            return cached.clone();
        }
        let mut state = self.write();
        if let Some(cached) = &state.cached {
            return cached.clone();
        }
        let snapshot = state.build_snapshot();
        state.cached = Some(snapshot.clone());
        snapshot
    }

    /// Drop all records and pending state. Used on teardown.
    pub fn clear(&self) {
        self.mutate(|state| {
            state.confirmed.clear();
            state.overlays.clear();
            state.provisional.clear();
            state.settled.clear();
            ((), true)
        });
        info!("Cleared entity store");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use civic_core::{NewReport, ReportCategory, ReportStatus};

    fn t(minutes: i64) -> Timestamp {
        Utc.with_ymd_and_hms(2024, 4, 1, 10, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    fn report(status: ReportStatus, updated: i64) -> Report {
        let mut r = Report::from_submission(
            ReportId::new_local(),
            &NewReport::new("Streetlight out", "Dark corner", ReportCategory::Streetlight),
            t(0),
        );
        r.status = status;
        r.updated_at = t(updated);
        r
    }

    fn with(base: &Report, status: ReportStatus, updated: i64) -> Report {
        let mut r = base.clone();
        r.status = status;
        r.updated_at = t(updated);
        r
    }

    #[test]
    fn test_stale_duplicate_after_update_is_ignored() {
        let store = EntityStore::new();
        let a = report(ReportStatus::Open, 1);
        store.load(vec![a.clone()]);

        let update = with(&a, ReportStatus::InProgress, 2);
        assert!(store.apply_remote_change(update).is_applied());
        assert!(store.apply_remote_change(a.clone()).is_stale());

        assert_eq!(store.get(a.id).unwrap().status, ReportStatus::InProgress);
    }

    #[test]
    fn test_duplicate_does_not_advance_version() {
        let store = EntityStore::new();
        let a = report(ReportStatus::Open, 1);
        store.apply_remote_change(a.clone());
        let version = store.version();
        assert_eq!(store.apply_remote_change(a), MergeOutcome::Duplicate);
        assert_eq!(store.version(), version);
    }

    #[test]
    fn test_load_does_not_roll_back_fresher_change() {
        let store = EntityStore::new();
        let a = report(ReportStatus::Open, 1);
        store.apply_remote_change(with(&a, ReportStatus::Resolved, 5));
        let summary = store.load(vec![a.clone()]);
        assert_eq!(summary.stale, 1);
        assert_eq!(store.get(a.id).unwrap().status, ReportStatus::Resolved);
    }

    #[test]
    fn test_rollback_restores_confirmed_record() {
        let store = EntityStore::new();
        let a = report(ReportStatus::Open, 1);
        store.load(vec![a.clone()]);
        let token = MutationToken::new();

        store
            .apply_optimistic_patch(a.id, ReportPatch::status(ReportStatus::Resolved), token)
            .unwrap();
        assert_eq!(store.get(a.id).unwrap().status, ReportStatus::Resolved);
        assert!(store.snapshot().is_pending(a.id));
        assert_eq!(store.confirmed(a.id).unwrap(), a);

        assert!(store.rollback(a.id, token));
        assert_eq!(store.get(a.id).unwrap(), a);
        assert!(!store.snapshot().is_pending(a.id));
        assert!(!store.rollback(a.id, token));
    }

    #[test]
    fn test_patch_unknown_report_is_rejected() {
        let store = EntityStore::new();
        let err = store
            .apply_optimistic_patch(
                ReportId::new_local(),
                ReportPatch::status(ReportStatus::Closed),
                MutationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[test]
    fn test_empty_patch_is_rejected() {
        let store = EntityStore::new();
        let a = report(ReportStatus::Open, 1);
        store.load(vec![a.clone()]);
        let err = store
            .apply_optimistic_patch(a.id, ReportPatch::default(), MutationToken::new())
            .unwrap_err();
        assert_eq!(err, StoreError::EmptyPatch);
    }

    #[test]
    fn test_matching_echo_retires_overlay() {
        let store = EntityStore::new();
        let a = report(ReportStatus::Open, 1);
        store.load(vec![a.clone()]);
        let token = MutationToken::new();
        store
            .apply_optimistic_patch(a.id, ReportPatch::status(ReportStatus::InProgress), token)
            .unwrap();

        store.apply_remote_change(with(&a, ReportStatus::InProgress, 2));

        assert!(!store.is_pending(token));
        assert_eq!(store.take_settled(token), Some(a.id));
        assert_eq!(store.take_settled(token), None);
        assert!(!store.reconcile(a.id, token));
        assert_eq!(store.get(a.id).unwrap().status, ReportStatus::InProgress);
    }

    #[test]
    fn test_unrelated_newer_change_keeps_overlay() {
        let store = EntityStore::new();
        let a = report(ReportStatus::Open, 1);
        store.load(vec![a.clone()]);
        let token = MutationToken::new();
        store
            .apply_optimistic_patch(a.id, ReportPatch::status(ReportStatus::Resolved), token)
            .unwrap();

        store.apply_remote_change(with(&a, ReportStatus::InProgress, 2));

        assert!(store.is_pending(token));
        assert_eq!(store.get(a.id).unwrap().status, ReportStatus::Resolved);
        assert_eq!(
            store.confirmed(a.id).unwrap().status,
            ReportStatus::InProgress
        );
        store.rollback(a.id, token);
        assert_eq!(store.get(a.id).unwrap().status, ReportStatus::InProgress);
    }

    #[test]
    fn test_overlays_stack_in_staging_order() {
        let store = EntityStore::new();
        let a = report(ReportStatus::Open, 1);
        store.load(vec![a.clone()]);
        let first = MutationToken::new();
        let second = MutationToken::new();
        store
            .apply_optimistic_patch(a.id, ReportPatch::status(ReportStatus::InProgress), first)
            .unwrap();
        store
            .apply_optimistic_patch(a.id, ReportPatch::status(ReportStatus::Resolved), second)
            .unwrap();
        assert_eq!(store.get(a.id).unwrap().status, ReportStatus::Resolved);

        store.rollback(a.id, second);
        assert_eq!(store.get(a.id).unwrap().status, ReportStatus::InProgress);
        store.rollback(a.id, first);
        assert_eq!(store.get(a.id).unwrap(), a);
    }

    #[test]
    fn test_provisional_record_is_visible_and_promoted() {
        let store = EntityStore::new();
        let submission = NewReport::new("Graffiti", "Wall by the park", ReportCategory::Vandalism);
        let temp = Report::from_submission(ReportId::new_local(), &submission, t(0));
        let token = MutationToken::new();
        store.stage_provisional(temp.clone(), token).unwrap();

        let snapshot = store.snapshot();
        assert!(snapshot.is_provisional(temp.id));
        assert_eq!(snapshot.len(), 1);
        assert!(store.is_pending(token));

        let server = Report::from_submission(ReportId::new_local(), &submission, t(1));
        store.promote_provisional(temp.id, token, server.clone());

        assert!(store.get(temp.id).is_none());
        assert_eq!(store.get(server.id).unwrap(), server);
        assert!(!store.is_pending(token));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_insert_echo_settles_provisional_record() {
        let store = EntityStore::new();
        let token = MutationToken::new();
        let submission = NewReport::new("Bins not collected", "", ReportCategory::Garbage)
            .with_client_token(token);
        let temp = Report::from_submission(ReportId::new_local(), &submission, t(0));
        store.stage_provisional(temp.clone(), token).unwrap();

        let server = Report::from_submission(ReportId::new_local(), &submission, t(1));
        assert_eq!(
            store.apply_remote_change(server.clone()),
            MergeOutcome::Inserted
        );

        assert!(!store.is_pending(token));
        assert_eq!(store.take_settled(token), Some(server.id));
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.promote_provisional(temp.id, token, server),
            MergeOutcome::Duplicate
        );
    }

    #[test]
    fn test_identical_untagged_insert_leaves_provisional_pending() {
        let store = EntityStore::new();
        let token = MutationToken::new();
        let submission = NewReport::new("Bins not collected", "", ReportCategory::Garbage);
        let temp = Report::from_submission(
            ReportId::new_local(),
            &submission.clone().with_client_token(token),
            t(0),
        );
        store.stage_provisional(temp.clone(), token).unwrap();

        let foreign = Report::from_submission(ReportId::new_local(), &submission, t(1));
        assert_eq!(store.apply_remote_change(foreign.clone()), MergeOutcome::Inserted);

        assert!(store.is_pending(token));
        assert_eq!(store.take_settled(token), None);
        assert_eq!(store.len(), 2);
        assert!(store.snapshot().is_provisional(temp.id));
        assert_eq!(store.get(foreign.id), Some(foreign));
    }

    #[test]
    fn test_provisional_records_cannot_be_patched() {
        let store = EntityStore::new();
        let temp = report(ReportStatus::Open, 0);
        store.stage_provisional(temp.clone(), MutationToken::new()).unwrap();
        let err = store
            .apply_optimistic_patch(
                temp.id,
                ReportPatch::status(ReportStatus::Closed),
                MutationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Provisional { .. }));
    }

    #[test]
    fn test_snapshot_is_cached_per_version() {
        let store = EntityStore::new();
        store.apply_remote_change(report(ReportStatus::Open, 1));
        let first = store.snapshot();
        let again = store.snapshot();
        assert_eq!(first.version(), again.version());
        assert!(std::ptr::eq(first.records(), again.records()));

        store.apply_remote_change(report(ReportStatus::Closed, 2));
        let next = store.snapshot();
        assert!(next.version().is_newer_than(&first.version()));
        assert_eq!(first.len(), 1);
        assert_eq!(next.len(), 2);
    }

    #[tokio::test]
    async fn test_subscribers_observe_version_changes() {
        let store = EntityStore::new();
        let mut rx = store.subscribe();
        store.apply_remote_change(report(ReportStatus::Open, 1));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), store.version());
    }

    #[test]
    fn test_clear_drops_everything() {
        let store = EntityStore::new();
        store.load(vec![report(ReportStatus::Open, 1), report(ReportStatus::Closed, 1)]);
        store.clear();
        assert!(store.is_empty());
        assert!(store.snapshot().is_empty());
    }
}
