use std::collections::HashSet;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{info, warn};

use crate::calendar::CalendarSnapshot;
use crate::form::CalendarSubmission;
use crate::model::*;
use crate::observability;
use crate::session::{SnapshotCache, block_map_key};

use super::{Engine, EngineError, ReconcileFailure, StaleReason};

/// Block mutations a reconciliation committed, in the order issued.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AppliedDelta {
    pub removed: Vec<RestrictionId>,
    pub added: Vec<(RoomId, NaiveDate)>,
}

impl AppliedDelta {
    pub fn is_empty(&self) -> bool {
        self.removed.is_empty() && self.added.is_empty()
    }
}

/// Mutations for one room, each list in ascending day order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomPlan {
    pub room_id: RoomId,
    pub remove: Vec<RestrictionId>,
    pub add: Vec<NaiveDate>,
}

/// Diff a room's last shown block map against the submitted markers.
///
/// A shown block is removed when its keep marker is missing. Every add
/// marker becomes an insertion, even on a day that already holds a block.
pub fn plan_room(snapshot: &CalendarSnapshot, submission: &CalendarSubmission) -> RoomPlan {
    let room_id = snapshot.room_id;
    RoomPlan {
        room_id,
        remove: snapshot
            .blocks
            .occupied()
            .filter(|(day, _)| !submission.keeps(room_id, *day))
            .map(|(_, id)| id)
            .collect(),
        add: submission.additions_for(room_id).collect(),
    }
}

/// Check a room's cached snapshot against the month and version posted.
fn validate_snapshot(
    room_id: RoomId,
    month: CalendarMonth,
    snapshot: Option<CalendarSnapshot>,
    submission: &CalendarSubmission,
) -> Result<CalendarSnapshot, EngineError> {
    let stale = |reason| EngineError::StaleCalendarState { room_id, reason };
    let snapshot = snapshot.ok_or_else(|| stale(StaleReason::MissingSnapshot))?;
    if snapshot.month != month {
        return Err(stale(StaleReason::OtherMonth { shown: snapshot.month }));
    }
    match submission.version(room_id) {
        None => Err(stale(StaleReason::MissingVersion)),
        Some(v) if v != snapshot.version => Err(stale(StaleReason::VersionMismatch)),
        Some(_) => Ok(snapshot),
    }
}

/// Reject add markers for rooms outside `scope` or days outside `month`.
fn validate_additions(
    month: CalendarMonth,
    scope: &HashSet<RoomId>,
    submission: &CalendarSubmission,
) -> Result<(), EngineError> {
    for (room_id, day) in submission.additions() {
        if !scope.contains(&room_id) {
            return Err(InvalidRange::UnknownRoom(room_id).into());
        }
        if CalendarMonth::of(day) != month {
            return Err(InvalidRange::OutsideMonth { day, month }.into());
        }
    }
    Ok(())
}

fn failure_label(error: &EngineError) -> &'static str {
    match error {
        EngineError::StaleCalendarState { .. } => "stale",
        EngineError::InvalidRange(_) => "invalid",
        _ => "failed",
    }
}

impl Engine {
    /// Apply an admin's calendar edits for `month`.
    ///
    /// Every room's snapshot and every add marker is validated before the
    /// first mutation. Mutations then run room by room in listing order,
    /// deletions before insertions. The first failed mutation stops the run;
    /// what was already applied stays applied and is reported in the failure.
    pub async fn reconcile_month(
        &self,
        month: CalendarMonth,
        submission: &CalendarSubmission,
        cache: &dyn SnapshotCache,
    ) -> Result<AppliedDelta, ReconcileFailure> {
        let result = self.reconcile(month, submission, cache).await;
        let (status, applied) = match &result {
            Ok(delta) => ("ok", delta),
            Err(failure) => (failure_label(&failure.error), &failure.applied),
        };
        metrics::counter!(observability::RECONCILIATIONS_TOTAL, "status" => status).increment(1);
        metrics::counter!(observability::BLOCKS_REMOVED_TOTAL).increment(applied.removed.len() as u64);
        metrics::counter!(observability::BLOCKS_ADDED_TOTAL).increment(applied.added.len() as u64);
        match &result {
            Ok(delta) => info!(
                "calendar {month}: removed {} blocks, added {}",
                delta.removed.len(),
                delta.added.len()
            ),
            Err(failure) => warn!("calendar {month}: {failure}"),
        }
        result
    }

    async fn reconcile(
        &self,
        month: CalendarMonth,
        submission: &CalendarSubmission,
        cache: &dyn SnapshotCache,
    ) -> Result<AppliedDelta, ReconcileFailure> {
        let rooms = self
            .call("list_rooms", self.store.list_rooms())
            .await
            .map_err(|e| ReconcileFailure::from(EngineError::DataAccess(e)))?;
        let scope: HashSet<RoomId> = rooms.iter().map(|r| r.id).collect();
        validate_additions(month, &scope, submission)?;

        let mut plans = Vec::with_capacity(rooms.len());
        for room in &rooms {
            let snapshot = cache.get(&block_map_key(room.id));
            let snapshot = validate_snapshot(room.id, month, snapshot, submission)?;
            plans.push(plan_room(&snapshot, submission));
        }

        let mut applied = AppliedDelta::default();
        let mut touched = Vec::new();
        let outcome = self.apply_plans(&plans, &mut applied, &mut touched).await;

        // Shown block ids of a mutated room no longer describe the store.
        for room_id in touched {
            cache.remove(&block_map_key(room_id));
        }

        match outcome {
            Ok(()) => Ok(applied),
            Err(error) => Err(ReconcileFailure { applied, error }),
        }
    }

    async fn apply_plans(
        &self,
        plans: &[RoomPlan],
        applied: &mut AppliedDelta,
        touched: &mut Vec<RoomId>,
    ) -> Result<(), EngineError> {
        for plan in plans {
            if plan.remove.is_empty() && plan.add.is_empty() {
                continue;
            }
            touched.push(plan.room_id);
            for &id in &plan.remove {
                self.call("delete_block", self.store.delete_block(id))
                    .await
                    .map_err(EngineError::DataAccess)?;
                applied.removed.push(id);
            }
            for &day in &plan.add {
                self.call("insert_block", self.store.insert_block(plan.room_id, day))
                    .await
                    .map_err(EngineError::DataAccess)?;
                applied.added.push((plan.room_id, day));
            }
        }
        Ok(())
    }
}
