use crate::model::{CalendarMonth, InvalidRange, ReservationId, RoomId};
use crate::store::StoreError;

use super::reconcile::AppliedDelta;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// A store call failed or timed out.
    #[error("data access failed: {0}")]
    DataAccess(#[source] StoreError),
    /// The calendar was edited against state this session no longer holds.
    /// Only a fresh calendar view clears it.
    #[error("stale calendar state for room {room_id}: {reason}")]
    StaleCalendarState { room_id: RoomId, reason: StaleReason },
    #[error(transparent)]
    InvalidRange(#[from] InvalidRange),
    #[error("room not found: {0}")]
    RoomNotFound(RoomId),
    #[error("reservation not found: {0}")]
    ReservationNotFound(ReservationId),
    #[error("room {room_id} is not available for the requested dates")]
    Unavailable { room_id: RoomId },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::RoomNotFound(id) => EngineError::RoomNotFound(id),
            StoreError::ReservationNotFound(id) => EngineError::ReservationNotFound(id),
            other => EngineError::DataAccess(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaleReason {
    MissingSnapshot,
    /// The cached snapshot was taken for `shown`, not the submitted month.
    OtherMonth { shown: CalendarMonth },
    MissingVersion,
    VersionMismatch,
}

impl std::fmt::Display for StaleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StaleReason::MissingSnapshot => write!(f, "no calendar snapshot in session"),
            StaleReason::OtherMonth { shown } => write!(f, "last calendar shown was {shown}"),
            StaleReason::MissingVersion => write!(f, "no calendar version submitted"),
            StaleReason::VersionMismatch => write!(f, "calendar version does not match"),
        }
    }
}

/// A reconciliation that stopped early. Mutations in `applied` were
/// committed and are not rolled back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("calendar reconciliation failed after {} removals and {} additions: {error}", .applied.removed.len(), .applied.added.len())]
pub struct ReconcileFailure {
    pub applied: AppliedDelta,
    #[source]
    pub error: EngineError,
}

impl From<EngineError> for ReconcileFailure {
    fn from(error: EngineError) -> Self {
        Self {
            applied: AppliedDelta::default(),
            error,
        }
    }
}
