mod ledger;

pub use ledger::LedgerStore;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::model::*;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store call timed out")]
    Timeout,
    #[error("room not found: {0}")]
    RoomNotFound(RoomId),
    #[error("restriction not found: {0}")]
    RestrictionNotFound(RestrictionId),
    #[error("reservation not found: {0}")]
    ReservationNotFound(ReservationId),
    #[error("restriction {0} is not a block")]
    NotABlock(RestrictionId),
    #[error("room {room_id} already restricted by {restriction_id}")]
    Conflict {
        room_id: RoomId,
        restriction_id: RestrictionId,
    },
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    Wal(String),
}

/// Everything the engine needs from persistent storage.
///
/// Every call is independent; implementations are not expected to offer
/// multi-call transactions. A mutation whose caller stops waiting must
/// either take full effect or none.
#[async_trait]
pub trait RestrictionStore: Send + Sync {
    /// All rooms in listing order.
    async fn list_rooms(&self) -> Result<Vec<Room>, StoreError>;

    async fn get_room(&self, id: RoomId) -> Result<Option<Room>, StoreError>;

    /// Restrictions of any kind for `room_id` intersecting `range`, bounds inclusive.
    async fn find_restrictions(
        &self,
        room_id: RoomId,
        range: DateRange,
    ) -> Result<Vec<Restriction>, StoreError>;

    /// Insert a single-day block. Does not look for an existing block on that day.
    async fn insert_block(&self, room_id: RoomId, day: NaiveDate) -> Result<RestrictionId, StoreError>;

    /// Delete a block. Refuses ids that name a reservation restriction.
    async fn delete_block(&self, id: RestrictionId) -> Result<(), StoreError>;

    async fn insert_reservation(&self, new: NewReservation) -> Result<Reservation, StoreError>;

    async fn get_reservation(&self, id: ReservationId) -> Result<Option<Reservation>, StoreError>;

    /// Matching reservations, newest first.
    async fn list_reservations(
        &self,
        filter: ReservationFilter,
    ) -> Result<Vec<Reservation>, StoreError>;

    /// Overwrite guest details and the processed flag. Room and stay are immutable.
    async fn update_reservation(&self, reservation: &Reservation) -> Result<(), StoreError>;

    /// Delete a reservation together with its reservation restriction, if any.
    async fn delete_reservation(&self, id: ReservationId) -> Result<(), StoreError>;

    /// Occupy the reservation's stay. Fails with `Conflict` if any restriction
    /// already overlaps it.
    async fn insert_reservation_restriction(
        &self,
        reservation: &Reservation,
    ) -> Result<RestrictionId, StoreError>;

    async fn delete_reservation_restriction(
        &self,
        reservation_id: ReservationId,
    ) -> Result<(), StoreError>;
}
