use tracing::{info, warn};

use crate::limits::MAX_STAY_DAYS;
use crate::model::*;
use crate::observability;
use crate::store::StoreError;

use super::{Engine, EngineError};

impl Engine {
    pub async fn room(&self, room_id: RoomId) -> Result<Room, EngineError> {
        self.call("get_room", self.store.get_room(room_id))
            .await?
            .ok_or(EngineError::RoomNotFound(room_id))
    }

    /// Complete a guest booking: the reservation row, then the restriction
    /// occupying its stay.
    pub async fn book_room(&self, new: NewReservation) -> Result<Reservation, EngineError> {
        let result = self.try_book(new).await;
        let status = match &result {
            Ok(_) => "confirmed",
            Err(EngineError::Unavailable { .. }) => "unavailable",
            Err(_) => "failed",
        };
        metrics::counter!(observability::BOOKINGS_TOTAL, "status" => status).increment(1);
        result
    }

    async fn try_book(&self, new: NewReservation) -> Result<Reservation, EngineError> {
        if new.stay.len_days() > MAX_STAY_DAYS {
            return Err(EngineError::LimitExceeded("stay too long"));
        }
        let room_id = new.room_id;
        self.room(room_id).await?;
        if !self.room_is_free(room_id, new.stay).await? {
            return Err(EngineError::Unavailable { room_id });
        }

        let reservation = self
            .call("insert_reservation", self.store.insert_reservation(new))
            .await?;
        match self
            .call(
                "insert_reservation_restriction",
                self.store.insert_reservation_restriction(&reservation),
            )
            .await
        {
            Ok(_) => {
                info!(
                    "reservation {} booked room {room_id} for {}",
                    reservation.id, reservation.stay
                );
                Ok(reservation)
            }
            Err(e) => {
                // Lost the race for these dates, or the write failed: the
                // reservation row must not outlive its restriction.
                if let Err(undo) = self
                    .call("delete_reservation", self.store.delete_reservation(reservation.id))
                    .await
                {
                    warn!("reservation {} left without restriction: {undo}", reservation.id);
                }
                match e {
                    StoreError::Conflict { .. } => Err(EngineError::Unavailable { room_id }),
                    other => Err(EngineError::DataAccess(other)),
                }
            }
        }
    }

    /// Free the stay, then delete the reservation.
    pub async fn cancel_reservation(&self, id: ReservationId) -> Result<(), EngineError> {
        self.reservation(id).await?;
        match self
            .call(
                "delete_reservation_restriction",
                self.store.delete_reservation_restriction(id),
            )
            .await
        {
            // Already freed by an earlier, interrupted cancellation.
            Ok(()) | Err(StoreError::ReservationNotFound(_)) => {}
            Err(e) => return Err(EngineError::DataAccess(e)),
        }
        self.call("delete_reservation", self.store.delete_reservation(id))
            .await?;
        info!("reservation {id} cancelled");
        Ok(())
    }

    pub async fn reservation(&self, id: ReservationId) -> Result<Reservation, EngineError> {
        self.call("get_reservation", self.store.get_reservation(id))
            .await?
            .ok_or(EngineError::ReservationNotFound(id))
    }

    /// Newest first.
    pub async fn reservations(
        &self,
        filter: ReservationFilter,
    ) -> Result<Vec<Reservation>, EngineError> {
        Ok(self
            .call("list_reservations", self.store.list_reservations(filter))
            .await?)
    }

    pub async fn update_guest(
        &self,
        id: ReservationId,
        guest: GuestDetails,
    ) -> Result<Reservation, EngineError> {
        let mut reservation = self.reservation(id).await?;
        reservation.guest = guest;
        self.call("update_reservation", self.store.update_reservation(&reservation))
            .await?;
        Ok(reservation)
    }

    pub async fn mark_processed(
        &self,
        id: ReservationId,
        processed: bool,
    ) -> Result<Reservation, EngineError> {
        let mut reservation = self.reservation(id).await?;
        if reservation.processed == processed {
            return Ok(reservation);
        }
        reservation.processed = processed;
        self.call("update_reservation", self.store.update_reservation(&reservation))
            .await?;
        Ok(reservation)
    }
}
