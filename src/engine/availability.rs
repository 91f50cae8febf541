use std::time::Instant;

use tracing::debug;

use crate::limits::MAX_QUERY_WINDOW_DAYS;
use crate::model::*;
use crate::observability;

use super::{Engine, EngineError};

/// True iff no restriction of any kind intersects `range`.
pub fn is_free(restrictions: &[Restriction], range: &DateRange) -> bool {
    !restrictions.iter().any(|r| r.range.overlaps(range))
}

fn check_window(range: &DateRange) -> Result<(), EngineError> {
    if range.len_days() > MAX_QUERY_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

impl Engine {
    /// Whether `room_id` is free for every day of `range`, bounds inclusive.
    /// A stay ending the day another begins is occupied.
    pub async fn search_availability_by_room(
        &self,
        room_id: RoomId,
        range: DateRange,
    ) -> Result<bool, EngineError> {
        check_window(&range)?;
        let started = Instant::now();
        let result = self.room_is_free(room_id, range).await;
        metrics::counter!(observability::AVAILABILITY_SEARCHES_TOTAL,
            "scope" => "room", "status" => observability::status_label(&result))
        .increment(1);
        metrics::histogram!(observability::AVAILABILITY_SEARCH_DURATION_SECONDS, "scope" => "room")
            .record(started.elapsed().as_secs_f64());
        result
    }

    pub(super) async fn room_is_free(
        &self,
        room_id: RoomId,
        range: DateRange,
    ) -> Result<bool, EngineError> {
        let restrictions = self
            .call("find_restrictions", self.store.find_restrictions(room_id, range))
            .await?;
        Ok(is_free(&restrictions, &range))
    }

    /// Every room free for `range`, in listing order. An empty list means
    /// nothing is free; failures are always errors.
    pub async fn search_availability_all_rooms(
        &self,
        range: DateRange,
    ) -> Result<Vec<Room>, EngineError> {
        check_window(&range)?;
        let started = Instant::now();
        let result = self.free_rooms(range).await;
        metrics::counter!(observability::AVAILABILITY_SEARCHES_TOTAL,
            "scope" => "all_rooms", "status" => observability::status_label(&result))
        .increment(1);
        metrics::histogram!(observability::AVAILABILITY_SEARCH_DURATION_SECONDS, "scope" => "all_rooms")
            .record(started.elapsed().as_secs_f64());
        if let Ok(rooms) = &result {
            debug!("{} rooms free for {range}", rooms.len());
        }
        result
    }

    async fn free_rooms(&self, range: DateRange) -> Result<Vec<Room>, EngineError> {
        let rooms = self.call("list_rooms", self.store.list_rooms()).await?;
        let mut free = Vec::new();
        for room in rooms {
            if self.room_is_free(room.id, range).await? {
                free.push(room);
            }
        }
        Ok(free)
    }
}
