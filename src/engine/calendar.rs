use tracing::debug;
use ulid::Ulid;

use crate::calendar::{MonthView, build_day_maps};
use crate::model::*;
use crate::observability;
use crate::session::{SnapshotCache, block_map_key};

use super::{Engine, EngineError};

impl Engine {
    /// Build one room's month and remember its block map in `cache` as the
    /// state the admin is about to edit.
    pub async fn build_month_view(
        &self,
        room_id: RoomId,
        month: CalendarMonth,
        cache: &dyn SnapshotCache,
    ) -> Result<MonthView, EngineError> {
        let restrictions = self
            .call("find_restrictions", self.store.find_restrictions(room_id, month.range()))
            .await?;
        let (reservations, blocks) = build_day_maps(month, &restrictions);
        let view = MonthView {
            room_id,
            month,
            version: Ulid::new(),
            reservations,
            blocks,
        };
        cache.put(&block_map_key(room_id), view.snapshot());
        metrics::counter!(observability::CALENDAR_VIEWS_TOTAL).increment(1);
        debug!("calendar {month} room {room_id}: version {}", view.version);
        Ok(view)
    }

    /// Views for every room in listing order: the admin calendar page.
    pub async fn build_calendar(
        &self,
        month: CalendarMonth,
        cache: &dyn SnapshotCache,
    ) -> Result<Vec<(Room, MonthView)>, EngineError> {
        let rooms = self.call("list_rooms", self.store.list_rooms()).await?;
        let mut views = Vec::with_capacity(rooms.len());
        for room in rooms {
            let view = self.build_month_view(room.id, month, cache).await?;
            views.push((room, view));
        }
        Ok(views)
    }
}
