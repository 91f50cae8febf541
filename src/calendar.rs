use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::*;

/// Total mapping from every day of one month to an occupant id.
///
/// Backed by one slot per day, so a day of the month always has an entry
/// and days of other months never do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayMap {
    month: CalendarMonth,
    occupants: Vec<OccupantId>,
}

impl DayMap {
    /// Every day free.
    pub fn empty(month: CalendarMonth) -> Self {
        Self {
            month,
            occupants: vec![FREE; month.num_days() as usize],
        }
    }

    /// Build from explicit entries; days not listed stay free.
    pub fn from_entries(
        month: CalendarMonth,
        entries: impl IntoIterator<Item = (NaiveDate, OccupantId)>,
    ) -> Result<Self, InvalidRange> {
        let mut map = Self::empty(month);
        for (day, occupant) in entries {
            if !map.set(day, occupant) {
                return Err(InvalidRange::OutsideMonth { day, month });
            }
        }
        Ok(map)
    }

    pub fn month(&self) -> CalendarMonth {
        self.month
    }

    fn slot(&self, day: NaiveDate) -> Option<usize> {
        (CalendarMonth::of(day) == self.month).then(|| day.day0() as usize)
    }

    /// `None` only for days outside the month.
    pub fn get(&self, day: NaiveDate) -> Option<OccupantId> {
        self.slot(day).map(|i| self.occupants[i])
    }

    /// Returns false, leaving the map unchanged, if `day` is outside the month.
    pub fn set(&mut self, day: NaiveDate, occupant: OccupantId) -> bool {
        match self.slot(day) {
            Some(i) => {
                self.occupants[i] = occupant;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.occupants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.occupants.is_empty()
    }

    /// Every day of the month in order.
    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, OccupantId)> + '_ {
        self.month.days().zip(self.occupants.iter().copied())
    }

    /// Days with a non-free occupant, in order.
    pub fn occupied(&self) -> impl Iterator<Item = (NaiveDate, OccupantId)> + '_ {
        self.iter().filter(|(_, occupant)| *occupant != FREE)
    }
}

/// The block map last shown for a room, with the version issued alongside it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarSnapshot {
    pub room_id: RoomId,
    pub month: CalendarMonth,
    pub version: Ulid,
    pub blocks: DayMap,
}

/// One room's month as rendered on the admin calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthView {
    pub room_id: RoomId,
    pub month: CalendarMonth,
    /// Must be posted back with edits to this room.
    pub version: Ulid,
    pub reservations: DayMap,
    pub blocks: DayMap,
}

impl MonthView {
    pub fn snapshot(&self) -> CalendarSnapshot {
        CalendarSnapshot {
            room_id: self.room_id,
            month: self.month,
            version: self.version,
            blocks: self.blocks.clone(),
        }
    }
}

/// Expand restrictions into `(reservations, blocks)` day maps for `month`.
///
/// A reservation marks every day it shares with the month. A block marks
/// only its start day; a block spanning several days is shown on its start
/// day alone.
pub fn build_day_maps(month: CalendarMonth, restrictions: &[Restriction]) -> (DayMap, DayMap) {
    let mut reservations = DayMap::empty(month);
    let mut blocks = DayMap::empty(month);
    let bounds = month.range();

    for restriction in restrictions {
        match restriction.kind {
            RestrictionKind::Reservation { reservation_id } => {
                if let Some(shared) = restriction.range.intersection(&bounds) {
                    for day in shared.days() {
                        reservations.set(day, reservation_id);
                    }
                }
            }
            RestrictionKind::Block => {
                blocks.set(restriction.range.start, restriction.id);
            }
        }
    }

    (reservations, blocks)
}
