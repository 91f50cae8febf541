use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub type RoomId = u32;
pub type RestrictionId = u64;
pub type ReservationId = u64;

/// Occupant id stored in a day map. `FREE` means nobody occupies the day.
pub type OccupantId = u64;
pub const FREE: OccupantId = 0;

/// Inputs that cannot describe a calendar range.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidRange {
    #[error("start date {start} is after end date {end}")]
    Reversed { start: NaiveDate, end: NaiveDate },
    #[error("malformed date: {0:?}")]
    MalformedDate(String),
    #[error("no such month: {year}-{month:02}")]
    BadMonth { year: i32, month: u32 },
    #[error("malformed form field: {0:?}")]
    MalformedField(String),
    #[error("day {day} is outside {month}")]
    OutsideMonth { day: NaiveDate, month: CalendarMonth },
    #[error("room {0} is not part of the calendar")]
    UnknownRoom(RoomId),
}

/// Closed interval of calendar days `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, InvalidRange> {
        if start > end {
            return Err(InvalidRange::Reversed { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn single(day: NaiveDate) -> Self {
        Self { start: day, end: day }
    }

    /// Number of days covered, counting both ends.
    pub fn len_days(&self) -> u64 {
        (self.end - self.start).num_days() as u64 + 1
    }

    /// Closed-interval overlap. Ranges that share a single day overlap.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && self.end >= other.start
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }

    pub fn intersection(&self, other: &DateRange) -> Option<DateRange> {
        if !self.overlaps(other) {
            return None;
        }
        Some(DateRange {
            start: self.start.max(other.start),
            end: self.end.min(other.end),
        })
    }

    pub fn days(self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// A validated `(year, month)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CalendarMonth {
    year: i32,
    month: u32,
}

impl CalendarMonth {
    pub fn new(year: i32, month: u32) -> Result<Self, InvalidRange> {
        if NaiveDate::from_ymd_opt(year, month, 1).is_none() {
            return Err(InvalidRange::BadMonth { year, month });
        }
        Ok(Self { year, month })
    }

    pub fn of(day: NaiveDate) -> Self {
        Self {
            year: day.year(),
            month: day.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn first_day(&self) -> NaiveDate {
        // Validated in `new`/`of`.
        NaiveDate::from_ymd_opt(self.year, self.month, 1).unwrap_or(NaiveDate::MIN)
    }

    pub fn last_day(&self) -> NaiveDate {
        self.next()
            .first_day()
            .checked_sub_days(Days::new(1))
            .unwrap_or(NaiveDate::MAX)
    }

    pub fn num_days(&self) -> u32 {
        self.last_day().day()
    }

    pub fn range(&self) -> DateRange {
        DateRange {
            start: self.first_day(),
            end: self.last_day(),
        }
    }

    pub fn days(self) -> impl Iterator<Item = NaiveDate> {
        self.range().days()
    }

    pub fn next(&self) -> Self {
        if self.month == 12 {
            Self { year: self.year + 1, month: 1 }
        } else {
            Self { year: self.year, month: self.month + 1 }
        }
    }

    pub fn previous(&self) -> Self {
        if self.month == 1 {
            Self { year: self.year - 1, month: 12 }
        } else {
            Self { year: self.year, month: self.month - 1 }
        }
    }
}

impl std::fmt::Display for CalendarMonth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
}

/// Contact fields a guest fills in and an admin may later edit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestDetails {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
}

/// A booking request before the store has assigned it an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReservation {
    pub guest: GuestDetails,
    pub room_id: RoomId,
    pub stay: DateRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub guest: GuestDetails,
    pub room_id: RoomId,
    pub stay: DateRange,
    /// Set once an admin has reviewed the reservation.
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

/// Why a room is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestrictionKind {
    /// Occupied by a guest reservation.
    Reservation { reservation_id: ReservationId },
    /// Administrative block. Single-day by construction.
    Block,
}

/// The sole occupancy record: a room is unavailable over `range`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restriction {
    pub id: RestrictionId,
    pub room_id: RoomId,
    pub range: DateRange,
    pub kind: RestrictionKind,
}

impl Restriction {
    pub fn is_block(&self) -> bool {
        matches!(self.kind, RestrictionKind::Block)
    }

    pub fn reservation_id(&self) -> Option<ReservationId> {
        match self.kind {
            RestrictionKind::Reservation { reservation_id } => Some(reservation_id),
            RestrictionKind::Block => None,
        }
    }
}

/// Which reservations an admin listing shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationFilter {
    All,
    /// Not yet processed by an admin.
    Unprocessed,
}

impl ReservationFilter {
    pub fn matches(&self, reservation: &Reservation) -> bool {
        match self {
            ReservationFilter::All => true,
            ReservationFilter::Unprocessed => !reservation.processed,
        }
    }
}

/// Ledger record format. Flat, one variant per mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated { id: RoomId, name: String },
    ReservationCreated { reservation: Reservation },
    ReservationUpdated { reservation: Reservation },
    ReservationDeleted { id: ReservationId },
    RestrictionAdded { restriction: Restriction },
    RestrictionRemoved { id: RestrictionId, room_id: RoomId },
    /// Id high-water marks, written first by compaction so ids of deleted
    /// rows are never handed out again.
    Sequences {
        next_room_id: RoomId,
        next_restriction_id: RestrictionId,
        next_reservation_id: ReservationId,
    },
}

/// Per-room restrictions sorted by `range.start`.
#[derive(Debug, Clone, Default)]
pub struct RoomLedger {
    pub restrictions: Vec<Restriction>,
}

impl RoomLedger {
    /// Insert maintaining sort order by start day.
    pub fn insert(&mut self, restriction: Restriction) {
        let pos = self
            .restrictions
            .partition_point(|r| r.range.start <= restriction.range.start);
        self.restrictions.insert(pos, restriction);
    }

    pub fn remove(&mut self, id: RestrictionId) -> Option<Restriction> {
        let pos = self.restrictions.iter().position(|r| r.id == id)?;
        Some(self.restrictions.remove(pos))
    }

    pub fn get(&self, id: RestrictionId) -> Option<&Restriction> {
        self.restrictions.iter().find(|r| r.id == id)
    }

    /// Restrictions whose range intersects `query`.
    /// Everything at or past `right_bound` starts after `query.end`.
    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &Restriction> {
        let right_bound = self
            .restrictions
            .partition_point(|r| r.range.start <= query.end);
        self.restrictions[..right_bound]
            .iter()
            .filter(move |r| r.range.end >= query.start)
    }
}
