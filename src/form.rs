//! Translation between raw form fields and the engine's typed inputs.
//!
//! The admin calendar renders one checkbox per existing block
//! (`keep_block_{room}_{day}`, checked), one per free day
//! (`add_block_{room}_{day}`, unchecked) and one hidden version field per
//! room (`calendar_version_{room}`). Unchecked boxes are not posted, so an
//! absent keep marker means the admin removed that block.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::NaiveDate;
use serde::Serialize;
use ulid::Ulid;

use crate::limits::MAX_FORM_FIELDS;
use crate::model::*;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

const KEEP_PREFIX: &str = "keep_block_";
const ADD_PREFIX: &str = "add_block_";
const VERSION_PREFIX: &str = "calendar_version_";

pub fn parse_date(raw: &str) -> Result<NaiveDate, InvalidRange> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT)
        .map_err(|_| InvalidRange::MalformedDate(raw.to_string()))
}

pub fn parse_range(start: &str, end: &str) -> Result<DateRange, InvalidRange> {
    DateRange::new(parse_date(start)?, parse_date(end)?)
}

pub fn parse_month(year: &str, month: &str) -> Result<CalendarMonth, InvalidRange> {
    let bad = || InvalidRange::MalformedField(format!("{year}-{month}"));
    let year: i32 = year.trim().parse().map_err(|_| bad())?;
    let month: u32 = month.trim().parse().map_err(|_| bad())?;
    CalendarMonth::new(year, month)
}

pub fn keep_field(room_id: RoomId, day: NaiveDate) -> String {
    format!("{KEEP_PREFIX}{room_id}_{}", day.format(DATE_FORMAT))
}

pub fn add_field(room_id: RoomId, day: NaiveDate) -> String {
    format!("{ADD_PREFIX}{room_id}_{}", day.format(DATE_FORMAT))
}

pub fn version_field(room_id: RoomId) -> String {
    format!("{VERSION_PREFIX}{room_id}")
}

/// `{room}_{YYYY-MM-DD}` → `(room, day)`.
fn parse_room_day(name: &str, rest: &str) -> Result<(RoomId, NaiveDate), InvalidRange> {
    let malformed = || InvalidRange::MalformedField(name.to_string());
    let (room, day) = rest.split_once('_').ok_or_else(malformed)?;
    let room_id = room.parse().map_err(|_| malformed())?;
    let day = NaiveDate::parse_from_str(day, DATE_FORMAT).map_err(|_| malformed())?;
    Ok((room_id, day))
}

/// The admin's edits to one calendar month, decoded from the posted form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalendarSubmission {
    keep: HashSet<(RoomId, NaiveDate)>,
    add: BTreeSet<(RoomId, NaiveDate)>,
    versions: HashMap<RoomId, Ulid>,
}

impl CalendarSubmission {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode posted fields. Unrelated fields (csrf token, month, year) are ignored.
    pub fn from_fields<I, K, V>(fields: I) -> Result<Self, InvalidRange>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut submission = Self::new();
        for (count, (name, value)) in fields.into_iter().enumerate() {
            if count >= MAX_FORM_FIELDS {
                return Err(InvalidRange::MalformedField("too many fields".into()));
            }
            let name = name.as_ref();
            if let Some(rest) = name.strip_prefix(KEEP_PREFIX) {
                let (room_id, day) = parse_room_day(name, rest)?;
                submission.keep.insert((room_id, day));
            } else if let Some(rest) = name.strip_prefix(ADD_PREFIX) {
                let (room_id, day) = parse_room_day(name, rest)?;
                submission.add.insert((room_id, day));
            } else if let Some(room) = name.strip_prefix(VERSION_PREFIX) {
                let room_id = room
                    .parse()
                    .map_err(|_| InvalidRange::MalformedField(name.to_string()))?;
                let version = Ulid::from_string(value.as_ref().trim())
                    .map_err(|_| InvalidRange::MalformedField(name.to_string()))?;
                submission.versions.insert(room_id, version);
            }
        }
        Ok(submission)
    }

    pub fn keep_block(mut self, room_id: RoomId, day: NaiveDate) -> Self {
        self.keep.insert((room_id, day));
        self
    }

    pub fn add_block(mut self, room_id: RoomId, day: NaiveDate) -> Self {
        self.add.insert((room_id, day));
        self
    }

    pub fn with_version(mut self, room_id: RoomId, version: Ulid) -> Self {
        self.versions.insert(room_id, version);
        self
    }

    pub fn keeps(&self, room_id: RoomId, day: NaiveDate) -> bool {
        self.keep.contains(&(room_id, day))
    }

    /// All add markers ordered by room, then day.
    pub fn additions(&self) -> impl Iterator<Item = (RoomId, NaiveDate)> + '_ {
        self.add.iter().copied()
    }

    /// Days to block for one room, ascending.
    pub fn additions_for(&self, room_id: RoomId) -> impl Iterator<Item = NaiveDate> + '_ {
        self.add
            .range((room_id, NaiveDate::MIN)..=(room_id, NaiveDate::MAX))
            .map(|(_, day)| *day)
    }

    pub fn version(&self, room_id: RoomId) -> Option<Ulid> {
        self.versions.get(&room_id).copied()
    }
}

/// JSON body answering a single-room availability check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailabilityReply {
    pub ok: bool,
    pub message: String,
    pub room_id: String,
    pub start_date: String,
    pub end_date: String,
}

impl AvailabilityReply {
    pub fn new(room_id: RoomId, range: DateRange, available: bool) -> Self {
        Self {
            ok: available,
            message: String::new(),
            room_id: room_id.to_string(),
            start_date: range.start.format(DATE_FORMAT).to_string(),
            end_date: range.end.format(DATE_FORMAT).to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[test]
    fn parse_range_checks_order() {
        let range = parse_range("2024-06-10", " 2024-06-12").unwrap();
        assert_eq!(range.len_days(), 3);
        assert!(matches!(
            parse_range("2024-06-12", "2024-06-10"),
            Err(InvalidRange::Reversed { .. })
        ));
        assert!(matches!(
            parse_range("06/10/2024", "2024-06-12"),
            Err(InvalidRange::MalformedDate(_))
        ));
    }

    #[test]
    fn parse_month_validates() {
        assert_eq!(parse_month("2024", "6").unwrap(), CalendarMonth::new(2024, 6).unwrap());
        assert!(matches!(parse_month("2024", "13"), Err(InvalidRange::BadMonth { .. })));
        assert!(matches!(parse_month("twenty", "1"), Err(InvalidRange::MalformedField(_))));
    }

    #[test]
    fn fields_round_trip_through_names() {
        let version = Ulid::new();
        let fields = vec![
            ("csrf_token".to_string(), "abc".to_string()),
            (keep_field(1, d("2024-06-03")), "5".to_string()),
            (add_field(1, d("2024-06-09")), "1".to_string()),
            (add_field(2, d("2024-06-01")), "1".to_string()),
            (version_field(1), version.to_string()),
            ("m".to_string(), "6".to_string()),
        ];
        let submission = CalendarSubmission::from_fields(fields).unwrap();
        assert!(submission.keeps(1, d("2024-06-03")));
        assert!(!submission.keeps(2, d("2024-06-03")));
        assert_eq!(submission.additions_for(1).collect::<Vec<_>>(), vec![d("2024-06-09")]);
        assert_eq!(submission.additions().count(), 2);
        assert_eq!(submission.version(1), Some(version));
        assert_eq!(submission.version(2), None);
    }

    #[test]
    fn additions_for_room_sorted() {
        let submission = CalendarSubmission::new()
            .add_block(3, d("2024-06-20"))
            .add_block(3, d("2024-06-02"))
            .add_block(30, d("2024-06-01"));
        assert_eq!(
            submission.additions_for(3).collect::<Vec<_>>(),
            vec![d("2024-06-02"), d("2024-06-20")]
        );
    }

    #[test]
    fn malformed_fields_rejected() {
        for name in [
            "keep_block_x_2024-06-01",
            "add_block_1_2024-13-01",
            "add_block_1",
            "calendar_version_one",
        ] {
            let result = CalendarSubmission::from_fields([(name, "1")]);
            assert!(
                matches!(result, Err(InvalidRange::MalformedField(ref f)) if f == name),
                "{name}"
            );
        }
        let result = CalendarSubmission::from_fields([("calendar_version_1", "not-a-ulid")]);
        assert!(result.is_err());
    }

    #[test]
    fn availability_reply_json() {
        let range = parse_range("2024-06-10", "2024-06-12").unwrap();
        let json = serde_json::to_value(AvailabilityReply::new(1, range, false)).unwrap();
        assert_eq!(json["ok"], false);
        assert_eq!(json["room_id"], "1");
        assert_eq!(json["start_date"], "2024-06-10");
        assert_eq!(json["end_date"], "2024-06-12");
    }
}
