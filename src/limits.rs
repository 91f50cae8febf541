/// Widest availability query accepted, in days.
pub const MAX_QUERY_WINDOW_DAYS: u64 = 366 * 2;

/// Longest stay a single reservation may cover, in days.
pub const MAX_STAY_DAYS: u64 = 366;

pub const MAX_ROOMS: usize = 10_000;
pub const MAX_ROOM_NAME_LEN: usize = 256;
pub const MAX_GUEST_FIELD_LEN: usize = 256;

/// Cap on fields accepted from one calendar form post.
pub const MAX_FORM_FIELDS: usize = 50_000;

pub const MAX_SESSIONS: usize = 100_000;
pub const MAX_SESSION_ID_LEN: usize = 128;
