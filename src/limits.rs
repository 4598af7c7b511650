/// Largest group a single booking may bring.
pub const MAX_PARTY_SIZE: u8 = 10;
pub const MIN_PARTY_SIZE: u8 = 1;

pub const MAX_FIRST_NAME_LEN: usize = 40;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_DESCRIPTION_LEN: usize = 500;
pub const MAX_COMMENT_LEN: usize = 500;

/// Bookings may start at most this many months after today.
pub const FUTURE_HORIZON_MONTHS: u32 = 18;

/// Stays longer than this need an explicit confirmation from the requester.
pub const LONG_STAY_DAYS: i64 = 7;

/// Hard cap on bookings held in memory.
pub const MAX_BOOKINGS: usize = 100_000;

/// Description fragments treated as links.
pub const LINK_MARKERS: [&str; 4] = ["http://", "https://", "www.", "mailto:"];
