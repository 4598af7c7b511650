use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Wall-clock instant used for created/decided/activity stamps.
pub type Timestamp = DateTime<Utc>;

/// Inclusive calendar-day range `[start, end]`.
///
/// A booking from day N to day M occupies both N and M, so two ranges that
/// share a single boundary day overlap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        debug_assert!(start <= end, "DateRange start must not be after end");
        Self { start, end }
    }

    /// Returns `None` when `end` is before `start`.
    pub fn try_new(start: NaiveDate, end: NaiveDate) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    /// The whole calendar month `year-month`.
    pub fn month(year: i32, month: u32) -> Option<Self> {
        let start = NaiveDate::from_ymd_opt(year, month, 1)?;
        let (next_year, next_month) = if month == 12 {
            (year + 1, 1)
        } else {
            (year, month + 1)
        };
        let end = NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()?;
        Some(Self { start, end })
    }

    /// Number of occupied days: `(end - start) + 1`.
    pub fn total_days(&self) -> i64 {
        self.end.signed_duration_since(self.start).num_days() + 1
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// True if `self` covers any day outside `original`.
    pub fn extends(&self, original: &DateRange) -> bool {
        self.start < original.start || self.end > original.end
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..={}", self.start, self.end)
    }
}

/// The three fixed approvers. Every requester is affiliated with one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Party {
    Ingeborg,
    Cornelia,
    Angelika,
}

impl Party {
    pub const ALL: [Party; 3] = [Party::Ingeborg, Party::Cornelia, Party::Angelika];

    pub fn index(self) -> usize {
        match self {
            Party::Ingeborg => 0,
            Party::Cornelia => 1,
            Party::Angelika => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Party::Ingeborg => "Ingeborg",
            Party::Cornelia => "Cornelia",
            Party::Angelika => "Angelika",
        }
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Party {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ingeborg" => Ok(Party::Ingeborg),
            "cornelia" => Ok(Party::Cornelia),
            "angelika" => Ok(Party::Angelika),
            other => Err(format!("unknown party: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    NoResponse,
    Approved,
    Denied,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Decision::NoResponse => "NoResponse",
            Decision::Approved => "Approved",
            Decision::Denied => "Denied",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Pending,
    Confirmed,
    Denied,
    Canceled,
}

impl Status {
    /// Active bookings block their dates for everybody else.
    pub fn is_active(self) -> bool {
        matches!(self, Status::Pending | Status::Confirmed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Pending => "Pending",
            Status::Confirmed => "Confirmed",
            Status::Denied => "Denied",
            Status::Canceled => "Canceled",
        })
    }
}

/// One party's decision on one booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub party: Party,
    pub decision: Decision,
    pub comment: Option<String>,
    pub decided_at: Option<Timestamp>,
}

impl Approval {
    pub fn undecided(party: Party) -> Self {
        Self {
            party,
            decision: Decision::NoResponse,
            comment: None,
            decided_at: None,
        }
    }

    pub fn is_decided(&self) -> bool {
        self.decision != Decision::NoResponse
    }
}

/// Exactly one approval slot per party, indexed by `Party::index`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalSet {
    slots: [Approval; 3],
}

impl Default for ApprovalSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ApprovalSet {
    pub fn new() -> Self {
        Self {
            slots: Party::ALL.map(Approval::undecided),
        }
    }

    pub fn get(&self, party: Party) -> &Approval {
        &self.slots[party.index()]
    }

    pub(crate) fn get_mut(&mut self, party: Party) -> &mut Approval {
        &mut self.slots[party.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Approval> {
        self.slots.iter()
    }

    pub(crate) fn reset(&mut self) {
        self.slots = Party::ALL.map(Approval::undecided);
    }

    /// Withdraw one party's decision.
    pub(crate) fn clear(&mut self, party: Party) {
        self.slots[party.index()] = Approval::undecided(party);
    }
}

/// Who caused a timeline entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Actor {
    System,
    Requester(String),
    Party(Party),
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::System => f.write_str("System"),
            Actor::Requester(name) => f.write_str(name),
            Actor::Party(p) => write!(f, "{p}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimelineKind {
    Created,
    SelfApproved,
    Approved,
    Denied,
    Confirmed,
    Canceled,
    Reopened,
    Edited,
    AutoCleaned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub at: Timestamp,
    pub actor: Actor,
    pub kind: TimelineKind,
    pub note: Option<String>,
}

/// Append-only audit log of one booking, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timeline {
    events: Vec<TimelineEvent>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. A stamp older than the newest entry is raised to it so
    /// the log stays chronological.
    pub(crate) fn append(&mut self, at: Timestamp, actor: Actor, kind: TimelineKind, note: Option<String>) {
        let at = match self.events.last() {
            Some(last) if last.at > at => last.at,
            _ => at,
        };
        self.events.push(TimelineEvent { at, actor, kind, note });
    }

    pub fn events(&self) -> &[TimelineEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn kinds(&self) -> Vec<TimelineKind> {
        self.events.iter().map(|e| e.kind).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub range: DateRange,
    pub party_size: u8,
    pub first_name: String,
    /// Private: never part of public projections.
    pub email: String,
    pub affiliation: Party,
    pub description: Option<String>,
    pub status: Status,
    pub created_at: Timestamp,
    pub last_activity_at: Timestamp,
}

impl Booking {
    pub fn total_days(&self) -> i64 {
        self.range.total_days()
    }

    pub fn is_past(&self, today: NaiveDate) -> bool {
        self.range.end < today
    }

    pub fn is_requested_by(&self, email: &str) -> bool {
        self.email.eq_ignore_ascii_case(email.trim())
    }
}

/// A booking together with everything it owns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRecord {
    pub booking: Booking,
    pub approvals: ApprovalSet,
    pub timeline: Timeline,
}

impl BookingRecord {
    pub fn new(booking: Booking) -> Self {
        Self {
            booking,
            approvals: ApprovalSet::new(),
            timeline: Timeline::new(),
        }
    }

    pub fn view(&self) -> BookingView {
        BookingView {
            booking: self.booking.clone(),
            approvals: self.approvals.clone(),
        }
    }
}

/// Snapshot handed back by every engine operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingView {
    pub booking: Booking,
    pub approvals: ApprovalSet,
}

impl BookingView {
    pub fn id(&self) -> Ulid {
        self.booking.id
    }

    pub fn status(&self) -> Status {
        self.booking.status
    }

    pub fn total_days(&self) -> i64 {
        self.booking.total_days()
    }

    pub fn decision(&self, party: Party) -> Decision {
        self.approvals.get(party).decision
    }
}

/// What anonymous calendar readers may see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicBooking {
    pub id: Ulid,
    pub first_name: String,
    pub range: DateRange,
    pub total_days: i64,
    pub party_size: u8,
    pub affiliation: Party,
    pub status: Status,
    pub is_past: bool,
}

impl PublicBooking {
    pub fn from_booking(b: &Booking, today: NaiveDate) -> Self {
        Self {
            id: b.id,
            first_name: b.first_name.clone(),
            range: b.range,
            total_days: b.total_days(),
            party_size: b.party_size,
            affiliation: b.affiliation,
            status: b.status,
            is_past: b.is_past(today),
        }
    }
}

/// Input of `Engine::create_booking`. Dates are raw so validation can report
/// an inverted range instead of panicking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub first_name: String,
    pub email: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub party_size: u8,
    pub affiliation: Party,
    pub description: Option<String>,
    /// Requester acknowledged a stay longer than `LONG_STAY_DAYS`.
    pub long_stay_confirmed: bool,
}

/// Partial update of a booking by its requester. `None` keeps the field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingEdit {
    pub first_name: Option<String>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub party_size: Option<u8>,
    pub affiliation: Option<Party>,
    pub description: Option<String>,
    pub long_stay_confirmed: bool,
}

impl BookingEdit {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.start.is_none()
            && self.end.is_none()
            && self.party_size.is_none()
            && self.affiliation.is_none()
            && self.description.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Requester,
    Approver,
}

/// Already-verified claims of a signed link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub email: String,
    pub role: Role,
    pub party: Option<Party>,
    /// Links may be scoped to a single booking.
    pub booking_id: Option<Ulid>,
}

impl Credential {
    pub fn requester(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            role: Role::Requester,
            party: None,
            booking_id: None,
        }
    }

    pub fn approver(email: impl Into<String>, party: Party) -> Self {
        Self {
            email: email.into(),
            role: Role::Approver,
            party: Some(party),
            booking_id: None,
        }
    }

    pub fn scoped_to(mut self, booking_id: Ulid) -> Self {
        self.booking_id = Some(booking_id);
        self
    }
}

/// The event types. This is the WAL record format: every committed
/// transaction is exactly one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BookingCreated {
        booking: Booking,
        /// Parties whose approval is granted at creation.
        auto_approved: Vec<Party>,
    },
    DecisionRecorded {
        id: Ulid,
        party: Party,
        decision: Decision,
        comment: Option<String>,
        at: Timestamp,
    },
    BookingEdited {
        id: Ulid,
        range: DateRange,
        party_size: u8,
        first_name: String,
        affiliation: Party,
        description: Option<String>,
        reset_approvals: bool,
        /// Decisions withdrawn because the new affiliation may not make them.
        withdrawn: Vec<Party>,
        /// Parties re-granted after a reset, as at creation.
        auto_approved: Vec<Party>,
        at: Timestamp,
    },
    BookingCanceled {
        id: Ulid,
        note: Option<String>,
        at: Timestamp,
    },
    BookingReopened {
        id: Ulid,
        auto_approved: Vec<Party>,
        at: Timestamp,
    },
    BookingAutoCleaned {
        id: Ulid,
        at: Timestamp,
    },
    BookingPurged {
        id: Ulid,
    },
    /// Full record, written by compaction.
    Snapshot {
        record: BookingRecord,
    },
}

impl Event {
    pub fn booking_id(&self) -> Ulid {
        match self {
            Event::BookingCreated { booking, .. } => booking.id,
            Event::Snapshot { record } => record.booking.id,
            Event::DecisionRecorded { id, .. }
            | Event::BookingEdited { id, .. }
            | Event::BookingCanceled { id, .. }
            | Event::BookingReopened { id, .. }
            | Event::BookingAutoCleaned { id, .. }
            | Event::BookingPurged { id } => *id,
        }
    }
}
