use ulid::Ulid;

use crate::model::*;

use super::error::ConflictInfo;
use super::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CalendarEntry {
    pub id: Ulid,
    pub range: DateRange,
}

/// Every booking that could block dates, sorted by `range.start`.
///
/// Entries are not removed when a booking is denied: a denied booking can be
/// reopened. Status is read from the booking row at check time.
#[derive(Debug, Default)]
pub(crate) struct CalendarIndex {
    entries: Vec<CalendarEntry>,
}

impl CalendarIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert entry maintaining sort order by range.start.
    pub fn insert(&mut self, id: Ulid, range: DateRange) {
        let pos = self
            .entries
            .binary_search_by_key(&range.start, |e| e.range.start)
            .unwrap_or_else(|e| e);
        self.entries.insert(pos, CalendarEntry { id, range });
    }

    pub fn remove(&mut self, id: Ulid) -> Option<CalendarEntry> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(pos))
    }

    pub fn update(&mut self, id: Ulid, range: DateRange) {
        self.remove(id);
        self.insert(id, range);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries whose range shares at least one day with `query`.
    /// Everything at index >= right_bound starts after `query.end`.
    pub fn overlapping(&self, query: &DateRange) -> impl Iterator<Item = &CalendarEntry> {
        let right_bound = self.entries.partition_point(|e| e.range.start <= query.end);
        self.entries[..right_bound]
            .iter()
            .filter(move |e| e.range.end >= query.start)
    }
}

/// First active booking in `candidates` that overlaps `range`, ignoring
/// `exclude`. Pure: safe to call speculatively.
pub(crate) fn find_conflict<'a>(
    candidates: impl IntoIterator<Item = &'a Booking>,
    range: &DateRange,
    exclude: Option<Ulid>,
) -> Option<ConflictInfo> {
    candidates
        .into_iter()
        .filter(|b| Some(b.id) != exclude)
        .filter(|b| b.status.is_active())
        .filter(|b| b.range.overlaps(range))
        .min_by_key(|b| (b.range.start, b.id))
        .map(|b| ConflictInfo {
            id: b.id,
            first_name: b.first_name.clone(),
            status: b.status,
            range: b.range,
        })
}

pub(crate) fn check_no_conflict<'a>(
    candidates: impl IntoIterator<Item = &'a Booking>,
    range: &DateRange,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match find_conflict(candidates, range, exclude) {
        Some(conflict) => Err(EngineError::Conflict(conflict)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn range(a: &str, b: &str) -> DateRange {
        DateRange::new(d(a), d(b))
    }

    fn booking(r: DateRange, status: Status) -> Booking {
        Booking {
            id: Ulid::new(),
            range: r,
            party_size: 2,
            first_name: "Anna".into(),
            email: "anna@example.com".into(),
            affiliation: Party::Cornelia,
            description: None,
            status,
            created_at: Utc::now(),
            last_activity_at: Utc::now(),
        }
    }

    #[test]
    fn same_day_boundary_conflicts() {
        let existing = booking(range("2025-08-01", "2025-08-05"), Status::Pending);
        let result = find_conflict([&existing], &range("2025-08-05", "2025-08-08"), None);
        assert_eq!(result.unwrap().id, existing.id);
    }

    #[test]
    fn adjacent_day_is_free() {
        let existing = booking(range("2025-08-01", "2025-08-05"), Status::Confirmed);
        assert!(find_conflict([&existing], &range("2025-08-06", "2025-08-08"), None).is_none());
        assert!(find_conflict([&existing], &range("2025-07-25", "2025-07-31"), None).is_none());
    }

    #[test]
    fn terminal_bookings_never_block() {
        let denied = booking(range("2025-08-01", "2025-08-05"), Status::Denied);
        let canceled = booking(range("2025-08-01", "2025-08-05"), Status::Canceled);
        let r = range("2025-08-02", "2025-08-03");
        assert!(check_no_conflict([&denied, &canceled], &r, None).is_ok());
    }

    #[test]
    fn excluded_booking_is_ignored() {
        let existing = booking(range("2025-08-01", "2025-08-05"), Status::Pending);
        let r = range("2025-08-01", "2025-08-07");
        assert!(check_no_conflict([&existing], &r, Some(existing.id)).is_ok());
        assert!(matches!(
            check_no_conflict([&existing], &r, None),
            Err(EngineError::Conflict(_))
        ));
    }

    #[test]
    fn earliest_conflict_reported() {
        let late = booking(range("2025-08-10", "2025-08-12"), Status::Pending);
        let early = booking(range("2025-08-02", "2025-08-03"), Status::Confirmed);
        let result = find_conflict([&late, &early], &range("2025-08-01", "2025-08-31"), None);
        let info = result.unwrap();
        assert_eq!(info.id, early.id);
        assert_eq!(info.status, Status::Confirmed);
    }

    #[test]
    fn index_keeps_start_order() {
        let mut index = CalendarIndex::new();
        let a = Ulid::new();
        let b = Ulid::new();
        let c = Ulid::new();
        index.insert(a, range("2025-09-01", "2025-09-02"));
        index.insert(b, range("2025-07-01", "2025-07-02"));
        index.insert(c, range("2025-08-01", "2025-08-02"));
        let ids: Vec<Ulid> = index
            .overlapping(&range("2025-01-01", "2025-12-31"))
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![b, c, a]);
    }

    #[test]
    fn index_overlapping_bounds() {
        let mut index = CalendarIndex::new();
        let past = Ulid::new();
        let hit = Ulid::new();
        let future = Ulid::new();
        index.insert(past, range("2025-07-01", "2025-07-31"));
        index.insert(hit, range("2025-07-30", "2025-08-01"));
        index.insert(future, range("2025-08-06", "2025-08-09"));

        let hits: Vec<Ulid> = index
            .overlapping(&range("2025-08-01", "2025-08-05"))
            .map(|e| e.id)
            .collect();
        assert_eq!(hits, vec![hit]);
    }

    #[test]
    fn index_large_entry_spanning_query() {
        let mut index = CalendarIndex::new();
        let long = Ulid::new();
        index.insert(long, range("2025-01-01", "2025-12-31"));
        let hits: Vec<_> = index.overlapping(&range("2025-06-01", "2025-06-01")).collect();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn index_update_and_remove() {
        let mut index = CalendarIndex::new();
        let id = Ulid::new();
        index.insert(id, range("2025-08-01", "2025-08-02"));
        index.update(id, range("2025-10-01", "2025-10-02"));
        assert_eq!(index.len(), 1);
        assert_eq!(index.overlapping(&range("2025-08-01", "2025-08-02")).count(), 0);
        assert!(index.remove(id).is_some());
        assert!(index.remove(id).is_none());
        assert_eq!(index.len(), 0);
    }
}
