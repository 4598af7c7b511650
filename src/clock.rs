use std::sync::Mutex;

use chrono::{NaiveDate, NaiveTime, Utc};

use crate::model::Timestamp;

/// Source of "now" and "today" for every engine decision that depends on
/// the calendar (past bookings, horizon, timestamps).
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
    fn today(&self) -> NaiveDate;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }

    fn today(&self) -> NaiveDate {
        chrono::Local::now().date_naive()
    }
}

/// Clock pinned to a given instant until moved.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<Timestamp>,
}

impl FixedClock {
    pub fn new(now: Timestamp) -> Self {
        Self { now: Mutex::new(now) }
    }

    /// Noon UTC of `day`.
    pub fn on(day: NaiveDate) -> Self {
        Self::new(noon(day))
    }

    pub fn set_today(&self, day: NaiveDate) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = noon(day);
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

fn noon(day: NaiveDate) -> Timestamp {
    day.and_time(NaiveTime::from_hms_opt(12, 0, 0).unwrap_or_default())
        .and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_moves_only_when_told() {
        let day: NaiveDate = "2025-08-01".parse().unwrap();
        let clock = FixedClock::on(day);
        assert_eq!(clock.today(), day);
        let first = clock.now();
        assert_eq!(clock.now(), first);

        clock.advance(chrono::Duration::hours(1));
        assert_eq!(clock.now() - first, chrono::Duration::hours(1));

        let next: NaiveDate = "2025-09-10".parse().unwrap();
        clock.set_today(next);
        assert_eq!(clock.today(), next);
    }
}
