use std::cmp::Reverse;

use ulid::Ulid;

use crate::model::*;

use super::error::ValidationError;
use super::{Engine, EngineError};

impl Engine {
    pub async fn get_booking(&self, id: Ulid) -> Result<BookingView, EngineError> {
        let row = self.get_row(&id).ok_or(EngineError::NotFound(id))?;
        let guard = row.read().await;
        Ok(guard.view())
    }

    /// Anonymous projection: no email, no comments, no description.
    pub async fn public_booking(&self, id: Ulid) -> Result<PublicBooking, EngineError> {
        let row = self.get_row(&id).ok_or(EngineError::NotFound(id))?;
        let guard = row.read().await;
        Ok(PublicBooking::from_booking(&guard.booking, self.clock.today()))
    }

    pub async fn timeline(&self, id: Ulid) -> Result<Vec<TimelineEvent>, EngineError> {
        let row = self.get_row(&id).ok_or(EngineError::NotFound(id))?;
        let guard = row.read().await;
        Ok(guard.timeline.events().to_vec())
    }

    /// Active bookings touching the given month, ordered by start date.
    pub async fn list_for_month(
        &self,
        year: i32,
        month: u32,
    ) -> Result<Vec<PublicBooking>, EngineError> {
        let window = DateRange::month(year, month).ok_or(ValidationError::InvalidMonth)?;
        let ids: Vec<Ulid> = {
            let calendar = self.calendar.lock().await;
            calendar.overlapping(&window).map(|e| e.id).collect()
        };

        let today = self.clock.today();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(row) = self.get_row(&id) else { continue };
            let guard = row.read().await;
            let b = &guard.booking;
            if b.status.is_active() && b.range.overlaps(&window) {
                out.push(PublicBooking::from_booking(b, today));
            }
        }
        out.sort_by_key(|p| (p.range.start, p.id));
        Ok(out)
    }

    /// Every booking filed under `email`, most recently active first.
    pub async fn list_for_requester(&self, email: &str) -> Vec<BookingView> {
        self.collect_views(|rec| rec.booking.is_requested_by(email))
            .await
    }

    /// Pending bookings still waiting for `party`'s answer.
    pub async fn pending_for_party(&self, party: Party) -> Vec<BookingView> {
        self.collect_views(|rec| {
            rec.booking.status == Status::Pending && !rec.approvals.get(party).is_decided()
        })
        .await
    }

    /// Bookings `party` has already answered, most recently active first.
    pub async fn history_for_party(&self, party: Party) -> Vec<BookingView> {
        self.collect_views(|rec| rec.approvals.get(party).is_decided())
            .await
    }

    pub fn booking_count(&self) -> usize {
        self.bookings.len()
    }

    async fn collect_views(&self, keep: impl Fn(&BookingRecord) -> bool) -> Vec<BookingView> {
        let mut out = Vec::new();
        for row in self.rows() {
            let guard = row.read().await;
            if keep(&*guard) {
                out.push(guard.view());
            }
        }
        out.sort_by_key(|v| (Reverse(v.booking.last_activity_at), v.booking.id));
        out
    }
}
