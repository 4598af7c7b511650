use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::MAX_BOOKINGS;
use crate::model::*;
use crate::observability as obs;
use crate::policy::CleanupPolicy;

use super::approvals;
use super::error::{Action, ValidationError};
use super::transition;
use super::validate;
use super::{record_from_created, Engine, EngineError, WalCommand};

fn observe(op: &'static str, started: Instant) {
    metrics::histogram!(obs::OPERATION_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
}

impl Engine {
    // ── Create ───────────────────────────────────────────────

    /// Validate, conflict-check and store a new request. The calendar lock is
    /// held from the conflict check until the booking is visible, so two
    /// overlapping requests can never both be admitted.
    pub async fn create_booking(&self, req: BookingRequest) -> Result<BookingView, EngineError> {
        let started = Instant::now();
        let _gate = self.commit_gate.read().await;
        let now = self.clock.now();
        let clean = validate::validate_request(&req, self.clock.today())?;

        let mut calendar = self.calendar.lock().await;
        if self.bookings.len() >= MAX_BOOKINGS {
            return Err(EngineError::LimitExceeded("too many bookings"));
        }
        self.check_calendar(&mut calendar, &clean.range, None).await?;

        let auto_approved = self.own_approvals(&clean.email);

        let booking = Booking {
            id: Ulid::new(),
            range: clean.range,
            party_size: req.party_size,
            first_name: clean.first_name,
            email: clean.email,
            affiliation: req.affiliation,
            description: clean.description,
            status: Status::Pending,
            created_at: now,
            last_activity_at: now,
        };
        let id = booking.id;
        let range = booking.range;
        let record = record_from_created(&booking, &auto_approved);
        let view = record.view();
        let event = Event::BookingCreated {
            booking,
            auto_approved,
        };
        self.wal_append(&event).await?;
        calendar.insert(id, range);
        self.bookings.insert(id, Arc::new(RwLock::new(record)));
        drop(calendar);

        info!(
            "booking {} created: {} for {} ({})",
            view.id(),
            view.booking.range,
            view.booking.first_name,
            view.status()
        );
        metrics::counter!(obs::BOOKINGS_CREATED_TOTAL).increment(1);
        Self::record_transition(None, view.status());
        self.publish(&event, None, &view);
        observe("create", started);
        Ok(view)
    }

    // ── Decide ───────────────────────────────────────────────

    /// Record one party's decision and re-derive the booking status.
    /// Takes the row lock only: a decision never makes a booking active.
    pub async fn decide(
        &self,
        id: Ulid,
        party: Party,
        decision: Decision,
        comment: Option<&str>,
    ) -> Result<BookingView, EngineError> {
        let started = Instant::now();
        let _gate = self.commit_gate.read().await;
        let mut rec = self.lock_row(id).await?;

        let comment = approvals::check_decision(&rec, party, decision, comment, &self.config)?;
        let before = rec.booking.status;
        let event = Event::DecisionRecorded {
            id,
            party,
            decision,
            comment,
            at: self.clock.now(),
        };
        self.persist_and_apply(&mut rec, &event).await?;
        let view = rec.view();
        drop(rec);

        info!("booking {id}: {party} {decision} -> {}", view.status());
        metrics::counter!(obs::DECISIONS_TOTAL, "decision" => decision.to_string()).increment(1);
        Self::record_transition(Some(before), view.status());
        self.publish(&event, Some(before), &view);
        observe("decide", started);
        Ok(view)
    }

    /// Decide on behalf of the holder of an approver link.
    pub async fn decide_as(
        &self,
        id: Ulid,
        credential: &Credential,
        decision: Decision,
        comment: Option<&str>,
    ) -> Result<BookingView, EngineError> {
        let party = match (credential.role, credential.party) {
            (Role::Approver, Some(party)) => party,
            _ => return Err(EngineError::Unauthorized("approver link required")),
        };
        if credential.booking_id.is_some_and(|b| b != id) {
            return Err(EngineError::Unauthorized("link belongs to another booking"));
        }
        if !self
            .config
            .approvers
            .get(party)
            .email
            .eq_ignore_ascii_case(credential.email.trim())
        {
            return Err(EngineError::Unauthorized("not the approver for this party"));
        }
        self.decide(id, party, decision, comment).await
    }

    // ── Cancel ───────────────────────────────────────────────

    /// Requester cancellation. Canceling a confirmed stay needs a comment.
    pub async fn cancel(
        &self,
        id: Ulid,
        credential: &Credential,
        comment: Option<&str>,
    ) -> Result<BookingView, EngineError> {
        let started = Instant::now();
        let _gate = self.commit_gate.read().await;
        let mut rec = self.lock_row(id).await?;

        Self::authorize_requester(&rec.booking, credential)?;
        let before = rec.booking.status;
        transition::ensure(before, Action::Cancel)?;
        if rec.booking.is_past(self.clock.today()) {
            return Err(ValidationError::InPast.into());
        }
        let note = approvals::clean_comment(comment)?;
        if before == Status::Confirmed && note.is_none() {
            return Err(ValidationError::MissingComment.into());
        }

        let event = Event::BookingCanceled {
            id,
            note,
            at: self.clock.now(),
        };
        self.persist_and_apply(&mut rec, &event).await?;
        let view = rec.view();
        drop(rec);

        info!("booking {id} canceled (was {before})");
        Self::record_transition(Some(before), view.status());
        self.publish(&event, Some(before), &view);
        observe("cancel", started);
        Ok(view)
    }

    // ── Reopen ───────────────────────────────────────────────

    /// Put a denied booking back to Pending with all three slots cleared.
    /// An approver's own request gets its own slot re-approved, as at
    /// creation. Re-entering the active set needs the calendar lock.
    pub async fn reopen(&self, id: Ulid, credential: &Credential) -> Result<BookingView, EngineError> {
        let started = Instant::now();
        let _gate = self.commit_gate.read().await;
        let mut calendar = self.calendar.lock().await;
        let mut rec = self.lock_row(id).await?;

        Self::authorize_requester(&rec.booking, credential)?;
        let before = rec.booking.status;
        transition::ensure(before, Action::Reopen)?;
        if rec.booking.is_past(self.clock.today()) {
            return Err(ValidationError::InPast.into());
        }
        let range = rec.booking.range;
        self.check_calendar(&mut calendar, &range, Some(id)).await?;

        let event = Event::BookingReopened {
            id,
            auto_approved: self.own_approvals(&rec.booking.email),
            at: self.clock.now(),
        };
        self.persist_and_apply(&mut rec, &event).await?;
        calendar.update(id, range);
        let view = rec.view();
        drop(rec);
        drop(calendar);

        info!("booking {id} reopened");
        Self::record_transition(Some(before), view.status());
        self.publish(&event, Some(before), &view);
        observe("reopen", started);
        Ok(view)
    }

    // ── Edit ─────────────────────────────────────────────────

    /// Requester edit of a pending or confirmed booking. Extending the
    /// range clears all approvals; shortening or same-range edits keep them.
    /// Moving to an affiliation whose party may not decide on the booking
    /// withdraws that party's decision.
    pub async fn edit_booking(
        &self,
        id: Ulid,
        credential: &Credential,
        edit: BookingEdit,
    ) -> Result<BookingView, EngineError> {
        let started = Instant::now();
        if edit.is_empty() {
            return Err(ValidationError::NothingToChange.into());
        }
        let _gate = self.commit_gate.read().await;
        let mut calendar = self.calendar.lock().await;
        let mut rec = self.lock_row(id).await?;

        Self::authorize_requester(&rec.booking, credential)?;
        let before = rec.booking.status;
        transition::ensure(before, Action::Edit)?;
        let today = self.clock.today();
        if rec.booking.is_past(today) {
            return Err(ValidationError::InPast.into());
        }

        let current = &rec.booking;
        let first_name = match &edit.first_name {
            Some(name) => validate::validate_first_name(name)?,
            None => current.first_name.clone(),
        };
        let start = edit.start.unwrap_or(current.range.start);
        let end = edit.end.unwrap_or(current.range.end);
        let dates_changed = start != current.range.start || end != current.range.end;
        let range = if dates_changed {
            validate::validate_range(start, end, today, edit.long_stay_confirmed)?
        } else {
            current.range
        };
        let party_size = match edit.party_size {
            Some(size) => {
                validate::validate_party_size(size)?;
                size
            }
            None => current.party_size,
        };
        let description = match &edit.description {
            Some(text) => validate::validate_description(Some(text))?,
            None => current.description.clone(),
        };
        let affiliation = edit.affiliation.unwrap_or(current.affiliation);
        let extended = range.extends(&current.range);
        let own = self.own_approvals(&current.email);
        let withdrawn = if extended || affiliation == current.affiliation {
            Vec::new()
        } else {
            let moved = Booking {
                affiliation,
                ..current.clone()
            };
            let decided = rec.approvals.get(affiliation).is_decided();
            let allowed = own.contains(&affiliation)
                || self
                    .config
                    .self_approval
                    .permits(affiliation, &moved, &self.config.approvers);
            if decided && !allowed { vec![affiliation] } else { Vec::new() }
        };
        let auto_approved = if extended { own } else { Vec::new() };

        if dates_changed {
            self.check_calendar(&mut calendar, &range, Some(id)).await?;
        }

        let event = Event::BookingEdited {
            id,
            range,
            party_size,
            first_name,
            affiliation,
            description,
            reset_approvals: extended,
            withdrawn,
            auto_approved,
            at: self.clock.now(),
        };
        self.persist_and_apply(&mut rec, &event).await?;
        if dates_changed {
            calendar.update(id, range);
        }
        let view = rec.view();
        drop(rec);
        drop(calendar);

        info!(
            "booking {id} edited{}",
            if extended { ", approvals reset" } else { "" }
        );
        Self::record_transition(Some(before), view.status());
        self.publish(&event, Some(before), &view);
        observe("edit", started);
        Ok(view)
    }

    // ── Auto-cleanup ─────────────────────────────────────────

    /// Sweep pending bookings whose last day lies before `as_of`.
    /// Idempotent: a second run over the same data finds nothing.
    pub async fn run_auto_cleanup(&self, as_of: NaiveDate) -> Result<usize, EngineError> {
        let started = Instant::now();
        let _gate = self.commit_gate.read().await;
        let ids: Vec<Ulid> = self.bookings.iter().map(|e| *e.key()).collect();
        let mut cleaned = 0;

        for id in ids {
            let Some(row) = self.get_row(&id) else { continue };
            let mut rec = row.write().await;
            if !transition::is_stale(rec.booking.status, rec.booking.range.end < as_of) {
                continue;
            }
            match self.config.cleanup {
                CleanupPolicy::Retain => {
                    let event = Event::BookingAutoCleaned {
                        id,
                        at: self.clock.now(),
                    };
                    self.persist_and_apply(&mut rec, &event).await?;
                    let view = rec.view();
                    drop(rec);
                    self.publish(&event, Some(Status::Pending), &view);
                }
                CleanupPolicy::Delete => {
                    let event = Event::BookingPurged { id };
                    self.persist_and_apply(&mut rec, &event).await?;
                    self.bookings.remove(&id);
                    drop(rec);
                    self.calendar.lock().await.remove(id);
                }
            }
            debug!("auto-cleanup swept booking {id}");
            cleaned += 1;
        }

        if cleaned > 0 {
            info!("auto-cleanup as of {as_of}: {cleaned} stale bookings ({:?})", self.config.cleanup);
        }
        metrics::counter!(obs::CLEANUP_TOTAL).increment(cleaned as u64);
        observe("cleanup", started);
        Ok(cleaned)
    }

    // ── WAL compaction ───────────────────────────────────────

    /// Rewrite the WAL as one snapshot per live booking. Holds the commit
    /// gate exclusively so no mutation lands between snapshot and swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let mut records = Vec::with_capacity(self.bookings.len());
        for row in self.rows() {
            records.push(row.read().await.clone());
        }
        records.sort_by_key(|r| r.booking.id);
        let count = records.len();
        let events: Vec<Event> = records
            .into_iter()
            .map(|record| Event::Snapshot { record })
            .collect();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!("WAL compacted to {count} snapshots");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
