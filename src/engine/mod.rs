mod approvals;
mod conflict;
mod error;
mod mutations;
mod queries;
mod transition;
mod validate;

pub use approvals::{aggregate, status_for, Aggregate};
pub use error::{Action, ConflictInfo, EngineError, ValidationError};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::model::*;
use crate::notify::{notifications_for, NotifyHub};
use crate::wal::Wal;

use conflict::CalendarIndex;

/// One booking row. The write lock is the row lock of every transition.
pub type SharedBooking = Arc<RwLock<BookingRecord>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit:
/// block for the first append, drain whatever else is queued, fsync once,
/// answer every sender with the shared result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        respond_batch(batch, &result);

        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let append_err = batch
        .iter()
        .find_map(|(event, _)| wal.append_buffered(event).err());
    // Flush even after a failed append so no partial bytes leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match append_err.or(flush_err) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

pub struct Engine {
    pub(super) bookings: DashMap<Ulid, SharedBooking>,
    /// Calendar-wide lock: held across check-and-commit by every operation
    /// that can make a booking active. Acquired before any row lock.
    pub(super) calendar: Mutex<CalendarIndex>,
    /// Mutations hold it shared; compaction holds it exclusively so no
    /// commit slips between the snapshot and the log swap.
    pub(super) commit_gate: RwLock<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    pub(super) config: EngineConfig,
    pub(super) clock: Arc<dyn Clock>,
}

/// Build the record a `BookingCreated` event describes.
fn record_from_created(booking: &Booking, auto_approved: &[Party]) -> BookingRecord {
    let mut rec = BookingRecord::new(booking.clone());
    let at = booking.created_at;
    rec.timeline.append(
        at,
        Actor::Requester(booking.first_name.clone()),
        TimelineKind::Created,
        None,
    );
    grant_own_approvals(&mut rec, auto_approved, at);
    settle_status(&mut rec, at);
    rec
}

/// Approve the slots of approvers who filed the request themselves.
fn grant_own_approvals(rec: &mut BookingRecord, parties: &[Party], at: Timestamp) {
    for party in parties {
        approvals::record(&mut rec.approvals, *party, Decision::Approved, None, at);
        rec.timeline.append(
            at,
            Actor::Party(*party),
            TimelineKind::SelfApproved,
            Some(format!("{party} (own request)")),
        );
    }
}

/// Re-derive a pending booking's status from its stored approvals.
fn settle_status(rec: &mut BookingRecord, at: Timestamp) {
    if rec.booking.status != Status::Pending {
        return;
    }
    let next = status_for(aggregate(&rec.approvals));
    if next == Status::Confirmed {
        rec.timeline.append(at, Actor::System, TimelineKind::Confirmed, None);
    }
    rec.booking.status = next;
}

/// Apply an event to a booking row. Caller holds the row lock.
/// Row-level create/snapshot/purge are handled at the map level.
fn apply_to_booking(rec: &mut BookingRecord, event: &Event) {
    match event {
        Event::DecisionRecorded {
            party,
            decision,
            comment,
            at,
            ..
        } => {
            approvals::record(&mut rec.approvals, *party, *decision, comment.clone(), *at);
            let kind = match decision {
                Decision::Denied => TimelineKind::Denied,
                _ => TimelineKind::Approved,
            };
            rec.timeline
                .append(*at, Actor::Party(*party), kind, comment.clone());
            rec.booking.last_activity_at = *at;
            settle_status(rec, *at);
        }
        Event::BookingEdited {
            range,
            party_size,
            first_name,
            affiliation,
            description,
            reset_approvals,
            withdrawn,
            auto_approved,
            at,
            ..
        } => {
            let old_range = rec.booking.range;
            let old_affiliation = rec.booking.affiliation;
            let b = &mut rec.booking;
            b.range = *range;
            b.party_size = *party_size;
            b.first_name = first_name.clone();
            b.affiliation = *affiliation;
            b.description = description.clone();
            b.last_activity_at = *at;
            b.status = transition::after_edit(b.status, *reset_approvals || !withdrawn.is_empty());
            if *reset_approvals {
                rec.approvals.reset();
            }
            for party in withdrawn {
                rec.approvals.clear(*party);
            }
            if old_range != *range {
                rec.timeline.append(
                    *at,
                    Actor::Requester(first_name.clone()),
                    TimelineKind::Edited,
                    Some(format!("dates: {old_range} -> {range}")),
                );
            }
            if !withdrawn.is_empty() {
                let parties: Vec<String> = withdrawn.iter().map(Party::to_string).collect();
                rec.timeline.append(
                    *at,
                    Actor::Requester(first_name.clone()),
                    TimelineKind::Edited,
                    Some(format!(
                        "affiliation: {old_affiliation} -> {affiliation}, withdrawn: {}",
                        parties.join(", ")
                    )),
                );
            }
            grant_own_approvals(rec, auto_approved, *at);
            settle_status(rec, *at);
        }
        Event::BookingCanceled { note, at, .. } => {
            rec.booking.status = Status::Canceled;
            rec.booking.last_activity_at = *at;
            rec.timeline.append(
                *at,
                Actor::Requester(rec.booking.first_name.clone()),
                TimelineKind::Canceled,
                note.clone(),
            );
        }
        Event::BookingReopened {
            auto_approved, at, ..
        } => {
            rec.approvals.reset();
            rec.booking.status = Status::Pending;
            rec.booking.last_activity_at = *at;
            rec.timeline.append(
                *at,
                Actor::Requester(rec.booking.first_name.clone()),
                TimelineKind::Reopened,
                None,
            );
            grant_own_approvals(rec, auto_approved, *at);
            settle_status(rec, *at);
        }
        Event::BookingAutoCleaned { at, .. } => {
            rec.booking.status = Status::Canceled;
            rec.booking.last_activity_at = *at;
            rec.timeline.append(
                *at,
                Actor::System,
                TimelineKind::AutoCleaned,
                Some("dates elapsed without a decision".into()),
            );
        }
        // A purged row may still be referenced by a waiter; make it inert.
        Event::BookingPurged { .. } => {
            rec.booking.status = Status::Canceled;
        }
        Event::BookingCreated { .. } | Event::Snapshot { .. } => {}
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let bookings: DashMap<Ulid, SharedBooking> = DashMap::new();
        let mut calendar = CalendarIndex::new();

        // Sole owner of these Arcs during replay: try_write always succeeds.
        for event in &events {
            match event {
                Event::BookingCreated { booking, auto_approved } => {
                    let rec = record_from_created(booking, auto_approved);
                    calendar.insert(booking.id, booking.range);
                    bookings.insert(booking.id, Arc::new(RwLock::new(rec)));
                }
                Event::Snapshot { record } => {
                    let id = record.booking.id;
                    calendar.remove(id);
                    if record.booking.status != Status::Canceled {
                        calendar.insert(id, record.booking.range);
                    }
                    bookings.insert(id, Arc::new(RwLock::new(record.clone())));
                }
                Event::BookingPurged { id } => {
                    calendar.remove(*id);
                    bookings.remove(id);
                }
                other => {
                    let id = other.booking_id();
                    let Some(row) = bookings.get(&id).map(|e| e.value().clone()) else {
                        continue;
                    };
                    let mut guard = row
                        .try_write()
                        .map_err(|_| io::Error::other("replay: contended booking row"))?;
                    apply_to_booking(&mut guard, other);
                    if let Event::BookingEdited { range, .. } = other {
                        calendar.update(id, *range);
                    }
                }
            }
        }
        metrics::gauge!(crate::observability::BOOKINGS_LOADED).set(bookings.len() as f64);

        Ok(Self {
            bookings,
            calendar: Mutex::new(calendar),
            commit_gate: RwLock::new(()),
            wal_tx,
            notify,
            config,
            clock,
        })
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_row(&self, id: &Ulid) -> Option<SharedBooking> {
        self.bookings.get(id).map(|e| e.value().clone())
    }

    pub(super) fn rows(&self) -> Vec<SharedBooking> {
        self.bookings.iter().map(|e| e.value().clone()).collect()
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    /// Write-lock a booking row. A row purged while we waited is gone.
    pub(super) async fn lock_row(
        &self,
        id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<BookingRecord>, EngineError> {
        let row = self.get_row(&id).ok_or(EngineError::NotFound(id))?;
        let guard = row.write_owned().await;
        if !self.bookings.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        Ok(guard)
    }

    /// Parties whose own request this is, when auto-approval is on.
    pub(super) fn own_approvals(&self, email: &str) -> Vec<Party> {
        if !self.config.auto_approve_own_requests {
            return Vec::new();
        }
        self.config.approvers.party_for_email(email).into_iter().collect()
    }

    /// WAL-append then apply. Memory is untouched if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        rec: &mut BookingRecord,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_booking(rec, event);
        Ok(())
    }

    /// Authoritative conflict check. Caller holds the calendar lock and, if
    /// `exclude` is set, that booking's row lock.
    pub(super) async fn check_calendar(
        &self,
        calendar: &mut CalendarIndex,
        range: &DateRange,
        exclude: Option<Ulid>,
    ) -> Result<(), EngineError> {
        let candidates: Vec<Ulid> = calendar
            .overlapping(range)
            .map(|e| e.id)
            .filter(|id| Some(*id) != exclude)
            .collect();

        let mut snapshot = Vec::with_capacity(candidates.len());
        for id in candidates {
            let Some(row) = self.get_row(&id) else {
                calendar.remove(id);
                continue;
            };
            let guard = row.read().await;
            if guard.booking.status == Status::Canceled {
                calendar.remove(id);
                continue;
            }
            snapshot.push(guard.booking.clone());
        }

        conflict::check_no_conflict(&snapshot, range, exclude).inspect_err(|e| {
            if let EngineError::Conflict(c) = e {
                metrics::counter!(crate::observability::CONFLICTS_TOTAL).increment(1);
                tracing::debug!("range {range} blocked by booking {}", c.id);
            }
        })
    }

    /// Requester links may cancel, reopen and edit their own bookings only.
    pub(super) fn authorize_requester(
        booking: &Booking,
        credential: &Credential,
    ) -> Result<(), EngineError> {
        if credential.role != Role::Requester {
            return Err(EngineError::Unauthorized("requester link required"));
        }
        if credential.booking_id.is_some_and(|id| id != booking.id) {
            return Err(EngineError::Unauthorized("link belongs to another booking"));
        }
        if !booking.is_requested_by(&credential.email) {
            return Err(EngineError::Unauthorized("not the requester of this booking"));
        }
        Ok(())
    }

    /// Best effort: queue notifications for a committed event.
    pub(super) fn publish(&self, event: &Event, before: Option<Status>, view: &BookingView) {
        for n in notifications_for(event, before, view, &self.config.approvers) {
            self.notify.send(n);
        }
    }

    fn record_transition(before: Option<Status>, after: Status) {
        if before != Some(after) {
            metrics::counter!(crate::observability::TRANSITIONS_TOTAL, "to" => after.to_string())
                .increment(1);
        }
    }
}
