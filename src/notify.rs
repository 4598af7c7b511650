use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::model::*;
use crate::observability as obs;
use crate::policy::ApproverDirectory;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Template {
    RequestSubmitted,
    ApprovalRequested,
    BookingConfirmed,
    BookingDenied,
    BookingCanceled,
    BookingReopened,
    BookingEdited,
}

/// One outgoing message. `context` carries the template variables.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub template: Template,
    pub recipient: String,
    pub booking_id: Ulid,
    pub context: serde_json::Value,
}

/// Outbox for notifications of committed transitions. Sending never blocks
/// and never fails the operation that produced it.
pub struct NotifyHub {
    outbox: broadcast::Sender<Notification>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            outbox: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.outbox.subscribe()
    }

    /// Queue a notification. No-op if nobody is listening.
    pub fn send(&self, notification: Notification) {
        let _ = self.outbox.send(notification);
    }
}

fn base_context(view: &BookingView) -> serde_json::Value {
    let b = &view.booking;
    json!({
        "first_name": b.first_name,
        "start": b.range.start,
        "end": b.range.end,
        "total_days": b.total_days(),
        "party_size": b.party_size,
        "affiliation": b.affiliation,
        "status": b.status,
        "description": b.description,
    })
}

fn with(mut context: serde_json::Value, key: &str, value: serde_json::Value) -> serde_json::Value {
    if let Some(map) = context.as_object_mut() {
        map.insert(key.to_string(), value);
    }
    context
}

/// The messages a committed event produces. `before` is the status prior to
/// the event (`None` for creation), `view` the state after it.
pub fn notifications_for(
    event: &Event,
    before: Option<Status>,
    view: &BookingView,
    approvers: &ApproverDirectory,
) -> Vec<Notification> {
    let id = view.id();
    let requester = view.booking.email.clone();
    let context = base_context(view);
    let to = |template: Template, recipient: String, context: serde_json::Value| Notification {
        template,
        recipient,
        booking_id: id,
        context,
    };
    // Approvers that still owe an answer.
    let awaiting = || {
        approvers
            .notified()
            .filter(|(party, _)| !view.approvals.get(*party).is_decided())
            .map(|(_, a)| a.email.clone())
            .collect::<Vec<_>>()
    };
    let all_approvers = || {
        approvers
            .notified()
            .map(|(_, a)| a.email.clone())
            .collect::<Vec<_>>()
    };

    let mut out = Vec::new();
    match event {
        Event::BookingCreated { .. } => {
            out.push(to(Template::RequestSubmitted, requester, context.clone()));
            if view.status() == Status::Confirmed {
                out.push(to(Template::BookingConfirmed, view.booking.email.clone(), context.clone()));
            }
            for email in awaiting() {
                out.push(to(Template::ApprovalRequested, email, context.clone()));
            }
        }
        Event::DecisionRecorded {
            party, comment, ..
        } => match view.status() {
            Status::Confirmed if before != Some(Status::Confirmed) => {
                out.push(to(Template::BookingConfirmed, requester, context));
            }
            Status::Denied if before != Some(Status::Denied) => {
                let context = with(context, "denied_by", json!(party));
                let context = with(context, "comment", json!(comment));
                out.push(to(Template::BookingDenied, requester, context));
            }
            _ => {}
        },
        Event::BookingEdited {
            reset_approvals,
            withdrawn,
            ..
        } => {
            if *reset_approvals || !withdrawn.is_empty() {
                for email in awaiting() {
                    out.push(to(Template::ApprovalRequested, email, context.clone()));
                }
            } else {
                for email in all_approvers() {
                    out.push(to(Template::BookingEdited, email, context.clone()));
                }
            }
        }
        Event::BookingCanceled { note, .. } => {
            let context = with(context, "comment", json!(note));
            out.push(to(Template::BookingCanceled, requester, context.clone()));
            for email in all_approvers() {
                out.push(to(Template::BookingCanceled, email, context.clone()));
            }
        }
        Event::BookingReopened { .. } => {
            for email in awaiting() {
                out.push(to(Template::BookingReopened, email, context.clone()));
            }
        }
        Event::BookingAutoCleaned { .. } => {
            let context = with(context, "auto_cleaned", json!(true));
            out.push(to(Template::BookingCanceled, requester, context));
        }
        Event::BookingPurged { .. } | Event::Snapshot { .. } => {}
    }
    out
}

// ── Delivery ─────────────────────────────────────────────

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn deliver(&self, notification: &Notification) -> Result<(), String>;
}

/// Writes every notification to the log instead of sending it.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn deliver(&self, n: &Notification) -> Result<(), String> {
        info!(
            "mail {:?} to {} for booking {}: {}",
            n.template, n.recipient, n.booking_id, n.context
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Try up to `policy.attempts` times, doubling the delay after each failure.
pub async fn deliver_with_retry(
    mailer: &dyn Mailer,
    notification: &Notification,
    policy: RetryPolicy,
) -> bool {
    let mut delay = policy.base_delay;
    for attempt in 1..=policy.attempts {
        match mailer.deliver(notification).await {
            Ok(()) => {
                metrics::counter!(obs::NOTIFICATIONS_SENT_TOTAL).increment(1);
                return true;
            }
            Err(e) if attempt < policy.attempts => {
                debug!("delivery attempt {attempt} to {} failed: {e}", notification.recipient);
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => {
                warn!(
                    "giving up on {:?} to {} after {attempt} attempts: {e}",
                    notification.template, notification.recipient
                );
            }
        }
    }
    metrics::counter!(obs::NOTIFICATIONS_FAILED_TOTAL).increment(1);
    false
}

/// Drain the outbox into `mailer` until the hub is dropped.
pub async fn run_dispatcher(
    mut rx: broadcast::Receiver<Notification>,
    mailer: Arc<dyn Mailer>,
    policy: RetryPolicy,
) {
    loop {
        match rx.recv().await {
            Ok(n) => {
                deliver_with_retry(mailer.as_ref(), &n, policy).await;
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("notification dispatcher lagged, {skipped} messages dropped");
                metrics::counter!(obs::NOTIFICATIONS_DROPPED_TOTAL).increment(skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
