use crate::model::Status;

use super::error::Action;
use super::EngineError;

/// Whether `action` is allowed out of `status`.
///
/// Canceled is terminal. Decisions only land on Pending bookings, only Denied
/// bookings can be reopened, and edits keep a booking in the active set.
pub(crate) fn allows(status: Status, action: Action) -> bool {
    match action {
        Action::Decide => status == Status::Pending,
        Action::Cancel => matches!(status, Status::Pending | Status::Confirmed | Status::Denied),
        Action::Reopen => status == Status::Denied,
        Action::Edit => status.is_active(),
    }
}

pub(crate) fn ensure(status: Status, action: Action) -> Result<(), EngineError> {
    if allows(status, action) {
        Ok(())
    } else {
        Err(EngineError::InvalidTransition { status, action })
    }
}

/// Status after a requester edit. Extending the range needs fresh consent.
pub(crate) fn after_edit(status: Status, extended: bool) -> Status {
    if extended { Status::Pending } else { status }
}

/// Only bookings still waiting for consent are swept by auto-cleanup.
pub(crate) fn is_stale(status: Status, end_is_past: bool) -> bool {
    status == Status::Pending && end_is_past
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Status; 4] = [Status::Pending, Status::Confirmed, Status::Denied, Status::Canceled];

    #[test]
    fn canceled_is_terminal() {
        for action in [Action::Decide, Action::Cancel, Action::Reopen, Action::Edit] {
            assert!(!allows(Status::Canceled, action), "{action} out of Canceled");
        }
    }

    #[test]
    fn every_live_state_can_cancel() {
        for status in [Status::Pending, Status::Confirmed, Status::Denied] {
            assert!(allows(status, Action::Cancel));
        }
    }

    #[test]
    fn reopen_only_from_denied() {
        let reopenable: Vec<Status> = ALL
            .into_iter()
            .filter(|s| allows(*s, Action::Reopen))
            .collect();
        assert_eq!(reopenable, vec![Status::Denied]);
    }

    #[test]
    fn decide_only_on_pending() {
        assert!(ensure(Status::Pending, Action::Decide).is_ok());
        let err = ensure(Status::Confirmed, Action::Decide).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition { status: Status::Confirmed, action: Action::Decide }
        ));
    }

    #[test]
    fn extension_returns_to_pending() {
        assert_eq!(after_edit(Status::Confirmed, true), Status::Pending);
        assert_eq!(after_edit(Status::Confirmed, false), Status::Confirmed);
        assert_eq!(after_edit(Status::Pending, false), Status::Pending);
    }

    #[test]
    fn stale_means_pending_and_elapsed() {
        assert!(is_stale(Status::Pending, true));
        assert!(!is_stale(Status::Pending, false));
        assert!(!is_stale(Status::Confirmed, true));
        assert!(!is_stale(Status::Canceled, true));
    }
}
