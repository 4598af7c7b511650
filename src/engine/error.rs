use ulid::Ulid;

use crate::limits::*;
use crate::model::{DateRange, Decision, Party, Status};

/// Malformed input. Never retried, surfaced verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    EndBeforeStart,
    PartySize(u8),
    FirstName,
    Email,
    DescriptionTooLong,
    LinksNotAllowed,
    InPast,
    BeyondHorizon,
    LongStayUnconfirmed(i64),
    MissingComment,
    CommentTooLong,
    NoDecision,
    NothingToChange,
    InvalidMonth,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::EndBeforeStart => write!(f, "end date is before start date"),
            ValidationError::PartySize(n) => write!(
                f,
                "party size {n} outside {MIN_PARTY_SIZE}..={MAX_PARTY_SIZE}"
            ),
            ValidationError::FirstName => write!(
                f,
                "first name must be 1-{MAX_FIRST_NAME_LEN} letters, spaces, hyphens or apostrophes"
            ),
            ValidationError::Email => write!(f, "email address is not valid"),
            ValidationError::DescriptionTooLong => {
                write!(f, "description longer than {MAX_DESCRIPTION_LEN} characters")
            }
            ValidationError::LinksNotAllowed => write!(f, "links are not allowed in the description"),
            ValidationError::InPast => write!(f, "booking lies in the past"),
            ValidationError::BeyondHorizon => write!(
                f,
                "bookings may start at most {FUTURE_HORIZON_MONTHS} months ahead"
            ),
            ValidationError::LongStayUnconfirmed(days) => {
                write!(f, "stay of {days} days must be confirmed as a long stay")
            }
            ValidationError::MissingComment => write!(f, "a comment is required"),
            ValidationError::CommentTooLong => {
                write!(f, "comment longer than {MAX_COMMENT_LEN} characters")
            }
            ValidationError::NoDecision => write!(f, "decision must be Approved or Denied"),
            ValidationError::NothingToChange => write!(f, "edit contains no changes"),
            ValidationError::InvalidMonth => write!(f, "no such calendar month"),
        }
    }
}

/// The booking that blocks a requested range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictInfo {
    pub id: Ulid,
    pub first_name: String,
    pub status: Status,
    pub range: DateRange,
}

/// Action names used in `InvalidTransition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Decide,
    Cancel,
    Reopen,
    Edit,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Action::Decide => "decide",
            Action::Cancel => "cancel",
            Action::Reopen => "reopen",
            Action::Edit => "edit",
        })
    }
}

#[derive(Debug)]
pub enum EngineError {
    Validation(ValidationError),
    Conflict(ConflictInfo),
    AlreadyDecided { party: Party, decision: Decision },
    SelfApproval(Party),
    NotFound(Ulid),
    Unauthorized(&'static str),
    InvalidTransition { status: Status, action: Action },
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Stable machine-readable code.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::Conflict(_) => "conflict",
            EngineError::AlreadyDecided { .. } => "already_decided",
            EngineError::SelfApproval(_) => "self_approval",
            EngineError::NotFound(_) => "not_found",
            EngineError::Unauthorized(_) => "unauthorized",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "storage",
        }
    }
}

impl From<ValidationError> for EngineError {
    fn from(e: ValidationError) -> Self {
        EngineError::Validation(e)
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(e) => write!(f, "invalid input: {e}"),
            EngineError::Conflict(c) => write!(
                f,
                "dates {} overlap an existing booking ({} - {})",
                c.range, c.first_name, c.status
            ),
            EngineError::AlreadyDecided { party, decision } => {
                write!(f, "{party} already responded: {decision}")
            }
            EngineError::SelfApproval(party) => {
                write!(f, "{party} cannot decide on a booking of their own affiliation")
            }
            EngineError::NotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::Unauthorized(reason) => write!(f, "not authorized: {reason}"),
            EngineError::InvalidTransition { status, action } => {
                write!(f, "cannot {action} a {status} booking")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(EngineError::NotFound(Ulid::new()).kind(), "not_found");
        assert_eq!(
            EngineError::from(ValidationError::MissingComment).kind(),
            "validation"
        );
        assert_eq!(EngineError::WalError("disk".into()).kind(), "storage");
    }

    #[test]
    fn conflict_message_names_blocking_booking() {
        let day = "2025-08-05".parse().unwrap();
        let err = EngineError::Conflict(ConflictInfo {
            id: Ulid::new(),
            first_name: "Anna".into(),
            status: Status::Pending,
            range: DateRange::new(day, day),
        });
        let msg = err.to_string();
        assert!(msg.contains("Anna"));
        assert!(msg.contains("Pending"));
    }
}
