use crate::config::EngineConfig;
use crate::limits::MAX_COMMENT_LEN;
use crate::model::*;

use super::error::{Action, ValidationError};
use super::{transition, EngineError};

/// Combined effect of the three approval slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Open,
    AllApproved,
    AnyDenied,
}

/// Recompute the aggregate from the stored slots. A single denial wins over
/// any number of approvals.
pub fn aggregate(set: &ApprovalSet) -> Aggregate {
    if set.iter().any(|a| a.decision == Decision::Denied) {
        Aggregate::AnyDenied
    } else if set.iter().all(|a| a.decision == Decision::Approved) {
        Aggregate::AllApproved
    } else {
        Aggregate::Open
    }
}

pub fn status_for(aggregate: Aggregate) -> Status {
    match aggregate {
        Aggregate::Open => Status::Pending,
        Aggregate::AllApproved => Status::Confirmed,
        Aggregate::AnyDenied => Status::Denied,
    }
}

/// Validate a decision against the current record and return the cleaned
/// comment. Check order: already decided, self-approval, state, input.
pub(crate) fn check_decision(
    record: &BookingRecord,
    party: Party,
    decision: Decision,
    comment: Option<&str>,
    config: &EngineConfig,
) -> Result<Option<String>, EngineError> {
    let slot = record.approvals.get(party);
    if slot.is_decided() {
        return Err(EngineError::AlreadyDecided {
            party,
            decision: slot.decision,
        });
    }
    if !config
        .self_approval
        .permits(party, &record.booking, &config.approvers)
    {
        return Err(EngineError::SelfApproval(party));
    }
    transition::ensure(record.booking.status, Action::Decide)?;

    let comment = clean_comment(comment)?;
    match decision {
        Decision::NoResponse => Err(ValidationError::NoDecision.into()),
        Decision::Denied if comment.is_none() => Err(ValidationError::MissingComment.into()),
        _ => Ok(comment),
    }
}

/// Trim a free-text comment; blank means absent.
pub(crate) fn clean_comment(comment: Option<&str>) -> Result<Option<String>, ValidationError> {
    let Some(text) = comment.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(None);
    };
    if text.chars().count() > MAX_COMMENT_LEN {
        return Err(ValidationError::CommentTooLong);
    }
    Ok(Some(text.to_string()))
}

/// Write a decision into its slot. Caller has validated it.
pub(crate) fn record(
    set: &mut ApprovalSet,
    party: Party,
    decision: Decision,
    comment: Option<String>,
    at: Timestamp,
) {
    let slot = set.get_mut(party);
    slot.decision = decision;
    slot.comment = comment;
    slot.decided_at = Some(at);
}
