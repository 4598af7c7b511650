use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::model::{Booking, Party};

/// When a party may decide on a booking made under its own affiliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exemption {
    Never,
    Always,
    /// Allowed unless the requester is the party's approver in person.
    UnlessRequesterIsApprover,
}

impl FromStr for Exemption {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "never" => Ok(Exemption::Never),
            "always" => Ok(Exemption::Always),
            "unless-requester-is-approver" => Ok(Exemption::UnlessRequesterIsApprover),
            other => Err(format!("unknown self-approval exemption: {other}")),
        }
    }
}

impl fmt::Display for Exemption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Exemption::Never => "never",
            Exemption::Always => "always",
            Exemption::UnlessRequesterIsApprover => "unless-requester-is-approver",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Approver {
    pub email: String,
    /// Whether this approver gets emails at all.
    pub notify: bool,
}

/// Contact details of the three fixed approvers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApproverDirectory {
    approvers: [Approver; 3],
}

impl Default for ApproverDirectory {
    fn default() -> Self {
        Self {
            approvers: Party::ALL.map(|p| Approver {
                email: format!("{}@example.com", p.as_str().to_ascii_lowercase()),
                notify: true,
            }),
        }
    }
}

impl ApproverDirectory {
    pub fn get(&self, party: Party) -> &Approver {
        &self.approvers[party.index()]
    }

    pub fn set(&mut self, party: Party, approver: Approver) {
        self.approvers[party.index()] = approver;
    }

    /// The party whose approver owns `email`, if any.
    pub fn party_for_email(&self, email: &str) -> Option<Party> {
        let email = email.trim();
        Party::ALL
            .into_iter()
            .find(|p| self.get(*p).email.eq_ignore_ascii_case(email))
    }

    /// Approvers that want notifications, with their party.
    pub fn notified(&self) -> impl Iterator<Item = (Party, &Approver)> {
        Party::ALL
            .into_iter()
            .map(|p| (p, self.get(p)))
            .filter(|(_, a)| a.notify)
    }
}

/// Affiliation → exemption table for the self-approval guard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfApprovalPolicy {
    exemptions: HashMap<Party, Exemption>,
}

impl Default for SelfApprovalPolicy {
    fn default() -> Self {
        Self {
            exemptions: Party::ALL
                .into_iter()
                .map(|p| (p, Exemption::UnlessRequesterIsApprover))
                .collect(),
        }
    }
}

impl SelfApprovalPolicy {
    /// No exemptions: a party never decides on its own affiliation's bookings.
    pub fn strict() -> Self {
        Self {
            exemptions: HashMap::new(),
        }
    }

    pub fn with(mut self, party: Party, exemption: Exemption) -> Self {
        self.exemptions.insert(party, exemption);
        self
    }

    pub fn exemption(&self, party: Party) -> Exemption {
        self.exemptions.get(&party).copied().unwrap_or(Exemption::Never)
    }

    /// Whether `party` may decide on `booking`.
    pub fn permits(&self, party: Party, booking: &Booking, approvers: &ApproverDirectory) -> bool {
        if party != booking.affiliation {
            return true;
        }
        match self.exemption(party) {
            Exemption::Never => false,
            Exemption::Always => true,
            Exemption::UnlessRequesterIsApprover => {
                !booking.is_requested_by(&approvers.get(party).email)
            }
        }
    }
}

/// What auto-cleanup does with stale pending bookings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CleanupPolicy {
    /// Mark them Canceled and keep them for the audit trail.
    #[default]
    Retain,
    /// Remove them together with approvals and timeline.
    Delete,
}

impl FromStr for CleanupPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retain" => Ok(CleanupPolicy::Retain),
            "delete" => Ok(CleanupPolicy::Delete),
            other => Err(format!("unknown cleanup policy: {other}")),
        }
    }
}
