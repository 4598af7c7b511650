use chrono::{Months, NaiveDate};

use crate::limits::*;
use crate::model::{BookingRequest, DateRange};

use super::error::ValidationError;

/// A creation request after every field passed its rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CleanRequest {
    pub first_name: String,
    pub email: String,
    pub range: DateRange,
    pub description: Option<String>,
}

pub(crate) fn validate_request(
    req: &BookingRequest,
    today: NaiveDate,
) -> Result<CleanRequest, ValidationError> {
    let range = validate_range(req.start, req.end, today, req.long_stay_confirmed)?;
    validate_party_size(req.party_size)?;
    Ok(CleanRequest {
        first_name: validate_first_name(&req.first_name)?,
        email: validate_email(&req.email)?,
        range,
        description: validate_description(req.description.as_deref())?,
    })
}

/// Inclusive range that is not past, within the horizon, and, if long,
/// explicitly confirmed.
pub(crate) fn validate_range(
    start: NaiveDate,
    end: NaiveDate,
    today: NaiveDate,
    long_stay_confirmed: bool,
) -> Result<DateRange, ValidationError> {
    let range = DateRange::try_new(start, end).ok_or(ValidationError::EndBeforeStart)?;
    if range.end < today {
        return Err(ValidationError::InPast);
    }
    let horizon = today
        .checked_add_months(Months::new(FUTURE_HORIZON_MONTHS))
        .unwrap_or(NaiveDate::MAX);
    if range.start > horizon {
        return Err(ValidationError::BeyondHorizon);
    }
    let days = range.total_days();
    if days > LONG_STAY_DAYS && !long_stay_confirmed {
        return Err(ValidationError::LongStayUnconfirmed(days));
    }
    Ok(range)
}

pub(crate) fn validate_party_size(size: u8) -> Result<(), ValidationError> {
    if (MIN_PARTY_SIZE..=MAX_PARTY_SIZE).contains(&size) {
        Ok(())
    } else {
        Err(ValidationError::PartySize(size))
    }
}

/// Letters (diacritics included), space, hyphen and apostrophe.
pub(crate) fn validate_first_name(name: &str) -> Result<String, ValidationError> {
    let name = name.trim();
    let len = name.chars().count();
    if len == 0 || len > MAX_FIRST_NAME_LEN {
        return Err(ValidationError::FirstName);
    }
    if !name
        .chars()
        .all(|c| c.is_alphabetic() || matches!(c, ' ' | '-' | '\''))
    {
        return Err(ValidationError::FirstName);
    }
    Ok(name.to_string())
}

pub(crate) fn validate_email(email: &str) -> Result<String, ValidationError> {
    let email = email.trim();
    if email.is_empty() || email.len() > MAX_EMAIL_LEN || email.chars().any(char::is_whitespace) {
        return Err(ValidationError::Email);
    }
    let Some((local, domain)) = email.split_once('@') else {
        return Err(ValidationError::Email);
    };
    if local.is_empty()
        || domain.contains('@')
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
    {
        return Err(ValidationError::Email);
    }
    Ok(email.to_string())
}

/// Optional free text without links. Blank means absent.
pub(crate) fn validate_description(text: Option<&str>) -> Result<Option<String>, ValidationError> {
    let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(None);
    };
    if text.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(ValidationError::DescriptionTooLong);
    }
    let lower = text.to_lowercase();
    if LINK_MARKERS.iter().any(|m| lower.contains(m)) {
        return Err(ValidationError::LinksNotAllowed);
    }
    Ok(Some(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Party;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn request() -> BookingRequest {
        BookingRequest {
            first_name: "  Jürgen ".into(),
            email: "juergen@example.com".into(),
            start: d("2025-08-01"),
            end: d("2025-08-05"),
            party_size: 4,
            affiliation: Party::Ingeborg,
            description: Some("  Sommerferien  ".into()),
            long_stay_confirmed: false,
        }
    }

    #[test]
    fn valid_request_is_cleaned() {
        let clean = validate_request(&request(), d("2025-07-01")).unwrap();
        assert_eq!(clean.first_name, "Jürgen");
        assert_eq!(clean.description.as_deref(), Some("Sommerferien"));
        assert_eq!(clean.range.total_days(), 5);
    }

    #[test]
    fn inverted_range_rejected() {
        let today = d("2025-07-01");
        assert_eq!(
            validate_range(d("2025-08-05"), d("2025-08-01"), today, false),
            Err(ValidationError::EndBeforeStart)
        );
    }

    #[test]
    fn past_and_horizon() {
        let today = d("2025-08-03");
        // Ending today is still allowed.
        assert!(validate_range(d("2025-08-01"), d("2025-08-03"), today, false).is_ok());
        assert_eq!(
            validate_range(d("2025-08-01"), d("2025-08-02"), today, false),
            Err(ValidationError::InPast)
        );
        assert!(validate_range(d("2027-02-03"), d("2027-02-04"), today, false).is_ok());
        assert_eq!(
            validate_range(d("2027-02-04"), d("2027-02-05"), today, false),
            Err(ValidationError::BeyondHorizon)
        );
    }

    #[test]
    fn long_stay_needs_confirmation() {
        let today = d("2025-07-01");
        assert!(validate_range(d("2025-08-01"), d("2025-08-07"), today, false).is_ok());
        assert_eq!(
            validate_range(d("2025-08-01"), d("2025-08-08"), today, false),
            Err(ValidationError::LongStayUnconfirmed(8))
        );
        assert!(validate_range(d("2025-08-01"), d("2025-08-08"), today, true).is_ok());
    }

    #[test]
    fn party_size_bounds() {
        assert!(validate_party_size(1).is_ok());
        assert!(validate_party_size(10).is_ok());
        assert_eq!(validate_party_size(0), Err(ValidationError::PartySize(0)));
        assert_eq!(validate_party_size(11), Err(ValidationError::PartySize(11)));
    }

    #[test]
    fn first_name_rules() {
        assert_eq!(validate_first_name("Anne-Marie").unwrap(), "Anne-Marie");
        assert_eq!(validate_first_name("O'Neil").unwrap(), "O'Neil");
        assert!(validate_first_name("   ").is_err());
        assert!(validate_first_name("Bob2").is_err());
        assert!(validate_first_name("Line\nBreak").is_err());
        assert!(validate_first_name(&"a".repeat(MAX_FIRST_NAME_LEN + 1)).is_err());
    }

    #[test]
    fn email_rules() {
        assert!(validate_email("a@b.de").is_ok());
        assert!(validate_email("no-at-sign.de").is_err());
        assert!(validate_email("a@nodot").is_err());
        assert!(validate_email("a@@b.de").is_err());
        assert!(validate_email("a b@c.de").is_err());
        assert!(validate_email("@b.de").is_err());
    }

    #[test]
    fn description_rules() {
        assert_eq!(validate_description(None), Ok(None));
        assert_eq!(validate_description(Some("  ")), Ok(None));
        assert_eq!(
            validate_description(Some("see WWW.example.com")),
            Err(ValidationError::LinksNotAllowed)
        );
        assert_eq!(
            validate_description(Some("Mailto:x@y.de")),
            Err(ValidationError::LinksNotAllowed)
        );
        let long = "ä".repeat(MAX_DESCRIPTION_LEN + 1);
        assert_eq!(
            validate_description(Some(&long)),
            Err(ValidationError::DescriptionTooLong)
        );
        let max = "ä".repeat(MAX_DESCRIPTION_LEN);
        assert!(validate_description(Some(&max)).is_ok());
    }
}
