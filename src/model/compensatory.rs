use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::error::{AppError, AppResult};

pub const MAX_HOURS_PER_EVENT: f64 = 24.0;

/// Review state of the hours worked.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, EnumString, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HoursStatus {
    Pending,
    Approved,
    Rejected,
}

/// Review state of redeeming the hours as time off.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, EnumString, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UsageStatus {
    NotRequested,
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[schema(example = json!({
    "id": 3,
    "user_id": 7,
    "event_date": "2026-02-14",
    "hours": 4.0,
    "description": "National day reception",
    "hours_status": "approved",
    "usage_status": "pending",
    "usage_date": "2026-03-02",
    "usage_hours": 4.0,
    "rejection_reason": null,
    "created_at": "2026-02-15T10:00:00Z"
}))]
pub struct Compensatory {
    pub id: i64,
    pub user_id: i64,
    #[schema(value_type = String, format = "date")]
    pub event_date: NaiveDate,
    pub hours: f64,
    pub description: String,
    pub hours_status: String,
    pub hours_reviewed_by: Option<i64>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub hours_reviewed_at: Option<DateTime<Utc>>,
    pub usage_status: String,
    #[schema(value_type = Option<String>, format = "date")]
    pub usage_date: Option<NaiveDate>,
    pub usage_hours: Option<f64>,
    pub usage_reviewed_by: Option<i64>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub usage_reviewed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
}

pub const COMPENSATORY_COLUMNS: &str = "id, user_id, event_date, hours, description, hours_status, \
     hours_reviewed_by, hours_reviewed_at, usage_status, usage_date, usage_hours, \
     usage_reviewed_by, usage_reviewed_at, rejection_reason, created_at";

impl Compensatory {
    pub fn hours_status(&self) -> Option<HoursStatus> {
        self.hours_status.parse().ok()
    }

    pub fn usage_status(&self) -> Option<UsageStatus> {
        self.usage_status.parse().ok()
    }
}

pub fn validate_event(event_date: NaiveDate, hours: f64, today: NaiveDate) -> AppResult<()> {
    if !hours.is_finite() || hours <= 0.0 || hours > MAX_HOURS_PER_EVENT {
        return Err(AppError::bad_request("hours must be greater than 0 and at most 24"));
    }
    if event_date > today {
        return Err(AppError::bad_request("event_date cannot be in the future"));
    }
    Ok(())
}

/// Checks a usage request against the record and the owner's balance.
/// Returns the hours that will be redeemed.
pub fn validate_usage(
    record: &Compensatory,
    requested_hours: Option<f64>,
    balance: f64,
) -> AppResult<f64> {
    if record.hours_status() != Some(HoursStatus::Approved) {
        return Err(AppError::conflict("Worked hours have not been approved yet"));
    }
    match record.usage_status() {
        Some(UsageStatus::NotRequested) | Some(UsageStatus::Rejected) => {}
        _ => return Err(AppError::conflict("Usage was already requested for this record")),
    }

    let hours = requested_hours.unwrap_or(record.hours);
    if !hours.is_finite() || hours <= 0.0 {
        return Err(AppError::bad_request("hours must be greater than 0"));
    }
    if hours > record.hours {
        return Err(AppError::bad_request("Cannot use more hours than were worked"));
    }
    if hours > balance {
        return Err(AppError::bad_request("Insufficient compensatory balance"));
    }
    Ok(hours)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(hours_status: HoursStatus, usage_status: UsageStatus) -> Compensatory {
        Compensatory {
            id: 1,
            user_id: 7,
            event_date: NaiveDate::from_ymd_opt(2026, 2, 14).unwrap(),
            hours: 4.0,
            description: "Reception".into(),
            hours_status: hours_status.to_string(),
            hours_reviewed_by: None,
            hours_reviewed_at: None,
            usage_status: usage_status.to_string(),
            usage_date: None,
            usage_hours: None,
            usage_reviewed_by: None,
            usage_reviewed_at: None,
            rejection_reason: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn event_hours_must_be_in_range() {
        let today = NaiveDate::from_ymd_opt(2026, 2, 20).unwrap();
        let day = NaiveDate::from_ymd_opt(2026, 2, 14).unwrap();
        assert!(validate_event(day, 4.0, today).is_ok());
        assert!(validate_event(day, 0.0, today).is_err());
        assert!(validate_event(day, 24.5, today).is_err());
        assert!(validate_event(day, f64::NAN, today).is_err());
        assert!(validate_event(NaiveDate::from_ymd_opt(2026, 2, 21).unwrap(), 2.0, today).is_err());
    }

    #[test]
    fn usage_requires_approved_hours() {
        let rec = record(HoursStatus::Pending, UsageStatus::NotRequested);
        assert!(validate_usage(&rec, None, 10.0).is_err());
    }

    #[test]
    fn usage_defaults_to_record_hours_and_respects_balance() {
        let rec = record(HoursStatus::Approved, UsageStatus::NotRequested);
        assert_eq!(validate_usage(&rec, None, 10.0).unwrap(), 4.0);
        assert_eq!(validate_usage(&rec, Some(2.5), 3.0).unwrap(), 2.5);
        assert!(validate_usage(&rec, Some(5.0), 10.0).is_err());
        assert!(validate_usage(&rec, None, 3.0).is_err());
    }

    #[test]
    fn usage_cannot_be_requested_twice() {
        let rec = record(HoursStatus::Approved, UsageStatus::Pending);
        assert!(validate_usage(&rec, None, 10.0).is_err());
        let rec = record(HoursStatus::Approved, UsageStatus::Rejected);
        assert!(validate_usage(&rec, None, 10.0).is_ok());
    }

    #[test]
    fn status_column_values_are_snake_case() {
        assert_eq!(UsageStatus::NotRequested.as_ref(), "not_requested");
        assert_eq!("not_requested".parse::<UsageStatus>().unwrap(), UsageStatus::NotRequested);
    }
}
