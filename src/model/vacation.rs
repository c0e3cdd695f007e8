use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};
use utoipa::ToSchema;

use crate::error::{AppError, AppResult};

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, ToSchema, EnumString, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VacationStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[schema(example = json!({
    "id": 12,
    "user_id": 7,
    "start_date": "2026-04-06",
    "end_date": "2026-04-10",
    "days": 5,
    "reason": "Family trip",
    "status": "pending",
    "reviewed_by": null,
    "reviewed_at": null,
    "rejection_reason": null,
    "created_at": "2026-03-01T09:00:00Z"
}))]
pub struct Vacation {
    pub id: i64,
    pub user_id: i64,
    #[schema(value_type = String, format = "date")]
    pub start_date: NaiveDate,
    #[schema(value_type = String, format = "date")]
    pub end_date: NaiveDate,
    pub days: i32,
    pub reason: Option<String>,
    #[schema(example = "pending")]
    pub status: String,
    pub reviewed_by: Option<i64>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub reviewed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
}

pub const VACATION_COLUMNS: &str = "id, user_id, start_date, end_date, days, reason, status, \
     reviewed_by, reviewed_at, rejection_reason, created_at";

impl Vacation {
    pub fn status(&self) -> Option<VacationStatus> {
        self.status.parse().ok()
    }
}

/// Counts Monday to Friday days in `start..=end`.
pub fn count_working_days(start: NaiveDate, end: NaiveDate) -> i32 {
    if start > end {
        return 0;
    }
    start
        .iter_days()
        .take_while(|d| *d <= end)
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .count() as i32
}

/// Validates a requested range and returns the working days it consumes.
pub fn validate_range(start: NaiveDate, end: NaiveDate, today: NaiveDate) -> AppResult<i32> {
    if start > end {
        return Err(AppError::bad_request("start_date cannot be after end_date"));
    }
    if start < today {
        return Err(AppError::bad_request("start_date cannot be in the past"));
    }
    let days = count_working_days(start, end);
    if days == 0 {
        return Err(AppError::bad_request("The requested range contains no working days"));
    }
    Ok(days)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn working_days_skip_weekends() {
        // Mon 2026-04-06 .. Sun 2026-04-12
        assert_eq!(count_working_days(d(2026, 4, 6), d(2026, 4, 12)), 5);
        // Fri .. Mon
        assert_eq!(count_working_days(d(2026, 4, 10), d(2026, 4, 13)), 2);
        // single Saturday
        assert_eq!(count_working_days(d(2026, 4, 11), d(2026, 4, 11)), 0);
        assert_eq!(count_working_days(d(2026, 4, 13), d(2026, 4, 6)), 0);
    }

    #[test]
    fn range_validation() {
        let today = d(2026, 4, 1);
        assert_eq!(validate_range(d(2026, 4, 6), d(2026, 4, 7), today).unwrap(), 2);
        assert!(validate_range(d(2026, 4, 7), d(2026, 4, 6), today).is_err());
        assert!(validate_range(d(2026, 3, 30), d(2026, 4, 2), today).is_err());
        assert!(validate_range(d(2026, 4, 11), d(2026, 4, 12), today).is_err());
    }

    #[test]
    fn status_column_values() {
        assert_eq!(VacationStatus::Cancelled.as_ref(), "cancelled");
        assert_eq!("approved".parse::<VacationStatus>().unwrap(), VacationStatus::Approved);
    }
}
