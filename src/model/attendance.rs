use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow)]
pub struct Attendance {
    pub id: i64,
    pub user_id: i64,
    pub check_in: DateTime<Utc>,
    pub check_out: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl Attendance {
    /// Hours between check-in and check-out, `None` while still open.
    pub fn worked_hours(&self) -> Option<f64> {
        self.check_out.map(|out| {
            let secs = (out - self.check_in).num_seconds().max(0) as f64;
            (secs / 36.0).round() / 100.0
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AttendanceResponse {
    pub id: i64,
    pub user_id: i64,
    #[schema(value_type = String, format = "date-time")]
    pub check_in: DateTime<Utc>,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub check_out: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    #[schema(example = 8.25)]
    pub worked_hours: Option<f64>,
}

impl From<Attendance> for AttendanceResponse {
    fn from(a: Attendance) -> Self {
        let worked_hours = a.worked_hours();
        Self {
            id: a.id,
            user_id: a.user_id,
            check_in: a.check_in,
            check_out: a.check_out,
            notes: a.notes,
            worked_hours,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn worked_hours_rounds_to_hundredths() {
        let check_in = Utc::now();
        let mut a = Attendance {
            id: 1,
            user_id: 1,
            check_in,
            check_out: None,
            notes: None,
        };
        assert_eq!(a.worked_hours(), None);
        a.check_out = Some(check_in + Duration::minutes(8 * 60 + 15));
        assert_eq!(a.worked_hours(), Some(8.25));
    }
}
