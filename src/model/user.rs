use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::model::role::Role;

/// Full `users` row, including the password hash. Never serialized.
#[derive(Debug, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub full_name: String,
    pub password_hash: String,
    pub role: String,
    pub is_active: bool,
    pub vacation_days_balance: i32,
    pub compensatory_hours_balance: f64,
}

impl User {
    pub fn role(&self) -> Option<Role> {
        Role::parse(&self.role)
    }
}

#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
#[schema(
    example = json!({
        "id": 7,
        "email": "ana.perez@embassy.example",
        "full_name": "Ana Pérez",
        "role": "employee",
        "is_active": true,
        "vacation_days_balance": 18,
        "compensatory_hours_balance": 6.5,
        "last_login_at": "2026-03-02T08:15:00Z",
        "created_at": "2025-01-10T12:00:00Z"
    })
)]
pub struct UserProfile {
    pub id: i64,
    pub email: String,
    pub full_name: String,
    #[schema(example = "employee")]
    pub role: String,
    pub is_active: bool,
    pub vacation_days_balance: i32,
    pub compensatory_hours_balance: f64,
    #[schema(value_type = Option<String>, format = "date-time")]
    pub last_login_at: Option<DateTime<Utc>>,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
}

pub const PROFILE_COLUMNS: &str = "id, email, full_name, role, is_active, vacation_days_balance, \
     compensatory_hours_balance, last_login_at, created_at";

/// Lowercases and trims an email so lookups are case-insensitive.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Very small structural check; delivery is the mail relay's problem.
pub fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}

pub const MIN_PASSWORD_LEN: usize = 8;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails_are_normalized() {
        assert_eq!(normalize_email("  Ana.Perez@Embassy.Example "), "ana.perez@embassy.example");
    }

    #[test]
    fn plausible_email_rejects_obvious_garbage() {
        assert!(is_plausible_email("a@b.org"));
        assert!(!is_plausible_email("no-at-sign"));
        assert!(!is_plausible_email("@embassy.org"));
        assert!(!is_plausible_email("a@localhost"));
        assert!(!is_plausible_email("a b@embassy.org"));
    }
}
