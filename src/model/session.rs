use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

/// A logged-in device. Refresh tokens are bound to one session and rotate
/// its `refresh_jti` on every use.
#[derive(Debug, sqlx::FromRow)]
pub struct DeviceSession {
    pub id: Uuid,
    pub user_id: i64,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub remember_me: bool,
    pub refresh_jti: String,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl DeviceSession {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at > now
    }
}

pub const SESSION_COLUMNS: &str = "id, user_id, user_agent, ip_address, remember_me, refresh_jti, \
     created_at, last_seen_at, expires_at, revoked_at";

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: Uuid,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub remember_me: bool,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
    #[schema(value_type = String, format = "date-time")]
    pub last_seen_at: DateTime<Utc>,
    #[schema(value_type = String, format = "date-time")]
    pub expires_at: DateTime<Utc>,
    /// True for the session that made this request
    pub current: bool,
}

impl DeviceSession {
    pub fn into_response(self, current: Uuid) -> SessionResponse {
        SessionResponse {
            current: self.id == current,
            id: self.id,
            user_agent: self.user_agent,
            ip_address: self.ip_address,
            remember_me: self.remember_me,
            created_at: self.created_at,
            last_seen_at: self.last_seen_at,
            expires_at: self.expires_at,
        }
    }
}
