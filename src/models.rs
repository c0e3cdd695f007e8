use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::model::{
    attendance::AttendanceResponse, compensatory::Compensatory, user::UserProfile,
    vacation::Vacation,
};

#[derive(Deserialize, ToSchema)]
pub struct LoginReqDto {
    #[schema(example = "ana.perez@embassy.example")]
    pub email: String,
    pub password: String,
    /// Keep the refresh cookie across browser restarts
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: usize,
    #[schema(value_type = String, format = "uuid")]
    pub session_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: i64,
    /// Email of the user
    pub sub: String,
    pub role: String,
    /// Device session this token belongs to
    pub sid: Uuid,
    pub exp: usize,
    pub jti: String,

    pub token_type: TokenType,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub enum TokenType {
    Access,
    Refresh,
}

/// Resolves `(page, per_page, offset)` with 1-based pages and `per_page` in 1..=100.
pub fn paginate(page: Option<u32>, per_page: Option<u32>, default_per_page: u32) -> (u32, u32, i64) {
    let page = page.unwrap_or(1).max(1);
    let per_page = per_page.unwrap_or(default_per_page).clamp(1, 100);
    let offset = (page as i64 - 1) * per_page as i64;
    (page, per_page, offset)
}

#[derive(Serialize, ToSchema)]
#[aliases(
    PaginatedUsers = Paginated<UserProfile>,
    PaginatedVacations = Paginated<Vacation>,
    PaginatedCompensatorys = Paginated<Compensatory>,
    PaginatedAttendance = Paginated<AttendanceResponse>
)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    #[schema(example = 1)]
    pub page: u32,
    #[schema(example = 20)]
    pub per_page: u32,
    #[schema(example = 1)]
    pub total: i64,
}

#[derive(Deserialize, ToSchema)]
pub struct ReasonPayload {
    #[schema(example = "Overlaps with the ambassador's visit")]
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_is_clamped() {
        assert_eq!(paginate(None, None, 20), (1, 20, 0));
        assert_eq!(paginate(Some(0), Some(500), 20), (1, 100, 0));
        assert_eq!(paginate(Some(3), Some(10), 20), (3, 10, 20));
        assert_eq!(paginate(Some(2), Some(0), 20), (2, 1, 1));
    }
}
