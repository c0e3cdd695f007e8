pub mod attendance;
pub mod backup;
pub mod compensatory;
pub mod email;
pub mod sessions;
pub mod users;
pub mod vacation;

use actix_web::web;
use serde_json::Value;
use sqlx::PgPool;

use crate::error::{AppError, AppResult};
use crate::models::ReasonPayload;
use crate::services::email::{EmailKind, Notifier, admin_recipients};

/// Name and email of the owner of a request, for notifications.
pub(crate) struct Contact {
    pub full_name: String,
    pub email: String,
}

pub(crate) async fn contact(pool: &PgPool, user_id: i64) -> AppResult<Contact> {
    let row: Option<(String, String)> =
        sqlx::query_as("SELECT full_name, email FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
    row.map(|(full_name, email)| Contact { full_name, email })
        .ok_or_else(|| AppError::not_found("User not found"))
}

/// Emails every active admin. Lookup failures are logged, never returned.
pub(crate) async fn notify_admins(pool: &PgPool, notifier: &Notifier, kind: EmailKind, ctx: Value) {
    match admin_recipients(pool).await {
        Ok(admins) => notifier.dispatch(kind, admins, ctx),
        Err(e) => tracing::error!(error = %e, kind = kind.as_ref(), "Failed to load admin recipients"),
    }
}

/// Optional rejection reason; a missing or empty body means no reason.
pub(crate) fn reason(payload: Option<web::Json<ReasonPayload>>) -> Option<String> {
    payload
        .and_then(|p| p.into_inner().reason)
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_reasons_are_dropped() {
        let blank = web::Json(ReasonPayload {
            reason: Some("   ".into()),
        });
        assert_eq!(reason(Some(blank)), None);
        assert_eq!(reason(None), None);

        let given = web::Json(ReasonPayload {
            reason: Some(" Overlaps with the visit ".into()),
        });
        assert_eq!(reason(Some(given)).as_deref(), Some("Overlaps with the visit"));
    }
}
