use actix_web::{HttpResponse, web};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use utoipa::ToSchema;

use crate::auth::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::model::user::{is_plausible_email, normalize_email};
use crate::services::email::EmailKind;
use crate::state::AppState;

#[derive(Deserialize, ToSchema, Default)]
pub struct TestEmailRequest {
    /// Defaults to the caller's address
    #[schema(example = "it@embassy.example")]
    pub to: Option<String>,
}

/// Sends the test template and waits for the relay, so SMTP problems show
/// up in the response.
#[utoipa::path(
    post,
    path = "/api/email/test",
    request_body(content = TestEmailRequest, description = "Optional recipient"),
    responses(
        (status = 200, description = "Test email sent", body = Object, example = json!({
            "message": "Test email sent",
            "to": "it@embassy.example"
        })),
        (status = 400, description = "Invalid recipient"),
        (status = 403, description = "Forbidden"),
        (status = 500, description = "Delivery failed")
    ),
    security(("bearer_auth" = [])),
    tag = "Email"
)]
pub async fn send_test_email(
    auth: AuthUser,
    state: web::Data<AppState>,
    payload: Option<web::Json<TestEmailRequest>>,
) -> AppResult<HttpResponse> {
    auth.require_admin()?;

    let to = payload
        .and_then(|p| p.into_inner().to)
        .map(|t| normalize_email(&t))
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| auth.email.clone());
    if !is_plausible_email(&to) {
        return Err(AppError::bad_request(format!("Invalid email address: {to}")));
    }

    state
        .notifier
        .send_now(
            EmailKind::TestEmail,
            vec![to.clone()],
            json!({ "recipient": to, "sent_at": Utc::now().to_rfc3339() }),
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, to = %to, "Test email failed");
            AppError::from(e)
        })?;

    tracing::info!(to = %to, admin_id = auth.user_id, "Test email sent");
    Ok(HttpResponse::Ok().json(json!({ "message": "Test email sent", "to": to })))
}
