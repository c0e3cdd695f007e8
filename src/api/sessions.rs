use actix_web::{HttpResponse, web};
use chrono::Utc;
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::model::session::SessionResponse;
use crate::services::sessions::{live_sessions, revoke_session, revoke_user_sessions};
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/api/sessions",
    responses(
        (status = 200, description = "Live sessions of the caller", body = [SessionResponse]),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Sessions"
)]
pub async fn list_sessions(auth: AuthUser, pool: web::Data<PgPool>) -> AppResult<HttpResponse> {
    let now = Utc::now();
    let sessions: Vec<SessionResponse> = live_sessions(pool.get_ref(), auth.user_id)
        .await?
        .into_iter()
        .filter(|s| s.is_live(now))
        .map(|s| s.into_response(auth.session_id))
        .collect();
    Ok(HttpResponse::Ok().json(sessions))
}

#[utoipa::path(
    delete,
    path = "/api/sessions/{session_id}",
    params(("session_id" = String, Path, description = "Session ID (uuid)")),
    responses(
        (status = 200, description = "Session revoked", body = Object, example = json!({
            "message": "Session revoked"
        })),
        (status = 404, description = "No such session for the caller")
    ),
    security(("bearer_auth" = [])),
    tag = "Sessions"
)]
pub async fn revoke_one(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let session_id = path.into_inner();
    if !revoke_session(pool.get_ref(), &state.revoked, session_id, Some(auth.user_id)).await? {
        return Err(AppError::not_found("Session not found"));
    }
    Ok(HttpResponse::Ok().json(json!({ "message": "Session revoked" })))
}

/// Signs out every device except the one making the request.
#[utoipa::path(
    post,
    path = "/api/sessions/revoke-others",
    responses(
        (status = 200, description = "Other sessions revoked", body = Object, example = json!({
            "revoked": 3
        }))
    ),
    security(("bearer_auth" = [])),
    tag = "Sessions"
)]
pub async fn revoke_others(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let revoked =
        revoke_user_sessions(pool.get_ref(), &state.revoked, auth.user_id, Some(auth.session_id))
            .await?;
    Ok(HttpResponse::Ok().json(json!({ "revoked": revoked })))
}

#[utoipa::path(
    post,
    path = "/api/users/{user_id}/sessions/revoke",
    params(("user_id" = i64, Path, description = "User ID")),
    responses(
        (status = 200, description = "All sessions of the user revoked", body = Object, example = json!({
            "revoked": 2
        })),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Sessions"
)]
pub async fn revoke_all_for_user(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    auth.require_admin()?;
    let user_id = path.into_inner();
    let revoked = revoke_user_sessions(pool.get_ref(), &state.revoked, user_id, None).await?;
    tracing::info!(user_id, admin_id = auth.user_id, revoked, "Admin revoked user sessions");
    Ok(HttpResponse::Ok().json(json!({ "revoked": revoked })))
}
