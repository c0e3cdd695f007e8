use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{HttpRequest, HttpResponse, web};
use serde_json::json;

use crate::auth::auth::AuthUser;
use crate::auth::cookies::bearer_token;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::services::backup::RestoreReport;
use crate::services::storage::{BackupMetadata, BackupTrigger, validate_id};
use crate::state::AppState;

#[utoipa::path(
    get,
    path = "/api/backups",
    responses(
        (status = 200, description = "Backups from every location, newest first", body = [BackupMetadata]),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Backups"
)]
pub async fn list_backups(auth: AuthUser, state: web::Data<AppState>) -> AppResult<HttpResponse> {
    auth.require_admin()?;
    Ok(HttpResponse::Ok().json(state.backups.storage().list().await))
}

#[utoipa::path(
    post,
    path = "/api/backups",
    responses(
        (status = 201, description = "Backup created", body = BackupMetadata),
        (status = 403, description = "Forbidden"),
        (status = 500, description = "No location accepted the backup")
    ),
    security(("bearer_auth" = [])),
    tag = "Backups"
)]
pub async fn create_backup(auth: AuthUser, state: web::Data<AppState>) -> AppResult<HttpResponse> {
    auth.require_admin()?;
    let meta = state
        .backups
        .create(BackupTrigger::Manual, Some(auth.email.clone()))
        .await?;
    Ok(HttpResponse::Created().json(meta))
}

#[utoipa::path(
    delete,
    path = "/api/backups/{backup_id}",
    params(("backup_id" = String, Path, description = "Backup ID")),
    responses(
        (status = 200, description = "Backup deleted", body = Object, example = json!({
            "message": "Backup deleted",
            "locations": ["local", "cloud"]
        })),
        (status = 400, description = "Malformed backup ID"),
        (status = 404, description = "Backup not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Backups"
)]
pub async fn delete_backup(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    auth.require_admin()?;
    let id = checked_id(path.into_inner())?;
    let removed = state.backups.storage().delete(&id).await?;
    tracing::info!(backup_id = %id, admin_id = auth.user_id, "Backup deleted");
    Ok(HttpResponse::Ok().json(json!({ "message": "Backup deleted", "locations": removed })))
}

/// Replaces the database contents with a backup. Every user is signed out.
#[utoipa::path(
    post,
    path = "/api/backups/{backup_id}/restore",
    params(("backup_id" = String, Path, description = "Backup ID")),
    responses(
        (status = 200, description = "Database restored", body = RestoreReport),
        (status = 400, description = "Backup is incomplete or malformed"),
        (status = 404, description = "Backup not found"),
        (status = 409, description = "Backup failed its integrity check")
    ),
    security(("bearer_auth" = [])),
    tag = "Backups"
)]
pub async fn restore_backup(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    auth.require_admin()?;
    let id = checked_id(path.into_inner())?;
    let report = state.backups.restore(&id, &auth.email).await.map_err(|e| {
        tracing::error!(backup_id = %id, admin_id = auth.user_id, error = %e, "Restore failed");
        AppError::from(e)
    })?;
    Ok(HttpResponse::Ok().json(report))
}

#[utoipa::path(
    get,
    path = "/api/backups/{backup_id}/download",
    params(("backup_id" = String, Path, description = "Backup ID")),
    responses(
        (status = 200, description = "gzip-compressed JSON snapshot", content_type = "application/gzip"),
        (status = 404, description = "Backup not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Backups"
)]
pub async fn download_backup(
    auth: AuthUser,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    auth.require_admin()?;
    let id = checked_id(path.into_inner())?;
    let (meta, payload) = state.backups.storage().load(&id).await?;

    Ok(HttpResponse::Ok()
        .content_type("application/gzip")
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(format!("{}.json.gz", meta.id))],
        })
        .body(payload))
}

fn checked_id(id: String) -> AppResult<String> {
    validate_id(&id).map_err(|_| AppError::bad_request("Invalid backup ID"))?;
    Ok(id)
}

/// Scheduled backup trigger for an external cron. Answers 404 unless a
/// `CRON_SECRET` is configured and presented as a bearer token.
#[utoipa::path(
    post,
    path = "/cron/backup",
    responses(
        (status = 201, description = "Scheduled backup created", body = BackupMetadata),
        (status = 401, description = "Wrong or missing secret"),
        (status = 404, description = "Cron endpoint disabled")
    ),
    security(("cron_secret" = [])),
    tag = "Backups"
)]
pub async fn cron_backup(
    req: HttpRequest,
    config: web::Data<Config>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let Some(secret) = config.cron_secret.as_deref() else {
        return Err(AppError::not_found("Not found"));
    };

    if !secret_matches(bearer_token(req.headers()), secret) {
        tracing::warn!(path = %req.path(), "Cron request with invalid secret");
        return Err(AppError::unauthorized("Invalid cron secret"));
    }

    let meta = state.backups.create(BackupTrigger::Scheduled, None).await?;
    Ok(HttpResponse::Created().json(meta))
}

/// Compares without short-circuiting on the first differing byte.
fn secret_matches(presented: Option<&str>, expected: &str) -> bool {
    let Some(presented) = presented else {
        return false;
    };
    let (a, b) = (presented.as_bytes(), expected.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cron_secret_must_match_exactly() {
        assert!(secret_matches(Some("s3cret"), "s3cret"));
        assert!(!secret_matches(Some("s3cre"), "s3cret"));
        assert!(!secret_matches(Some("s3creT"), "s3cret"));
        assert!(!secret_matches(None, "s3cret"));
    }

    #[test]
    fn backup_ids_with_path_characters_are_rejected() {
        assert!(checked_id("backup-20260301T020000Z-1a2b3c4d".into()).is_ok());
        assert!(checked_id("..%2f..".into()).is_err());
    }
}
