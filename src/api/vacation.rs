use actix_web::{HttpResponse, web};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::{PgExecutor, PgPool};
use utoipa::{IntoParams, ToSchema};

use crate::api::{contact, notify_admins, reason};
use crate::auth::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::model::vacation::{VACATION_COLUMNS, Vacation, VacationStatus, validate_range};
use crate::models::{Paginated, PaginatedVacations, ReasonPayload, paginate};
use crate::services::email::EmailKind;
use crate::state::AppState;
use crate::utils::db_utils::{Filters, SqlValue, fetch_page};

#[derive(Deserialize, ToSchema)]
pub struct VacationRequest {
    #[schema(example = "2026-04-06", format = "date", value_type = String)]
    pub start_date: NaiveDate,
    #[schema(example = "2026-04-10", format = "date", value_type = String)]
    pub end_date: NaiveDate,
    #[schema(example = "Family trip")]
    pub reason: Option<String>,
}

#[derive(Deserialize, IntoParams)]
pub struct VacationFilter {
    /// Admins only; employees always see their own
    pub user_id: Option<i64>,
    /// pending, approved, rejected or cancelled
    pub status: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

async fn find_vacation<'e>(executor: impl PgExecutor<'e>, id: i64) -> AppResult<Vacation> {
    sqlx::query_as::<_, Vacation>(&format!(
        "SELECT {VACATION_COLUMNS} FROM vacations WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| AppError::not_found("Vacation request not found"))
}

/// Rejects ranges that overlap the user's pending or approved vacations.
async fn ensure_no_overlap(
    pool: &PgPool,
    user_id: i64,
    start: NaiveDate,
    end: NaiveDate,
    exclude_id: Option<i64>,
) -> AppResult<()> {
    let overlaps: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM vacations
            WHERE user_id = $1
              AND status IN ('pending', 'approved')
              AND start_date <= $3 AND end_date >= $2
              AND ($4::BIGINT IS NULL OR id <> $4)
        )
        "#,
    )
    .bind(user_id)
    .bind(start)
    .bind(end)
    .bind(exclude_id)
    .fetch_one(pool)
    .await?;

    if overlaps {
        return Err(AppError::conflict(
            "The requested dates overlap an existing vacation request",
        ));
    }
    Ok(())
}

async fn ensure_balance(pool: &PgPool, user_id: i64, days: i32) -> AppResult<()> {
    let balance: i32 = sqlx::query_scalar("SELECT vacation_days_balance FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    if days > balance {
        return Err(AppError::bad_request(format!(
            "Insufficient vacation balance: requested {days} days, available {balance}"
        )));
    }
    Ok(())
}

fn clean_reason(reason: Option<String>) -> Option<String> {
    reason.map(|r| r.trim().to_string()).filter(|r| !r.is_empty())
}

/// 404 when the request is gone, 409 when someone else already decided it.
async fn already_processed(pool: &PgPool, id: i64) -> AppError {
    match find_vacation(pool, id).await {
        Ok(_) => AppError::conflict("Vacation request already processed"),
        Err(e) => e,
    }
}

/* =========================
Create vacation request
========================= */
#[utoipa::path(
    post,
    path = "/api/vacations",
    request_body = VacationRequest,
    responses(
        (status = 201, description = "Vacation request submitted", body = Vacation),
        (status = 400, description = "Invalid range or insufficient balance"),
        (status = 401, description = "Unauthorized"),
        (status = 409, description = "Overlaps an existing request")
    ),
    security(("bearer_auth" = [])),
    tag = "Vacations"
)]
pub async fn create_vacation(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    state: web::Data<AppState>,
    payload: web::Json<VacationRequest>,
) -> AppResult<HttpResponse> {
    let payload = payload.into_inner();
    let today = Utc::now().date_naive();
    let days = validate_range(payload.start_date, payload.end_date, today)?;

    ensure_no_overlap(pool.get_ref(), auth.user_id, payload.start_date, payload.end_date, None)
        .await?;
    ensure_balance(pool.get_ref(), auth.user_id, days).await?;

    let reason = clean_reason(payload.reason);
    let vacation = sqlx::query_as::<_, Vacation>(&format!(
        r#"
        INSERT INTO vacations (user_id, start_date, end_date, days, reason)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {VACATION_COLUMNS}
        "#
    ))
    .bind(auth.user_id)
    .bind(payload.start_date)
    .bind(payload.end_date)
    .bind(days)
    .bind(&reason)
    .fetch_one(pool.get_ref())
    .await
    .map_err(|e| {
        tracing::error!(error = %e, user_id = auth.user_id, "Failed to create vacation request");
        AppError::Database(e)
    })?;

    let owner = contact(pool.get_ref(), auth.user_id).await?;
    notify_admins(
        pool.get_ref(),
        &state.notifier,
        EmailKind::VacationSubmitted,
        json!({
            "employee_name": owner.full_name,
            "start_date": vacation.start_date.to_string(),
            "end_date": vacation.end_date.to_string(),
            "days": vacation.days,
            "reason": vacation.reason,
        }),
    )
    .await;

    tracing::info!(vacation_id = vacation.id, user_id = auth.user_id, days, "Vacation requested");
    Ok(HttpResponse::Created().json(vacation))
}

/* =========================
List / get
========================= */
#[utoipa::path(
    get,
    path = "/api/vacations",
    params(VacationFilter),
    responses(
        (status = 200, description = "Paginated vacation requests, newest first", body = PaginatedVacations),
        (status = 400, description = "Invalid status filter"),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Vacations"
)]
pub async fn list_vacations(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    query: web::Query<VacationFilter>,
) -> AppResult<HttpResponse> {
    let query = query.into_inner();
    let (page, per_page, offset) = paginate(query.page, query.per_page, 20);

    let mut filters = Filters::new();
    let user_filter = if auth.is_admin() {
        query.user_id
    } else {
        Some(auth.user_id)
    };
    if let Some(user_id) = user_filter {
        filters.push("user_id", "=", SqlValue::I64(user_id));
    }
    if let Some(status) = query.status.as_deref() {
        let status: VacationStatus = status
            .parse()
            .map_err(|_| AppError::bad_request("Invalid status"))?;
        filters.push("status", "=", SqlValue::String(status.to_string()));
    }

    let (data, total) = fetch_page::<Vacation>(
        pool.get_ref(),
        &format!("SELECT {VACATION_COLUMNS} FROM vacations"),
        "vacations",
        filters,
        "created_at DESC, id DESC",
        per_page,
        offset,
    )
    .await?;

    Ok(HttpResponse::Ok().json(Paginated {
        data,
        page,
        per_page,
        total,
    }))
}

#[utoipa::path(
    get,
    path = "/api/vacations/{vacation_id}",
    params(("vacation_id" = i64, Path, description = "Vacation request ID")),
    responses(
        (status = 200, description = "Vacation request found", body = Vacation),
        (status = 403, description = "Not your request"),
        (status = 404, description = "Vacation request not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Vacations"
)]
pub async fn get_vacation(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    let vacation = find_vacation(pool.get_ref(), path.into_inner()).await?;
    auth.require_self_or_admin(vacation.user_id)?;
    Ok(HttpResponse::Ok().json(vacation))
}

/* =========================
Edit / cancel (owner)
========================= */
#[utoipa::path(
    put,
    path = "/api/vacations/{vacation_id}",
    params(("vacation_id" = i64, Path, description = "Vacation request ID")),
    request_body = VacationRequest,
    responses(
        (status = 200, description = "Vacation request updated", body = Vacation),
        (status = 400, description = "Invalid range or insufficient balance"),
        (status = 403, description = "Not your request"),
        (status = 404, description = "Vacation request not found"),
        (status = 409, description = "Already processed or overlapping")
    ),
    security(("bearer_auth" = [])),
    tag = "Vacations"
)]
pub async fn update_vacation(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
    payload: web::Json<VacationRequest>,
) -> AppResult<HttpResponse> {
    let vacation_id = path.into_inner();
    let payload = payload.into_inner();

    let existing = find_vacation(pool.get_ref(), vacation_id).await?;
    if existing.user_id != auth.user_id {
        return Err(AppError::forbidden("Only the requester can edit a vacation request"));
    }
    if existing.status() != Some(VacationStatus::Pending) {
        return Err(AppError::conflict("Only pending requests can be edited"));
    }

    let today = Utc::now().date_naive();
    let days = validate_range(payload.start_date, payload.end_date, today)?;
    ensure_no_overlap(
        pool.get_ref(),
        auth.user_id,
        payload.start_date,
        payload.end_date,
        Some(vacation_id),
    )
    .await?;
    ensure_balance(pool.get_ref(), auth.user_id, days).await?;

    let updated = sqlx::query_as::<_, Vacation>(&format!(
        r#"
        UPDATE vacations
        SET start_date = $1, end_date = $2, days = $3, reason = $4, updated_at = NOW()
        WHERE id = $5 AND status = 'pending'
        RETURNING {VACATION_COLUMNS}
        "#
    ))
    .bind(payload.start_date)
    .bind(payload.end_date)
    .bind(days)
    .bind(clean_reason(payload.reason))
    .bind(vacation_id)
    .fetch_optional(pool.get_ref())
    .await?;

    match updated {
        Some(v) => Ok(HttpResponse::Ok().json(v)),
        None => Err(already_processed(pool.get_ref(), vacation_id).await),
    }
}

/// The requester cancels a pending request. An admin may also cancel an
/// approved one, which gives the days back.
#[utoipa::path(
    delete,
    path = "/api/vacations/{vacation_id}",
    params(("vacation_id" = i64, Path, description = "Vacation request ID")),
    responses(
        (status = 200, description = "Vacation request cancelled", body = Vacation),
        (status = 403, description = "Not allowed to cancel this request"),
        (status = 404, description = "Vacation request not found"),
        (status = 409, description = "Request can no longer be cancelled")
    ),
    security(("bearer_auth" = [])),
    tag = "Vacations"
)]
pub async fn cancel_vacation(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    let vacation_id = path.into_inner();
    let mut tx = pool.begin().await?;

    let vacation = sqlx::query_as::<_, Vacation>(&format!(
        "SELECT {VACATION_COLUMNS} FROM vacations WHERE id = $1 FOR UPDATE"
    ))
    .bind(vacation_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::not_found("Vacation request not found"))?;

    auth.require_self_or_admin(vacation.user_id)?;

    let refund = match vacation.status() {
        Some(VacationStatus::Pending) => false,
        Some(VacationStatus::Approved) if auth.is_admin() => true,
        Some(VacationStatus::Approved) => {
            return Err(AppError::forbidden(
                "Approved vacations can only be cancelled by an administrator",
            ));
        }
        _ => return Err(AppError::conflict("Vacation request can no longer be cancelled")),
    };

    let cancelled = sqlx::query_as::<_, Vacation>(&format!(
        r#"
        UPDATE vacations
        SET status = $1, reviewed_by = CASE WHEN $2 THEN $3 ELSE reviewed_by END,
            reviewed_at = CASE WHEN $2 THEN NOW() ELSE reviewed_at END, updated_at = NOW()
        WHERE id = $4
        RETURNING {VACATION_COLUMNS}
        "#
    ))
    .bind(VacationStatus::Cancelled.as_ref())
    .bind(refund)
    .bind(auth.user_id)
    .bind(vacation_id)
    .fetch_one(&mut *tx)
    .await?;

    if refund {
        sqlx::query(
            "UPDATE users SET vacation_days_balance = vacation_days_balance + $1, updated_at = NOW() \
             WHERE id = $2",
        )
        .bind(vacation.days)
        .bind(vacation.user_id)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    tracing::info!(vacation_id, by = auth.user_id, refunded = refund, "Vacation cancelled");
    Ok(HttpResponse::Ok().json(cancelled))
}

/* =========================
Approve / reject (admin)
========================= */
#[utoipa::path(
    put,
    path = "/api/vacations/{vacation_id}/approve",
    params(("vacation_id" = i64, Path, description = "Vacation request ID")),
    responses(
        (status = 200, description = "Vacation approved and days deducted", body = Vacation),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Vacation request not found"),
        (status = 409, description = "Already processed or insufficient balance", body = Object, example = json!({
            "message": "Insufficient vacation balance"
        }))
    ),
    security(("bearer_auth" = [])),
    tag = "Vacations"
)]
pub async fn approve_vacation(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    auth.require_admin()?;
    let vacation_id = path.into_inner();

    let mut tx = pool.begin().await?;

    let vacation = sqlx::query_as::<_, Vacation>(&format!(
        "SELECT {VACATION_COLUMNS} FROM vacations WHERE id = $1 FOR UPDATE"
    ))
    .bind(vacation_id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::not_found("Vacation request not found"))?;

    if vacation.status() != Some(VacationStatus::Pending) {
        return Err(AppError::conflict("Vacation request already processed"));
    }

    let remaining: Option<i32> = sqlx::query_scalar(
        r#"
        UPDATE users
        SET vacation_days_balance = vacation_days_balance - $1, updated_at = NOW()
        WHERE id = $2 AND vacation_days_balance >= $1
        RETURNING vacation_days_balance
        "#,
    )
    .bind(vacation.days)
    .bind(vacation.user_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(remaining) = remaining else {
        tracing::warn!(vacation_id, user_id = vacation.user_id, "Approval blocked by balance");
        return Err(AppError::conflict("Insufficient vacation balance"));
    };

    let approved = sqlx::query_as::<_, Vacation>(&format!(
        r#"
        UPDATE vacations
        SET status = $1, reviewed_by = $2, reviewed_at = NOW(), rejection_reason = NULL, updated_at = NOW()
        WHERE id = $3
        RETURNING {VACATION_COLUMNS}
        "#
    ))
    .bind(VacationStatus::Approved.as_ref())
    .bind(auth.user_id)
    .bind(vacation_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    let owner = contact(pool.get_ref(), approved.user_id).await?;
    state.notifier.dispatch(
        EmailKind::VacationApproved,
        vec![owner.email],
        json!({
            "employee_name": owner.full_name,
            "start_date": approved.start_date.to_string(),
            "end_date": approved.end_date.to_string(),
            "days": approved.days,
            "remaining_days": remaining,
        }),
    );

    tracing::info!(vacation_id, admin_id = auth.user_id, remaining, "Vacation approved");
    Ok(HttpResponse::Ok().json(approved))
}

#[utoipa::path(
    put,
    path = "/api/vacations/{vacation_id}/reject",
    params(("vacation_id" = i64, Path, description = "Vacation request ID")),
    request_body(content = ReasonPayload, description = "Optional reason shown to the employee"),
    responses(
        (status = 200, description = "Vacation rejected", body = Vacation),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Vacation request not found"),
        (status = 409, description = "Already processed")
    ),
    security(("bearer_auth" = [])),
    tag = "Vacations"
)]
pub async fn reject_vacation(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    state: web::Data<AppState>,
    path: web::Path<i64>,
    payload: Option<web::Json<ReasonPayload>>,
) -> AppResult<HttpResponse> {
    auth.require_admin()?;
    let vacation_id = path.into_inner();
    let reason = reason(payload);

    let rejected = sqlx::query_as::<_, Vacation>(&format!(
        r#"
        UPDATE vacations
        SET status = $1, reviewed_by = $2, reviewed_at = NOW(), rejection_reason = $3, updated_at = NOW()
        WHERE id = $4 AND status = 'pending'
        RETURNING {VACATION_COLUMNS}
        "#
    ))
    .bind(VacationStatus::Rejected.as_ref())
    .bind(auth.user_id)
    .bind(&reason)
    .bind(vacation_id)
    .fetch_optional(pool.get_ref())
    .await?;

    let Some(rejected) = rejected else {
        return Err(already_processed(pool.get_ref(), vacation_id).await);
    };

    let owner = contact(pool.get_ref(), rejected.user_id).await?;
    state.notifier.dispatch(
        EmailKind::VacationRejected,
        vec![owner.email],
        json!({
            "employee_name": owner.full_name,
            "start_date": rejected.start_date.to_string(),
            "end_date": rejected.end_date.to_string(),
            "reason": reason,
        }),
    );

    tracing::info!(vacation_id, admin_id = auth.user_id, "Vacation rejected");
    Ok(HttpResponse::Ok().json(rejected))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_are_trimmed_and_blank_dropped() {
        assert_eq!(clean_reason(Some("  Trip ".into())).as_deref(), Some("Trip"));
        assert_eq!(clean_reason(Some("   ".into())), None);
        assert_eq!(clean_reason(None), None);
    }

    #[test]
    fn request_body_accepts_missing_reason() {
        let req: VacationRequest =
            serde_json::from_value(json!({"start_date": "2026-04-06", "end_date": "2026-04-10"}))
                .unwrap();
        assert!(req.reason.is_none());
        assert_eq!(req.start_date, NaiveDate::from_ymd_opt(2026, 4, 6).unwrap());
    }
}
