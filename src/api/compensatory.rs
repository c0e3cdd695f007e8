use actix_web::{HttpResponse, web};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use sqlx::{PgExecutor, PgPool};
use utoipa::{IntoParams, ToSchema};

use crate::api::{contact, notify_admins, reason};
use crate::auth::auth::AuthUser;
use crate::error::{AppError, AppResult};
use crate::model::compensatory::{
    COMPENSATORY_COLUMNS, Compensatory, HoursStatus, UsageStatus, validate_event, validate_usage,
};
use crate::models::{Paginated, PaginatedCompensatorys, ReasonPayload, paginate};
use crate::services::email::EmailKind;
use crate::state::AppState;
use crate::utils::db_utils::{Filters, SqlValue, fetch_page};

#[derive(Deserialize, ToSchema)]
pub struct CompensatoryRequest {
    #[schema(example = "2026-02-14", format = "date", value_type = String)]
    pub event_date: NaiveDate,
    #[schema(example = 4.0)]
    pub hours: f64,
    #[schema(example = "National day reception")]
    pub description: String,
}

#[derive(Deserialize, ToSchema)]
pub struct UsageRequest {
    #[schema(example = "2026-03-02", format = "date", value_type = String)]
    pub usage_date: NaiveDate,
    /// Defaults to all hours of the record
    #[schema(example = 4.0)]
    pub hours: Option<f64>,
}

#[derive(Deserialize, IntoParams)]
pub struct CompensatoryFilter {
    /// Admins only; employees always see their own
    pub user_id: Option<i64>,
    /// pending, approved or rejected
    pub hours_status: Option<String>,
    /// not_requested, pending, approved or rejected
    pub usage_status: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

async fn find_record<'e>(executor: impl PgExecutor<'e>, id: i64) -> AppResult<Compensatory> {
    sqlx::query_as::<_, Compensatory>(&format!(
        "SELECT {COMPENSATORY_COLUMNS} FROM compensatorys WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| AppError::not_found("Compensatory record not found"))
}

async fn lock_record(tx: &mut sqlx::PgConnection, id: i64) -> AppResult<Compensatory> {
    sqlx::query_as::<_, Compensatory>(&format!(
        "SELECT {COMPENSATORY_COLUMNS} FROM compensatorys WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(tx)
    .await?
    .ok_or_else(|| AppError::not_found("Compensatory record not found"))
}

async fn already_processed(pool: &PgPool, id: i64) -> AppError {
    match find_record(pool, id).await {
        Ok(_) => AppError::conflict("Compensatory record already processed"),
        Err(e) => e,
    }
}

/* =========================
Report extra hours
========================= */
#[utoipa::path(
    post,
    path = "/api/compensatorys",
    request_body = CompensatoryRequest,
    responses(
        (status = 201, description = "Extra hours reported", body = Compensatory),
        (status = 400, description = "Invalid hours or date"),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Compensatory"
)]
pub async fn create_compensatory(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    state: web::Data<AppState>,
    payload: web::Json<CompensatoryRequest>,
) -> AppResult<HttpResponse> {
    let payload = payload.into_inner();
    validate_event(payload.event_date, payload.hours, Utc::now().date_naive())?;
    let description = payload.description.trim();
    if description.is_empty() {
        return Err(AppError::bad_request("description is required"));
    }

    let record = sqlx::query_as::<_, Compensatory>(&format!(
        r#"
        INSERT INTO compensatorys (user_id, event_date, hours, description)
        VALUES ($1, $2, $3, $4)
        RETURNING {COMPENSATORY_COLUMNS}
        "#
    ))
    .bind(auth.user_id)
    .bind(payload.event_date)
    .bind(payload.hours)
    .bind(description)
    .fetch_one(pool.get_ref())
    .await
    .map_err(|e| {
        tracing::error!(error = %e, user_id = auth.user_id, "Failed to create compensatory record");
        AppError::Database(e)
    })?;

    let owner = contact(pool.get_ref(), auth.user_id).await?;
    notify_admins(
        pool.get_ref(),
        &state.notifier,
        EmailKind::CompensatorySubmitted,
        json!({
            "employee_name": owner.full_name,
            "hours": record.hours,
            "event_date": record.event_date.to_string(),
            "description": record.description,
        }),
    )
    .await;

    tracing::info!(compensatory_id = record.id, user_id = auth.user_id, hours = record.hours, "Extra hours reported");
    Ok(HttpResponse::Created().json(record))
}

#[utoipa::path(
    get,
    path = "/api/compensatorys",
    params(CompensatoryFilter),
    responses(
        (status = 200, description = "Paginated compensatory records, newest first", body = PaginatedCompensatorys),
        (status = 400, description = "Invalid status filter")
    ),
    security(("bearer_auth" = [])),
    tag = "Compensatory"
)]
pub async fn list_compensatorys(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    query: web::Query<CompensatoryFilter>,
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
    if let Some(status) = query.hours_status.as_deref() {
        let status: HoursStatus = status
            .parse()
            .map_err(|_| AppError::bad_request("Invalid hours_status"))?;
        filters.push("hours_status", "=", SqlValue::String(status.to_string()));
    }
    if let Some(status) = query.usage_status.as_deref() {
        let status: UsageStatus = status
            .parse()
            .map_err(|_| AppError::bad_request("Invalid usage_status"))?;
        filters.push("usage_status", "=", SqlValue::String(status.to_string()));
    }

    let (data, total) = fetch_page::<Compensatory>(
        pool.get_ref(),
        &format!("SELECT {COMPENSATORY_COLUMNS} FROM compensatorys"),
        "compensatorys",
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
    path = "/api/compensatorys/{compensatory_id}",
    params(("compensatory_id" = i64, Path, description = "Compensatory record ID")),
    responses(
        (status = 200, description = "Record found", body = Compensatory),
        (status = 403, description = "Not your record"),
        (status = 404, description = "Record not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Compensatory"
)]
pub async fn get_compensatory(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    let record = find_record(pool.get_ref(), path.into_inner()).await?;
    auth.require_self_or_admin(record.user_id)?;
    Ok(HttpResponse::Ok().json(record))
}

#[utoipa::path(
    delete,
    path = "/api/compensatorys/{compensatory_id}",
    params(("compensatory_id" = i64, Path, description = "Compensatory record ID")),
    responses(
        (status = 200, description = "Record deleted", body = Object, example = json!({
            "message": "Compensatory record deleted"
        })),
        (status = 403, description = "Not your record"),
        (status = 404, description = "Record not found"),
        (status = 409, description = "Hours already reviewed")
    ),
    security(("bearer_auth" = [])),
    tag = "Compensatory"
)]
pub async fn delete_compensatory(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    let record = find_record(pool.get_ref(), id).await?;
    if record.user_id != auth.user_id {
        return Err(AppError::forbidden("Only the requester can delete this record"));
    }

    let result = sqlx::query("DELETE FROM compensatorys WHERE id = $1 AND hours_status = 'pending'")
        .bind(id)
        .execute(pool.get_ref())
        .await?;
    if result.rows_affected() == 0 {
        return Err(AppError::conflict("Reviewed records cannot be deleted"));
    }

    tracing::info!(compensatory_id = id, user_id = auth.user_id, "Compensatory record deleted");
    Ok(HttpResponse::Ok().json(json!({ "message": "Compensatory record deleted" })))
}

/* =========================
Worked hours review (admin)
========================= */
#[utoipa::path(
    put,
    path = "/api/compensatorys/{compensatory_id}/approve-hours",
    params(("compensatory_id" = i64, Path, description = "Compensatory record ID")),
    responses(
        (status = 200, description = "Hours approved and credited", body = Compensatory),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Record not found"),
        (status = 409, description = "Already processed")
    ),
    security(("bearer_auth" = [])),
    tag = "Compensatory"
)]
pub async fn approve_hours(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    auth.require_admin()?;
    let id = path.into_inner();

    let mut tx = pool.begin().await?;
    let record = lock_record(&mut tx, id).await?;
    if record.hours_status() != Some(HoursStatus::Pending) {
        return Err(AppError::conflict("Compensatory record already processed"));
    }

    let balance: f64 = sqlx::query_scalar(
        r#"
        UPDATE users
        SET compensatory_hours_balance = compensatory_hours_balance + $1, updated_at = NOW()
        WHERE id = $2
        RETURNING compensatory_hours_balance
        "#,
    )
    .bind(record.hours)
    .bind(record.user_id)
    .fetch_one(&mut *tx)
    .await?;

    let approved = sqlx::query_as::<_, Compensatory>(&format!(
        r#"
        UPDATE compensatorys
        SET hours_status = $1, hours_reviewed_by = $2, hours_reviewed_at = NOW(),
            rejection_reason = NULL, updated_at = NOW()
        WHERE id = $3
        RETURNING {COMPENSATORY_COLUMNS}
        "#
    ))
    .bind(HoursStatus::Approved.as_ref())
    .bind(auth.user_id)
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    let owner = contact(pool.get_ref(), approved.user_id).await?;
    state.notifier.dispatch(
        EmailKind::CompensatoryHoursApproved,
        vec![owner.email],
        json!({
            "employee_name": owner.full_name,
            "hours": approved.hours,
            "event_date": approved.event_date.to_string(),
            "balance_hours": balance,
        }),
    );

    tracing::info!(compensatory_id = id, admin_id = auth.user_id, balance, "Compensatory hours approved");
    Ok(HttpResponse::Ok().json(approved))
}

#[utoipa::path(
    put,
    path = "/api/compensatorys/{compensatory_id}/reject-hours",
    params(("compensatory_id" = i64, Path, description = "Compensatory record ID")),
    request_body(content = ReasonPayload, description = "Optional reason shown to the employee"),
    responses(
        (status = 200, description = "Hours rejected", body = Compensatory),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Record not found"),
        (status = 409, description = "Already processed")
    ),
    security(("bearer_auth" = [])),
    tag = "Compensatory"
)]
pub async fn reject_hours(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    state: web::Data<AppState>,
    path: web::Path<i64>,
    payload: Option<web::Json<ReasonPayload>>,
) -> AppResult<HttpResponse> {
    auth.require_admin()?;
    let id = path.into_inner();
    let reason = reason(payload);

    let rejected = sqlx::query_as::<_, Compensatory>(&format!(
        r#"
        UPDATE compensatorys
        SET hours_status = $1, hours_reviewed_by = $2, hours_reviewed_at = NOW(),
            rejection_reason = $3, updated_at = NOW()
        WHERE id = $4 AND hours_status = 'pending'
        RETURNING {COMPENSATORY_COLUMNS}
        "#
    ))
    .bind(HoursStatus::Rejected.as_ref())
    .bind(auth.user_id)
    .bind(&reason)
    .bind(id)
    .fetch_optional(pool.get_ref())
    .await?;

    let Some(rejected) = rejected else {
        return Err(already_processed(pool.get_ref(), id).await);
    };

    let owner = contact(pool.get_ref(), rejected.user_id).await?;
    state.notifier.dispatch(
        EmailKind::CompensatoryHoursRejected,
        vec![owner.email],
        json!({
            "employee_name": owner.full_name,
            "hours": rejected.hours,
            "event_date": rejected.event_date.to_string(),
            "reason": reason,
        }),
    );

    tracing::info!(compensatory_id = id, admin_id = auth.user_id, "Compensatory hours rejected");
    Ok(HttpResponse::Ok().json(rejected))
}

/* =========================
Time-off usage
========================= */
#[utoipa::path(
    post,
    path = "/api/compensatorys/{compensatory_id}/usage",
    params(("compensatory_id" = i64, Path, description = "Compensatory record ID")),
    request_body = UsageRequest,
    responses(
        (status = 200, description = "Usage requested", body = Compensatory),
        (status = 400, description = "Too many hours or insufficient balance"),
        (status = 403, description = "Not your record"),
        (status = 409, description = "Hours not approved or usage already requested")
    ),
    security(("bearer_auth" = [])),
    tag = "Compensatory"
)]
pub async fn request_usage(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
    payload: web::Json<UsageRequest>,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    let record = find_record(pool.get_ref(), id).await?;
    if record.user_id != auth.user_id {
        return Err(AppError::forbidden("Only the requester can use these hours"));
    }
    if payload.usage_date < record.event_date {
        return Err(AppError::bad_request("usage_date cannot be before the event date"));
    }

    let balance: f64 =
        sqlx::query_scalar("SELECT compensatory_hours_balance FROM users WHERE id = $1")
            .bind(auth.user_id)
            .fetch_one(pool.get_ref())
            .await?;
    let hours = validate_usage(&record, payload.hours, balance)?;

    let updated = sqlx::query_as::<_, Compensatory>(&format!(
        r#"
        UPDATE compensatorys
        SET usage_status = $1, usage_date = $2, usage_hours = $3,
            usage_reviewed_by = NULL, usage_reviewed_at = NULL, rejection_reason = NULL,
            updated_at = NOW()
        WHERE id = $4 AND hours_status = 'approved' AND usage_status IN ('not_requested', 'rejected')
        RETURNING {COMPENSATORY_COLUMNS}
        "#
    ))
    .bind(UsageStatus::Pending.as_ref())
    .bind(payload.usage_date)
    .bind(hours)
    .bind(id)
    .fetch_optional(pool.get_ref())
    .await?;

    let Some(updated) = updated else {
        return Err(AppError::conflict("Usage was already requested for this record"));
    };

    tracing::info!(compensatory_id = id, user_id = auth.user_id, hours, "Compensatory usage requested");
    Ok(HttpResponse::Ok().json(updated))
}

#[utoipa::path(
    put,
    path = "/api/compensatorys/{compensatory_id}/approve-usage",
    params(("compensatory_id" = i64, Path, description = "Compensatory record ID")),
    responses(
        (status = 200, description = "Usage approved and hours deducted", body = Compensatory),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Record not found"),
        (status = 409, description = "Not pending or insufficient balance", body = Object, example = json!({
            "message": "Insufficient compensatory balance"
        }))
    ),
    security(("bearer_auth" = [])),
    tag = "Compensatory"
)]
pub async fn approve_usage(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    auth.require_admin()?;
    let id = path.into_inner();

    let mut tx = pool.begin().await?;
    let record = lock_record(&mut tx, id).await?;
    if record.usage_status() != Some(UsageStatus::Pending) {
        return Err(AppError::conflict("No pending usage request for this record"));
    }
    let hours = record.usage_hours.unwrap_or(record.hours);

    let balance: Option<f64> = sqlx::query_scalar(
        r#"
        UPDATE users
        SET compensatory_hours_balance = compensatory_hours_balance - $1, updated_at = NOW()
        WHERE id = $2 AND compensatory_hours_balance >= $1
        RETURNING compensatory_hours_balance
        "#,
    )
    .bind(hours)
    .bind(record.user_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(balance) = balance else {
        tracing::warn!(compensatory_id = id, user_id = record.user_id, "Usage approval blocked by balance");
        return Err(AppError::conflict("Insufficient compensatory balance"));
    };

    let approved = sqlx::query_as::<_, Compensatory>(&format!(
        r#"
        UPDATE compensatorys
        SET usage_status = $1, usage_reviewed_by = $2, usage_reviewed_at = NOW(), updated_at = NOW()
        WHERE id = $3
        RETURNING {COMPENSATORY_COLUMNS}
        "#
    ))
    .bind(UsageStatus::Approved.as_ref())
    .bind(auth.user_id)
    .bind(id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    let owner = contact(pool.get_ref(), approved.user_id).await?;
    state.notifier.dispatch(
        EmailKind::CompensatoryUsageApproved,
        vec![owner.email],
        json!({
            "employee_name": owner.full_name,
            "hours": hours,
            "usage_date": approved.usage_date.map(|d| d.to_string()),
            "balance_hours": balance,
        }),
    );

    tracing::info!(compensatory_id = id, admin_id = auth.user_id, hours, balance, "Compensatory usage approved");
    Ok(HttpResponse::Ok().json(approved))
}

#[utoipa::path(
    put,
    path = "/api/compensatorys/{compensatory_id}/reject-usage",
    params(("compensatory_id" = i64, Path, description = "Compensatory record ID")),
    request_body(content = ReasonPayload, description = "Optional reason shown to the employee"),
    responses(
        (status = 200, description = "Usage rejected", body = Compensatory),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Record not found"),
        (status = 409, description = "No pending usage request")
    ),
    security(("bearer_auth" = [])),
    tag = "Compensatory"
)]
pub async fn reject_usage(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    state: web::Data<AppState>,
    path: web::Path<i64>,
    payload: Option<web::Json<ReasonPayload>>,
) -> AppResult<HttpResponse> {
    auth.require_admin()?;
    let id = path.into_inner();
    let reason = reason(payload);

    let rejected = sqlx::query_as::<_, Compensatory>(&format!(
        r#"
        UPDATE compensatorys
        SET usage_status = $1, usage_reviewed_by = $2, usage_reviewed_at = NOW(),
            rejection_reason = $3, updated_at = NOW()
        WHERE id = $4 AND usage_status = 'pending'
        RETURNING {COMPENSATORY_COLUMNS}
        "#
    ))
    .bind(UsageStatus::Rejected.as_ref())
    .bind(auth.user_id)
    .bind(&reason)
    .bind(id)
    .fetch_optional(pool.get_ref())
    .await?;

    let Some(rejected) = rejected else {
        return Err(already_processed(pool.get_ref(), id).await);
    };

    let owner = contact(pool.get_ref(), rejected.user_id).await?;
    state.notifier.dispatch(
        EmailKind::CompensatoryUsageRejected,
        vec![owner.email],
        json!({
            "employee_name": owner.full_name,
            "hours": rejected.usage_hours.unwrap_or(rejected.hours),
            "usage_date": rejected.usage_date.map(|d| d.to_string()),
            "reason": reason,
        }),
    );

    tracing::info!(compensatory_id = id, admin_id = auth.user_id, "Compensatory usage rejected");
    Ok(HttpResponse::Ok().json(rejected))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_hours_are_optional() {
        let req: UsageRequest = serde_json::from_value(json!({"usage_date": "2026-03-02"})).unwrap();
        assert!(req.hours.is_none());
    }

    #[test]
    fn report_requires_all_fields() {
        let missing = serde_json::from_value::<CompensatoryRequest>(json!({"hours": 4.0}));
        assert!(missing.is_err());
    }
}
