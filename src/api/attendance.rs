use actix_web::{HttpResponse, web};
use chrono::NaiveDate;
use serde::Deserialize;
use sqlx::PgPool;
use utoipa::{IntoParams, ToSchema};

use crate::auth::auth::AuthUser;
use crate::db::is_unique_violation;
use crate::error::{AppError, AppResult};
use crate::model::attendance::{Attendance, AttendanceResponse};
use crate::models::{Paginated, PaginatedAttendance, paginate};
use crate::utils::db_utils::{Filters, SqlValue, fetch_page};

const ATTENDANCE_COLUMNS: &str = "id, user_id, check_in, check_out, notes";

#[derive(Deserialize, ToSchema, Default)]
pub struct CheckInRequest {
    #[schema(example = "Working from the consular section")]
    pub notes: Option<String>,
}

#[derive(Deserialize, IntoParams)]
pub struct AttendanceFilter {
    /// Admins only; employees always see their own
    pub user_id: Option<i64>,
    /// Inclusive, by check-in date (UTC)
    #[param(value_type = Option<String>, format = Date)]
    pub from: Option<NaiveDate>,
    /// Inclusive, by check-in date (UTC)
    #[param(value_type = Option<String>, format = Date)]
    pub to: Option<NaiveDate>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

/// Check-in endpoint
#[utoipa::path(
    post,
    path = "/api/attendance/check-in",
    request_body(content = CheckInRequest, description = "Optional notes"),
    responses(
        (status = 201, description = "Checked in", body = AttendanceResponse),
        (status = 401, description = "Unauthorized"),
        (status = 409, description = "Already checked in", body = Object, example = json!({
            "message": "You are already checked in"
        }))
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn check_in(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    payload: Option<web::Json<CheckInRequest>>,
) -> AppResult<HttpResponse> {
    let notes = payload
        .map(|p| p.into_inner())
        .unwrap_or_default()
        .notes
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());

    // at most one open attendance per user, enforced by a partial unique index
    let attendance = sqlx::query_as::<_, Attendance>(&format!(
        "INSERT INTO attendances (user_id, notes) VALUES ($1, $2) RETURNING {ATTENDANCE_COLUMNS}"
    ))
    .bind(auth.user_id)
    .bind(notes)
    .fetch_one(pool.get_ref())
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::conflict("You are already checked in")
        } else {
            tracing::error!(error = %e, user_id = auth.user_id, "Check-in failed");
            AppError::Database(e)
        }
    })?;

    tracing::debug!(user_id = auth.user_id, attendance_id = attendance.id, "Checked in");
    Ok(HttpResponse::Created().json(AttendanceResponse::from(attendance)))
}

/// Check-out endpoint
#[utoipa::path(
    put,
    path = "/api/attendance/check-out",
    responses(
        (status = 200, description = "Checked out", body = AttendanceResponse),
        (status = 400, description = "No open attendance", body = Object, example = json!({
            "message": "You are not checked in"
        })),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn check_out(auth: AuthUser, pool: web::Data<PgPool>) -> AppResult<HttpResponse> {
    let attendance = sqlx::query_as::<_, Attendance>(&format!(
        r#"
        UPDATE attendances SET check_out = NOW()
        WHERE user_id = $1 AND check_out IS NULL
        RETURNING {ATTENDANCE_COLUMNS}
        "#
    ))
    .bind(auth.user_id)
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| AppError::bad_request("You are not checked in"))?;

    tracing::debug!(user_id = auth.user_id, attendance_id = attendance.id, "Checked out");
    Ok(HttpResponse::Ok().json(AttendanceResponse::from(attendance)))
}

#[utoipa::path(
    get,
    path = "/api/attendance",
    params(AttendanceFilter),
    responses(
        (status = 200, description = "Paginated attendance with worked hours", body = PaginatedAttendance),
        (status = 400, description = "from is after to"),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Attendance"
)]
pub async fn list_attendance(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    query: web::Query<AttendanceFilter>,
) -> AppResult<HttpResponse> {
    let query = query.into_inner();
    let (page, per_page, offset) = paginate(query.page, query.per_page, 31);

    if let (Some(from), Some(to)) = (query.from, query.to) {
        if from > to {
            return Err(AppError::bad_request("from cannot be after to"));
        }
    }

    let mut filters = Filters::new();
    let user_filter = if auth.is_admin() {
        query.user_id
    } else {
        Some(auth.user_id)
    };
    if let Some(user_id) = user_filter {
        filters.push("user_id", "=", SqlValue::I64(user_id));
    }
    if let Some(from) = query.from {
        filters.push("(check_in AT TIME ZONE 'UTC')::date", ">=", SqlValue::Date(from));
    }
    if let Some(to) = query.to {
        filters.push("(check_in AT TIME ZONE 'UTC')::date", "<=", SqlValue::Date(to));
    }

    let (rows, total) = fetch_page::<Attendance>(
        pool.get_ref(),
        &format!("SELECT {ATTENDANCE_COLUMNS} FROM attendances"),
        "attendances",
        filters,
        "check_in DESC, id DESC",
        per_page,
        offset,
    )
    .await?;

    Ok(HttpResponse::Ok().json(Paginated {
        data: rows.into_iter().map(AttendanceResponse::from).collect::<Vec<_>>(),
        page,
        per_page,
        total,
    }))
}
