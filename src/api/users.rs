use actix_web::{HttpResponse, web};
use serde::Deserialize;
use serde_json::{Value, json};
use sqlx::PgPool;
use utoipa::{IntoParams, ToSchema};

use crate::auth::auth::AuthUser;
use crate::auth::password::{hash_password, verify_password};
use crate::db::is_unique_violation;
use crate::error::{AppError, AppResult};
use crate::model::role::Role;
use crate::model::user::{
    MIN_PASSWORD_LEN, PROFILE_COLUMNS, User, UserProfile, is_plausible_email, normalize_email,
};
use crate::models::{Paginated, PaginatedUsers, paginate};
use crate::services::sessions::revoke_user_sessions;
use crate::state::AppState;
use crate::utils::db_utils::{Filters, SqlValue, build_update_sql, execute_update, fetch_page};
use crate::utils::{email_cache, email_filter};

const UPDATABLE_COLUMNS: &[&str] = &["full_name", "email", "role"];

#[derive(Deserialize, ToSchema)]
pub struct CreateUser {
    #[schema(example = "ana.perez@embassy.example", format = "email")]
    pub email: String,
    #[schema(example = "Ana Pérez")]
    pub full_name: String,
    #[schema(example = "correct horse battery")]
    pub password: String,
    pub role: Role,
    #[schema(example = 20)]
    pub vacation_days_balance: Option<i32>,
    #[schema(example = 0.0)]
    pub compensatory_hours_balance: Option<f64>,
}

#[derive(Deserialize, IntoParams)]
pub struct UserFilter {
    /// `admin` or `employee`
    pub role: Option<String>,
    pub is_active: Option<bool>,
    /// Matches name or email
    pub search: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Deserialize, ToSchema)]
pub struct ChangePassword {
    pub current_password: String,
    pub new_password: String,
}

#[derive(Deserialize, ToSchema)]
pub struct UserStatus {
    pub is_active: bool,
}

#[derive(Deserialize, ToSchema)]
pub struct BalanceUpdate {
    #[schema(example = 15)]
    pub vacation_days_balance: Option<i32>,
    #[schema(example = 4.5)]
    pub compensatory_hours_balance: Option<f64>,
}

pub(crate) async fn fetch_profile(pool: &PgPool, user_id: i64) -> AppResult<UserProfile> {
    sqlx::query_as::<_, UserProfile>(&format!(
        "SELECT {PROFILE_COLUMNS} FROM users WHERE id = $1"
    ))
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("User not found"))
}

/// Filter says "never seen" → available. Cache says taken → taken.
/// Otherwise ask the database.
async fn is_email_available(email: &str, pool: &PgPool) -> AppResult<bool> {
    if !email_filter::might_exist(email) {
        return Ok(true);
    }
    if email_cache::is_taken(email).await {
        return Ok(false);
    }

    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
        .bind(email)
        .fetch_one(pool)
        .await?;
    if exists {
        email_cache::mark_taken(email).await;
    }
    Ok(!exists)
}

fn validate_password(password: &str) -> AppResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::bad_request(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

fn hash(password: &str) -> AppResult<String> {
    hash_password(password).map_err(|e| AppError::Internal(format!("password hashing failed: {e}")))
}

/* =========================
Current user
========================= */
#[utoipa::path(
    get,
    path = "/api/me",
    responses(
        (status = 200, description = "Profile of the caller", body = UserProfile),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn me(auth: AuthUser, pool: web::Data<PgPool>) -> AppResult<HttpResponse> {
    let profile = fetch_profile(pool.get_ref(), auth.user_id).await?;
    Ok(HttpResponse::Ok().json(profile))
}

/// Changing the password signs out every other device.
#[utoipa::path(
    put,
    path = "/api/me/password",
    request_body = ChangePassword,
    responses(
        (status = 200, description = "Password changed", body = Object, example = json!({
            "message": "Password changed",
            "revoked_sessions": 2
        })),
        (status = 400, description = "New password too short"),
        (status = 401, description = "Current password is wrong")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn change_password(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    state: web::Data<AppState>,
    payload: web::Json<ChangePassword>,
) -> AppResult<HttpResponse> {
    validate_password(&payload.new_password)?;

    let user = sqlx::query_as::<_, User>(
        "SELECT id, email, full_name, password_hash, role, is_active, vacation_days_balance, \
         compensatory_hours_balance FROM users WHERE id = $1",
    )
    .bind(auth.user_id)
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| AppError::not_found("User not found"))?;

    if verify_password(&payload.current_password, &user.password_hash).is_err() {
        tracing::warn!(user_id = auth.user_id, "Password change with wrong current password");
        return Err(AppError::unauthorized("Current password is incorrect"));
    }

    let new_hash = hash(&payload.new_password)?;
    sqlx::query("UPDATE users SET password_hash = $1, updated_at = NOW() WHERE id = $2")
        .bind(new_hash)
        .bind(auth.user_id)
        .execute(pool.get_ref())
        .await?;

    let revoked =
        revoke_user_sessions(pool.get_ref(), &state.revoked, auth.user_id, Some(auth.session_id))
            .await?;

    tracing::info!(user_id = auth.user_id, "Password changed");
    Ok(HttpResponse::Ok().json(json!({
        "message": "Password changed",
        "revoked_sessions": revoked
    })))
}

/* =========================
User administration
========================= */
#[utoipa::path(
    get,
    path = "/api/users",
    params(UserFilter),
    responses(
        (status = 200, description = "Paginated user list", body = PaginatedUsers),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn list_users(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    query: web::Query<UserFilter>,
) -> AppResult<HttpResponse> {
    auth.require_admin()?;
    let query = query.into_inner();
    let (page, per_page, offset) = paginate(query.page, query.per_page, 20);

    let mut filters = Filters::new();
    if let Some(role) = query.role.as_deref() {
        let role = Role::parse(role).ok_or_else(|| AppError::bad_request("Invalid role"))?;
        filters.push("role", "=", SqlValue::String(role.to_string()));
    }
    if let Some(active) = query.is_active {
        filters.push("is_active", "=", SqlValue::Bool(active));
    }
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        filters.push_with(
            |n| format!("(full_name ILIKE ${n} OR email ILIKE ${n})"),
            SqlValue::String(format!("%{search}%")),
        );
    }

    let (data, total) = fetch_page::<UserProfile>(
        pool.get_ref(),
        &format!("SELECT {PROFILE_COLUMNS} FROM users"),
        "users",
        filters,
        "full_name ASC, id ASC",
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
    post,
    path = "/api/users",
    request_body = CreateUser,
    responses(
        (status = 201, description = "User created", body = UserProfile),
        (status = 400, description = "Validation failed"),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Email already registered", body = Object, example = json!({
            "message": "Email already registered"
        }))
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn create_user(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    payload: web::Json<CreateUser>,
) -> AppResult<HttpResponse> {
    auth.require_admin()?;
    let payload = payload.into_inner();

    let email = normalize_email(&payload.email);
    if !is_plausible_email(&email) {
        return Err(AppError::bad_request("Invalid email address"));
    }
    let full_name = payload.full_name.trim();
    if full_name.is_empty() {
        return Err(AppError::bad_request("full_name is required"));
    }
    validate_password(&payload.password)?;

    let vacation_days = payload.vacation_days_balance.unwrap_or(0);
    let comp_hours = payload.compensatory_hours_balance.unwrap_or(0.0);
    if vacation_days < 0 || !comp_hours.is_finite() || comp_hours < 0.0 {
        return Err(AppError::bad_request("Balances cannot be negative"));
    }

    if !is_email_available(&email, pool.get_ref()).await? {
        return Err(AppError::conflict("Email already registered"));
    }

    let password_hash = hash(&payload.password)?;

    let created = sqlx::query_as::<_, UserProfile>(&format!(
        r#"
        INSERT INTO users (email, full_name, password_hash, role, vacation_days_balance, compensatory_hours_balance)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING {PROFILE_COLUMNS}
        "#
    ))
    .bind(&email)
    .bind(full_name)
    .bind(password_hash)
    .bind(payload.role.as_ref())
    .bind(vacation_days)
    .bind(comp_hours)
    .fetch_one(pool.get_ref())
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::conflict("Email already registered")
        } else {
            tracing::error!(error = %e, email = %email, "Failed to create user");
            AppError::Database(e)
        }
    })?;

    email_filter::insert(&email);
    email_cache::mark_taken(&email).await;

    tracing::info!(user_id = created.id, admin_id = auth.user_id, "User created");
    Ok(HttpResponse::Created().json(created))
}

#[utoipa::path(
    get,
    path = "/api/users/{user_id}",
    params(("user_id" = i64, Path, description = "User ID")),
    responses(
        (status = 200, description = "User found", body = UserProfile),
        (status = 403, description = "Not your profile"),
        (status = 404, description = "User not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn get_user(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
) -> AppResult<HttpResponse> {
    let user_id = path.into_inner();
    auth.require_self_or_admin(user_id)?;
    Ok(HttpResponse::Ok().json(fetch_profile(pool.get_ref(), user_id).await?))
}

/// Partial update of `full_name`, `email` and `role`.
#[utoipa::path(
    put,
    path = "/api/users/{user_id}",
    params(("user_id" = i64, Path, description = "User ID")),
    request_body(
        content = Object,
        description = "Any subset of full_name, email, role",
        example = json!({ "full_name": "Ana Pérez Gómez", "role": "admin" })
    ),
    responses(
        (status = 200, description = "User updated", body = UserProfile),
        (status = 400, description = "Unknown or invalid field"),
        (status = 404, description = "User not found"),
        (status = 409, description = "Email already registered")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn update_user(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    state: web::Data<AppState>,
    path: web::Path<i64>,
    body: web::Json<Value>,
) -> AppResult<HttpResponse> {
    auth.require_admin()?;
    let user_id = path.into_inner();
    let mut body = body.into_inner();

    let current = fetch_profile(pool.get_ref(), user_id).await?;
    let mut new_email = None;
    let mut role_changed = false;

    if let Some(obj) = body.as_object_mut() {
        if let Some(email) = obj.get("email") {
            let email = email
                .as_str()
                .map(normalize_email)
                .filter(|e| is_plausible_email(e))
                .ok_or_else(|| AppError::bad_request("Invalid email address"))?;
            if email != current.email {
                if !is_email_available(&email, pool.get_ref()).await? {
                    return Err(AppError::conflict("Email already registered"));
                }
                new_email = Some(email.clone());
            }
            obj.insert("email".into(), Value::String(email));
        }
        if let Some(role) = obj.get("role") {
            let role = role
                .as_str()
                .and_then(Role::parse)
                .ok_or_else(|| AppError::bad_request("Invalid role"))?;
            if user_id == auth.user_id && role != Role::Admin {
                return Err(AppError::bad_request("You cannot remove your own admin role"));
            }
            role_changed = is_role_change(&current.role, role);
        }
        if let Some(name) = obj.get("full_name") {
            let name = name
                .as_str()
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .ok_or_else(|| AppError::bad_request("full_name cannot be empty"))?;
            obj.insert("full_name".into(), Value::String(name));
        }
    }

    let update = build_update_sql("users", &body, UPDATABLE_COLUMNS, "id", user_id)?;
    let affected = execute_update(pool.get_ref(), update).await.map_err(|e| {
        if is_unique_violation(&e) {
            AppError::conflict("Email already registered")
        } else {
            tracing::error!(error = %e, user_id, "Failed to update user");
            AppError::Database(e)
        }
    })?;
    if affected == 0 {
        return Err(AppError::not_found("User not found"));
    }

    if let Some(email) = new_email {
        email_cache::forget(&current.email).await;
        email_filter::remove(&current.email);
        email_filter::insert(&email);
        email_cache::mark_taken(&email).await;
    }

    // Tokens carry the role, so the old one must not outlive the change.
    if role_changed {
        let revoked = revoke_user_sessions(pool.get_ref(), &state.revoked, user_id, None).await?;
        tracing::info!(user_id, revoked, "Role changed, sessions revoked");
    }

    tracing::info!(user_id, admin_id = auth.user_id, "User updated");
    Ok(HttpResponse::Ok().json(fetch_profile(pool.get_ref(), user_id).await?))
}

/// Deactivating a user signs them out everywhere.
#[utoipa::path(
    put,
    path = "/api/users/{user_id}/status",
    params(("user_id" = i64, Path, description = "User ID")),
    request_body = UserStatus,
    responses(
        (status = 200, description = "Status changed", body = UserProfile),
        (status = 400, description = "Cannot deactivate yourself"),
        (status = 404, description = "User not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn set_status(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    state: web::Data<AppState>,
    path: web::Path<i64>,
    payload: web::Json<UserStatus>,
) -> AppResult<HttpResponse> {
    auth.require_admin()?;
    let user_id = path.into_inner();

    if user_id == auth.user_id && !payload.is_active {
        return Err(AppError::bad_request("You cannot deactivate your own account"));
    }

    let profile = sqlx::query_as::<_, UserProfile>(&format!(
        "UPDATE users SET is_active = $1, updated_at = NOW() WHERE id = $2 RETURNING {PROFILE_COLUMNS}"
    ))
    .bind(payload.is_active)
    .bind(user_id)
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| AppError::not_found("User not found"))?;

    if !payload.is_active {
        revoke_user_sessions(pool.get_ref(), &state.revoked, user_id, None).await?;
    }

    tracing::info!(user_id, is_active = payload.is_active, admin_id = auth.user_id, "User status changed");
    Ok(HttpResponse::Ok().json(profile))
}

#[utoipa::path(
    put,
    path = "/api/users/{user_id}/balances",
    params(("user_id" = i64, Path, description = "User ID")),
    request_body = BalanceUpdate,
    responses(
        (status = 200, description = "Balances updated", body = UserProfile),
        (status = 400, description = "Negative or missing balance"),
        (status = 404, description = "User not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn set_balances(
    auth: AuthUser,
    pool: web::Data<PgPool>,
    path: web::Path<i64>,
    payload: web::Json<BalanceUpdate>,
) -> AppResult<HttpResponse> {
    auth.require_admin()?;
    let user_id = path.into_inner();

    if payload.vacation_days_balance.is_none() && payload.compensatory_hours_balance.is_none() {
        return Err(AppError::bad_request("No balance provided"));
    }
    if payload.vacation_days_balance.is_some_and(|d| d < 0)
        || payload
            .compensatory_hours_balance
            .is_some_and(|h| !h.is_finite() || h < 0.0)
    {
        return Err(AppError::bad_request("Balances cannot be negative"));
    }

    let profile = sqlx::query_as::<_, UserProfile>(&format!(
        r#"
        UPDATE users
        SET vacation_days_balance = COALESCE($1, vacation_days_balance),
            compensatory_hours_balance = COALESCE($2, compensatory_hours_balance),
            updated_at = NOW()
        WHERE id = $3
        RETURNING {PROFILE_COLUMNS}
        "#
    ))
    .bind(payload.vacation_days_balance)
    .bind(payload.compensatory_hours_balance)
    .bind(user_id)
    .fetch_optional(pool.get_ref())
    .await?
    .ok_or_else(|| AppError::not_found("User not found"))?;

    tracing::info!(
        user_id,
        admin_id = auth.user_id,
        vacation_days = profile.vacation_days_balance,
        compensatory_hours = profile.compensatory_hours_balance,
        "Balances adjusted"
    );
    Ok(HttpResponse::Ok().json(profile))
}

fn is_role_change(current: &str, requested: Role) -> bool {
    Role::parse(current) != Some(requested)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_a_different_role_counts_as_a_change() {
        assert!(is_role_change("admin", Role::Employee));
        assert!(is_role_change("employee", Role::Admin));
        assert!(!is_role_change("admin", Role::Admin));
        assert!(!is_role_change("employee", Role::Employee));
    }

    #[test]
    fn short_passwords_are_rejected() {
        assert!(validate_password("1234567").is_err());
        assert!(validate_password("12345678").is_ok());
        // counted in characters, not bytes
        assert!(validate_password("ñññññññ").is_err());
    }

    #[test]
    fn update_allow_list_excludes_secrets_and_balances() {
        for column in ["password_hash", "is_active", "vacation_days_balance", "id"] {
            assert!(!UPDATABLE_COLUMNS.contains(&column));
        }
    }
}
