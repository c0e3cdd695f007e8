use crate::{
    auth::{
        cookies::{ACCESS_COOKIE, REFRESH_COOKIE, bearer_token, clear_auth_cookies, set_auth_cookies},
        jwt::{TokenSubject, generate_access_token, generate_refresh_token, verify_token},
        password::verify_password,
    },
    config::Config,
    error::{AppError, AppResult},
    model::user::{User, normalize_email},
    models::{Claims, LoginReqDto, LoginResponse, TokenType},
    services::sessions::{self, NewSession},
    state::AppState,
    utils::client_ip::client_ip,
};
use actix_web::{HttpRequest, HttpResponse, http::header::USER_AGENT, web};
use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::PgPool;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

const USER_COLUMNS: &str = "id, email, full_name, password_hash, role, is_active, \
     vacation_days_balance, compensatory_hours_balance";

fn unauthorized(message: &str, config: &Config) -> HttpResponse {
    let mut builder = HttpResponse::Unauthorized();
    clear_auth_cookies(&mut builder, config);
    builder.json(json!({ "message": message }))
}

fn token_error(e: jsonwebtoken::errors::Error) -> AppError {
    AppError::Internal(format!("token signing failed: {e}"))
}

/// Issues an access token and a refresh token for `subject`. The refresh
/// token never outlives its device session.
fn issue_tokens(
    subject: &TokenSubject,
    refresh_ttl: usize,
    config: &Config,
) -> AppResult<(String, String, Claims)> {
    let access = generate_access_token(subject, &config.jwt_secret, config.access_token_ttl)
        .map_err(token_error)?;
    let (refresh, claims) =
        generate_refresh_token(subject, &config.jwt_secret, refresh_ttl).map_err(token_error)?;
    Ok((access, refresh, claims))
}

/* =========================
Login
========================= */
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginReqDto,
    responses(
        (status = 200, description = "Logged in; auth cookies are set as well", body = LoginResponse),
        (status = 400, description = "Email or password missing"),
        (status = 401, description = "Invalid credentials or disabled account", body = Object, example = json!({
            "message": "Invalid credentials"
        })),
        (status = 429, description = "Too many login attempts")
    ),
    tag = "Auth"
)]
#[instrument(
    name = "auth_login",
    skip(req, pool, config, payload),
    fields(email = %payload.email)
)]
pub async fn login(
    req: HttpRequest,
    payload: web::Json<LoginReqDto>,
    pool: web::Data<PgPool>,
    config: web::Data<Config>,
) -> AppResult<HttpResponse> {
    info!("Login request received");

    let email = normalize_email(&payload.email);
    if email.is_empty() || payload.password.is_empty() {
        return Err(AppError::bad_request("Email and password are required"));
    }

    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
    ))
    .bind(&email)
    .fetch_optional(pool.get_ref())
    .await
    .map_err(|e| {
        error!(error = %e, "Database error while fetching user");
        AppError::Database(e)
    })?;

    let Some(user) = user else {
        info!("Invalid credentials: user not found");
        return Err(AppError::unauthorized("Invalid credentials"));
    };

    if let Err(e) = verify_password(&payload.password, &user.password_hash) {
        info!(user_id = user.id, error = %e, "Invalid credentials: password mismatch");
        return Err(AppError::unauthorized("Invalid credentials"));
    }

    if !user.is_active {
        info!(user_id = user.id, "Login refused: account disabled");
        return Err(AppError::unauthorized("Account disabled"));
    }

    let role = user
        .role()
        .ok_or_else(|| AppError::Internal(format!("user {} has unknown role {}", user.id, user.role)))?;

    let session_id = Uuid::new_v4();
    let refresh_ttl = if payload.remember_me {
        config.remember_me_ttl
    } else {
        config.refresh_token_ttl
    };
    let subject = TokenSubject {
        user_id: user.id,
        email: user.email.clone(),
        role: role.to_string(),
        session_id,
    };
    let (access_token, refresh_token, refresh_claims) = issue_tokens(&subject, refresh_ttl, &config)?;

    let user_agent = req
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(|ua| ua.chars().take(512).collect::<String>());
    let ip = client_ip(&req, config.trust_proxy_headers);

    debug!(session_id = %session_id, jti = %refresh_claims.jti, "Creating device session");
    sessions::create_session(
        pool.get_ref(),
        session_id,
        NewSession {
            user_id: user.id,
            user_agent: user_agent.as_deref(),
            ip_address: Some(&ip),
            remember_me: payload.remember_me,
            refresh_jti: &refresh_claims.jti,
            expires_at: Utc::now() + Duration::seconds(refresh_ttl as i64),
        },
    )
    .await
    .map_err(|e| {
        error!(error = %e, "Failed to store device session");
        AppError::Database(e)
    })?;

    // non-fatal
    if let Err(e) = sqlx::query("UPDATE users SET last_login_at = NOW() WHERE id = $1")
        .bind(user.id)
        .execute(pool.get_ref())
        .await
    {
        error!(error = %e, "Failed to update last_login_at");
    }

    info!(user_id = user.id, session_id = %session_id, remember_me = payload.remember_me, "Login successful");

    let mut builder = HttpResponse::Ok();
    set_auth_cookies(&mut builder, &access_token, &refresh_token, payload.remember_me, &config);
    Ok(builder.json(LoginResponse {
        access_token,
        refresh_token,
        expires_in: config.access_token_ttl,
        session_id,
    }))
}

/* =========================
Refresh
========================= */
/// Rotates the refresh token. Presenting an already rotated token revokes
/// the whole session.
#[utoipa::path(
    post,
    path = "/auth/refresh",
    responses(
        (status = 200, description = "New token pair; auth cookies are refreshed", body = LoginResponse),
        (status = 401, description = "Missing, invalid, reused or revoked refresh token")
    ),
    security(("bearer_auth" = [])),
    tag = "Auth"
)]
#[instrument(name = "auth_refresh", skip_all)]
pub async fn refresh_token(
    req: HttpRequest,
    pool: web::Data<PgPool>,
    config: web::Data<Config>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let token = match bearer_token(req.headers()) {
        Some(t) => t.to_string(),
        None => match req.cookie(REFRESH_COOKIE) {
            Some(c) if !c.value().is_empty() => c.value().to_string(),
            _ => return Ok(unauthorized("Missing refresh token", &config)),
        },
    };

    let claims = match verify_token(&token, &config.jwt_secret) {
        Ok(c) if c.token_type == TokenType::Refresh => c,
        Ok(_) => return Ok(unauthorized("Refresh token required", &config)),
        Err(e) => {
            debug!(error = %e, "Rejected refresh token");
            return Ok(unauthorized("Invalid or expired token", &config));
        }
    };

    let session = sessions::find_session(pool.get_ref(), claims.sid).await?;
    let Some(session) = session.filter(|s| s.is_live(Utc::now()) && s.user_id == claims.user_id) else {
        return Ok(unauthorized("Session expired or revoked", &config));
    };

    if session.refresh_jti != claims.jti {
        warn!(session_id = %session.id, user_id = session.user_id, "Refresh token reuse detected, revoking session");
        sessions::revoke_session(pool.get_ref(), &state.revoked, session.id, None).await?;
        return Ok(unauthorized("Session revoked", &config));
    }

    let user = sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
        .bind(session.user_id)
        .fetch_optional(pool.get_ref())
        .await?;
    let Some((user, role)) = user
        .filter(|u| u.is_active)
        .and_then(|u| u.role().map(|r| (u, r)))
    else {
        sessions::revoke_session(pool.get_ref(), &state.revoked, session.id, None).await?;
        return Ok(unauthorized("Account disabled", &config));
    };

    let remaining = (session.expires_at - Utc::now()).num_seconds().max(1) as usize;
    let subject = TokenSubject {
        user_id: user.id,
        email: user.email,
        role: role.to_string(),
        session_id: session.id,
    };
    let (access_token, refresh_token, refresh_claims) = issue_tokens(&subject, remaining, &config)?;

    if !sessions::rotate_refresh_jti(pool.get_ref(), session.id, &claims.jti, &refresh_claims.jti).await? {
        // lost a race with another refresh using the same token
        warn!(session_id = %session.id, "Concurrent refresh rejected");
        return Ok(unauthorized("Session revoked", &config));
    }

    debug!(session_id = %session.id, user_id = user.id, "Tokens refreshed");

    let mut builder = HttpResponse::Ok();
    set_auth_cookies(&mut builder, &access_token, &refresh_token, session.remember_me, &config);
    Ok(builder.json(LoginResponse {
        access_token,
        refresh_token,
        expires_in: config.access_token_ttl,
        session_id: session.id,
    }))
}

/* =========================
Logout
========================= */
/// Revokes the session behind whichever token is presented and always
/// clears the auth cookies.
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses((status = 204, description = "Logged out")),
    tag = "Auth"
)]
#[instrument(name = "auth_logout", skip_all)]
pub async fn logout(
    req: HttpRequest,
    pool: web::Data<PgPool>,
    config: web::Data<Config>,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    let mut candidates: Vec<String> = Vec::with_capacity(3);
    if let Some(t) = bearer_token(req.headers()) {
        candidates.push(t.to_string());
    }
    for name in [ACCESS_COOKIE, REFRESH_COOKIE] {
        if let Some(c) = req.cookie(name) {
            if !c.value().is_empty() {
                candidates.push(c.value().to_string());
            }
        }
    }

    let claims = candidates
        .iter()
        .find_map(|t| verify_token(t, &config.jwt_secret).ok());

    if let Some(claims) = claims {
        let revoked =
            sessions::revoke_session(pool.get_ref(), &state.revoked, claims.sid, Some(claims.user_id))
                .await?;
        info!(user_id = claims.user_id, session_id = %claims.sid, revoked, "Logout");
    }

    let mut builder = HttpResponse::NoContent();
    clear_auth_cookies(&mut builder, &config);
    Ok(builder.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::http::{StatusCode, header::SET_COOKIE};

    #[test]
    fn rejected_refresh_clears_both_cookies() {
        let resp = unauthorized("Session revoked", &Config::for_tests());
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let cleared: Vec<_> = resp
            .headers()
            .get_all(SET_COOKIE)
            .filter_map(|v| v.to_str().ok())
            .collect();
        assert!(cleared.iter().any(|c| c.starts_with(ACCESS_COOKIE)));
        assert!(cleared.iter().any(|c| c.starts_with(REFRESH_COOKIE)));
    }

    #[test]
    fn refresh_token_is_bound_to_the_subject_session() {
        let config = Config::for_tests();
        let subject = TokenSubject {
            user_id: 3,
            email: "consul@embassy.example".into(),
            role: "admin".into(),
            session_id: Uuid::new_v4(),
        };
        let (access, refresh, claims) = issue_tokens(&subject, 120, &config).unwrap();
        assert_ne!(access, refresh);
        assert_eq!(claims.sid, subject.session_id);
        let decoded = verify_token(&refresh, &config.jwt_secret).unwrap();
        assert_eq!(decoded.jti, claims.jti);
        assert_eq!(decoded.token_type, TokenType::Refresh);
    }
}
