//! Device-session bookkeeping shared by auth, user admin and restore.

use chrono::{DateTime, Utc};
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use crate::model::session::{DeviceSession, SESSION_COLUMNS};
use crate::utils::session_cache::RevokedSessions;

pub struct NewSession<'a> {
    pub user_id: i64,
    pub user_agent: Option<&'a str>,
    pub ip_address: Option<&'a str>,
    pub remember_me: bool,
    pub refresh_jti: &'a str,
    pub expires_at: DateTime<Utc>,
}

pub async fn create_session(pool: &PgPool, id: Uuid, new: NewSession<'_>) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO device_sessions (id, user_id, user_agent, ip_address, remember_me, refresh_jti, expires_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(id)
    .bind(new.user_id)
    .bind(new.user_agent)
    .bind(new.ip_address)
    .bind(new.remember_me)
    .bind(new.refresh_jti)
    .bind(new.expires_at)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn find_session<'e>(
    executor: impl PgExecutor<'e>,
    id: Uuid,
) -> Result<Option<DeviceSession>, sqlx::Error> {
    sqlx::query_as::<_, DeviceSession>(&format!(
        "SELECT {SESSION_COLUMNS} FROM device_sessions WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(executor)
    .await
}

/// Live sessions of a user, newest activity first.
pub async fn live_sessions(pool: &PgPool, user_id: i64) -> Result<Vec<DeviceSession>, sqlx::Error> {
    sqlx::query_as::<_, DeviceSession>(&format!(
        "SELECT {SESSION_COLUMNS} FROM device_sessions \
         WHERE user_id = $1 AND revoked_at IS NULL AND expires_at > NOW() \
         ORDER BY last_seen_at DESC"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await
}

/// Swaps the refresh jti only if it still matches `expected`. Returns false
/// when the session is gone, revoked, expired or the jti was already rotated.
pub async fn rotate_refresh_jti(
    pool: &PgPool,
    id: Uuid,
    expected: &str,
    next: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE device_sessions
        SET refresh_jti = $3, last_seen_at = NOW()
        WHERE id = $1 AND refresh_jti = $2 AND revoked_at IS NULL AND expires_at > NOW()
        "#,
    )
    .bind(id)
    .bind(expected)
    .bind(next)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Revokes one session, optionally only if it belongs to `owner`.
/// Returns whether a live session was revoked.
pub async fn revoke_session(
    pool: &PgPool,
    revoked: &RevokedSessions,
    id: Uuid,
    owner: Option<i64>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE device_sessions SET revoked_at = NOW()
        WHERE id = $1 AND revoked_at IS NULL AND ($2::BIGINT IS NULL OR user_id = $2)
        "#,
    )
    .bind(id)
    .bind(owner)
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(false);
    }
    revoked.revoke(id).await;
    tracing::info!(session_id = %id, "Device session revoked");
    Ok(true)
}

/// Revokes every live session of a user except `keep`. Returns the count.
pub async fn revoke_user_sessions(
    pool: &PgPool,
    revoked: &RevokedSessions,
    user_id: i64,
    keep: Option<Uuid>,
) -> Result<usize, sqlx::Error> {
    let ids: Vec<Uuid> = sqlx::query_scalar(
        r#"
        UPDATE device_sessions SET revoked_at = NOW()
        WHERE user_id = $1 AND revoked_at IS NULL AND ($2::UUID IS NULL OR id <> $2)
        RETURNING id
        "#,
    )
    .bind(user_id)
    .bind(keep)
    .fetch_all(pool)
    .await?;

    revoked.revoke_many(&ids).await;
    tracing::info!(user_id, count = ids.len(), "Device sessions revoked");
    Ok(ids.len())
}

/// Ids of every session that could still hold a valid access token.
pub async fn all_live_session_ids<'e>(executor: impl PgExecutor<'e>) -> Result<Vec<Uuid>, sqlx::Error> {
    sqlx::query_scalar("SELECT id FROM device_sessions WHERE revoked_at IS NULL AND expires_at > NOW()")
        .fetch_all(executor)
        .await
}
