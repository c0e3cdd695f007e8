use anyhow::Result;
use futures_util::StreamExt;
use moka::future::Cache;
use once_cell::sync::Lazy;
use sqlx::PgPool;
use std::time::Duration;

use crate::model::user::normalize_email;

/// true  => email is TAKEN
/// false => email is AVAILABLE (usually we store only taken)
pub static EMAIL_CACHE: Lazy<Cache<String, bool>> = Lazy::new(|| {
    Cache::builder()
        .max_capacity(50_000)
        .time_to_live(Duration::from_secs(86400)) // 24h TTL
        .build()
});

/// Mark a single email as taken
pub async fn mark_taken(email: &str) {
    EMAIL_CACHE.insert(normalize_email(email), true).await;
}

/// Forget an email, e.g. after a user changed address
pub async fn forget(email: &str) {
    EMAIL_CACHE.invalidate(&normalize_email(email)).await;
}

/// Check if email is taken
pub async fn is_taken(email: &str) -> bool {
    EMAIL_CACHE
        .get(&normalize_email(email))
        .await
        .unwrap_or(false)
}

async fn batch_mark(emails: &[String]) {
    let futures: Vec<_> = emails
        .iter()
        .map(|e| EMAIL_CACHE.insert(normalize_email(e), true))
        .collect();

    futures::future::join_all(futures).await;
}

/// Load emails of users who logged in recently (batched)
pub async fn warmup_email_cache(pool: &PgPool, days: i32, batch_size: usize) -> Result<()> {
    let mut stream = sqlx::query_as::<_, (String,)>(
        r#"
        SELECT email
        FROM users
        WHERE last_login_at >= NOW() - make_interval(days => $1)
        ORDER BY last_login_at DESC
        "#,
    )
    .bind(days)
    .fetch(pool);

    let mut batch = Vec::with_capacity(batch_size);
    let mut total_count = 0usize;

    while let Some(row) = stream.next().await {
        let (email,) = row?;
        batch.push(email);
        total_count += 1;

        if batch.len() >= batch_size {
            batch_mark(&batch).await;
            batch.clear();
        }
    }

    if !batch.is_empty() {
        batch_mark(&batch).await;
    }

    log::info!(
        "Email cache warmup complete: {} recent users (last {} days)",
        total_count,
        days
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_web::test]
    async fn lookups_ignore_case() {
        mark_taken("Consul@Embassy.Example").await;
        assert!(is_taken("consul@embassy.example").await);
        forget("CONSUL@embassy.example").await;
        assert!(!is_taken("consul@embassy.example").await);
    }
}
