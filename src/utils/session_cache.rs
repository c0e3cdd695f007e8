use anyhow::Result;
use futures_util::StreamExt;
use moka::future::Cache;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

/// Session ids revoked while access tokens for them may still be valid.
///
/// Access tokens are not looked up in the database on every request, so the
/// auth middleware consults this cache instead. Entries only need to live as
/// long as the access token TTL.
#[derive(Clone)]
pub struct RevokedSessions {
    cache: Cache<Uuid, ()>,
    ttl: Duration,
}

impl RevokedSessions {
    pub fn new(access_token_ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(100_000)
                .time_to_live(access_token_ttl)
                .build(),
            ttl: access_token_ttl,
        }
    }

    pub async fn revoke(&self, session_id: Uuid) {
        self.cache.insert(session_id, ()).await;
    }

    pub async fn revoke_many(&self, session_ids: &[Uuid]) {
        let futures: Vec<_> = session_ids
            .iter()
            .map(|id| self.cache.insert(*id, ()))
            .collect();

        futures::future::join_all(futures).await;
    }

    pub async fn is_revoked(&self, session_id: &Uuid) -> bool {
        self.cache.get(session_id).await.is_some()
    }

    /// Loads sessions revoked within the last access-token TTL (batched).
    pub async fn warmup(&self, pool: &PgPool, batch_size: usize) -> Result<()> {
        let mut stream = sqlx::query_as::<_, (Uuid,)>(
            r#"
            SELECT id
            FROM device_sessions
            WHERE revoked_at >= NOW() - make_interval(secs => $1)
            "#,
        )
        .bind(self.ttl.as_secs() as f64)
        .fetch(pool);

        let mut batch = Vec::with_capacity(batch_size);
        let mut total = 0usize;

        while let Some(row) = stream.next().await {
            let (id,) = row?;
            batch.push(id);
            total += 1;

            if batch.len() >= batch_size {
                self.revoke_many(&batch).await;
                batch.clear();
            }
        }

        if !batch.is_empty() {
            self.revoke_many(&batch).await;
        }

        log::info!("Revoked session cache warmup complete: {} sessions", total);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_web::test]
    async fn revoked_ids_are_remembered() {
        let revoked = RevokedSessions::new(Duration::from_secs(60));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        revoked.revoke(a).await;
        assert!(revoked.is_revoked(&a).await);
        assert!(!revoked.is_revoked(&b).await);

        revoked.revoke_many(&[b]).await;
        assert!(revoked.is_revoked(&b).await);
    }
}
