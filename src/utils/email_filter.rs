use anyhow::{Result, anyhow};
use autoscale_cuckoo_filter::CuckooFilter;
use futures::StreamExt;
use once_cell::sync::Lazy;
use sqlx::PgPool;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::model::user::normalize_email;

/// Expected capacity and false-positive rate. Staff counts are small, the
/// filter grows on its own if they are exceeded.
const FILTER_CAPACITY: usize = 10_000;
const FALSE_POSITIVE_RATE: f64 = 0.001;

static EMAIL_FILTER: Lazy<RwLock<CuckooFilter<String>>> =
    Lazy::new(|| RwLock::new(CuckooFilter::new(FILTER_CAPACITY, FALSE_POSITIVE_RATE)));

// A poisoned lock only means a writer panicked mid-insert; the filter is
// still a valid over-approximation.
fn read() -> RwLockReadGuard<'static, CuckooFilter<String>> {
    EMAIL_FILTER.read().unwrap_or_else(|e| e.into_inner())
}

fn write() -> RwLockWriteGuard<'static, CuckooFilter<String>> {
    EMAIL_FILTER.write().unwrap_or_else(|e| e.into_inner())
}

/// Check if an email might be registered (false positives possible)
pub fn might_exist(email: &str) -> bool {
    read().contains(&normalize_email(email))
}

/// Insert a single email into the filter
pub fn insert(email: &str) {
    write().add(&normalize_email(email));
}

/// Remove an email from the filter
pub fn remove(email: &str) {
    write().remove(&normalize_email(email));
}

/// Warm up the email filter using streaming + batching
pub async fn warmup_email_filter(pool: &PgPool, batch_size: usize) -> Result<()> {
    let mut stream = sqlx::query_as::<_, (String,)>("SELECT email FROM users").fetch(pool);

    let mut batch = Vec::with_capacity(batch_size);
    let mut total = 0usize;

    while let Some(row) = stream.next().await {
        let (email,) = row.map_err(|e| anyhow!("DB row fetch failed: {}", e))?;

        batch.push(normalize_email(&email));
        total += 1;

        if batch.len() == batch_size {
            insert_batch(&batch);
            batch.clear();
        }
    }

    if !batch.is_empty() {
        insert_batch(&batch);
    }

    log::info!("Email filter warmup complete: {} users", total);
    Ok(())
}

fn insert_batch(emails: &[String]) {
    let mut filter = write();

    for email in emails {
        filter.add(email);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_emails_are_reported_and_removable() {
        let email = "filter-test@embassy.example";
        insert("Filter-Test@Embassy.Example");
        assert!(might_exist(email));
        remove(email);
        assert!(!might_exist(email));
    }
}
