//! Database snapshots and restore.
//!
//! A snapshot is every row of [`BACKUP_TABLES`] serialized by Postgres with
//! `json_agg`, wrapped in a small envelope and gzip-compressed. Restore puts
//! the rows back inside a single transaction.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sqlx::PgPool;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::services::email::{EmailKind, Notifier, admin_recipients};
use crate::services::sessions::all_live_session_ids;
use crate::services::storage::{
    BackupMetadata, BackupTrigger, StorageError, StorageManager, TableSummary, checksum,
};
use crate::utils::{email_cache, email_filter, session_cache::RevokedSessions};

/// Tables included in a snapshot, parents first. Restore inserts in this
/// order and deletes in reverse.
pub const BACKUP_TABLES: [&str; 4] = ["users", "vacations", "compensatorys", "attendances"];

const FORMAT_VERSION: u32 = 1;

/// All snapshot reads see the same committed state, so rows never reference
/// parents missing from the snapshot.
const SNAPSHOT_ISOLATION: &str =
    "SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY";

fn snapshot_query(table: &str) -> String {
    format!("SELECT COALESCE(json_agg(t ORDER BY t.id), '[]'::json) FROM {table} t")
}

fn prunes_after(trigger: BackupTrigger) -> bool {
    trigger != BackupTrigger::PreRestore
}

#[derive(Debug, Error)]
pub enum BackupError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("compression failed: {0}")]
    Compression(#[from] std::io::Error),

    #[error("backup is missing tables: {}", .0.join(", "))]
    Incomplete(Vec<String>),

    #[error("unsupported backup format version {0}")]
    UnsupportedFormat(u32),

    #[error("restoring table {table} failed: {source}")]
    Restore {
        table: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("safety backup before restore failed: {0}")]
    SafetyBackup(String),
}

/// Decoded backup payload: rows per table.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub format_version: u32,
    pub tables: BTreeMap<String, Vec<Value>>,
}

impl Snapshot {
    pub fn new(tables: BTreeMap<String, Vec<Value>>) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            tables,
        }
    }

    /// Row counts in [`BACKUP_TABLES`] order.
    pub fn summaries(&self) -> Vec<TableSummary> {
        BACKUP_TABLES
            .iter()
            .filter_map(|name| {
                self.tables.get(*name).map(|rows| TableSummary {
                    name: name.to_string(),
                    row_count: rows.len() as u64,
                })
            })
            .collect()
    }
}

pub fn encode_payload(snapshot: &Snapshot) -> Result<Vec<u8>, BackupError> {
    let json = serde_json::to_vec(snapshot)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    Ok(encoder.finish()?)
}

pub fn decode_payload(payload: &[u8]) -> Result<Snapshot, BackupError> {
    let mut json = Vec::new();
    GzDecoder::new(payload).read_to_end(&mut json)?;
    let snapshot: Snapshot = serde_json::from_slice(&json)?;
    if snapshot.format_version != FORMAT_VERSION {
        return Err(BackupError::UnsupportedFormat(snapshot.format_version));
    }
    Ok(snapshot)
}

/// Which tables a restore touches.
#[derive(Debug, PartialEq, Eq)]
pub struct RestorePlan {
    pub restore: Vec<&'static str>,
    pub skipped: Vec<&'static str>,
}

/// Tables missing from a snapshot are left untouched, except that replacing
/// `users` cascades into every other table, so a snapshot containing users
/// must contain all of them.
pub fn plan_restore(snapshot: &Snapshot) -> Result<RestorePlan, BackupError> {
    let (restore, skipped): (Vec<&'static str>, Vec<&'static str>) = BACKUP_TABLES
        .iter()
        .partition(|name| snapshot.tables.contains_key(**name));

    if restore.is_empty() || (restore.contains(&"users") && !skipped.is_empty()) {
        return Err(BackupError::Incomplete(
            skipped.iter().map(|s| s.to_string()).collect(),
        ));
    }
    Ok(RestorePlan { restore, skipped })
}

/// `backup-YYYYMMDDTHHMMSSZ-xxxxxxxx`
pub fn new_backup_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("backup-{}-{}", now.format("%Y%m%dT%H%M%SZ"), &suffix[..8])
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RestoredTable {
    #[schema(example = "users")]
    pub name: String,
    pub rows: u64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RestoreReport {
    pub backup_id: String,
    pub restored: Vec<RestoredTable>,
    pub skipped: Vec<String>,
    pub safety_backup_id: String,
}

pub struct BackupService {
    pool: PgPool,
    storage: StorageManager,
    notifier: Notifier,
    revoked: RevokedSessions,
    retention: usize,
}

impl BackupService {
    pub fn new(
        pool: PgPool,
        storage: StorageManager,
        notifier: Notifier,
        revoked: RevokedSessions,
        retention: usize,
    ) -> Self {
        Self {
            pool,
            storage,
            notifier,
            revoked,
            retention,
        }
    }

    pub fn storage(&self) -> &StorageManager {
        &self.storage
    }

    /// Reads every table from one consistent view of the database.
    async fn snapshot(&self) -> Result<Snapshot, BackupError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(SNAPSHOT_ISOLATION).execute(&mut *tx).await?;

        let mut tables = BTreeMap::new();
        for table in BACKUP_TABLES {
            let rows: Value = sqlx::query_scalar(&snapshot_query(table))
                .fetch_one(&mut *tx)
                .await?;

            let rows = match rows {
                Value::Array(rows) => rows,
                other => vec![other],
            };
            tables.insert(table.to_string(), rows);
        }
        tx.commit().await?;
        Ok(Snapshot::new(tables))
    }

    async fn create_inner(
        &self,
        trigger: BackupTrigger,
        created_by: Option<String>,
    ) -> Result<BackupMetadata, BackupError> {
        let started = std::time::Instant::now();
        let snapshot = self.snapshot().await?;
        let payload = encode_payload(&snapshot)?;
        let created_at = Utc::now();

        let metadata = BackupMetadata {
            id: new_backup_id(created_at),
            created_at,
            trigger,
            created_by,
            tables: snapshot.summaries(),
            size_bytes: payload.len() as u64,
            checksum: checksum(&payload),
            locations: Vec::new(),
        };

        let saved = self.storage.save(metadata, &payload).await?;
        tracing::info!(
            backup_id = %saved.id,
            trigger = %trigger,
            size_bytes = saved.size_bytes,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Backup created"
        );

        if prunes_after(trigger) {
            let pruned = self.storage.prune(self.retention).await;
            if !pruned.is_empty() {
                tracing::info!(count = pruned.len(), "Pruned old backups");
            }
        }
        Ok(saved)
    }

    /// Takes a snapshot and stores it everywhere. Regular backups also prune
    /// old ones; a `pre_restore` backup never does, since the backup being
    /// restored must stay loadable.
    pub async fn create(
        &self,
        trigger: BackupTrigger,
        created_by: Option<String>,
    ) -> Result<BackupMetadata, BackupError> {
        let attempted_at = Utc::now();
        let result = self.create_inner(trigger, created_by).await;

        match &result {
            Ok(meta) => self.notify_admins(EmailKind::BackupCompleted, completed_context(meta)).await,
            Err(e) => {
                tracing::error!(error = %e, trigger = %trigger, "Backup failed");
                if trigger == BackupTrigger::Scheduled {
                    let ctx = json!({
                        "trigger": trigger.as_ref(),
                        "attempted_at": attempted_at.to_rfc3339(),
                        "error": e.to_string(),
                    });
                    self.notify_admins(EmailKind::BackupFailed, ctx).await;
                }
            }
        }
        result
    }

    async fn notify_admins(&self, kind: EmailKind, ctx: Value) {
        match admin_recipients(&self.pool).await {
            Ok(admins) => self.notifier.dispatch(kind, admins, ctx),
            Err(e) => tracing::error!(error = %e, "Failed to load admin recipients"),
        }
    }

    /// Replaces the backed-up tables with the snapshot's rows.
    ///
    /// A `pre_restore` backup of the current data is taken first. Everything
    /// after that runs in one transaction. Every device session is dropped
    /// with the users table, so all clients must log in again.
    pub async fn restore(&self, id: &str, actor: &str) -> Result<RestoreReport, BackupError> {
        let (_, payload) = self.storage.load(id).await?;
        let snapshot = decode_payload(&payload)?;
        let plan = plan_restore(&snapshot)?;

        let safety = self
            .create(BackupTrigger::PreRestore, Some(actor.to_string()))
            .await
            .map_err(|e| BackupError::SafetyBackup(e.to_string()))?;

        let mut tx = self.pool.begin().await?;

        let sessions = all_live_session_ids(&mut *tx).await?;

        for table in plan.restore.iter().rev() {
            sqlx::query(&format!("DELETE FROM {table}"))
                .execute(&mut *tx)
                .await
                .map_err(|source| BackupError::Restore {
                    table: table.to_string(),
                    source,
                })?;
        }

        let mut restored = Vec::with_capacity(plan.restore.len());
        for table in &plan.restore {
            let rows = snapshot.tables.get(*table).cloned().unwrap_or_default();
            let fail = |source| BackupError::Restore {
                table: table.to_string(),
                source,
            };

            let result = sqlx::query(&format!(
                "INSERT INTO {table} SELECT * FROM jsonb_populate_recordset(NULL::{table}, $1)"
            ))
            .bind(Value::Array(rows))
            .execute(&mut *tx)
            .await
            .map_err(fail)?;

            sqlx::query(&format!(
                "SELECT setval(pg_get_serial_sequence('{table}', 'id'), \
                 COALESCE((SELECT MAX(id) FROM {table}), 0) + 1, false)"
            ))
            .execute(&mut *tx)
            .await
            .map_err(fail)?;

            restored.push(RestoredTable {
                name: table.to_string(),
                rows: result.rows_affected(),
            });
        }

        tx.commit().await?;

        if plan.restore.contains(&"users") {
            self.revoked.revoke_many(&sessions).await;
            email_cache::EMAIL_CACHE.invalidate_all();
            let pool = self.pool.clone();
            actix_web::rt::spawn(async move {
                if let Err(e) = email_filter::warmup_email_filter(&pool, 500).await {
                    tracing::error!(error = %e, "Failed to rebuild email filter after restore");
                }
            });
        }

        tracing::warn!(
            backup_id = %id,
            actor = %actor,
            safety_backup_id = %safety.id,
            tables = ?plan.restore,
            "Database restored from backup"
        );

        Ok(RestoreReport {
            backup_id: id.to_string(),
            restored,
            skipped: plan.skipped.iter().map(|s| s.to_string()).collect(),
            safety_backup_id: safety.id,
        })
    }
}

fn completed_context(meta: &BackupMetadata) -> Value {
    let locations: Vec<&str> = meta.locations.iter().map(|l| l.as_ref()).collect();
    json!({
        "backup_id": meta.id,
        "trigger": meta.trigger.as_ref(),
        "created_at": meta.created_at.to_rfc3339(),
        "tables": meta.tables,
        "size_kb": meta.size_bytes.div_ceil(1024),
        "locations": locations.join(", "),
    })
}

/// Runs a scheduled backup every `interval_hours`. Zero disables it.
pub fn spawn_backup_scheduler(service: Arc<BackupService>, interval_hours: u64) {
    if interval_hours == 0 {
        tracing::info!("Scheduled backups disabled");
        return;
    }

    actix_web::rt::spawn(async move {
        let mut ticker = actix_web::rt::time::interval(Duration::from_secs(interval_hours * 3600));
        // the first tick fires immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            // errors are logged and emailed by create()
            let _ = service.create(BackupTrigger::Scheduled, None).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::storage::StorageLocation;
    use chrono::TimeZone;

    fn snapshot(tables: &[&str]) -> Snapshot {
        let map = tables
            .iter()
            .map(|t| (t.to_string(), vec![json!({"id": 1}), json!({"id": 2})]))
            .collect();
        Snapshot::new(map)
    }

    #[test]
    fn payload_survives_compression() {
        let snap = snapshot(&BACKUP_TABLES);
        let bytes = encode_payload(&snap).unwrap();
        assert_eq!(&bytes[..2], &[0x1f, 0x8b]);
        assert_eq!(decode_payload(&bytes).unwrap(), snap);
    }

    #[test]
    fn garbage_payload_is_rejected() {
        assert!(matches!(
            decode_payload(b"not gzip"),
            Err(BackupError::Compression(_))
        ));
    }

    #[test]
    fn unknown_format_version_is_rejected() {
        let mut snap = snapshot(&["users"]);
        snap.format_version = 99;
        let bytes = encode_payload(&snap).unwrap();
        assert!(matches!(
            decode_payload(&bytes),
            Err(BackupError::UnsupportedFormat(99))
        ));
    }

    #[test]
    fn summaries_follow_table_order() {
        let snap = snapshot(&["attendances", "users"]);
        let names: Vec<String> = snap.summaries().into_iter().map(|s| s.name).collect();
        assert_eq!(names, ["users", "attendances"]);
        assert_eq!(snap.summaries()[0].row_count, 2);
    }

    #[test]
    fn full_snapshot_restores_everything() {
        let plan = plan_restore(&snapshot(&BACKUP_TABLES)).unwrap();
        assert_eq!(plan.restore, BACKUP_TABLES);
        assert!(plan.skipped.is_empty());
    }

    #[test]
    fn partial_snapshot_without_users_skips_missing_tables() {
        let plan = plan_restore(&snapshot(&["vacations"])).unwrap();
        assert_eq!(plan.restore, ["vacations"]);
        assert_eq!(plan.skipped, ["users", "compensatorys", "attendances"]);
    }

    #[test]
    fn users_without_dependents_is_incomplete() {
        match plan_restore(&snapshot(&["users", "vacations"])) {
            Err(BackupError::Incomplete(missing)) => {
                assert_eq!(missing, ["compensatorys", "attendances"])
            }
            other => panic!("expected Incomplete, got {other:?}"),
        }
        assert!(matches!(
            plan_restore(&snapshot(&[])),
            Err(BackupError::Incomplete(_))
        ));
    }

    #[test]
    fn safety_backups_do_not_prune() {
        assert!(prunes_after(BackupTrigger::Scheduled));
        assert!(prunes_after(BackupTrigger::Manual));
        assert!(!prunes_after(BackupTrigger::PreRestore));
    }

    #[test]
    fn snapshot_reads_share_one_read_only_view() {
        assert!(SNAPSHOT_ISOLATION.starts_with("SET TRANSACTION"));
        assert!(SNAPSHOT_ISOLATION.contains("REPEATABLE READ"));
        assert!(SNAPSHOT_ISOLATION.contains("READ ONLY"));
        assert_eq!(
            snapshot_query("vacations"),
            "SELECT COALESCE(json_agg(t ORDER BY t.id), '[]'::json) FROM vacations t"
        );
    }

    #[test]
    fn backup_ids_are_sortable_and_safe() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap();
        let id = new_backup_id(now);
        assert!(id.starts_with("backup-20260301T020000Z-"));
        assert_eq!(id.len(), "backup-20260301T020000Z-".len() + 8);
        assert!(crate::services::storage::validate_id(&id).is_ok());
    }

    #[test]
    fn completed_email_context_has_every_field() {
        let meta = BackupMetadata {
            id: "backup-1".into(),
            created_at: Utc::now(),
            trigger: BackupTrigger::Manual,
            created_by: Some("admin@embassy.example".into()),
            tables: vec![],
            size_bytes: 1025,
            checksum: String::new(),
            locations: vec![StorageLocation::Local, StorageLocation::Cloud],
        };
        let ctx = completed_context(&meta);
        assert_eq!(ctx["size_kb"], 2);
        assert_eq!(ctx["locations"], "local, cloud");
        assert_eq!(ctx["trigger"], "manual");
    }
}
