//! Where backups live.
//!
//! A backup is a gzip payload plus a JSON metadata sidecar. Every configured
//! [`BackupStore`] holds its own copy of both; the [`StorageManager`] writes
//! to all of them and merges their listings by backup id.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use strum::{AsRefStr, Display};
use thiserror::Error;
use utoipa::ToSchema;

use crate::config::CloudStorageConfig;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("backup {0} not found")]
    NotFound(String),

    #[error("backup {0} failed checksum verification")]
    ChecksumMismatch(String),

    #[error("invalid backup id: {0}")]
    InvalidId(String),

    #[error("no backup store accepted the write")]
    NoStoreAvailable,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("storage service returned {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("malformed metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StorageLocation {
    Local,
    Cloud,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BackupTrigger {
    Manual,
    Scheduled,
    PreRestore,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TableSummary {
    #[schema(example = "vacations")]
    pub name: String,
    #[schema(example = 42)]
    pub row_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct BackupMetadata {
    #[schema(example = "backup-20260301T020000Z-1a2b3c4d")]
    pub id: String,
    #[schema(value_type = String, format = "date-time")]
    pub created_at: DateTime<Utc>,
    pub trigger: BackupTrigger,
    pub created_by: Option<String>,
    pub tables: Vec<TableSummary>,
    pub size_bytes: u64,
    /// sha256 of the compressed payload, lowercase hex
    pub checksum: String,
    #[serde(default)]
    pub locations: Vec<StorageLocation>,
}

pub fn checksum(payload: &[u8]) -> String {
    format!("{:x}", Sha256::digest(payload))
}

/// Backup ids end up in file names and object keys.
pub fn validate_id(id: &str) -> Result<(), StorageError> {
    let ok = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StorageError::InvalidId(id.to_string()))
    }
}

fn payload_name(id: &str) -> String {
    format!("{id}.json.gz")
}

fn metadata_name(id: &str) -> String {
    format!("{id}.meta.json")
}

const METADATA_SUFFIX: &str = ".meta.json";

#[async_trait]
pub trait BackupStore: Send + Sync {
    fn location(&self) -> StorageLocation;

    async fn put(&self, metadata: &BackupMetadata, payload: &[u8]) -> Result<(), StorageError>;

    async fn get(&self, id: &str) -> Result<Vec<u8>, StorageError>;

    async fn metadata(&self, id: &str) -> Result<BackupMetadata, StorageError>;

    /// Returns whether anything was deleted.
    async fn delete(&self, id: &str) -> Result<bool, StorageError>;

    async fn list_metadata(&self) -> Result<Vec<BackupMetadata>, StorageError>;
}

// ---------------------------------------------------------------------------
// Local directory
// ---------------------------------------------------------------------------

pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn not_found(id: &str, err: std::io::Error) -> StorageError {
        if err.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(id.to_string())
        } else {
            StorageError::Io(err)
        }
    }

    async fn write_atomic(&self, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let tmp = self.dir.join(format!("{name}.tmp"));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, self.dir.join(name)).await?;
        Ok(())
    }
}

#[async_trait]
impl BackupStore for LocalStore {
    fn location(&self) -> StorageLocation {
        StorageLocation::Local
    }

    async fn put(&self, metadata: &BackupMetadata, payload: &[u8]) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        self.write_atomic(&payload_name(&metadata.id), payload).await?;
        // Sidecar last: a listed backup always has its payload.
        let meta = serde_json::to_vec_pretty(metadata)?;
        self.write_atomic(&metadata_name(&metadata.id), &meta).await
    }

    async fn get(&self, id: &str) -> Result<Vec<u8>, StorageError> {
        tokio::fs::read(self.dir.join(payload_name(id)))
            .await
            .map_err(|e| Self::not_found(id, e))
    }

    async fn metadata(&self, id: &str) -> Result<BackupMetadata, StorageError> {
        let bytes = tokio::fs::read(self.dir.join(metadata_name(id)))
            .await
            .map_err(|e| Self::not_found(id, e))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        let mut deleted = false;
        for name in [metadata_name(id), payload_name(id)] {
            match tokio::fs::remove_file(self.dir.join(name)).await {
                Ok(()) => deleted = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(deleted)
    }

    async fn list_metadata(&self) -> Result<Vec<BackupMetadata>, StorageError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut out = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.ends_with(METADATA_SUFFIX) {
                continue;
            }
            let bytes = tokio::fs::read(entry.path()).await?;
            match serde_json::from_slice::<BackupMetadata>(&bytes) {
                Ok(meta) => out.push(meta),
                Err(e) => tracing::warn!(file = %name, error = %e, "Skipping unreadable backup metadata"),
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Cloud object storage
// ---------------------------------------------------------------------------

/// Object storage reached over its HTTP API (Supabase-style
/// `/object/{bucket}/{path}` routes). `url` is the storage API base.
pub struct CloudStore {
    client: reqwest::Client,
    url: String,
    key: String,
    bucket: String,
}

#[derive(Debug, Deserialize)]
struct ObjectEntry {
    name: String,
}

const LIST_PAGE_SIZE: usize = 1000;

/// Fetches pages at increasing offsets until one comes back short.
async fn collect_pages<T, F, Fut>(page_size: usize, mut fetch: F) -> Result<Vec<T>, StorageError>
where
    F: FnMut(usize) -> Fut,
    Fut: std::future::Future<Output = Result<Vec<T>, StorageError>>,
{
    let mut out = Vec::new();
    loop {
        let page = fetch(out.len()).await?;
        let last = page.len() < page_size;
        out.extend(page);
        if last || page_size == 0 {
            return Ok(out);
        }
    }
}

impl CloudStore {
    pub fn new(config: &CloudStorageConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: config.url.clone(),
            key: config.key.clone(),
            bucket: config.bucket.clone(),
        }
    }

    fn object_url(&self, name: &str) -> String {
        format!("{}/object/{}/{}", self.url, self.bucket, name)
    }

    async fn check(resp: reqwest::Response, id: &str) -> Result<reqwest::Response, StorageError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::BAD_REQUEST {
            // the storage API answers 400 "not_found" for missing objects
            let body = resp.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::NOT_FOUND || body.contains("not_found") {
                return Err(StorageError::NotFound(id.to_string()));
            }
            return Err(StorageError::Remote {
                status: status.as_u16(),
                body,
            });
        }
        Err(StorageError::Remote {
            status: status.as_u16(),
            body: resp.text().await.unwrap_or_default(),
        })
    }

    async fn upload(&self, name: &str, content_type: &str, bytes: Vec<u8>, id: &str) -> Result<(), StorageError> {
        let resp = self
            .client
            .post(self.object_url(name))
            .bearer_auth(&self.key)
            .header("x-upsert", "true")
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;
        Self::check(resp, id).await?;
        Ok(())
    }

    async fn list_page(&self, offset: usize) -> Result<Vec<ObjectEntry>, StorageError> {
        let resp = self
            .client
            .post(format!("{}/object/list/{}", self.url, self.bucket))
            .bearer_auth(&self.key)
            .json(&json!({ "prefix": "", "limit": LIST_PAGE_SIZE, "offset": offset }))
            .send()
            .await?;
        Ok(Self::check(resp, "*").await?.json().await?)
    }

    async fn download(&self, name: &str, id: &str) -> Result<Vec<u8>, StorageError> {
        let resp = self
            .client
            .get(self.object_url(name))
            .bearer_auth(&self.key)
            .send()
            .await?;
        let resp = Self::check(resp, id).await?;
        Ok(resp.bytes().await?.to_vec())
    }
}

#[async_trait]
impl BackupStore for CloudStore {
    fn location(&self) -> StorageLocation {
        StorageLocation::Cloud
    }

    async fn put(&self, metadata: &BackupMetadata, payload: &[u8]) -> Result<(), StorageError> {
        self.upload(
            &payload_name(&metadata.id),
            "application/gzip",
            payload.to_vec(),
            &metadata.id,
        )
        .await?;
        let meta = serde_json::to_vec(metadata)?;
        self.upload(&metadata_name(&metadata.id), "application/json", meta, &metadata.id)
            .await
    }

    async fn get(&self, id: &str) -> Result<Vec<u8>, StorageError> {
        self.download(&payload_name(id), id).await
    }

    async fn metadata(&self, id: &str) -> Result<BackupMetadata, StorageError> {
        let bytes = self.download(&metadata_name(id), id).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn delete(&self, id: &str) -> Result<bool, StorageError> {
        let resp = self
            .client
            .delete(format!("{}/object/{}", self.url, self.bucket))
            .bearer_auth(&self.key)
            .json(&json!({ "prefixes": [payload_name(id), metadata_name(id)] }))
            .send()
            .await?;
        let resp = Self::check(resp, id).await?;
        // responds with the list of objects actually removed
        let removed: Vec<ObjectEntry> = resp.json().await.unwrap_or_default();
        Ok(!removed.is_empty())
    }

    async fn list_metadata(&self) -> Result<Vec<BackupMetadata>, StorageError> {
        let entries = collect_pages(LIST_PAGE_SIZE, |offset| self.list_page(offset)).await?;

        let ids: Vec<String> = entries
            .into_iter()
            .filter_map(|e| e.name.strip_suffix(METADATA_SUFFIX).map(str::to_string))
            .collect();

        let fetched = futures::future::join_all(ids.iter().map(|id| self.metadata(id))).await;

        let mut out = Vec::with_capacity(fetched.len());
        for (id, result) in ids.iter().zip(fetched) {
            match result {
                Ok(meta) => out.push(meta),
                Err(e) => tracing::warn!(backup_id = %id, error = %e, "Skipping unreadable cloud backup metadata"),
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

/// Merges listings from several stores: one entry per backup id with the
/// union of locations, newest first.
pub fn merge_listings(listings: Vec<Vec<BackupMetadata>>) -> Vec<BackupMetadata> {
    let mut by_id: HashMap<String, BackupMetadata> = HashMap::new();

    for meta in listings.into_iter().flatten() {
        match by_id.get_mut(&meta.id) {
            Some(existing) => {
                for loc in meta.locations {
                    if !existing.locations.contains(&loc) {
                        existing.locations.push(loc);
                    }
                }
            }
            None => {
                by_id.insert(meta.id.clone(), meta);
            }
        }
    }

    let mut merged: Vec<BackupMetadata> = by_id.into_values().collect();
    for meta in &mut merged {
        meta.locations.sort_by_key(|l| *l as u8);
    }
    merged.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
    merged
}

/// Backups past retention in a newest-first listing. Safety backups and
/// regular backups each keep their newest `keep`.
fn prunable(listing: Vec<BackupMetadata>, keep: usize) -> Vec<BackupMetadata> {
    let (safety, regular): (Vec<_>, Vec<_>) = listing
        .into_iter()
        .partition(|m| m.trigger == BackupTrigger::PreRestore);
    regular
        .into_iter()
        .skip(keep)
        .chain(safety.into_iter().skip(keep))
        .collect()
}

pub struct StorageManager {
    stores: Vec<Arc<dyn BackupStore>>,
}

impl StorageManager {
    /// Stores are tried in order when loading; put the local one first.
    pub fn new(stores: Vec<Arc<dyn BackupStore>>) -> Self {
        Self { stores }
    }

    /// Writes to every store. Succeeds if at least one store accepted the
    /// backup; the returned metadata lists where it landed.
    pub async fn save(
        &self,
        mut metadata: BackupMetadata,
        payload: &[u8],
    ) -> Result<BackupMetadata, StorageError> {
        validate_id(&metadata.id)?;
        let mut stored = Vec::new();
        let mut last_err = None;

        for store in &self.stores {
            let mut copy = metadata.clone();
            copy.locations = vec![store.location()];
            match store.put(&copy, payload).await {
                Ok(()) => stored.push(store.location()),
                Err(e) => {
                    tracing::error!(
                        backup_id = %metadata.id,
                        location = %store.location(),
                        error = %e,
                        "Failed to store backup"
                    );
                    last_err = Some(e);
                }
            }
        }

        if stored.is_empty() {
            return Err(last_err.unwrap_or(StorageError::NoStoreAvailable));
        }
        metadata.locations = stored;
        Ok(metadata)
    }

    /// All backups from all reachable stores, deduplicated by id.
    pub async fn list(&self) -> Vec<BackupMetadata> {
        let mut listings = Vec::with_capacity(self.stores.len());
        for store in &self.stores {
            match store.list_metadata().await {
                Ok(list) => listings.push(list),
                Err(e) => {
                    tracing::warn!(location = %store.location(), error = %e, "Backup listing failed")
                }
            }
        }
        merge_listings(listings)
    }

    /// Payload and metadata of a backup, checksum verified.
    pub async fn load(&self, id: &str) -> Result<(BackupMetadata, Vec<u8>), StorageError> {
        validate_id(id)?;
        let mut last_err = None;

        for store in &self.stores {
            let fetched = async {
                let meta = store.metadata(id).await?;
                let payload = store.get(id).await?;
                Ok::<_, StorageError>((meta, payload))
            }
            .await;

            match fetched {
                Ok((meta, payload)) => {
                    if checksum(&payload) != meta.checksum {
                        tracing::error!(backup_id = %id, location = %store.location(), "Backup checksum mismatch");
                        last_err = Some(StorageError::ChecksumMismatch(id.to_string()));
                        continue;
                    }
                    return Ok((meta, payload));
                }
                Err(StorageError::NotFound(_)) => {}
                Err(e) => {
                    tracing::warn!(backup_id = %id, location = %store.location(), error = %e, "Backup load failed");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| StorageError::NotFound(id.to_string())))
    }

    /// Removes a backup from every store holding it.
    ///
    /// Succeeds if any store removed it. A store that fails is logged and
    /// skipped; the call only errors when no store removed the backup and at
    /// least one of them failed.
    pub async fn delete(&self, id: &str) -> Result<Vec<StorageLocation>, StorageError> {
        validate_id(id)?;
        let mut removed = Vec::new();
        let mut last_err = None;

        for store in &self.stores {
            match store.delete(id).await {
                Ok(true) => removed.push(store.location()),
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(
                        backup_id = %id,
                        location = %store.location(),
                        error = %e,
                        "Failed to delete backup"
                    );
                    last_err = Some(e);
                }
            }
        }

        if removed.is_empty() {
            return Err(last_err.unwrap_or_else(|| StorageError::NotFound(id.to_string())));
        }
        Ok(removed)
    }

    /// Deletes all but the newest `keep` backups. Returns the deleted ids.
    ///
    /// `pre_restore` safety backups are counted apart from the others, so a
    /// restore never pushes a regular backup out of retention.
    pub async fn prune(&self, keep: usize) -> Vec<String> {
        let mut deleted = Vec::new();
        for meta in prunable(self.list().await, keep) {
            match self.delete(&meta.id).await {
                Ok(_) => deleted.push(meta.id),
                Err(e) => tracing::warn!(backup_id = %meta.id, error = %e, "Failed to prune backup"),
            }
        }
        deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn meta(id: &str, hour: u32, loc: StorageLocation) -> BackupMetadata {
        BackupMetadata {
            id: id.to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap(),
            trigger: BackupTrigger::Scheduled,
            created_by: None,
            tables: vec![TableSummary {
                name: "users".into(),
                row_count: 3,
            }],
            size_bytes: 10,
            checksum: String::new(),
            locations: vec![loc],
        }
    }

    #[test]
    fn listings_merge_by_id_and_sort_newest_first() {
        let local = vec![meta("a", 1, StorageLocation::Local), meta("b", 3, StorageLocation::Local)];
        let cloud = vec![meta("b", 3, StorageLocation::Cloud), meta("c", 2, StorageLocation::Cloud)];

        let merged = merge_listings(vec![local, cloud]);
        let ids: Vec<&str> = merged.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["b", "c", "a"]);
        assert_eq!(merged[0].locations, [StorageLocation::Local, StorageLocation::Cloud]);
        assert_eq!(merged[1].locations, [StorageLocation::Cloud]);
    }

    #[test]
    fn ids_are_restricted_to_safe_characters() {
        assert!(validate_id("backup-20260301T020000Z-1a2b3c4d").is_ok());
        assert!(validate_id("../etc/passwd").is_err());
        assert!(validate_id("").is_err());
        assert!(validate_id("a/b").is_err());
    }

    #[actix_web::test]
    async fn local_store_round_trip_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path());
        let payload = b"compressed".to_vec();
        let mut m = meta("backup-1", 1, StorageLocation::Local);
        m.checksum = checksum(&payload);

        store.put(&m, &payload).await.unwrap();
        assert_eq!(store.get("backup-1").await.unwrap(), payload);
        assert_eq!(store.metadata("backup-1").await.unwrap(), m);
        assert_eq!(store.list_metadata().await.unwrap().len(), 1);

        assert!(store.delete("backup-1").await.unwrap());
        assert!(!store.delete("backup-1").await.unwrap());
        assert!(matches!(store.get("backup-1").await, Err(StorageError::NotFound(_))));
    }

    #[actix_web::test]
    async fn missing_directory_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(dir.path().join("not-created-yet"));
        assert!(store.list_metadata().await.unwrap().is_empty());
    }

    /// Store that refuses every write, standing in for an unreachable bucket.
    struct BrokenStore;

    #[async_trait]
    impl BackupStore for BrokenStore {
        fn location(&self) -> StorageLocation {
            StorageLocation::Cloud
        }
        async fn put(&self, _: &BackupMetadata, _: &[u8]) -> Result<(), StorageError> {
            Err(StorageError::Remote {
                status: 503,
                body: "unavailable".into(),
            })
        }
        async fn get(&self, id: &str) -> Result<Vec<u8>, StorageError> {
            Err(StorageError::NotFound(id.into()))
        }
        async fn metadata(&self, id: &str) -> Result<BackupMetadata, StorageError> {
            Err(StorageError::NotFound(id.into()))
        }
        async fn delete(&self, _: &str) -> Result<bool, StorageError> {
            Ok(false)
        }
        async fn list_metadata(&self) -> Result<Vec<BackupMetadata>, StorageError> {
            Err(StorageError::Remote {
                status: 503,
                body: "unavailable".into(),
            })
        }
    }

    #[actix_web::test]
    async fn save_succeeds_when_one_store_accepts() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StorageManager::new(vec![
            Arc::new(LocalStore::new(dir.path())),
            Arc::new(BrokenStore),
        ]);
        let payload = b"data".to_vec();
        let mut m = meta("backup-2", 1, StorageLocation::Local);
        m.checksum = checksum(&payload);

        let saved = manager.save(m, &payload).await.unwrap();
        assert_eq!(saved.locations, [StorageLocation::Local]);

        // the broken store's listing error is skipped
        let listed = manager.list().await;
        assert_eq!(listed.len(), 1);

        let (loaded, bytes) = manager.load("backup-2").await.unwrap();
        assert_eq!(loaded.id, "backup-2");
        assert_eq!(bytes, payload);
    }

    #[actix_web::test]
    async fn save_fails_when_no_store_accepts() {
        let manager = StorageManager::new(vec![Arc::new(BrokenStore)]);
        let m = meta("backup-3", 1, StorageLocation::Cloud);
        assert!(manager.save(m, b"x").await.is_err());
    }

    #[actix_web::test]
    async fn tampered_payload_fails_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StorageManager::new(vec![Arc::new(LocalStore::new(dir.path()))]);
        let mut m = meta("backup-4", 1, StorageLocation::Local);
        m.checksum = checksum(b"original");
        manager.save(m, b"original").await.unwrap();
        std::fs::write(dir.path().join("backup-4.json.gz"), b"tampered").unwrap();

        assert!(matches!(
            manager.load("backup-4").await,
            Err(StorageError::ChecksumMismatch(_))
        ));
    }

    #[actix_web::test]
    async fn prune_keeps_newest() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StorageManager::new(vec![Arc::new(LocalStore::new(dir.path()))]);
        for (id, hour) in [("old", 1), ("mid", 2), ("new", 3)] {
            manager.save(meta(id, hour, StorageLocation::Local), b"x").await.unwrap();
        }

        let deleted = manager.prune(2).await;
        assert_eq!(deleted, ["old"]);
        let remaining: Vec<String> = manager.list().await.into_iter().map(|m| m.id).collect();
        assert_eq!(remaining, ["new", "mid"]);
    }

    #[actix_web::test]
    async fn safety_backup_does_not_push_regular_backups_out() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StorageManager::new(vec![Arc::new(LocalStore::new(dir.path()))]);
        for (id, hour) in [("b1", 1), ("b2", 2), ("b3", 3)] {
            let mut m = meta(id, hour, StorageLocation::Local);
            m.checksum = checksum(b"x");
            manager.save(m, b"x").await.unwrap();
        }
        assert!(manager.load("b1").await.is_ok());

        let mut safety = meta("safety", 4, StorageLocation::Local);
        safety.trigger = BackupTrigger::PreRestore;
        manager.save(safety, b"x").await.unwrap();

        assert!(manager.prune(3).await.is_empty());
        assert!(manager.load("b1").await.is_ok());
    }

    #[test]
    fn safety_backups_have_their_own_retention() {
        let mut listing = Vec::new();
        for hour in (1..=4).rev() {
            let mut safety = meta(&format!("pre-{hour}"), hour, StorageLocation::Local);
            safety.trigger = BackupTrigger::PreRestore;
            listing.push(safety);
            listing.push(meta(&format!("reg-{hour}"), hour, StorageLocation::Local));
        }
        let ids: Vec<String> = prunable(listing, 2).into_iter().map(|m| m.id).collect();
        assert_eq!(ids, ["reg-2", "reg-1", "pre-2", "pre-1"]);
    }

    /// Deletes nothing and always fails, like a bucket that is down.
    struct FailingDelete;

    #[async_trait]
    impl BackupStore for FailingDelete {
        fn location(&self) -> StorageLocation {
            StorageLocation::Cloud
        }
        async fn put(&self, _: &BackupMetadata, _: &[u8]) -> Result<(), StorageError> {
            Ok(())
        }
        async fn get(&self, id: &str) -> Result<Vec<u8>, StorageError> {
            Err(StorageError::NotFound(id.into()))
        }
        async fn metadata(&self, id: &str) -> Result<BackupMetadata, StorageError> {
            Err(StorageError::NotFound(id.into()))
        }
        async fn delete(&self, _: &str) -> Result<bool, StorageError> {
            Err(StorageError::Remote {
                status: 503,
                body: "down".into(),
            })
        }
        async fn list_metadata(&self) -> Result<Vec<BackupMetadata>, StorageError> {
            Ok(Vec::new())
        }
    }

    #[actix_web::test]
    async fn delete_succeeds_when_one_store_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StorageManager::new(vec![
            Arc::new(LocalStore::new(dir.path())),
            Arc::new(FailingDelete),
        ]);
        manager.save(meta("backup-5", 1, StorageLocation::Local), b"x").await.unwrap();

        let removed = manager.delete("backup-5").await.unwrap();
        assert_eq!(removed, [StorageLocation::Local]);
        assert!(manager.list().await.is_empty());
    }

    #[actix_web::test]
    async fn delete_fails_when_every_store_fails() {
        let manager = StorageManager::new(vec![Arc::new(FailingDelete)]);
        assert!(matches!(
            manager.delete("backup-6").await,
            Err(StorageError::Remote { status: 503, .. })
        ));
    }

    #[actix_web::test]
    async fn listing_pages_until_a_short_page() {
        let total = 7;
        let mut offsets = Vec::new();
        let names = collect_pages(3, |offset| {
            offsets.push(offset);
            let page: Vec<usize> = (offset..total.min(offset + 3)).collect();
            async move { Ok(page) }
        })
        .await
        .unwrap();

        assert_eq!(names, (0..total).collect::<Vec<_>>());
        assert_eq!(offsets, [0, 3, 6]);
    }

    #[actix_web::test]
    async fn listing_stops_after_an_empty_page() {
        let mut calls = 0;
        let names = collect_pages(2, |offset| {
            calls += 1;
            let page: Vec<usize> = (offset..4.min(offset + 2)).collect();
            async move { Ok(page) }
        })
        .await
        .unwrap();

        assert_eq!(names, [0, 1, 2, 3]);
        assert_eq!(calls, 3);
    }

    #[actix_web::test]
    async fn deleting_unknown_backup_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let manager = StorageManager::new(vec![Arc::new(LocalStore::new(dir.path()))]);
        assert!(matches!(manager.delete("nope").await, Err(StorageError::NotFound(_))));
    }
}
