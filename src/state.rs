use std::sync::Arc;

use crate::services::backup::BackupService;
use crate::services::email::Notifier;
use crate::utils::session_cache::RevokedSessions;

/// Shared services handed to every worker.
#[derive(Clone)]
pub struct AppState {
    pub notifier: Notifier,
    pub backups: Arc<BackupService>,
    pub revoked: RevokedSessions,
}
