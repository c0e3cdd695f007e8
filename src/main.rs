use actix_web::middleware::NormalizePath;
use actix_web::web::Data;
use actix_web::{App, HttpServer};
use dotenvy::dotenv;
use std::sync::Arc;
use std::time::{Duration, Instant};

mod api;
mod auth;
mod config;
mod db;
mod docs;
mod error;
mod model;
mod models;
mod routes;
mod services;
mod state;
mod utils;

use config::Config;
use db::init_db;

use crate::docs::ApiDoc;
use crate::routes::Limiters;
use crate::services::backup::{BackupService, spawn_backup_scheduler};
use crate::services::email::{EmailTemplates, LogMailer, Mailer, Notifier, SmtpMailer};
use crate::services::storage::{BackupStore, CloudStore, LocalStore, StorageManager};
use crate::state::AppState;
use crate::utils::rate_limiter::FixedWindowLimiter;
use crate::utils::session_cache::RevokedSessions;
use crate::utils::{email_cache, email_filter};
use tracing::{info, warn};
use tracing_appender::rolling;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

fn spawn_limiter_eviction(limiter: Arc<FixedWindowLimiter>) {
    actix_web::rt::spawn(async move {
        let mut ticker =
            actix_web::rt::time::interval(limiter.window().max(Duration::from_secs(1)));
        loop {
            ticker.tick().await;
            let evicted = limiter.evict_expired(Instant::now());
            if evicted > 0 {
                tracing::debug!(limiter = limiter.name(), evicted, "Evicted expired rate windows");
            }
        }
    });
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    // Rolling daily log
    let file_appender = rolling::daily("logs", "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_target(false) // removes module path
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .pretty()
        .init();

    let config = Config::from_env()?;
    info!(addr = %config.server_addr, "Server starting...");

    let pool = init_db(&config.database_url, config.run_migrations).await?;

    let revoked = RevokedSessions::new(Duration::from_secs(config.access_token_ttl as u64));

    let pool_for_filter_warmup = pool.clone();
    let pool_for_cache_warmup = pool.clone();
    let pool_for_session_warmup = pool.clone();
    let revoked_for_warmup = revoked.clone();

    actix_web::rt::spawn(async move {
        if let Err(e) = email_filter::warmup_email_filter(&pool_for_filter_warmup, 100).await {
            warn!(error = %e, "Failed to warmup email filter");
        }
    });

    actix_web::rt::spawn(async move {
        // Users active in the last 30 days, in batches of 250
        if let Err(e) = email_cache::warmup_email_cache(&pool_for_cache_warmup, 30, 250).await {
            warn!(error = %e, "Failed to warmup email cache");
        }
    });

    actix_web::rt::spawn(async move {
        if let Err(e) = revoked_for_warmup.warmup(&pool_for_session_warmup, 500).await {
            warn!(error = %e, "Failed to warmup revoked sessions");
        }
    });

    let mailer: Arc<dyn Mailer> = match &config.smtp {
        Some(smtp) => Arc::new(SmtpMailer::new(smtp, &config.mail_from)?),
        None => {
            warn!("SMTP_HOST not set, emails will only be logged");
            Arc::new(LogMailer)
        }
    };
    let notifier = Notifier::new(mailer, EmailTemplates::new()?, config.app_url.clone());

    let mut stores: Vec<Arc<dyn BackupStore>> = vec![Arc::new(LocalStore::new(&config.backup_dir))];
    match &config.cloud_storage {
        Some(cloud) => stores.push(Arc::new(CloudStore::new(cloud))),
        None => info!("Cloud storage not configured, backups are local only"),
    }
    let backups = Arc::new(BackupService::new(
        pool.clone(),
        StorageManager::new(stores),
        notifier.clone(),
        revoked.clone(),
        config.backup_retention,
    ));
    spawn_backup_scheduler(backups.clone(), config.backup_interval_hours);

    let limiters = Limiters::from_config(&config);
    spawn_limiter_eviction(limiters.login.clone());
    spawn_limiter_eviction(limiters.api.clone());

    let state = AppState {
        notifier,
        backups,
        revoked: revoked.clone(),
    };
    let server_addr = config.server_addr.clone();

    HttpServer::new(move || {
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .wrap(NormalizePath::trim())
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}") // ← important: wildcard {_:.*} to match JS/CSS files
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
            .app_data(Data::new(pool.clone()))
            .app_data(Data::new(config.clone()))
            .app_data(Data::new(state.clone()))
            .app_data(Data::new(revoked.clone()))
            // Configure auth + protected routes with rate limiting
            .configure(|cfg| routes::configure(cfg, &config, &limiters))
    })
    .bind(server_addr)?
    .run()
    .await?;

    Ok(())
}
