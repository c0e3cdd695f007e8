use crate::{
    api::{attendance, backup, compensatory, email, sessions, users, vacation},
    auth::{handlers, middleware::auth_middleware},
    config::Config,
    utils::rate_limiter::{FixedWindowLimiter, RateLimit},
};
use actix_governor::{
    Governor, GovernorConfigBuilder, PeerIpKeyExtractor, governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};
use std::sync::Arc;

/// Fixed-window limiters shared by every worker, so counts are per process
/// rather than per worker.
#[derive(Clone)]
pub struct Limiters {
    pub login: Arc<FixedWindowLimiter>,
    pub api: Arc<FixedWindowLimiter>,
}

impl Limiters {
    pub fn from_config(config: &Config) -> Self {
        Self {
            login: Arc::new(FixedWindowLimiter::new(
                "login",
                config.rate_login,
                config.rate_limit_max_keys,
            )),
            api: Arc::new(FixedWindowLimiter::new(
                "api",
                config.rate_api,
                config.rate_limit_max_keys,
            )),
        }
    }
}

// Token-bucket limiter for the cheap token endpoints
fn build_limiter(requests_per_min: u32) -> Option<Governor<PeerIpKeyExtractor, NoOpMiddleware>> {
    let requests_per_min = requests_per_min.max(1);
    let cfg = GovernorConfigBuilder::default()
        .per_millisecond(60_000 / requests_per_min as u64)
        .burst_size(requests_per_min)
        .key_extractor(PeerIpKeyExtractor)
        .finish()?;
    Some(Governor::new(&cfg))
}

pub fn configure(cfg: &mut web::ServiceConfig, config: &Config, limiters: &Limiters) {
    let trust = config.trust_proxy_headers;

    let mut auth = web::scope("/auth").service(
        web::resource("/login")
            .wrap(RateLimit::new(limiters.login.clone(), trust))
            .route(web::post().to(handlers::login)),
    );
    match build_limiter(config.rate_refresh_per_min) {
        Some(refresh_limiter) => {
            let refresh_limiter = Arc::new(refresh_limiter);
            auth = auth
                .service(
                    web::resource("/refresh")
                        .wrap(refresh_limiter.clone())
                        .route(web::post().to(handlers::refresh_token)),
                )
                .service(
                    web::resource("/logout")
                        .wrap(refresh_limiter)
                        .route(web::post().to(handlers::logout)),
                );
        }
        None => {
            tracing::warn!("Invalid refresh rate limit, token endpoints are unthrottled");
            auth = auth
                .route("/refresh", web::post().to(handlers::refresh_token))
                .route("/logout", web::post().to(handlers::logout));
        }
    }
    cfg.service(auth);

    // Called by an external scheduler with CRON_SECRET as bearer token
    cfg.service(
        web::resource("/cron/backup")
            .route(web::get().to(backup::cron_backup))
            .route(web::post().to(backup::cron_backup)),
    );

    // Protected routes; the rate limit wraps last so it runs before authentication
    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(from_fn(auth_middleware))
            .wrap(RateLimit::new(limiters.api.clone(), trust))
            // /me
            .service(web::resource("/me").route(web::get().to(users::me)))
            .service(web::resource("/me/password").route(web::put().to(users::change_password)))
            // /sessions
            .service(
                web::scope("/sessions")
                    .service(web::resource("").route(web::get().to(sessions::list_sessions)))
                    .service(
                        web::resource("/revoke-others")
                            .route(web::post().to(sessions::revoke_others)),
                    )
                    .service(web::resource("/{id}").route(web::delete().to(sessions::revoke_one))),
            )
            // /users
            .service(
                web::scope("/users")
                    .service(
                        web::resource("")
                            .route(web::get().to(users::list_users))
                            .route(web::post().to(users::create_user)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(users::get_user))
                            .route(web::put().to(users::update_user)),
                    )
                    .service(web::resource("/{id}/status").route(web::put().to(users::set_status)))
                    .service(
                        web::resource("/{id}/balances").route(web::put().to(users::set_balances)),
                    )
                    .service(
                        web::resource("/{id}/sessions/revoke")
                            .route(web::post().to(sessions::revoke_all_for_user)),
                    ),
            )
            // /vacations
            .service(
                web::scope("/vacations")
                    .service(
                        web::resource("")
                            .route(web::get().to(vacation::list_vacations))
                            .route(web::post().to(vacation::create_vacation)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(vacation::get_vacation))
                            .route(web::put().to(vacation::update_vacation))
                            .route(web::delete().to(vacation::cancel_vacation)),
                    )
                    .service(
                        web::resource("/{id}/approve")
                            .route(web::put().to(vacation::approve_vacation)),
                    )
                    .service(
                        web::resource("/{id}/reject").route(web::put().to(vacation::reject_vacation)),
                    ),
            )
            // /compensatorys
            .service(
                web::scope("/compensatorys")
                    .service(
                        web::resource("")
                            .route(web::get().to(compensatory::list_compensatorys))
                            .route(web::post().to(compensatory::create_compensatory)),
                    )
                    .service(
                        web::resource("/{id}")
                            .route(web::get().to(compensatory::get_compensatory))
                            .route(web::delete().to(compensatory::delete_compensatory)),
                    )
                    .service(
                        web::resource("/{id}/approve-hours")
                            .route(web::put().to(compensatory::approve_hours)),
                    )
                    .service(
                        web::resource("/{id}/reject-hours")
                            .route(web::put().to(compensatory::reject_hours)),
                    )
                    .service(
                        web::resource("/{id}/usage").route(web::post().to(compensatory::request_usage)),
                    )
                    .service(
                        web::resource("/{id}/approve-usage")
                            .route(web::put().to(compensatory::approve_usage)),
                    )
                    .service(
                        web::resource("/{id}/reject-usage")
                            .route(web::put().to(compensatory::reject_usage)),
                    ),
            )
            // /attendance
            .service(
                web::scope("/attendance")
                    .service(web::resource("").route(web::get().to(attendance::list_attendance)))
                    .service(web::resource("/check-in").route(web::post().to(attendance::check_in)))
                    .service(
                        web::resource("/check-out").route(web::put().to(attendance::check_out)),
                    ),
            )
            // /backups
            .service(
                web::scope("/backups")
                    .service(
                        web::resource("")
                            .route(web::get().to(backup::list_backups))
                            .route(web::post().to(backup::create_backup)),
                    )
                    .service(web::resource("/{id}").route(web::delete().to(backup::delete_backup)))
                    .service(
                        web::resource("/{id}/restore").route(web::post().to(backup::restore_backup)),
                    )
                    .service(
                        web::resource("/{id}/download")
                            .route(web::get().to(backup::download_backup)),
                    ),
            )
            // /email
            .service(web::resource("/email/test").route(web::post().to(email::send_test_email))),
    );
}

// LOGIN
//  ├─ device session row + hr_access / hr_refresh cookies
//  ├─ access_token (15 min)
//  └─ refresh_token (1 day, 30 days with remember_me)

// API REQUEST
//  └─ Authorization: Bearer access_token, or the hr_access cookie

// ACCESS EXPIRED
//  └─ POST /auth/refresh with the refresh token
//       └─ rotates the refresh jti, returns a new pair
