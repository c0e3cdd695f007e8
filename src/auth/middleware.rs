use crate::auth::auth::AuthUser;
use crate::auth::cookies::{ACCESS_COOKIE, bearer_token};
use crate::auth::jwt::verify_token;
use crate::config::Config;
use crate::model::role::Role;
use crate::models::TokenType;
use crate::utils::session_cache::RevokedSessions;
use actix_web::middleware::Next;
use actix_web::{
    Error, HttpMessage, HttpResponse,
    body::BoxBody,
    dev::{ServiceRequest, ServiceResponse},
    web::Data,
};
use serde_json::json;

fn reject(req: ServiceRequest, message: &str) -> ServiceResponse<BoxBody> {
    let resp = HttpResponse::Unauthorized().json(json!({ "message": message }));
    req.into_response(resp.map_into_boxed_body())
}

pub async fn auth_middleware(
    req: ServiceRequest,
    next: Next<BoxBody>,
) -> Result<ServiceResponse<BoxBody>, Error> {
    let config = req
        .app_data::<Data<Config>>()
        .cloned()
        .ok_or_else(|| actix_web::error::ErrorInternalServerError("App config missing"))?;
    let revoked = req
        .app_data::<Data<RevokedSessions>>()
        .cloned()
        .ok_or_else(|| actix_web::error::ErrorInternalServerError("Session cache missing"))?;

    // Bearer header wins over the cookie so API clients are unaffected by a
    // stale browser cookie.
    let bearer = bearer_token(req.headers()).map(str::to_string);
    let token = match bearer {
        Some(t) => t,
        None => match req.cookie(ACCESS_COOKIE) {
            Some(c) if !c.value().is_empty() => c.value().to_string(),
            _ => return Ok(reject(req, "Missing credentials")),
        },
    };

    let claims = match verify_token(&token, &config.jwt_secret) {
        Ok(c) => c,
        Err(e) => {
            tracing::debug!(error = %e, "Rejected token");
            return Ok(reject(req, "Invalid or expired token"));
        }
    };

    if claims.token_type != TokenType::Access {
        return Ok(reject(req, "Access token required"));
    }

    let role = match Role::parse(&claims.role) {
        Some(role) => role,
        None => return Ok(reject(req, "Invalid role")),
    };

    if revoked.is_revoked(&claims.sid).await {
        return Ok(reject(req, "Session has been revoked"));
    }

    let auth_user = AuthUser {
        user_id: claims.user_id,
        email: claims.sub,
        role,
        session_id: claims.sid,
    };

    req.extensions_mut().insert(auth_user);

    next.call(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::{TokenSubject, generate_access_token, generate_refresh_token};
    use actix_web::cookie::Cookie;
    use actix_web::middleware::from_fn;
    use actix_web::{App, HttpResponse, http::StatusCode, test, web};
    use std::time::Duration;
    use uuid::Uuid;

    async fn whoami(user: AuthUser) -> HttpResponse {
        HttpResponse::Ok().body(user.email)
    }

    fn subject(session_id: Uuid) -> TokenSubject {
        TokenSubject {
            user_id: 7,
            email: "ana@embassy.example".into(),
            role: "employee".into(),
            session_id,
        }
    }

    macro_rules! app {
        ($revoked:expr) => {
            test::init_service(
                App::new()
                    .app_data(Data::new(Config::for_tests()))
                    .app_data(Data::new($revoked))
                    .service(
                        web::scope("/api")
                            .wrap(from_fn(auth_middleware))
                            .route("/me", web::get().to(whoami)),
                    ),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn missing_token_is_unauthorized() {
        let app = app!(RevokedSessions::new(Duration::from_secs(60)));
        let resp = test::call_service(&app, test::TestRequest::get().uri("/api/me").to_request()).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn bearer_and_cookie_tokens_are_accepted() {
        let config = Config::for_tests();
        let token = generate_access_token(&subject(Uuid::new_v4()), &config.jwt_secret, 60).unwrap();
        let app = app!(RevokedSessions::new(Duration::from_secs(60)));

        let req = test::TestRequest::get()
            .uri("/api/me")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_request();
        let body = test::call_and_read_body(&app, req).await;
        assert_eq!(body, "ana@embassy.example");

        let req = test::TestRequest::get()
            .uri("/api/me")
            .cookie(Cookie::new(ACCESS_COOKIE, token))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn refresh_tokens_cannot_call_the_api() {
        let config = Config::for_tests();
        let (token, _) =
            generate_refresh_token(&subject(Uuid::new_v4()), &config.jwt_secret, 60).unwrap();
        let app = app!(RevokedSessions::new(Duration::from_secs(60)));

        let req = test::TestRequest::get()
            .uri("/api/me")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_web::test]
    async fn revoked_sessions_are_rejected() {
        let config = Config::for_tests();
        let sid = Uuid::new_v4();
        let token = generate_access_token(&subject(sid), &config.jwt_secret, 60).unwrap();
        let revoked = RevokedSessions::new(Duration::from_secs(60));
        revoked.revoke(sid).await;
        let app = app!(revoked);

        let req = test::TestRequest::get()
            .uri("/api/me")
            .insert_header(("Authorization", format!("Bearer {token}")))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
