use actix_web::{
    Error, ResponseError,
    body::EitherBody,
    dev::{Service, ServiceRequest, ServiceResponse, Transform, forward_ready},
    http::header::{HeaderName, HeaderValue},
};
use futures::future::{LocalBoxFuture, Ready, ready};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::RateRule;
use crate::error::AppError;
use crate::utils::client_ip::service_client_ip;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Time until the current window closes
    pub reset_after: Duration,
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window request counter keyed by an arbitrary string (client IP).
///
/// The number of tracked keys is bounded by `max_keys`; when full, expired
/// windows are dropped first, then the key whose window opened earliest.
#[derive(Debug)]
pub struct FixedWindowLimiter {
    name: &'static str,
    limit: u32,
    window: Duration,
    max_keys: usize,
    windows: Mutex<HashMap<String, Window>>,
}

impl FixedWindowLimiter {
    pub fn new(name: &'static str, rule: RateRule, max_keys: usize) -> Self {
        Self {
            name,
            limit: rule.limit,
            window: rule.window,
            max_keys: max_keys.max(1),
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn check(&self, key: &str, now: Instant) -> RateLimitDecision {
        if self.limit == 0 {
            return RateLimitDecision {
                allowed: false,
                limit: 0,
                remaining: 0,
                reset_after: self.window,
            };
        }

        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());

        if !windows.contains_key(key) && windows.len() >= self.max_keys {
            Self::evict_expired_locked(&mut windows, self.window, now);
            if windows.len() >= self.max_keys {
                let oldest = windows
                    .iter()
                    .min_by_key(|(_, w)| w.started)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    windows.remove(&oldest);
                }
            }
        }

        let entry = windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.saturating_duration_since(entry.started) >= self.window {
            *entry = Window {
                started: now,
                count: 0,
            };
        }

        let allowed = entry.count < self.limit;
        if allowed {
            entry.count += 1;
        }

        RateLimitDecision {
            allowed,
            limit: self.limit,
            remaining: self.limit - entry.count,
            reset_after: (entry.started + self.window).saturating_duration_since(now),
        }
    }

    /// Drops windows that have closed. Returns how many were removed.
    pub fn evict_expired(&self, now: Instant) -> usize {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        Self::evict_expired_locked(&mut windows, self.window, now)
    }

    fn evict_expired_locked(
        windows: &mut HashMap<String, Window>,
        window: Duration,
        now: Instant,
    ) -> usize {
        let before = windows.len();
        windows.retain(|_, w| now.saturating_duration_since(w.started) < window);
        before - windows.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().map(|w| w.len()).unwrap_or(0)
    }
}

/// Middleware applying a [`FixedWindowLimiter`] per client IP.
#[derive(Clone)]
pub struct RateLimit {
    limiter: Arc<FixedWindowLimiter>,
    trust_proxy_headers: bool,
}

impl RateLimit {
    pub fn new(limiter: Arc<FixedWindowLimiter>, trust_proxy_headers: bool) -> Self {
        Self {
            limiter,
            trust_proxy_headers,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RateLimit
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Transform = RateLimitMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RateLimitMiddleware {
            service,
            limiter: self.limiter.clone(),
            trust_proxy_headers: self.trust_proxy_headers,
        }))
    }
}

pub struct RateLimitMiddleware<S> {
    service: S,
    limiter: Arc<FixedWindowLimiter>,
    trust_proxy_headers: bool,
}

const LIMIT_HEADER: &str = "x-ratelimit-limit";
const REMAINING_HEADER: &str = "x-ratelimit-remaining";

impl<S, B> Service<ServiceRequest> for RateLimitMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let key = service_client_ip(&req, self.trust_proxy_headers);
        let decision = self.limiter.check(&key, Instant::now());

        if !decision.allowed {
            tracing::warn!(
                limiter = self.limiter.name(),
                client = %key,
                path = %req.path(),
                "Rate limit exceeded"
            );
            let retry_after_secs = decision.reset_after.as_secs().max(1);
            let resp = AppError::TooManyRequests { retry_after_secs }.error_response();
            return Box::pin(async move { Ok(req.into_response(resp).map_into_right_body()) });
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let mut res = fut.await?;
            let headers = res.headers_mut();
            headers.insert(
                HeaderName::from_static(LIMIT_HEADER),
                HeaderValue::from(decision.limit),
            );
            headers.insert(
                HeaderName::from_static(REMAINING_HEADER),
                HeaderValue::from(decision.remaining),
            );
            Ok(res.map_into_left_body())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{App, HttpResponse, http::StatusCode, test as atest, web};

    fn limiter(limit: u32, secs: u64, max_keys: usize) -> FixedWindowLimiter {
        FixedWindowLimiter::new(
            "test",
            RateRule {
                limit,
                window: Duration::from_secs(secs),
            },
            max_keys,
        )
    }

    #[test]
    fn allows_up_to_limit_within_window() {
        let l = limiter(3, 60, 10);
        let t0 = Instant::now();
        for expected_remaining in [2, 1, 0] {
            let d = l.check("1.1.1.1", t0);
            assert!(d.allowed);
            assert_eq!(d.remaining, expected_remaining);
        }
        let d = l.check("1.1.1.1", t0 + Duration::from_secs(10));
        assert!(!d.allowed);
        assert_eq!(d.reset_after, Duration::from_secs(50));
    }

    #[test]
    fn new_window_opens_after_expiry() {
        let l = limiter(1, 60, 10);
        let t0 = Instant::now();
        assert!(l.check("k", t0).allowed);
        assert!(!l.check("k", t0 + Duration::from_secs(59)).allowed);
        assert!(l.check("k", t0 + Duration::from_secs(60)).allowed);
    }

    #[test]
    fn keys_are_independent() {
        let l = limiter(1, 60, 10);
        let t0 = Instant::now();
        assert!(l.check("a", t0).allowed);
        assert!(l.check("b", t0).allowed);
        assert!(!l.check("a", t0).allowed);
    }

    #[test]
    fn zero_limit_denies_everything() {
        let l = limiter(0, 60, 10);
        assert!(!l.check("a", Instant::now()).allowed);
    }

    #[test]
    fn key_map_is_bounded() {
        let l = limiter(5, 60, 2);
        let t0 = Instant::now();
        l.check("a", t0);
        l.check("b", t0 + Duration::from_secs(1));
        l.check("c", t0 + Duration::from_secs(2));
        assert_eq!(l.tracked_keys(), 2);
        // "a" had the oldest window and was evicted, so it starts fresh
        let d = l.check("a", t0 + Duration::from_secs(3));
        assert_eq!(d.remaining, 4);
    }

    #[test]
    fn expired_windows_are_evicted() {
        let l = limiter(5, 60, 10);
        let t0 = Instant::now();
        l.check("a", t0);
        l.check("b", t0 + Duration::from_secs(30));
        assert_eq!(l.evict_expired(t0 + Duration::from_secs(61)), 1);
        assert_eq!(l.tracked_keys(), 1);
    }

    #[actix_web::test]
    async fn middleware_returns_429_with_retry_after() {
        let limiter = Arc::new(limiter(1, 60, 10));
        let app = atest::init_service(
            App::new()
                .wrap(RateLimit::new(limiter, false))
                .route("/", web::get().to(HttpResponse::Ok)),
        )
        .await;

        let peer = "10.1.1.1:4000".parse().unwrap();
        let first = atest::call_service(&app, atest::TestRequest::get().uri("/").peer_addr(peer).to_request()).await;
        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(first.headers().get("x-ratelimit-remaining").unwrap(), "0");

        let second = atest::call_service(&app, atest::TestRequest::get().uri("/").peer_addr(peer).to_request()).await;
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(second.headers().contains_key("Retry-After"));
    }
}
