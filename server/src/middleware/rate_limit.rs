//! Sliding-window rate limiting with adaptive IP blocking
//!
//! One `RateLimiter` holds three maps under a single mutex: request
//! timestamps per IP, request timestamps per `ip:path` key, and block
//! deadlines per IP. Pruning happens inside the same critical section as
//! the count-and-decide, so each decision is atomic per IP.
//!
//! An IP that exceeds its limit is blocked for `block_duration`; every
//! request during the block is rejected regardless of pacing, with
//! `Retry-After` reporting the remaining block.
//!
//! Two middlewares share the mechanism: `LimitByIp` applies the global
//! per-IP budget, `LimitByPath` applies a stricter budget to a fixed set
//! of sensitive paths (keyed by `ip + ":" + path`).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use actix_web::{
    body::{BoxBody, EitherBody},
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header,
    Error, HttpResponse,
};
use futures_util::future::LocalBoxFuture;

struct RateState {
    by_ip: HashMap<String, Vec<Instant>>,
    by_ip_and_path: HashMap<String, Vec<Instant>>,
    blocked_until: HashMap<String, Instant>,
}

pub struct RateLimiter {
    state: Mutex<RateState>,
    window: Duration,
    max_requests: usize,
    block_duration: Duration,
}

impl RateLimiter {
    pub fn new(window: Duration, max_requests: usize, block_duration: Duration) -> Self {
        Self {
            state: Mutex::new(RateState {
                by_ip: HashMap::new(),
                by_ip_and_path: HashMap::new(),
                blocked_until: HashMap::new(),
            }),
            window,
            max_requests,
            block_duration,
        }
    }

    /// Admit or reject a request from `ip` against the global budget.
    /// `Err` carries the Retry-After value in seconds.
    pub fn check_ip(&self, ip: &str) -> Result<(), u64> {
        let window = self.window;
        let limit = self.max_requests;
        self.check(ip, window, limit, |state| &mut state.by_ip, ip)
    }

    /// Admit or reject against the per-path budget for `ip` on `path`.
    pub fn check_path(&self, ip: &str, path: &str, limit: usize) -> Result<(), u64> {
        let key = format!("{ip}:{path}");
        let window = self.window;
        self.check(ip, window, limit, |state| &mut state.by_ip_and_path, &key)
    }

    fn check(
        &self,
        ip: &str,
        window: Duration,
        limit: usize,
        counters: impl Fn(&mut RateState) -> &mut HashMap<String, Vec<Instant>>,
        key: &str,
    ) -> Result<(), u64> {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();

        if let Some(&blocked_until) = state.blocked_until.get(ip) {
            if blocked_until > now {
                return Err(remaining_secs(blocked_until, now));
            }
        }

        // Prune inside the critical section: stale timestamps and expired
        // blocks never influence a decision.
        state.by_ip.retain(|_, times| {
            times.retain(|&t| now.duration_since(t) < window);
            !times.is_empty()
        });
        state.by_ip_and_path.retain(|_, times| {
            times.retain(|&t| now.duration_since(t) < window);
            !times.is_empty()
        });
        state.blocked_until.retain(|_, &mut until| until > now);

        let over_limit = {
            let map = counters(&mut state);
            let entry = map.entry(key.to_string()).or_default();
            if entry.len() >= limit {
                true
            } else {
                entry.push(now);
                false
            }
        };

        if over_limit {
            state
                .blocked_until
                .insert(ip.to_string(), now + self.block_duration);
            return Err(self.block_duration.as_secs());
        }
        Ok(())
    }
}

fn remaining_secs(deadline: Instant, now: Instant) -> u64 {
    let remaining = deadline.saturating_duration_since(now);
    // Round up so clients never retry inside the block.
    remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0)
}

/// Client address for rate limiting: first hop of X-Forwarded-For, then
/// X-Real-IP, then the transport peer.
pub fn resolve_client_ip(req: &ServiceRequest) -> String {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        let first = forwarded.split(',').next().unwrap_or("").trim();
        if !first.is_empty() {
            return first.to_string();
        }
    }
    if let Some(real_ip) = req
        .headers()
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return real_ip.to_string();
    }
    req.connection_info()
        .peer_addr()
        .unwrap_or("unknown")
        .to_string()
}

fn too_many_requests(req: ServiceRequest, retry_after: u64) -> ServiceResponse<BoxBody> {
    req.into_response(
        HttpResponse::TooManyRequests()
            .insert_header((header::RETRY_AFTER, retry_after.to_string()))
            .json(serde_json::json!({ "error": "Rate limit exceeded" })),
    )
}

/// Global per-IP limiter middleware.
pub struct LimitByIp {
    limiter: Arc<RateLimiter>,
}

impl LimitByIp {
    pub fn new(limiter: Arc<RateLimiter>) -> Self {
        Self { limiter }
    }
}

impl<S, B> Transform<S, ServiceRequest> for LimitByIp
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B, BoxBody>>;
    type Error = Error;
    type InitError = ();
    type Transform = LimitByIpService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(LimitByIpService {
            service,
            limiter: self.limiter.clone(),
        }))
    }
}

pub struct LimitByIpService<S> {
    service: S,
    limiter: Arc<RateLimiter>,
}

impl<S, B> Service<ServiceRequest> for LimitByIpService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B, BoxBody>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let ip = resolve_client_ip(&req);

        if let Err(retry_after) = self.limiter.check_ip(&ip) {
            return Box::pin(async move {
                Ok(too_many_requests(req, retry_after).map_into_right_body())
            });
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            Ok(res.map_into_left_body())
        })
    }
}

/// Stricter limiter for a fixed set of sensitive paths.
pub struct LimitByPath {
    limiter: Arc<RateLimiter>,
    paths: Vec<String>,
    limit: usize,
}

impl LimitByPath {
    pub fn new(limiter: Arc<RateLimiter>, paths: Vec<String>, limit: usize) -> Self {
        Self {
            limiter,
            paths,
            limit,
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for LimitByPath
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B, BoxBody>>;
    type Error = Error;
    type InitError = ();
    type Transform = LimitByPathService<S>;
    type Future = std::future::Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        std::future::ready(Ok(LimitByPathService {
            service,
            limiter: self.limiter.clone(),
            paths: self.paths.clone(),
            limit: self.limit,
        }))
    }
}

pub struct LimitByPathService<S> {
    service: S,
    limiter: Arc<RateLimiter>,
    paths: Vec<String>,
    limit: usize,
}

impl<S, B> Service<ServiceRequest> for LimitByPathService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B, BoxBody>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let path = req.path().to_string();
        if !self.paths.iter().any(|p| p == &path) {
            let fut = self.service.call(req);
            return Box::pin(async move {
                let res = fut.await?;
                Ok(res.map_into_left_body())
            });
        }

        let ip = resolve_client_ip(&req);
        if let Err(retry_after) = self.limiter.check_path(&ip, &path, self.limit) {
            return Box::pin(async move {
                Ok(too_many_requests(req, retry_after).map_into_right_body())
            });
        }

        let fut = self.service.call(req);
        Box::pin(async move {
            let res = fut.await?;
            Ok(res.map_into_left_body())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test as actix_test, web, App, HttpResponse};
    use std::net::SocketAddr;
    use std::thread::sleep;

    #[test]
    fn admits_up_to_limit_then_blocks() {
        let limiter = RateLimiter::new(
            Duration::from_secs(1),
            2,
            Duration::from_secs(60),
        );

        assert!(limiter.check_ip("10.0.0.5").is_ok());
        assert!(limiter.check_ip("10.0.0.5").is_ok());

        let retry_after = limiter.check_ip("10.0.0.5").unwrap_err();
        assert!(retry_after >= 60);

        // Still blocked after the window itself would have elapsed.
        sleep(Duration::from_millis(1100));
        assert!(limiter.check_ip("10.0.0.5").is_err());
    }

    #[test]
    fn window_pruning_frees_the_budget() {
        let limiter = RateLimiter::new(
            Duration::from_millis(100),
            2,
            Duration::from_secs(60),
        );

        assert!(limiter.check_ip("ip").is_ok());
        assert!(limiter.check_ip("ip").is_ok());
        sleep(Duration::from_millis(150));
        // Old timestamps fell out of the window, so the third request is
        // admitted rather than triggering a block.
        assert!(limiter.check_ip("ip").is_ok());
    }

    #[test]
    fn block_expires_after_block_duration() {
        let limiter = RateLimiter::new(
            Duration::from_millis(50),
            1,
            Duration::from_millis(100),
        );

        assert!(limiter.check_ip("ip").is_ok());
        assert!(limiter.check_ip("ip").is_err());
        sleep(Duration::from_millis(150));
        assert!(limiter.check_ip("ip").is_ok());
    }

    #[test]
    fn independent_ips_do_not_interfere() {
        let limiter = RateLimiter::new(Duration::from_secs(1), 1, Duration::from_secs(60));
        assert!(limiter.check_ip("ip1").is_ok());
        assert!(limiter.check_ip("ip1").is_err());
        assert!(limiter.check_ip("ip2").is_ok());
    }

    #[test]
    fn path_counters_are_keyed_by_ip_and_path() {
        let limiter = RateLimiter::new(Duration::from_secs(1), 100, Duration::from_secs(60));
        assert!(limiter.check_path("ip", "/api/login", 1).is_ok());
        assert!(limiter.check_path("ip", "/api/login", 1).is_err());
        // A different path under the same IP has its own budget, but the
        // IP-level block from the login overflow applies everywhere.
        assert!(limiter.check_path("ip2", "/api/login", 1).is_ok());
    }

    #[actix_web::test]
    async fn middleware_rejects_third_request_with_429() {
        let limiter = Arc::new(RateLimiter::new(
            Duration::from_secs(1),
            2,
            Duration::from_secs(60),
        ));
        let app = actix_test::init_service(
            App::new()
                .wrap(LimitByIp::new(limiter))
                .route("/api/health", web::get().to(|| async { HttpResponse::Ok().body("OK") })),
        )
        .await;

        let peer: SocketAddr = "10.0.0.5:4242".parse().unwrap();

        for _ in 0..2 {
            let req = actix_test::TestRequest::get()
                .uri("/api/health")
                .peer_addr(peer)
                .to_request();
            let resp = actix_test::call_service(&app, req).await;
            assert_eq!(resp.status(), actix_web::http::StatusCode::OK);
        }

        let req = actix_test::TestRequest::get()
            .uri("/api/health")
            .peer_addr(peer)
            .to_request();
        let resp = actix_test::call_service(&app, req).await;
        assert_eq!(
            resp.status(),
            actix_web::http::StatusCode::TOO_MANY_REQUESTS
        );
        let retry_after: u64 = resp
            .headers()
            .get(header::RETRY_AFTER)
            .unwrap()
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!(retry_after >= 60);
    }

    #[actix_web::test]
    async fn forwarded_for_first_hop_wins() {
        let limiter = Arc::new(RateLimiter::new(
            Duration::from_secs(1),
            1,
            Duration::from_secs(60),
        ));
        let app = actix_test::init_service(
            App::new()
                .wrap(LimitByIp::new(limiter))
                .route("/", web::get().to(|| async { HttpResponse::Ok().finish() })),
        )
        .await;

        let req = actix_test::TestRequest::get()
            .uri("/")
            .insert_header(("X-Forwarded-For", "203.0.113.7, 10.0.0.1"))
            .to_request();
        assert_eq!(
            actix_test::call_service(&app, req).await.status(),
            actix_web::http::StatusCode::OK
        );

        // Same first hop exhausts the budget even though the second hop
        // differs.
        let req = actix_test::TestRequest::get()
            .uri("/")
            .insert_header(("X-Forwarded-For", "203.0.113.7, 10.9.9.9"))
            .to_request();
        assert_eq!(
            actix_test::call_service(&app, req).await.status(),
            actix_web::http::StatusCode::TOO_MANY_REQUESTS
        );
    }
}
