//! Authentication middleware for protected endpoints
//!
//! `RequireAuth` validates the access-token cookie, refuses revoked and
//! refresh-typed tokens, and attaches an immutable `AuthContext` to the
//! request. For unsafe methods it additionally demands a non-empty
//! `X-CSRF-Token` header: the header cannot be set cross-origin, so its
//! mere presence defeats classical CSRF even with SameSite=None cookies.
//!
//! `RequireRole` composes on top and rejects principals whose role is
//! outside the allow-list.

use actix_web::{
    dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform},
    http::Method,
    web, Error, FromRequest, HttpMessage, HttpRequest,
};
use futures_util::future::LocalBoxFuture;
use std::future::{ready, Ready};
use std::rc::Rc;
use tracing::warn;

use crate::error::ApiError;
use crate::models::user::Role;
use crate::services::revocation::RevocationStore;
use crate::services::tokens::TokenMint;

/// Anything shorter is obviously not a signed token; reject before
/// spending signature work on it.
const MIN_TOKEN_LEN: usize = 30;

/// Immutable per-request principal snapshot.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: i32,
    pub role: Role,
    pub token_id: String,
    pub issued_at: i64,
}

impl FromRequest for AuthContext {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(
            req.extensions()
                .get::<AuthContext>()
                .cloned()
                .ok_or_else(|| {
                    ApiError::Unauthorized("User not authenticated".to_string()).into()
                }),
        )
    }
}

/// Safe methods never carry state changes, so they skip the CSRF check.
pub fn csrf_exempt(method: &Method) -> bool {
    matches!(method.as_str(), "GET" | "HEAD" | "OPTIONS")
}

pub struct RequireAuth;

impl<S, B> Transform<S, ServiceRequest> for RequireAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequireAuthMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequireAuthMiddleware {
            service: Rc::new(service),
        }))
    }
}

pub struct RequireAuthMiddleware<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for RequireAuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let svc = self.service.clone();

        Box::pin(async move {
            // 1. Access token cookie.
            let token = match req.cookie("token") {
                Some(cookie) => cookie.value().to_string(),
                None => {
                    warn!(path = %req.path(), "Authorization cookie missing");
                    return Err(
                        ApiError::Unauthorized("Authorization cookie is missing".to_string())
                            .into(),
                    );
                }
            };

            if token.len() < MIN_TOKEN_LEN {
                warn!(token_length = token.len(), "Invalid token format - too short");
                return Err(ApiError::Unauthorized("Invalid token format".to_string()).into());
            }

            // 2. Parse and verify; refresh tokens are not accepted here.
            let mint = req
                .app_data::<web::Data<TokenMint>>()
                .ok_or_else(|| ApiError::Internal("TokenMint not configured".to_string()))?;

            let claims = mint.parse_access(&token).map_err(|err| {
                warn!(error = %err, "Token parsing failed");
                ApiError::Unauthorized("Invalid token".to_string())
            })?;

            let role = Role::from_str(&claims.role).ok_or_else(|| {
                warn!(role = %claims.role, jti = %claims.jti, "Invalid user role in token");
                ApiError::Unauthorized("Invalid user role in token".to_string())
            })?;

            // 3. Revocation check.
            let revocations = req
                .app_data::<web::Data<RevocationStore>>()
                .cloned()
                .ok_or_else(|| ApiError::Internal("RevocationStore not configured".to_string()))?;

            let jti = claims.jti.clone();
            let revoked = web::block(move || revocations.is_revoked(&jti))
                .await
                .map_err(|err| ApiError::Internal(format!("revocation check: {err}")))?;

            if revoked {
                tracing::info!(jti = %claims.jti, "Token revoked");
                return Err(ApiError::Unauthorized("Token revoked".to_string()).into());
            }

            // 4. CSRF header for unsafe methods.
            if !csrf_exempt(req.method()) {
                let header_present = req
                    .headers()
                    .get("X-CSRF-Token")
                    .and_then(|v| v.to_str().ok())
                    .map(|v| !v.is_empty())
                    .unwrap_or(false);
                if !header_present {
                    warn!(path = %req.path(), method = %req.method(), "Missing CSRF token header");
                    return Err(ApiError::Forbidden("Invalid CSRF token".to_string()).into());
                }
            }

            // 5. Immutable principal context for handlers.
            req.extensions_mut().insert(AuthContext {
                user_id: claims.user_id,
                role,
                token_id: claims.jti,
                issued_at: claims.issued_at,
            });

            svc.call(req).await
        })
    }
}

/// Middleware that restricts a scope to an allow-list of roles.
pub struct RequireRole {
    allowed: Vec<Role>,
}

impl RequireRole {
    pub fn new(allowed: &[Role]) -> Self {
        Self {
            allowed: allowed.to_vec(),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for RequireRole
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequireRoleMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequireRoleMiddleware {
            service: Rc::new(service),
            allowed: self.allowed.clone(),
        }))
    }
}

pub struct RequireRoleMiddleware<S> {
    service: Rc<S>,
    allowed: Vec<Role>,
}

impl<S, B> Service<ServiceRequest> for RequireRoleMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let svc = self.service.clone();
        let allowed = self.allowed.clone();

        Box::pin(async move {
            let role = req
                .extensions()
                .get::<AuthContext>()
                .map(|ctx| ctx.role)
                .ok_or_else(|| ApiError::Forbidden("User role not found".to_string()))?;

            if !allowed.contains(&role) {
                warn!(
                    role = role.as_str(),
                    path = %req.path(),
                    "Insufficient permissions"
                );
                return Err(ApiError::Forbidden("Forbidden".to_string()).into());
            }

            svc.call(req).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_methods_skip_csrf() {
        assert!(csrf_exempt(&Method::GET));
        assert!(csrf_exempt(&Method::HEAD));
        assert!(csrf_exempt(&Method::OPTIONS));
    }

    #[test]
    fn unsafe_methods_require_csrf() {
        assert!(!csrf_exempt(&Method::POST));
        assert!(!csrf_exempt(&Method::PUT));
        assert!(!csrf_exempt(&Method::DELETE));
        assert!(!csrf_exempt(&Method::PATCH));
    }
}
