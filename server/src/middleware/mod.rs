//! Middleware for the deal-registration API
//!
//! - Rate limiting (global per-IP budget + stricter per-path budgets)
//! - Authentication (RequireAuth: token cookie + revocation + CSRF)
//! - Role gating (RequireRole allow-lists)

pub mod auth;
pub mod rate_limit;

pub use auth::{AuthContext, RequireAuth, RequireRole};
pub use rate_limit::{LimitByIp, LimitByPath, RateLimiter};
