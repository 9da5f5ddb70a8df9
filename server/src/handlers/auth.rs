//! Authentication handlers
//!
//! Registration, password login, token refresh with rotation, logout and
//! the current-principal endpoint. Tokens are set as HttpOnly cookies
//! (`token` + `refresh_token`); the cross-site SPA requires SameSite=None,
//! with Secure added in production.

use actix_web::cookie::{time::Duration as CookieDuration, Cookie, SameSite};
use actix_web::{get, post, web, HttpRequest, HttpResponse};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, Params,
};
use chrono::{TimeZone, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::Validate;

use crate::config::AppConfig;
use crate::db::DbPool;
use crate::error::{ApiError, FieldError};
use crate::middleware::AuthContext;
use crate::models::partner::Partner;
use crate::models::user::{NewUser, Role, User};
use crate::services::revocation::RevocationStore;
use crate::services::tokens::TokenMint;
use crate::validation::validate_password;

#[derive(Debug, Validate, Deserialize)]
pub struct RegisterRequest {
    #[validate(length(min = 3, message = "Login must be at least 3 characters long"))]
    pub login: String,
    pub password: String,
    pub password_confirmation: String,
    // Accepted for DTO compatibility, ignored on self-signup.
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub partner_id: Option<i32>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Validate, Deserialize)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "Login is required"))]
    pub login: String,
    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

/// Principal body returned to clients; never carries the password digest.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i32,
    pub login: String,
    pub role: String,
    pub partner_id: Option<i32>,
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub created_at: chrono::DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partner: Option<Partner>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            login: user.login,
            role: user.role,
            partner_id: user.partner_id,
            name: user.name,
            email: user.email,
            phone: user.phone,
            created_at: user.created_at,
            partner: None,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub message: String,
    pub user: UserResponse,
}

fn build_cookie(
    name: &'static str,
    value: String,
    max_age_secs: i64,
    production: bool,
) -> Cookie<'static> {
    Cookie::build(name, value)
        .http_only(true)
        .secure(production)
        .same_site(SameSite::None)
        .path("/")
        .max_age(CookieDuration::seconds(max_age_secs))
        .finish()
}

fn clear_cookie(name: &'static str, production: bool) -> Cookie<'static> {
    build_cookie(name, String::new(), 0, production)
}

fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

/// True when the stored digest was produced with weaker parameters than
/// the current defaults and should be recomputed on next login.
fn needs_rehash(hash: &str) -> bool {
    let parsed = match PasswordHash::new(hash) {
        Ok(parsed) => parsed,
        Err(_) => return true,
    };
    match Params::try_from(&parsed) {
        Ok(params) => {
            let default = Params::default();
            params.m_cost() < default.m_cost() || params.t_cost() < default.t_cost()
        }
        Err(_) => true,
    }
}

/// Uniform delay for failed logins so user-exists and wrong-password
/// paths are indistinguishable by timing.
async fn failed_login_delay() {
    let jitter_ms = rand::thread_rng().gen_range(0..500);
    tokio::time::sleep(std::time::Duration::from_millis(300 + jitter_ms)).await;
}

fn none_if_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

#[post("/register")]
pub async fn register(
    pool: web::Data<DbPool>,
    body: web::Json<RegisterRequest>,
) -> Result<HttpResponse, ApiError> {
    body.validate()?;

    if body.password != body.password_confirmation {
        return Err(ApiError::Validation(vec![FieldError {
            field: "password_confirmation".to_string(),
            message: "Passwords do not match".to_string(),
        }]));
    }

    validate_password(&body.password).map_err(|err| ApiError::Validation(vec![err]))?;

    let password = body.password.clone();
    let password_hash = web::block(move || hash_password(&password))
        .await?
        .map_err(|err| ApiError::Internal(format!("password hashing failed: {err}")))?;

    // Role and partner from the payload are deliberately ignored:
    // self-signup always yields an unassigned USER.
    let new_user = NewUser {
        login: body.login.clone(),
        password_hash,
        role: Role::User.as_str().to_string(),
        partner_id: None,
        name: none_if_empty(body.name.clone()),
        email: none_if_empty(body.email.clone()),
        phone: none_if_empty(body.phone.clone()),
    };

    let mut conn = pool.get()?;
    let created = web::block(move || User::create(&mut conn, new_user)).await?;

    let user = match created {
        Ok(user) => user,
        Err(diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )) => {
            warn!(login = %body.login, "Registration failed - login already exists");
            return Err(ApiError::Conflict(
                "User with this login already exists".to_string(),
            ));
        }
        Err(err) => return Err(ApiError::internal(err)),
    };

    info!(user_id = user.id, login = %user.login, "User registered successfully");
    Ok(HttpResponse::Created().json(UserResponse::from(user)))
}

#[post("/login")]
pub async fn login(
    pool: web::Data<DbPool>,
    mint: web::Data<TokenMint>,
    config: web::Data<AppConfig>,
    body: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    body.validate()?;

    let login_name = body.login.clone();
    let mut conn = pool.get()?;
    let lookup = web::block(move || User::find_by_login(&mut conn, &login_name)).await?;

    let user = match lookup {
        Ok(user) => user,
        Err(diesel::result::Error::NotFound) => {
            warn!(login = %body.login, "Login attempt failed - user not found");
            failed_login_delay().await;
            return Err(ApiError::Unauthorized("Invalid credentials".to_string()));
        }
        Err(err) => return Err(ApiError::internal(err)),
    };

    let password = body.password.clone();
    let stored_hash = user.password_hash.clone();
    let password_valid = web::block(move || {
        PasswordHash::new(&stored_hash)
            .map(|parsed| {
                Argon2::default()
                    .verify_password(password.as_bytes(), &parsed)
                    .is_ok()
            })
            .unwrap_or(false)
    })
    .await?;

    if !password_valid {
        warn!(user_id = user.id, login = %user.login, "Password mismatch");
        failed_login_delay().await;
        return Err(ApiError::Unauthorized("Invalid credentials".to_string()));
    }

    // Cost migration: recompute weak digests in the background so login
    // latency is unaffected.
    if needs_rehash(&user.password_hash) {
        let pool = pool.clone();
        let user_id = user.id;
        let password = body.password.clone();
        tokio::spawn(async move {
            let rehash = web::block(move || -> anyhow::Result<()> {
                let new_hash = hash_password(&password)
                    .map_err(|err| anyhow::anyhow!("rehash failed: {err}"))?;
                let mut conn = pool.get()?;
                User::update_password_hash(&mut conn, user_id, &new_hash)?;
                Ok(())
            })
            .await;
            if let Ok(Err(err)) = rehash {
                warn!(user_id, error = %err, "Background password rehash failed");
            }
        });
    }

    let access = mint
        .issue_access(user.id, &user.login, &user.role)
        .map_err(|err| ApiError::Internal(format!("JWT generation failed: {err}")))?;
    let refresh_token_issued = mint
        .issue_refresh(user.id)
        .map_err(|err| ApiError::Internal(format!("refresh JWT generation failed: {err}")))?;

    info!(user_id = user.id, login = %user.login, role = %user.role, "User logged in successfully");

    Ok(HttpResponse::Ok()
        .cookie(build_cookie(
            "token",
            access.token,
            mint.access_ttl_secs(),
            config.production,
        ))
        .cookie(build_cookie(
            "refresh_token",
            refresh_token_issued.token,
            mint.refresh_ttl_secs(),
            config.production,
        ))
        .json(LoginResponse {
            message: "Login successful".to_string(),
            user: UserResponse::from(user),
        }))
}

#[post("/refresh")]
pub async fn refresh(
    req: HttpRequest,
    pool: web::Data<DbPool>,
    mint: web::Data<TokenMint>,
    revocations: web::Data<RevocationStore>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, ApiError> {
    let refresh_token = req
        .cookie("refresh_token")
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::Unauthorized("Missing refresh token".to_string()))?;

    let claims = mint.parse_refresh(&refresh_token).map_err(|err| {
        warn!(error = %err, "Invalid refresh token");
        ApiError::Unauthorized("Invalid refresh token".to_string())
    })?;

    let revocations_for_check = revocations.clone();
    let jti = claims.jti.clone();
    let revoked = web::block(move || revocations_for_check.is_revoked(&jti)).await?;
    if revoked {
        return Err(ApiError::Unauthorized("Refresh token revoked".to_string()));
    }

    // Rotation: the incoming refresh token dies now, revoked until its
    // original expiry.
    let old_jti = claims.jti.clone();
    let expires_at = Utc
        .timestamp_opt(claims.expires_at, 0)
        .single()
        .unwrap_or_else(Utc::now);
    let revocations_for_revoke = revocations.clone();
    web::block(move || revocations_for_revoke.revoke(&old_jti, expires_at)).await?;

    let mut conn = pool.get()?;
    let user_id = claims.user_id;
    let user = match web::block(move || User::find_by_id(&mut conn, user_id)).await? {
        Ok(user) => user,
        Err(diesel::result::Error::NotFound) => {
            warn!(user_id, "Refresh token refers to non-existent user");
            return Err(ApiError::Unauthorized("Invalid refresh token".to_string()));
        }
        Err(err) => return Err(ApiError::internal(err)),
    };

    let access = mint
        .issue_access(user.id, &user.login, &user.role)
        .map_err(|err| ApiError::Internal(format!("failed to issue access token: {err}")))?;
    let new_refresh = mint
        .issue_refresh(user.id)
        .map_err(|err| ApiError::Internal(format!("failed to issue refresh token: {err}")))?;

    info!(
        user_id = user.id,
        new_access_jti = %access.jti,
        new_refresh_jti = %new_refresh.jti,
        "Token refreshed successfully"
    );

    Ok(HttpResponse::Ok()
        .cookie(build_cookie(
            "token",
            access.token,
            mint.access_ttl_secs(),
            config.production,
        ))
        .cookie(build_cookie(
            "refresh_token",
            new_refresh.token,
            mint.refresh_ttl_secs(),
            config.production,
        ))
        .json(serde_json::json!({ "message": "Token refreshed" })))
}

#[post("/logout")]
pub async fn logout(
    req: HttpRequest,
    mint: web::Data<TokenMint>,
    revocations: web::Data<RevocationStore>,
    config: web::Data<AppConfig>,
) -> Result<HttpResponse, ApiError> {
    // Best effort: revoke whatever valid tokens the client still carries.
    // A missing or already-dead cookie is not an error, so repeating
    // logout changes nothing.
    let mut to_revoke = Vec::new();
    if let Some(cookie) = req.cookie("token") {
        if let Ok(claims) = mint.parse_access(cookie.value()) {
            to_revoke.push((claims.jti, claims.expires_at));
        }
    }
    if let Some(cookie) = req.cookie("refresh_token") {
        if let Ok(claims) = mint.parse_refresh(cookie.value()) {
            to_revoke.push((claims.jti, claims.expires_at));
        }
    }

    if !to_revoke.is_empty() {
        let revocations = revocations.clone();
        web::block(move || {
            for (jti, exp) in to_revoke {
                let expires_at = Utc
                    .timestamp_opt(exp, 0)
                    .single()
                    .unwrap_or_else(Utc::now);
                revocations.revoke(&jti, expires_at);
            }
        })
        .await?;
    }

    info!("User logged out successfully");

    Ok(HttpResponse::Ok()
        .cookie(clear_cookie("token", config.production))
        .cookie(clear_cookie("refresh_token", config.production))
        .json(serde_json::json!({ "message": "Logged out successfully" })))
}

#[get("/me")]
pub async fn me(ctx: AuthContext, pool: web::Data<DbPool>) -> Result<HttpResponse, ApiError> {
    let mut conn = pool.get()?;
    let user_id = ctx.user_id;
    let user = match web::block(move || User::find_by_id(&mut conn, user_id)).await? {
        Ok(user) => user,
        Err(diesel::result::Error::NotFound) => {
            warn!(user_id, "Session refers to non-existent user");
            return Err(ApiError::Unauthorized("Invalid session".to_string()));
        }
        Err(err) => return Err(ApiError::internal(err)),
    };

    let mut response = UserResponse::from(user);

    if let Some(partner_id) = response.partner_id {
        let mut conn = pool.get()?;
        match web::block(move || Partner::find_by_id(&mut conn, partner_id)).await? {
            Ok(partner) => response.partner = Some(partner),
            // A dangling partner reference is logged but does not block
            // the response.
            Err(err) => warn!(partner_id, error = %err, "Failed to fetch partner for principal"),
        }
    }

    Ok(HttpResponse::Ok().json(response))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_default_hash_does_not_need_rehash() {
        let hash = hash_password("Str0ng-pass").unwrap();
        assert!(!needs_rehash(&hash));
    }

    #[test]
    fn weak_parameters_trigger_rehash() {
        // Hash with parameters below the current defaults.
        let weak_params = Params::new(8 * 1024, 1, 1, None).unwrap();
        let weak = Argon2::new(argon2::Algorithm::Argon2id, argon2::Version::V0x13, weak_params);
        let salt = SaltString::generate(&mut OsRng);
        let hash = weak
            .hash_password(b"Str0ng-pass", &salt)
            .unwrap()
            .to_string();
        assert!(needs_rehash(&hash));
    }

    #[test]
    fn unparseable_hash_triggers_rehash() {
        assert!(needs_rehash("not-a-phc-string"));
    }

    #[test]
    fn cookies_carry_security_attributes() {
        let cookie = build_cookie("token", "value".to_string(), 3600, true);
        assert!(cookie.http_only().unwrap());
        assert!(cookie.secure().unwrap());
        assert_eq!(cookie.same_site(), Some(SameSite::None));
        assert_eq!(cookie.path(), Some("/"));
    }

    #[test]
    fn clear_cookie_expires_immediately() {
        let cookie = clear_cookie("token", false);
        assert_eq!(cookie.value(), "");
        assert_eq!(cookie.max_age(), Some(CookieDuration::seconds(0)));
    }
}
