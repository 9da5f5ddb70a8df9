//! Session token minting and validation
//!
//! Tokens are HS256 JWTs carried in cookies. Two flavors exist: short
//! lived access tokens ({id, login, role, jti, iat, exp}) and long lived
//! refresh tokens ({id, jti, iat, exp, typ:"refresh"}). Claims are parsed
//! into typed structs here; loosely typed maps never leave this module.
//!
//! Every issued token gets a fresh UUIDv4 `jti` so individual tokens can
//! be revoked without touching the signing secret.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Tokens whose `iat` is further in the future than this are rejected.
const MAX_IAT_SKEW_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("invalid token signature")]
    BadSignature,
    #[error("token has expired")]
    Expired,
    #[error("wrong token type")]
    WrongType,
    #[error("token id missing")]
    MissingId,
    #[error("token issued in the future")]
    ClockSkew,
}

/// Validated access-token claims.
#[derive(Debug, Clone)]
pub struct AccessClaims {
    pub user_id: i32,
    pub login: String,
    pub role: String,
    pub jti: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// Validated refresh-token claims.
#[derive(Debug, Clone)]
pub struct RefreshClaims {
    pub user_id: i32,
    pub jti: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// A freshly signed token plus the metadata callers need for cookies and
/// revocation bookkeeping.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub jti: String,
    pub expires_at: i64,
}

#[derive(Serialize)]
struct AccessTokenClaims<'a> {
    id: i32,
    login: &'a str,
    role: &'a str,
    jti: String,
    iat: i64,
    exp: i64,
}

#[derive(Serialize)]
struct RefreshTokenClaims {
    id: i32,
    jti: String,
    iat: i64,
    exp: i64,
    typ: &'static str,
}

/// Raw wire claims; typed validation happens in `parse_*`.
#[derive(Deserialize)]
struct RawClaims {
    #[serde(default)]
    id: Option<i32>,
    #[serde(default)]
    login: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    jti: Option<String>,
    #[serde(default)]
    iat: Option<i64>,
    exp: i64,
    #[serde(default)]
    typ: Option<String>,
}

#[derive(Clone)]
pub struct TokenMint {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenMint {
    pub fn new(
        secret: &str,
        access_ttl: std::time::Duration,
        refresh_ttl: std::time::Duration,
    ) -> Self {
        // HS256 only. Anything else in the header fails validation.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            access_ttl: Duration::seconds(access_ttl.as_secs() as i64),
            refresh_ttl: Duration::seconds(refresh_ttl.as_secs() as i64),
        }
    }

    pub fn access_ttl_secs(&self) -> i64 {
        self.access_ttl.num_seconds()
    }

    pub fn refresh_ttl_secs(&self) -> i64 {
        self.refresh_ttl.num_seconds()
    }

    pub fn issue_access(
        &self,
        user_id: i32,
        login: &str,
        role: &str,
    ) -> Result<IssuedToken, jsonwebtoken::errors::Error> {
        let now = Utc::now().timestamp();
        let exp = now + self.access_ttl.num_seconds();
        let jti = Uuid::new_v4().to_string();
        let claims = AccessTokenClaims {
            id: user_id,
            login,
            role,
            jti: jti.clone(),
            iat: now,
            exp,
        };
        let token = encode(&Header::default(), &claims, &self.encoding_key)?;
        Ok(IssuedToken {
            token,
            jti,
            expires_at: exp,
        })
    }

    pub fn issue_refresh(&self, user_id: i32) -> Result<IssuedToken, jsonwebtoken::errors::Error> {
        let now = Utc::now().timestamp();
        let exp = now + self.refresh_ttl.num_seconds();
        let jti = Uuid::new_v4().to_string();
        let claims = RefreshTokenClaims {
            id: user_id,
            jti: jti.clone(),
            iat: now,
            exp,
            typ: "refresh",
        };
        let token = encode(&Header::default(), &claims, &self.encoding_key)?;
        Ok(IssuedToken {
            token,
            jti,
            expires_at: exp,
        })
    }

    pub fn parse_access(&self, token: &str) -> Result<AccessClaims, TokenError> {
        let raw = self.decode_raw(token)?;
        if raw.typ.as_deref() == Some("refresh") {
            return Err(TokenError::WrongType);
        }
        let jti = non_empty_jti(&raw)?;
        let iat = check_skew(&raw)?;
        let user_id = raw.id.ok_or(TokenError::Malformed)?;
        Ok(AccessClaims {
            user_id,
            login: raw.login.unwrap_or_default(),
            role: raw.role.unwrap_or_default(),
            jti,
            issued_at: iat,
            expires_at: raw.exp,
        })
    }

    pub fn parse_refresh(&self, token: &str) -> Result<RefreshClaims, TokenError> {
        let raw = self.decode_raw(token)?;
        if raw.typ.as_deref() != Some("refresh") {
            return Err(TokenError::WrongType);
        }
        let jti = non_empty_jti(&raw)?;
        let iat = check_skew(&raw)?;
        let user_id = raw.id.ok_or(TokenError::Malformed)?;
        Ok(RefreshClaims {
            user_id,
            jti,
            issued_at: iat,
            expires_at: raw.exp,
        })
    }

    fn decode_raw(&self, token: &str) -> Result<RawClaims, TokenError> {
        decode::<RawClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| {
                use jsonwebtoken::errors::ErrorKind;
                match err.kind() {
                    ErrorKind::ExpiredSignature => TokenError::Expired,
                    ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                        TokenError::BadSignature
                    }
                    _ => TokenError::Malformed,
                }
            })
    }
}

fn non_empty_jti(raw: &RawClaims) -> Result<String, TokenError> {
    match raw.jti.as_deref() {
        Some(jti) if !jti.is_empty() => Ok(jti.to_string()),
        _ => Err(TokenError::MissingId),
    }
}

fn check_skew(raw: &RawClaims) -> Result<i64, TokenError> {
    let iat = raw.iat.unwrap_or(0);
    if iat > Utc::now().timestamp() + MAX_IAT_SKEW_SECS {
        return Err(TokenError::ClockSkew);
    }
    Ok(iat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn mint() -> TokenMint {
        TokenMint::new(
            "test-secret",
            StdDuration::from_secs(3600),
            StdDuration::from_secs(86400),
        )
    }

    #[test]
    fn access_round_trip() {
        let mint = mint();
        let issued = mint.issue_access(7, "alice", "USER").unwrap();
        let claims = mint.parse_access(&issued.token).unwrap();
        assert_eq!(claims.user_id, 7);
        assert_eq!(claims.login, "alice");
        assert_eq!(claims.role, "USER");
        assert_eq!(claims.jti, issued.jti);
        assert_eq!(claims.expires_at, issued.expires_at);
    }

    #[test]
    fn refresh_round_trip() {
        let mint = mint();
        let issued = mint.issue_refresh(7).unwrap();
        let claims = mint.parse_refresh(&issued.token).unwrap();
        assert_eq!(claims.user_id, 7);
        assert_eq!(claims.jti, issued.jti);
    }

    #[test]
    fn every_token_gets_a_fresh_jti() {
        let mint = mint();
        let a = mint.issue_access(1, "a", "USER").unwrap();
        let b = mint.issue_access(1, "a", "USER").unwrap();
        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn refresh_token_is_rejected_as_access() {
        let mint = mint();
        let issued = mint.issue_refresh(7).unwrap();
        assert_eq!(
            mint.parse_access(&issued.token).unwrap_err(),
            TokenError::WrongType
        );
    }

    #[test]
    fn access_token_is_rejected_as_refresh() {
        let mint = mint();
        let issued = mint.issue_access(7, "alice", "USER").unwrap();
        assert_eq!(
            mint.parse_refresh(&issued.token).unwrap_err(),
            TokenError::WrongType
        );
    }

    #[test]
    fn wrong_secret_fails_signature_check() {
        let mint = mint();
        let other = TokenMint::new(
            "other-secret",
            StdDuration::from_secs(3600),
            StdDuration::from_secs(86400),
        );
        let issued = mint.issue_access(7, "alice", "USER").unwrap();
        assert_eq!(
            other.parse_access(&issued.token).unwrap_err(),
            TokenError::BadSignature
        );
    }

    #[test]
    fn garbage_is_malformed() {
        let mint = mint();
        assert_eq!(
            mint.parse_access("not.a.token").unwrap_err(),
            TokenError::Malformed
        );
    }

    #[test]
    fn expired_token_is_rejected() {
        // Zero TTL makes exp == iat, which is already in the past for
        // a leeway-free validation.
        let mint = TokenMint::new(
            "test-secret",
            StdDuration::from_secs(0),
            StdDuration::from_secs(0),
        );
        let issued = mint.issue_access(7, "alice", "USER").unwrap();
        std::thread::sleep(StdDuration::from_millis(1100));
        assert_eq!(
            mint.parse_access(&issued.token).unwrap_err(),
            TokenError::Expired
        );
    }

    #[test]
    fn future_iat_is_rejected() {
        let mint = mint();
        let now = Utc::now().timestamp();
        let claims = serde_json::json!({
            "id": 7,
            "login": "alice",
            "role": "USER",
            "jti": "abc",
            "iat": now + 600,
            "exp": now + 7200,
        });
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        assert_eq!(mint.parse_access(&token).unwrap_err(), TokenError::ClockSkew);
    }

    #[test]
    fn missing_jti_is_rejected() {
        let mint = mint();
        let now = Utc::now().timestamp();
        let claims = serde_json::json!({
            "id": 7,
            "iat": now,
            "exp": now + 7200,
        });
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        assert_eq!(mint.parse_access(&token).unwrap_err(), TokenError::MissingId);
    }
}
