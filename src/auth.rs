//! HS256 access and refresh tokens, and the bearer-token extractor.

use crate::domain::{Actor, UserType};
use axum::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

pub const ACCESS_TOKEN_TTL_HOURS: i64 = 1;
pub const REFRESH_TOKEN_TTL_DAYS: i64 = 30;

const ACCESS: &str = "access";
const REFRESH: &str = "refresh";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,
    #[error("invalid token: {0}")]
    InvalidToken(String),
    #[error("expected a {expected} token")]
    WrongTokenType { expected: &'static str },
    #[error("token encoding failed: {0}")]
    Encoding(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::Encoding(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        };
        let body = json!({
            "error": "Authentication required",
            "code": "unauthenticated",
            "detail": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    pub user_id: i64,
    pub phone: String,
    pub user_type: UserType,
    pub exp: i64,
    pub iat: i64,
    #[serde(rename = "type")]
    pub token_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub user_id: i64,
    pub phone: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(rename = "type")]
    pub token_type: String,
}

/// Shared HMAC secret for signing and verification.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl JwtKeys {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }
}

impl std::fmt::Debug for JwtKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JwtKeys(..)")
    }
}

fn sign<T: Serialize>(keys: &JwtKeys, claims: &T) -> Result<String, AuthError> {
    encode(&Header::new(Algorithm::HS256), claims, &keys.encoding)
        .map_err(|e| AuthError::Encoding(e.to_string()))
}

fn validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;
    validation
}

pub fn issue_access_token(
    keys: &JwtKeys,
    user_id: i64,
    phone: &str,
    user_type: UserType,
    now: DateTime<Utc>,
) -> Result<String, AuthError> {
    sign(
        keys,
        &AccessClaims {
            user_id,
            phone: phone.to_string(),
            user_type,
            exp: (now + Duration::hours(ACCESS_TOKEN_TTL_HOURS)).timestamp(),
            iat: now.timestamp(),
            token_type: ACCESS.to_string(),
        },
    )
}

pub fn issue_refresh_token(
    keys: &JwtKeys,
    user_id: i64,
    phone: &str,
    now: DateTime<Utc>,
) -> Result<String, AuthError> {
    sign(
        keys,
        &RefreshClaims {
            user_id,
            phone: phone.to_string(),
            exp: (now + Duration::days(REFRESH_TOKEN_TTL_DAYS)).timestamp(),
            iat: now.timestamp(),
            token_type: REFRESH.to_string(),
        },
    )
}

pub fn verify_access_token(keys: &JwtKeys, token: &str) -> Result<AccessClaims, AuthError> {
    let data = decode::<AccessClaims>(token, &keys.decoding, &validation())
        .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
    if data.claims.token_type != ACCESS {
        return Err(AuthError::WrongTokenType { expected: ACCESS });
    }
    Ok(data.claims)
}

pub fn verify_refresh_token(keys: &JwtKeys, token: &str) -> Result<RefreshClaims, AuthError> {
    let data = decode::<RefreshClaims>(token, &keys.decoding, &validation())
        .map_err(|e| AuthError::InvalidToken(e.to_string()))?;
    if data.claims.token_type != REFRESH {
        return Err(AuthError::WrongTokenType { expected: REFRESH });
    }
    Ok(data.claims)
}

/// The caller identified by a valid `Authorization: Bearer` access token.
#[derive(Debug, Clone)]
pub struct AuthUser(pub AccessClaims);

impl AuthUser {
    pub fn actor(&self) -> Actor {
        Actor::new(self.0.user_id, self.0.user_type)
    }

    pub fn user_id(&self) -> i64 {
        self.0.user_id
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::MissingToken)?;

        let keys = JwtKeys::from_ref(state);
        let claims = verify_access_token(&keys, token)?;
        Ok(AuthUser(claims))
    }
}
