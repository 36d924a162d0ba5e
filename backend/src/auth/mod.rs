mod password;

pub use password::{hash_password, verify_password};

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use chrono::{Duration, Utc};
use diesel::prelude::*;
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db;
use crate::error::AppError;
use crate::schema::token_blocklist;
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // User id
    pub jti: String,
    #[serde(rename = "type")]
    pub kind: TokenKind,
    pub iat: usize,
    pub exp: usize,
}

pub fn create_token(
    user_id: i32,
    kind: TokenKind,
    ttl: Duration,
    jwt_secret: &str,
) -> Result<String, AppError> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        jti: Uuid::new_v4().to_string(),
        kind,
        iat: now.timestamp() as usize,
        exp: (now + ttl).timestamp().max(0) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(jwt_secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Failed to sign token: {}", e)))
}

pub fn create_access_token(user_id: i32, config: &AppConfig) -> Result<String, AppError> {
    create_token(
        user_id,
        TokenKind::Access,
        Duration::minutes(config.access_token_ttl_minutes),
        &config.jwt_secret,
    )
}

pub fn create_refresh_token(user_id: i32, config: &AppConfig) -> Result<String, AppError> {
    create_token(
        user_id,
        TokenKind::Refresh,
        Duration::days(config.refresh_token_ttl_days),
        &config.jwt_secret,
    )
}

pub fn validate_token(token: &str, jwt_secret: &str) -> Result<Claims, AppError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| match e.kind() {
        ErrorKind::ExpiredSignature => AppError::TokenExpired,
        _ => AppError::unauthorized("Invalid or expired token"),
    })
}

/// What a mailed link authorises. Tokens minted for one purpose never validate for another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmailPurpose {
    ConfirmEmail,
    ResetPassword,
}

impl EmailPurpose {
    fn salt(&self) -> &'static str {
        match self {
            EmailPurpose::ConfirmEmail => "email-confirm",
            EmailPurpose::ResetPassword => "password-reset",
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EmailClaims {
    sub: String, // Email address
    purpose: String,
    iat: usize,
    exp: usize,
}

pub fn create_email_token(
    email: &str,
    purpose: EmailPurpose,
    config: &AppConfig,
) -> Result<String, AppError> {
    let now = Utc::now();
    let claims = EmailClaims {
        sub: email.to_string(),
        purpose: purpose.salt().to_string(),
        iat: now.timestamp() as usize,
        exp: (now + Duration::seconds(config.email_token_ttl_seconds))
            .timestamp()
            .max(0) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config.secret_key.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Failed to sign email token: {}", e)))
}

/// Returns the email address a link was issued for, or `None` when the token is
/// malformed, expired, or minted for another purpose.
pub fn confirm_email_token(token: &str, purpose: EmailPurpose, config: &AppConfig) -> Option<String> {
    let mut validation = Validation::default();
    validation.leeway = 0;
    decode::<EmailClaims>(
        token,
        &DecodingKey::from_secret(config.secret_key.as_bytes()),
        &validation,
    )
    .ok()
    .filter(|data| data.claims.purpose == purpose.salt())
    .map(|data| data.claims.sub)
}

/// The authenticated caller of a request carrying a valid, unrevoked access token.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: i32,
    pub jti: String,
}

/// The caller of a request carrying a valid, unrevoked refresh token.
#[derive(Debug, Clone)]
pub struct RefreshUser(pub CurrentUser);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        authenticate(parts, state, TokenKind::Access).await
    }
}

#[async_trait]
impl FromRequestParts<AppState> for RefreshUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        authenticate(parts, state, TokenKind::Refresh).await.map(RefreshUser)
    }
}

fn bearer_token(parts: &Parts) -> Result<&str, AppError> {
    let header = parts
        .headers
        .get(AUTHORIZATION)
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?;
    header
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix("Bearer "))
        .filter(|token| !token.is_empty())
        .ok_or_else(|| AppError::unauthorized("Invalid Authorization header format"))
}

async fn authenticate(parts: &Parts, state: &AppState, expected: TokenKind) -> Result<CurrentUser, AppError> {
    let token = bearer_token(parts)?;
    let claims = validate_token(token, &state.config.jwt_secret)?;
    if claims.kind != expected {
        return Err(AppError::unauthorized(match expected {
            TokenKind::Access => "Access token required",
            TokenKind::Refresh => "Refresh token required",
        }));
    }
    let id = claims
        .sub
        .parse::<i32>()
        .map_err(|_| AppError::unauthorized("Invalid token subject"))?;

    let jti = claims.jti.clone();
    let revoked = db::run(&state.pool, move |conn| {
        let count: i64 = token_blocklist::table
            .filter(token_blocklist::jti.eq(&jti))
            .count()
            .get_result(conn)?;
        Ok(count > 0)
    })
    .await?;
    if revoked {
        return Err(AppError::unauthorized("Token has been revoked"));
    }

    log::debug!("Authenticated user {}", id);
    Ok(CurrentUser { id, jti: claims.jti })
}
