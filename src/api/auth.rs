//! JWT auth for the API.
//!
//! - Tokens carry the caller's id, role, position and department
//! - When `DEV_MODE=false`, every protected endpoint requires
//!   `Authorization: Bearer <jwt>`
//! - `GET /api/events` also accepts `?token=<jwt>`, since browser
//!   `EventSource` cannot set headers
//!
//! The middleware inserts the caller as a [`CurrentUser`] extension.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Query, State},
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use serde::Deserialize;

use super::routes::AppState;
use super::types::ApiError;
use crate::model::{CurrentUser, Role};

#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct Claims {
    /// User id
    sub: String,
    role: Role,
    #[serde(default)]
    position: String,
    #[serde(default)]
    department: String,
    /// Issued-at unix seconds
    iat: i64,
    /// Expiration unix seconds
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Longest token lifetime [`issue_token`] will sign.
pub const MAX_TTL_DAYS: i64 = 3650;

/// Sign a token for `user`. Returns the token and its expiry (unix seconds).
///
/// Tokens normally come from the organisation's sign-in service; this is the
/// matching signer for services that embed the crate.
pub fn issue_token(
    secret: &str,
    ttl_days: i64,
    user: &CurrentUser,
) -> Result<(String, i64), jsonwebtoken::errors::Error> {
    let now = Utc::now();
    let ttl_days = ttl_days.clamp(1, MAX_TTL_DAYS);
    let exp = now + Duration::days(ttl_days);
    let claims = Claims {
        sub: user.id.clone(),
        role: user.role,
        position: user.position.clone(),
        department: user.department.clone(),
        iat: now.timestamp(),
        exp: exp.timestamp(),
    };
    let token = jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;
    Ok((token, claims.exp))
}

/// Check a token's signature and expiry and recover the caller.
pub fn verify_token(token: &str, secret: &str) -> Result<CurrentUser, jsonwebtoken::errors::Error> {
    let data = jsonwebtoken::decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    let claims = data.claims;
    Ok(CurrentUser {
        id: claims.sub,
        role: claims.role,
        position: claims.position,
        department: claims.department,
    })
}

fn dev_user() -> CurrentUser {
    CurrentUser {
        id: "dev".to_string(),
        role: Role::Admin,
        position: String::new(),
        department: String::new(),
    }
}

fn bearer_token(req: &Request<Body>) -> Option<String> {
    let header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");
    header
        .strip_prefix("Bearer ")
        .or_else(|| header.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn query_token(req: &Request<Body>) -> Option<String> {
    Query::<TokenQuery>::try_from_uri(req.uri())
        .ok()
        .and_then(|Query(q)| q.token)
        .filter(|t| !t.is_empty())
}

pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    // Dev mode => no auth checks.
    if state.config.dev_mode {
        req.extensions_mut().insert(dev_user());
        return next.run(req).await;
    }

    // Fail closed if the secret vanished from the config.
    let Some(secret) = state.config.auth.jwt_secret.as_deref() else {
        return ApiError::new(
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            "JWT_SECRET not configured",
        )
        .into_response();
    };

    let Some(token) = bearer_token(&req).or_else(|| query_token(&req)) else {
        return ApiError::unauthorized("Missing Authorization header").into_response();
    };

    match verify_token(&token, secret) {
        Ok(user) => {
            req.extensions_mut().insert(user);
            next.run(req).await
        }
        Err(e) => {
            tracing::debug!(error = %e, "rejected token");
            ApiError::unauthorized("Invalid or expired token").into_response()
        }
    }
}
