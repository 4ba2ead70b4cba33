//! Caller identity for detection endpoints and the shared secret guarding
//! maintenance endpoints.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::app_state::AppState;
use crate::routes::error::ApiError;

/// Access token claims issued by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Owner id of jobs created with this token.
    pub sub: String,
    /// Household whose catalog is used for ownership tagging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub household_id: Option<String>,
    pub exp: i64,
}

/// Signing secrets held in application state.
#[derive(Clone)]
pub struct AuthKeys {
    jwt_secret: String,
    cron_secret: String,
}

impl AuthKeys {
    pub fn new(jwt_secret: impl Into<String>, cron_secret: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            cron_secret: cron_secret.into(),
        }
    }

    pub fn verify_token(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )?;
        Ok(data.claims)
    }

    /// Sign claims with the configured secret. Used by tooling and tests.
    pub fn issue_token(&self, claims: &Claims) -> Result<String, jsonwebtoken::errors::Error> {
        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
    }

    pub fn is_cron_secret(&self, presented: &str) -> bool {
        !self.cron_secret.is_empty() && constant_time_eq(presented.as_bytes(), self.cron_secret.as_bytes())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Authenticated caller of the detection endpoints.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub owner_id: String,
    pub household_id: Option<String>,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(ApiError::unauthorized)?;
        let claims = state.auth.verify_token(token).map_err(|e| {
            tracing::debug!(error = %e, "Rejected access token");
            ApiError::unauthorized()
        })?;

        Ok(AuthUser {
            owner_id: claims.sub,
            household_id: claims.household_id,
        })
    }
}

/// Marker extractor for requests carrying the cron secret.
#[derive(Debug)]
pub struct CronAuth;

impl FromRequestParts<AppState> for CronAuth {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        match bearer_token(parts) {
            Some(token) if state.auth.is_cron_secret(token) => Ok(CronAuth),
            _ => {
                tracing::warn!(path = %parts.uri.path(), "Rejected maintenance request");
                Err(ApiError::unauthorized())
            }
        }
    }
}
