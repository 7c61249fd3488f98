use std::{str::FromStr, time::Duration};

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderValue, StatusCode},
};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use admin_service_util::AuthSettings;

use crate::problem::ProblemResponse;
use crate::router::AppState;

/// Verifies bearer tokens signed with the shared HMAC secret.
#[derive(Clone)]
pub struct TokenValidator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    validation: Validation,
    lifetime: Duration,
}

impl TokenValidator {
    pub fn new(secret: &[u8], algorithm: Algorithm, lifetime: Duration) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "sub"]);
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            algorithm,
            validation,
            lifetime,
        }
    }

    pub fn from_settings(settings: &AuthSettings) -> Result<Self, TokenError> {
        let algorithm = Algorithm::from_str(&settings.jwt_algorithm)
            .map_err(|_| TokenError::Algorithm(settings.jwt_algorithm.clone()))?;
        Ok(Self::new(
            settings.jwt_secret.as_bytes(),
            algorithm,
            Duration::from_secs(settings.token_expire_minutes.saturating_mul(60)),
        ))
    }

    /// Returns the caller identity carried in the `sub` claim.
    pub fn validate(&self, token: &str) -> Result<String, TokenError> {
        let data = decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|err| TokenError::Invalid(err.to_string()))?;
        match data.claims.sub {
            Some(subject) if !subject.is_empty() => Ok(subject),
            _ => Err(TokenError::MissingSubject),
        }
    }

    /// Signs a token for `subject` valid for the configured lifetime.
    pub fn issue(&self, subject: &str, now: DateTime<Utc>) -> Result<String, TokenError> {
        let issued_at = now.timestamp();
        let claims = TokenClaims {
            sub: Some(subject.to_string()),
            iat: Some(issued_at),
            exp: issued_at + self.lifetime.as_secs() as i64,
        };
        encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(|err| TokenError::Invalid(err.to_string()))
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TokenClaims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("missing bearer token")]
    Missing,
    #[error("invalid token: {0}")]
    Invalid(String),
    #[error("token carries no subject")]
    MissingSubject,
    #[error("unsupported signing algorithm {0}")]
    Algorithm(String),
}

/// Authenticated caller, resolved from `Authorization: Bearer <token>`.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub subject: String,
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ProblemResponse;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let result = bearer_token(parts).and_then(|token| state.tokens().validate(token));
        match result {
            Ok(subject) => Ok(Self { subject }),
            Err(err) => {
                debug!(stage = "auth", error = %err, path = %parts.uri.path(), "request rejected");
                Err(unauthorized())
            }
        }
    }
}

fn bearer_token(parts: &Parts) -> Result<&str, TokenError> {
    let value = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(TokenError::Missing)?;
    let (scheme, token) = value.split_once(' ').ok_or(TokenError::Missing)?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(TokenError::Missing);
    }
    Ok(token)
}

fn unauthorized() -> ProblemResponse {
    ProblemResponse::new(
        StatusCode::UNAUTHORIZED,
        "unauthorized",
        "Could not validate credentials",
    )
    .with_header(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"))
}
