use std::sync::Arc;

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::AppError;

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: Arc<Vec<u8>>,
    pub exp_hours: i64,
    /// Lifetime of impersonation credentials, deliberately much shorter than
    /// regular sessions.
    pub impersonation_exp_minutes: i64,
}

impl JwtConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let secret = std::env::var("JWT_SECRET").map_err(|_| AppError::configuration("JWT_SECRET not set"))?;
        let exp_hours = std::env::var("JWT_EXP_HOURS")
            .map(|val| val.parse::<i64>())
            .unwrap_or(Ok(24))
            .map_err(|_| AppError::configuration("JWT_EXP_HOURS must be a valid integer"))?;
        let impersonation_exp_minutes = std::env::var("IMPERSONATION_EXP_MINUTES")
            .map(|val| val.parse::<i64>())
            .unwrap_or(Ok(60))
            .map_err(|_| AppError::configuration("IMPERSONATION_EXP_MINUTES must be a valid integer"))?;

        Ok(Self {
            secret: Arc::new(secret.into_bytes()),
            exp_hours,
            impersonation_exp_minutes,
        })
    }

    pub fn encode(&self, user_id: Uuid, email: &str) -> Result<String, AppError> {
        self.encode_claims(user_id, email, None, chrono::Duration::hours(self.exp_hours))
    }

    /// Mint a short-lived credential for the target identity. The `act` claim
    /// records which admin is acting as the target, so downstream audit trails
    /// can attribute the session.
    pub fn encode_impersonation(
        &self,
        target_id: Uuid,
        target_email: &str,
        admin_email: &str,
    ) -> Result<String, AppError> {
        self.encode_claims(
            target_id,
            target_email,
            Some(admin_email.to_string()),
            chrono::Duration::minutes(self.impersonation_exp_minutes),
        )
    }

    fn encode_claims(
        &self,
        user_id: Uuid,
        email: &str,
        act: Option<String>,
        lifetime: chrono::Duration,
    ) -> Result<String, AppError> {
        use chrono::Utc;

        let now = Utc::now();
        let exp = now + lifetime;

        let claims = Claims {
            sub: user_id,
            email: email.to_string(),
            act,
            exp: exp.timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        jsonwebtoken::encode(&Header::default(), &claims, &EncodingKey::from_secret(&self.secret))
            .map_err(|err| AppError::token(err.to_string()))
    }

    pub fn decode(&self, token: &str) -> Result<Claims, AppError> {
        let mut validation = Validation::default();
        validation.validate_exp = true;

        jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map(|data| data.claims)
            .map_err(|err| AppError::token(err.to_string()))
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    /// Admin email when this is an impersonation credential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub act: Option<String>,
    pub exp: usize,
    pub iat: usize,
}

/// Bearer-token identity, decoded without touching the database. Handlers
/// that need the caller's role use [`crate::authz::Identity`] instead.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
    pub impersonator: Option<String>,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::unauthorized("Authorization header missing"))?;

        let claims = state.jwt.decode(token)?;

        Ok(AuthUser {
            user_id: claims.sub,
            email: claims.email,
            impersonator: claims.act,
        })
    }
}
