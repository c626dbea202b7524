use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::AppError;
use crate::jwt::AuthUser;
use crate::utils::normalize_email;

/// Resolved caller identity: token claims plus the role looked up from the
/// users table, built once per request and passed to the guards by value.
/// Requests without a resolvable identity are rejected with 401 before any
/// permission rule is consulted.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user_id: Uuid,
    pub email: String,
    pub role: Option<String>,
    /// Admin email when this request runs under an impersonation credential.
    pub impersonator: Option<String>,
}

impl Identity {
    pub fn role_str(&self) -> Option<&str> {
        self.role.as_deref()
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Identity {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth = AuthUser::from_request_parts(parts, state).await?;

        // Role resolution failure here is an identity error, not a denial:
        // a dead store surfaces as 500, a deleted account as 401.
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT email, role FROM users WHERE id = ? AND deleted_at IS NULL")
                .bind(auth.user_id.to_string())
                .fetch_optional(&state.pool)
                .await?;

        let (email, role) = row.ok_or_else(|| AppError::unauthorized("account not found or disabled"))?;

        let role = {
            let trimmed = role.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        };

        Ok(Identity {
            user_id: auth.user_id,
            email: normalize_email(&email),
            role,
            impersonator: auth.impersonator,
        })
    }
}
