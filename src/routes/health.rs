use axum::extract::State;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::app::AppState;
use crate::errors::AppResult;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub store_ok: bool,
    /// Active role rules currently enforced; a quick signal that the
    /// permission matrix has been seeded.
    pub active_role_rules: Option<i64>,
    pub store_error: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/health",
    tag = "Health",
    responses((status = 200, description = "Health check", body = HealthResponse))
)]
pub async fn health(State(state): State<AppState>) -> AppResult<Json<HealthResponse>> {
    // Probe the table every authorization decision depends on, not just the
    // connection. An unreachable rule store means the whole API is denying.
    let probe = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(1) FROM role_access_rules WHERE is_active = 1",
    )
    .fetch_one(&state.pool)
    .await;

    match probe {
        Ok(count) => Ok(Json(HealthResponse {
            status: "ok",
            store_ok: true,
            active_role_rules: Some(count),
            store_error: None,
        })),
        Err(e) => Ok(Json(HealthResponse {
            status: "degraded",
            store_ok: false,
            active_role_rules: None,
            store_error: Some(e.to_string()),
        })),
    }
}
