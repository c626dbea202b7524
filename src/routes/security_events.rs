//! Admin read view over the persisted security event log.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use crate::app::AppState;
use crate::authz::{resources, roles, Identity};
use crate::errors::AppResult;
use crate::models::access_rule::RuleType;
use crate::models::security_event::{DbSecurityEventEntry, SecurityEventEntry};

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 500;

#[derive(Debug, Deserialize)]
pub struct SecurityEventQuery {
    /// Filter to a single event type, e.g. `login_failure`.
    pub event_type: Option<String>,
    pub limit: Option<i64>,
}

/// List recent security events, newest first
#[utoipa::path(
    get,
    path = "/security-events",
    tag = "Security",
    params(
        ("event_type" = Option<String>, Query, description = "Filter by event type"),
        ("limit" = Option<i64>, Query, description = "Max rows to return (default 100, cap 500)"),
    ),
    responses(
        (status = 200, description = "Recent security events", body = Vec<SecurityEventEntry>),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_security_events(
    State(state): State<AppState>,
    identity: Identity,
    Query(query): Query<SecurityEventQuery>,
) -> AppResult<Json<Vec<SecurityEventEntry>>> {
    state
        .authz
        .require_permission_or_role(
            &identity,
            resources::SECURITY_EVENTS_PAGE,
            RuleType::Page,
            &[roles::ADMIN, roles::SUPER_ADMIN],
        )
        .await?;

    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);

    let rows = match &query.event_type {
        Some(event_type) => {
            sqlx::query_as::<_, DbSecurityEventEntry>(
                r#"
                SELECT id, event_type, actor_email, resource, details, severity, ip, user_agent, occurred_at
                FROM security_events
                WHERE event_type = ?
                ORDER BY occurred_at DESC
                LIMIT ?
                "#,
            )
            .bind(event_type)
            .bind(limit)
            .fetch_all(&state.pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, DbSecurityEventEntry>(
                r#"
                SELECT id, event_type, actor_email, resource, details, severity, ip, user_agent, occurred_at
                FROM security_events
                ORDER BY occurred_at DESC
                LIMIT ?
                "#,
            )
            .bind(limit)
            .fetch_all(&state.pool)
            .await?
        }
    };

    Ok(Json(rows.into_iter().map(SecurityEventEntry::from).collect()))
}
