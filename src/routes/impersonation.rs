//! Impersonation endpoints
//!
//! Admins can mint a short-lived credential for a lower-ranked user to see the
//! app exactly as that user does. Sessions are gated by role level, audited in
//! `impersonation_log`, and mirrored on the security event bus.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::Duration;
use serde::Serialize;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{level_of, resources, roles, Identity, TOP_ROLE};
use crate::errors::{AppError, AppResult};
use crate::events::{log_security_event, RequestContext, SecurityEventKind};
use crate::models::access_rule::RuleType;
use crate::models::impersonation::{
    ImpersonationEndRequest, ImpersonationStartRequest, ImpersonationStartResponse,
};
use crate::models::user::DbUser;
use crate::utils::{normalize_email, utc_now};

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    message: String,
}

/// Start impersonating a lower-ranked user
#[utoipa::path(
    post,
    path = "/impersonation/start",
    tag = "Impersonation",
    request_body = ImpersonationStartRequest,
    responses(
        (status = 200, description = "Impersonation credential minted", body = ImpersonationStartResponse),
        (status = 403, description = "Caller may not impersonate the target"),
        (status = 404, description = "Target account not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn start_impersonation(
    State(state): State<AppState>,
    identity: Identity,
    headers: HeaderMap,
    Json(payload): Json<ImpersonationStartRequest>,
) -> AppResult<Json<ImpersonationStartResponse>> {
    // Nested impersonation is never allowed.
    if identity.impersonator.is_some() {
        return Err(AppError::forbidden("cannot impersonate while already impersonating"));
    }

    state
        .authz
        .require_permission_or_role(
            &identity,
            resources::IMPERSONATION_PAGE,
            RuleType::Page,
            &[roles::ADMIN, roles::SUPER_ADMIN],
        )
        .await?;
    state.authz.require_role(&identity, &[roles::ADMIN, roles::SUPER_ADMIN])?;

    let target_email = normalize_email(&payload.target_email);
    if target_email.is_empty() {
        return Err(AppError::bad_request("target_email must not be blank"));
    }
    if target_email == normalize_email(&identity.email) {
        return Err(AppError::forbidden("cannot impersonate yourself"));
    }

    let target = sqlx::query_as::<_, DbUser>(
        "SELECT id, name, email, password_hash, role, created_at, updated_at, deleted_at FROM users WHERE lower(trim(email)) = ? AND deleted_at IS NULL",
    )
    .bind(&target_email)
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("target account not found"))?;

    // The top role may impersonate anyone below it; every other admin is
    // limited to strictly lower-ranked targets. Role comparison is
    // case-insensitive like everywhere else.
    let admin_role = identity.role_str().unwrap_or("");
    if !admin_role.eq_ignore_ascii_case(TOP_ROLE) {
        let admin_level = level_of(identity.role_str());
        let target_level = level_of(Some(&target.role));
        if target_level >= admin_level {
            return Err(AppError::forbidden(
                "cannot impersonate a user at or above your own role level",
            ));
        }
    }

    let target_id = Uuid::parse_str(&target.id)
        .map_err(|_| AppError::internal("stored user id is not a valid UUID"))?;
    let token = state
        .jwt
        .encode_impersonation(target_id, &target.email, &identity.email)?;
    let expires_at = utc_now() + Duration::minutes(state.jwt.impersonation_exp_minutes);

    let context = RequestContext::from_headers(&headers);

    // Audit trail insert is deliberately non-fatal: a logging hiccup must not
    // strand the admin mid-investigation.
    let insert = sqlx::query(
        "INSERT INTO impersonation_log (id, admin_email, target_email, reason, ip, user_agent, started_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&identity.email)
    .bind(&target_email)
    .bind(&payload.reason)
    .bind(&context.ip)
    .bind(&context.user_agent)
    .bind(utc_now())
    .execute(&state.pool)
    .await;
    if let Err(err) = insert {
        tracing::warn!(error = %err, "failed to record impersonation start");
    }

    log_security_event(
        &state.event_bus,
        SecurityEventKind::ImpersonationStart,
        Some(&identity.email),
        Some(&target_email),
        serde_json::json!({
            "targetRole": target.role,
            "reason": payload.reason,
        }),
        Some(context),
    );

    Ok(Json(ImpersonationStartResponse {
        token,
        target_email,
        expires_at,
    }))
}

/// End an impersonation session
#[utoipa::path(
    post,
    path = "/impersonation/end",
    tag = "Impersonation",
    request_body = ImpersonationEndRequest,
    responses(
        (status = 200, description = "Session closed"),
        (status = 400, description = "No session to close"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn end_impersonation(
    State(state): State<AppState>,
    identity: Identity,
    headers: HeaderMap,
    Json(payload): Json<ImpersonationEndRequest>,
) -> AppResult<(StatusCode, Json<MessageResponse>)> {
    // When called with the impersonation credential the admin/target pair is
    // in the token; from the admin's own session the body names the target.
    let (admin_email, target_email) = match &identity.impersonator {
        Some(admin) => (admin.clone(), normalize_email(&identity.email)),
        None => {
            let target = payload
                .target_email
                .as_deref()
                .map(normalize_email)
                .filter(|email| !email.is_empty())
                .ok_or_else(|| AppError::bad_request("target_email required when not impersonating"))?;
            (normalize_email(&identity.email), target)
        }
    };

    let updated = sqlx::query(
        r#"
        UPDATE impersonation_log
        SET ended_at = ?
        WHERE id = (
            SELECT id FROM impersonation_log
            WHERE admin_email = ? AND target_email = ? AND ended_at IS NULL
            ORDER BY started_at DESC
            LIMIT 1
        )
        "#,
    )
    .bind(utc_now())
    .bind(&admin_email)
    .bind(&target_email)
    .execute(&state.pool)
    .await;

    match updated {
        Ok(result) if result.rows_affected() == 0 => {
            tracing::debug!(admin = %admin_email, target = %target_email, "no open impersonation entry to close");
        }
        Ok(_) => {}
        Err(err) => {
            tracing::warn!(error = %err, "failed to record impersonation end");
        }
    }

    log_security_event(
        &state.event_bus,
        SecurityEventKind::ImpersonationEnd,
        Some(&admin_email),
        Some(&target_email),
        serde_json::json!({}),
        Some(RequestContext::from_headers(&headers)),
    );

    Ok((
        StatusCode::OK,
        Json(MessageResponse {
            message: "Impersonation ended".to_string(),
        }),
    ))
}
