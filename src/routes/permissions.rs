//! Permission-management API
//!
//! Admin CRUD over role rules and individual override rules, plus the batch
//! check endpoint used by UI navigation. Every write invalidates the decision
//! cache and lands in the security event log with critical severity.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{resources, roles, Identity};
use crate::errors::{AppError, AppResult};
use crate::events::{log_security_event, RequestContext, SecurityEventKind};
use crate::models::access_rule::*;
use crate::utils::{normalize_email, utc_now};

const ADMIN_ROLES: &[&str] = &[roles::ADMIN, roles::SUPER_ADMIN];

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/role-rules", get(list_role_rules).post(create_role_rule))
        .route(
            "/role-rules/:rule_id",
            axum::routing::put(update_role_rule).delete(deactivate_role_rule),
        )
        .route("/user-rules", get(list_user_rules).post(create_user_rule))
        .route(
            "/user-rules/:rule_id",
            axum::routing::put(update_user_rule).delete(deactivate_user_rule),
        )
        .route("/check", post(batch_check))
}

/// Rule-management pages are themselves a protected resource; admins pass
/// through the unconfigured-resource fallback until a rule is seeded.
async fn require_admin(state: &AppState, identity: &Identity) -> AppResult<()> {
    state
        .authz
        .require_permission_or_role(identity, resources::PERMISSION_SETTINGS, RuleType::Page, ADMIN_ROLES)
        .await
}

fn log_rule_change(
    state: &AppState,
    identity: &Identity,
    headers: &HeaderMap,
    resource: &str,
    details: serde_json::Value,
) {
    log_security_event(
        &state.event_bus,
        SecurityEventKind::PermissionChange,
        Some(&identity.email),
        Some(resource),
        details,
        Some(RequestContext::from_headers(headers)),
    );
}

// =============================================================================
// ROLE RULES
// =============================================================================

/// List role-based rules (active ones only)
#[utoipa::path(
    get,
    path = "/permissions/role-rules",
    tag = "Permissions",
    responses(
        (status = 200, description = "Active role rules", body = Vec<RoleAccessRule>),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_role_rules(
    State(state): State<AppState>,
    identity: Identity,
) -> AppResult<Json<Vec<RoleAccessRule>>> {
    require_admin(&state, &identity).await?;

    let rows = sqlx::query_as::<_, DbRoleAccessRule>(
        r#"
        SELECT id, resource_name, rule_type, role, access_type, is_active, created_at, updated_at
        FROM role_access_rules
        WHERE is_active = 1
        ORDER BY resource_name, rule_type, role
        "#,
    )
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(rows.into_iter().map(RoleAccessRule::from).collect()))
}

/// Create a role-based rule
#[utoipa::path(
    post,
    path = "/permissions/role-rules",
    tag = "Permissions",
    request_body = RoleRuleCreateRequest,
    responses(
        (status = 201, description = "Rule created", body = RoleAccessRule),
        (status = 409, description = "Active rule already exists for this triple"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_role_rule(
    State(state): State<AppState>,
    identity: Identity,
    headers: HeaderMap,
    Json(req): Json<RoleRuleCreateRequest>,
) -> AppResult<(StatusCode, Json<RoleAccessRule>)> {
    require_admin(&state, &identity).await?;

    if req.resource_name.trim().is_empty() {
        return Err(AppError::bad_request("resource_name must not be blank"));
    }

    let existing: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM role_access_rules WHERE resource_name = ? AND rule_type = ? AND role = ? AND is_active = 1",
    )
    .bind(req.resource_name.trim())
    .bind(req.rule_type.as_str())
    .bind(&req.role)
    .fetch_one(&state.pool)
    .await?;
    if existing > 0 {
        return Err(AppError::conflict("an active rule already exists for this resource/type/role"));
    }

    let id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO role_access_rules (id, resource_name, rule_type, role, access_type, is_active, created_at, updated_at) VALUES (?, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(id.to_string())
    .bind(req.resource_name.trim())
    .bind(req.rule_type.as_str())
    .bind(&req.role)
    .bind(req.access_type.as_str())
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    state.authz.invalidate_cache().await;

    let rule = RoleAccessRule {
        id,
        resource_name: req.resource_name.trim().to_string(),
        rule_type: req.rule_type,
        role: req.role,
        access_type: req.access_type,
        is_active: true,
        created_at: now,
        updated_at: now,
    };

    log_rule_change(
        &state,
        &identity,
        &headers,
        &rule.resource_name,
        serde_json::json!({
            "action": "role_rule_created",
            "ruleId": rule.id,
            "role": rule.role,
            "ruleType": rule.rule_type,
            "accessType": rule.access_type,
        }),
    );

    Ok((StatusCode::CREATED, Json(rule)))
}

/// Update a role rule's decision or active flag
#[utoipa::path(
    put,
    path = "/permissions/role-rules/{rule_id}",
    tag = "Permissions",
    params(("rule_id" = Uuid, Path, description = "Rule ID")),
    request_body = RoleRuleUpdateRequest,
    responses(
        (status = 200, description = "Rule updated", body = RoleAccessRule),
        (status = 404, description = "Rule not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_role_rule(
    State(state): State<AppState>,
    identity: Identity,
    headers: HeaderMap,
    Path(rule_id): Path<Uuid>,
    Json(req): Json<RoleRuleUpdateRequest>,
) -> AppResult<Json<RoleAccessRule>> {
    require_admin(&state, &identity).await?;

    let existing = sqlx::query_as::<_, DbRoleAccessRule>(
        "SELECT id, resource_name, rule_type, role, access_type, is_active, created_at, updated_at FROM role_access_rules WHERE id = ?",
    )
    .bind(rule_id.to_string())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("rule not found"))?;

    let access_type = req
        .access_type
        .map(|a| a.as_str().to_string())
        .unwrap_or(existing.access_type);
    let is_active = req.is_active.unwrap_or(existing.is_active);
    let now = utc_now();

    sqlx::query("UPDATE role_access_rules SET access_type = ?, is_active = ?, updated_at = ? WHERE id = ?")
        .bind(&access_type)
        .bind(is_active)
        .bind(now)
        .bind(rule_id.to_string())
        .execute(&state.pool)
        .await?;

    state.authz.invalidate_cache().await;

    log_rule_change(
        &state,
        &identity,
        &headers,
        &existing.resource_name,
        serde_json::json!({
            "action": "role_rule_updated",
            "ruleId": rule_id,
            "accessType": access_type,
            "isActive": is_active,
        }),
    );

    let rule = RoleAccessRule {
        id: rule_id,
        resource_name: existing.resource_name,
        rule_type: RuleType::parse(&existing.rule_type).unwrap_or(RuleType::Page),
        role: existing.role,
        access_type: AccessType::parse(&access_type).unwrap_or(AccessType::Deny),
        is_active,
        created_at: existing.created_at,
        updated_at: now,
    };

    Ok(Json(rule))
}

/// Deactivate a role rule (soft delete; rules are audit history)
#[utoipa::path(
    delete,
    path = "/permissions/role-rules/{rule_id}",
    tag = "Permissions",
    params(("rule_id" = Uuid, Path, description = "Rule ID")),
    responses(
        (status = 204, description = "Rule deactivated"),
        (status = 404, description = "Rule not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn deactivate_role_rule(
    State(state): State<AppState>,
    identity: Identity,
    headers: HeaderMap,
    Path(rule_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    require_admin(&state, &identity).await?;

    let resource: Option<String> =
        sqlx::query_scalar("SELECT resource_name FROM role_access_rules WHERE id = ?")
            .bind(rule_id.to_string())
            .fetch_optional(&state.pool)
            .await?;
    let resource = resource.ok_or_else(|| AppError::not_found("rule not found"))?;

    sqlx::query("UPDATE role_access_rules SET is_active = 0, updated_at = ? WHERE id = ?")
        .bind(utc_now())
        .bind(rule_id.to_string())
        .execute(&state.pool)
        .await?;

    state.authz.invalidate_cache().await;

    log_rule_change(
        &state,
        &identity,
        &headers,
        &resource,
        serde_json::json!({"action": "role_rule_deactivated", "ruleId": rule_id}),
    );

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// USER OVERRIDE RULES
// =============================================================================

/// List individual override rules (active ones only)
#[utoipa::path(
    get,
    path = "/permissions/user-rules",
    tag = "Permissions",
    responses(
        (status = 200, description = "Active user override rules", body = Vec<UserAccessRule>),
    ),
    security(("bearerAuth" = []))
)]
pub async fn list_user_rules(
    State(state): State<AppState>,
    identity: Identity,
) -> AppResult<Json<Vec<UserAccessRule>>> {
    require_admin(&state, &identity).await?;

    let rows = sqlx::query_as::<_, DbUserAccessRule>(
        r#"
        SELECT id, user_email, resource_name, rule_type, access_type, is_active, created_at, updated_at
        FROM user_access_rules
        WHERE is_active = 1
        ORDER BY user_email, resource_name
        "#,
    )
    .fetch_all(&state.pool)
    .await?;

    Ok(Json(rows.into_iter().map(UserAccessRule::from).collect()))
}

/// Create an individual override rule
#[utoipa::path(
    post,
    path = "/permissions/user-rules",
    tag = "Permissions",
    request_body = UserRuleCreateRequest,
    responses(
        (status = 201, description = "Override created", body = UserAccessRule),
        (status = 409, description = "Active override already exists for this triple"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn create_user_rule(
    State(state): State<AppState>,
    identity: Identity,
    headers: HeaderMap,
    Json(req): Json<UserRuleCreateRequest>,
) -> AppResult<(StatusCode, Json<UserAccessRule>)> {
    require_admin(&state, &identity).await?;

    if req.resource_name.trim().is_empty() {
        return Err(AppError::bad_request("resource_name must not be blank"));
    }
    let user_email = normalize_email(&req.user_email);
    if user_email.is_empty() {
        return Err(AppError::bad_request("user_email must not be blank"));
    }

    let existing: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM user_access_rules WHERE user_email = ? AND resource_name = ? AND rule_type = ? AND is_active = 1",
    )
    .bind(&user_email)
    .bind(req.resource_name.trim())
    .bind(req.rule_type.as_str())
    .fetch_one(&state.pool)
    .await?;
    if existing > 0 {
        return Err(AppError::conflict("an active override already exists for this user/resource/type"));
    }

    let id = Uuid::new_v4();
    let now = utc_now();

    sqlx::query(
        "INSERT INTO user_access_rules (id, user_email, resource_name, rule_type, access_type, is_active, created_at, updated_at) VALUES (?, ?, ?, ?, ?, 1, ?, ?)",
    )
    .bind(id.to_string())
    .bind(&user_email)
    .bind(req.resource_name.trim())
    .bind(req.rule_type.as_str())
    .bind(req.access_type.as_str())
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await?;

    state.authz.invalidate_cache().await;

    let rule = UserAccessRule {
        id,
        user_email,
        resource_name: req.resource_name.trim().to_string(),
        rule_type: req.rule_type,
        access_type: req.access_type,
        is_active: true,
        created_at: now,
        updated_at: now,
    };

    log_rule_change(
        &state,
        &identity,
        &headers,
        &rule.resource_name,
        serde_json::json!({
            "action": "user_rule_created",
            "ruleId": rule.id,
            "userEmail": rule.user_email,
            "ruleType": rule.rule_type,
            "accessType": rule.access_type,
        }),
    );

    Ok((StatusCode::CREATED, Json(rule)))
}

/// Update an individual override's decision or active flag
#[utoipa::path(
    put,
    path = "/permissions/user-rules/{rule_id}",
    tag = "Permissions",
    params(("rule_id" = Uuid, Path, description = "Rule ID")),
    request_body = UserRuleUpdateRequest,
    responses(
        (status = 200, description = "Override updated", body = UserAccessRule),
        (status = 404, description = "Override not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn update_user_rule(
    State(state): State<AppState>,
    identity: Identity,
    headers: HeaderMap,
    Path(rule_id): Path<Uuid>,
    Json(req): Json<UserRuleUpdateRequest>,
) -> AppResult<Json<UserAccessRule>> {
    require_admin(&state, &identity).await?;

    let existing = sqlx::query_as::<_, DbUserAccessRule>(
        "SELECT id, user_email, resource_name, rule_type, access_type, is_active, created_at, updated_at FROM user_access_rules WHERE id = ?",
    )
    .bind(rule_id.to_string())
    .fetch_optional(&state.pool)
    .await?
    .ok_or_else(|| AppError::not_found("override not found"))?;

    let access_type = req
        .access_type
        .map(|a| a.as_str().to_string())
        .unwrap_or(existing.access_type);
    let is_active = req.is_active.unwrap_or(existing.is_active);
    let now = utc_now();

    sqlx::query("UPDATE user_access_rules SET access_type = ?, is_active = ?, updated_at = ? WHERE id = ?")
        .bind(&access_type)
        .bind(is_active)
        .bind(now)
        .bind(rule_id.to_string())
        .execute(&state.pool)
        .await?;

    state.authz.invalidate_cache().await;

    log_rule_change(
        &state,
        &identity,
        &headers,
        &existing.resource_name,
        serde_json::json!({
            "action": "user_rule_updated",
            "ruleId": rule_id,
            "userEmail": existing.user_email,
            "accessType": access_type,
            "isActive": is_active,
        }),
    );

    let rule = UserAccessRule {
        id: rule_id,
        user_email: existing.user_email,
        resource_name: existing.resource_name,
        rule_type: RuleType::parse(&existing.rule_type).unwrap_or(RuleType::Page),
        access_type: AccessType::parse(&access_type).unwrap_or(AccessType::Deny),
        is_active,
        created_at: existing.created_at,
        updated_at: now,
    };

    Ok(Json(rule))
}

/// Deactivate an individual override (soft delete)
#[utoipa::path(
    delete,
    path = "/permissions/user-rules/{rule_id}",
    tag = "Permissions",
    params(("rule_id" = Uuid, Path, description = "Rule ID")),
    responses(
        (status = 204, description = "Override deactivated"),
        (status = 404, description = "Override not found"),
    ),
    security(("bearerAuth" = []))
)]
pub async fn deactivate_user_rule(
    State(state): State<AppState>,
    identity: Identity,
    headers: HeaderMap,
    Path(rule_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    require_admin(&state, &identity).await?;

    let resource: Option<String> =
        sqlx::query_scalar("SELECT resource_name FROM user_access_rules WHERE id = ?")
            .bind(rule_id.to_string())
            .fetch_optional(&state.pool)
            .await?;
    let resource = resource.ok_or_else(|| AppError::not_found("override not found"))?;

    sqlx::query("UPDATE user_access_rules SET is_active = 0, updated_at = ? WHERE id = ?")
        .bind(utc_now())
        .bind(rule_id.to_string())
        .execute(&state.pool)
        .await?;

    state.authz.invalidate_cache().await;

    log_rule_change(
        &state,
        &identity,
        &headers,
        &resource,
        serde_json::json!({"action": "user_rule_deactivated", "ruleId": rule_id}),
    );

    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// BATCH CHECK
// =============================================================================

/// Batch permission check for UI navigation. Any authenticated caller may
/// query their own permissions; results never include other users.
#[utoipa::path(
    post,
    path = "/permissions/check",
    tag = "Permissions",
    request_body = BatchCheckRequest,
    responses(
        (status = 200, description = "Per-resource boolean outcomes", body = BatchCheckResponse),
    ),
    security(("bearerAuth" = []))
)]
pub async fn batch_check(
    State(state): State<AppState>,
    identity: Identity,
    Json(req): Json<BatchCheckRequest>,
) -> AppResult<Json<BatchCheckResponse>> {
    let checks: Vec<(String, RuleType)> = req
        .checks
        .into_iter()
        .map(|item| (item.resource_name, item.rule_type))
        .collect();

    let results = state.authz.check_batch(&identity, &checks).await;

    Ok(Json(BatchCheckResponse { results }))
}
