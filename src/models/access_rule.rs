use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

// =============================================================================
// RULE TYPE / ACCESS TYPE
// =============================================================================

/// Category of protected resource. Resource names are scoped uniquely within
/// a rule type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Page,
    Feature,
    ApiEndpoint,
    Action,
}

impl RuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Page => "page",
            RuleType::Feature => "feature",
            RuleType::ApiEndpoint => "api_endpoint",
            RuleType::Action => "action",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "page" => Some(RuleType::Page),
            "feature" => Some(RuleType::Feature),
            "api_endpoint" => Some(RuleType::ApiEndpoint),
            "action" => Some(RuleType::Action),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AccessType {
    Allow,
    Deny,
}

impl AccessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessType::Allow => "allow",
            AccessType::Deny => "deny",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "allow" => Some(AccessType::Allow),
            "deny" => Some(AccessType::Deny),
            _ => None,
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, AccessType::Allow)
    }
}

// =============================================================================
// ROLE RULE
// =============================================================================

/// Access decision keyed by role: applies to every user holding the role.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoleAccessRule {
    pub id: Uuid,
    pub resource_name: String,
    pub rule_type: RuleType,
    pub role: String,
    pub access_type: AccessType,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbRoleAccessRule {
    pub id: String,
    pub resource_name: String,
    pub rule_type: String,
    pub role: String,
    pub access_type: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbRoleAccessRule> for RoleAccessRule {
    fn from(db: DbRoleAccessRule) -> Self {
        RoleAccessRule {
            id: Uuid::parse_str(&db.id).unwrap_or_default(),
            resource_name: db.resource_name,
            rule_type: RuleType::parse(&db.rule_type).unwrap_or(RuleType::Page),
            role: db.role,
            access_type: AccessType::parse(&db.access_type).unwrap_or(AccessType::Deny),
            is_active: db.is_active,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleRuleCreateRequest {
    #[schema(example = "settings/impersonation")]
    pub resource_name: String,
    pub rule_type: RuleType,
    #[schema(example = "Super Admin")]
    pub role: String,
    pub access_type: AccessType,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleRuleUpdateRequest {
    pub access_type: Option<AccessType>,
    pub is_active: Option<bool>,
}

// =============================================================================
// USER OVERRIDE RULE
// =============================================================================

/// Individual override keyed by user email; beats any role rule when active.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserAccessRule {
    pub id: Uuid,
    pub user_email: String,
    pub resource_name: String,
    pub rule_type: RuleType,
    pub access_type: AccessType,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbUserAccessRule {
    pub id: String,
    pub user_email: String,
    pub resource_name: String,
    pub rule_type: String,
    pub access_type: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbUserAccessRule> for UserAccessRule {
    fn from(db: DbUserAccessRule) -> Self {
        UserAccessRule {
            id: Uuid::parse_str(&db.id).unwrap_or_default(),
            user_email: db.user_email,
            resource_name: db.resource_name,
            rule_type: RuleType::parse(&db.rule_type).unwrap_or(RuleType::Page),
            access_type: AccessType::parse(&db.access_type).unwrap_or(AccessType::Deny),
            is_active: db.is_active,
            created_at: db.created_at,
            updated_at: db.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UserRuleCreateRequest {
    #[schema(example = "ada@example.com")]
    pub user_email: String,
    #[schema(example = "dashboard/exports")]
    pub resource_name: String,
    pub rule_type: RuleType,
    pub access_type: AccessType,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UserRuleUpdateRequest {
    pub access_type: Option<AccessType>,
    pub is_active: Option<bool>,
}

// =============================================================================
// BATCH CHECK
// =============================================================================

#[derive(Debug, Deserialize, ToSchema)]
pub struct PermissionCheckItem {
    #[schema(example = "dashboard/overview")]
    pub resource_name: String,
    pub rule_type: RuleType,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct BatchCheckRequest {
    pub checks: Vec<PermissionCheckItem>,
}

/// Map of `"resource:type"` to the boolean outcome of a full, independent
/// permission evaluation. Used by UI navigation to avoid N round-trips.
#[derive(Debug, Serialize, ToSchema)]
pub struct BatchCheckResponse {
    pub results: std::collections::HashMap<String, bool>,
}
