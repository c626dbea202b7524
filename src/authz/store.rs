use std::time::Duration;

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::models::access_rule::{
    DbRoleAccessRule, DbUserAccessRule, RoleAccessRule, RuleType, UserAccessRule,
};
use crate::utils::normalize_email;

const DEFAULT_LOOKUP_TIMEOUT_MS: u64 = 3000;

/// Rule store failure, distinct from "rule not found" (which is a normal
/// `Ok(None)` outcome). Callers fail closed on either variant.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("rule store query failed: {0}")]
    Unavailable(#[source] sqlx::Error),
    #[error("rule store lookup timed out after {0:?}")]
    Timeout(Duration),
}

/// Read path over persisted access-control rules. A trait seam so the
/// evaluator can be exercised against a fake store in tests.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Single active rule for the exact (resource, type, role) triple.
    async fn find_role_rule(
        &self,
        resource_name: &str,
        rule_type: RuleType,
        role: &str,
    ) -> Result<Option<RoleAccessRule>, StoreError>;

    /// Single active override for the exact (user, resource, type) triple.
    /// Email matching is case/whitespace-insensitive.
    async fn find_user_rule(
        &self,
        user_email: &str,
        resource_name: &str,
        rule_type: RuleType,
    ) -> Result<Option<UserAccessRule>, StoreError>;
}

/// sqlx-backed store with bounded-timeout lookups. A lookup that does not
/// return within the timeout surfaces as `StoreError::Timeout`, never as an
/// implicit allow or deny.
pub struct SqliteRuleStore {
    pool: SqlitePool,
    lookup_timeout: Duration,
}

impl SqliteRuleStore {
    pub fn new(pool: SqlitePool) -> Self {
        let timeout_ms = std::env::var("RULE_LOOKUP_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_LOOKUP_TIMEOUT_MS);

        Self {
            pool,
            lookup_timeout: Duration::from_millis(timeout_ms),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, sqlx::Error>>,
    ) -> Result<T, StoreError> {
        match tokio::time::timeout(self.lookup_timeout, fut).await {
            Ok(result) => result.map_err(StoreError::Unavailable),
            Err(_) => Err(StoreError::Timeout(self.lookup_timeout)),
        }
    }
}

#[async_trait]
impl RuleStore for SqliteRuleStore {
    async fn find_role_rule(
        &self,
        resource_name: &str,
        rule_type: RuleType,
        role: &str,
    ) -> Result<Option<RoleAccessRule>, StoreError> {
        // Coexisting active rules for one triple are a configuration bug;
        // the most recently updated one wins deterministically.
        let row = self
            .bounded(
                sqlx::query_as::<_, DbRoleAccessRule>(
                    r#"
                    SELECT id, resource_name, rule_type, role, access_type, is_active, created_at, updated_at
                    FROM role_access_rules
                    WHERE resource_name = ? AND rule_type = ? AND role = ? AND is_active = 1
                    ORDER BY updated_at DESC
                    LIMIT 1
                    "#,
                )
                .bind(resource_name)
                .bind(rule_type.as_str())
                .bind(role)
                .fetch_optional(&self.pool),
            )
            .await?;

        Ok(row.map(RoleAccessRule::from))
    }

    async fn find_user_rule(
        &self,
        user_email: &str,
        resource_name: &str,
        rule_type: RuleType,
    ) -> Result<Option<UserAccessRule>, StoreError> {
        let email = normalize_email(user_email);

        let row = self
            .bounded(
                sqlx::query_as::<_, DbUserAccessRule>(
                    r#"
                    SELECT id, user_email, resource_name, rule_type, access_type, is_active, created_at, updated_at
                    FROM user_access_rules
                    WHERE lower(trim(user_email)) = ? AND resource_name = ? AND rule_type = ? AND is_active = 1
                    ORDER BY updated_at DESC
                    LIMIT 1
                    "#,
                )
                .bind(&email)
                .bind(resource_name)
                .bind(rule_type.as_str())
                .fetch_optional(&self.pool),
            )
            .await?;

        Ok(row.map(UserAccessRule::from))
    }
}
