use std::sync::Arc;

use super::cache::{CacheKey, DecisionCache};
use super::store::{RuleStore, StoreError};
use crate::models::access_rule::{AccessType, RuleType};
use crate::utils::normalize_email;

/// Rendered reason for `Decision::NoRuleConfigured`. Kept as a stable literal
/// because deployed UI clients pattern-match on it; inside this crate the
/// variant tag is what fallback logic dispatches on.
pub const NO_MATCHING_RULE_REASON: &str = "No matching permission rule found";

/// Outcome of a permission check. "No permission" is a normal value, not an
/// error; only store failures and invalid input surface as `EvalError`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow { reason: String },
    Deny { reason: String },
    /// Neither an individual nor a role rule exists for the resource/type.
    /// Eligible for the allowed-roles fallback in the guards; an explicit
    /// `Deny` never is.
    NoRuleConfigured,
}

impl Decision {
    pub fn allow(reason: impl Into<String>) -> Self {
        Decision::Allow { reason: reason.into() }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Decision::Deny { reason: reason.into() }
    }

    pub fn has_access(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }

    pub fn reason(&self) -> &str {
        match self {
            Decision::Allow { reason } | Decision::Deny { reason } => reason,
            Decision::NoRuleConfigured => NO_MATCHING_RULE_REASON,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum EvalError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Computes authorization decisions from the two rule lookups.
///
/// Precedence, highest to lowest:
/// 1. active individual deny
/// 2. active individual allow
/// 3. role rule for (resource, type, role)
/// 4. no rule configured -> deny
pub struct PermissionEvaluator {
    store: Arc<dyn RuleStore>,
    cache: DecisionCache,
}

impl PermissionEvaluator {
    pub fn new(store: Arc<dyn RuleStore>, cache: DecisionCache) -> Self {
        Self { store, cache }
    }

    /// Full precedence check for one (user, resource, type) tuple.
    pub async fn check(
        &self,
        email: &str,
        role: Option<&str>,
        resource_name: &str,
        rule_type: RuleType,
    ) -> Result<Decision, EvalError> {
        if resource_name.trim().is_empty() {
            return Err(EvalError::InvalidInput(
                "resource name must not be blank".to_string(),
            ));
        }

        let email = normalize_email(email);
        if email.is_empty() {
            return Err(EvalError::InvalidInput(
                "user email must not be blank".to_string(),
            ));
        }

        let role = role.map(str::trim).filter(|r| !r.is_empty());
        let key = CacheKey {
            email: email.clone(),
            role: role.map(String::from),
            resource: resource_name.to_string(),
            rule_type,
        };

        if let Some(cached) = self.cache.get(&key).await {
            tracing::debug!(
                email = %email,
                resource = %resource_name,
                "decision cache hit"
            );
            return Ok(cached);
        }

        let decision = self.evaluate(&email, role, resource_name, rule_type).await?;
        self.cache.insert(key, decision.clone()).await;
        Ok(decision)
    }

    async fn evaluate(
        &self,
        email: &str,
        role: Option<&str>,
        resource_name: &str,
        rule_type: RuleType,
    ) -> Result<Decision, EvalError> {
        // 1 & 2. Individual override beats any role rule.
        if let Some(user_rule) = self
            .store
            .find_user_rule(email, resource_name, rule_type)
            .await?
        {
            return Ok(match user_rule.access_type {
                AccessType::Deny => {
                    tracing::debug!(
                        email = %email,
                        resource = %resource_name,
                        rule_type = rule_type.as_str(),
                        "individual deny"
                    );
                    Decision::deny("Individual access denied")
                }
                AccessType::Allow => {
                    tracing::debug!(
                        email = %email,
                        resource = %resource_name,
                        rule_type = rule_type.as_str(),
                        "individual allow"
                    );
                    Decision::allow("Individual access granted")
                }
            });
        }

        // 3. Role rule; skipped entirely for users with no role.
        if let Some(role) = role {
            if let Some(role_rule) = self
                .store
                .find_role_rule(resource_name, rule_type, role)
                .await?
            {
                return Ok(match role_rule.access_type {
                    AccessType::Allow => {
                        tracing::debug!(
                            email = %email,
                            role = %role,
                            resource = %resource_name,
                            "role rule allow"
                        );
                        Decision::allow(format!("Access granted to role '{role}'"))
                    }
                    AccessType::Deny => {
                        tracing::debug!(
                            email = %email,
                            role = %role,
                            resource = %resource_name,
                            "role rule deny"
                        );
                        Decision::deny(format!("Access denied for role '{role}'"))
                    }
                });
            }
        }

        // 4. Nothing configured for this resource/type.
        tracing::debug!(
            email = %email,
            resource = %resource_name,
            rule_type = rule_type.as_str(),
            "no matching rule"
        );
        Ok(Decision::NoRuleConfigured)
    }

    /// OR combinator: true as soon as one check allows. Each resource still
    /// runs the full precedence independently.
    pub async fn check_any(
        &self,
        email: &str,
        role: Option<&str>,
        checks: &[(&str, RuleType)],
    ) -> Result<bool, EvalError> {
        for (resource, rule_type) in checks {
            if self.check(email, role, resource, *rule_type).await?.has_access() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// AND combinator: every check must allow. No short-circuit on the first
    /// resource; each runs independently so denials are all evaluated and
    /// logged the same way.
    pub async fn check_all(
        &self,
        email: &str,
        role: Option<&str>,
        checks: &[(&str, RuleType)],
    ) -> Result<bool, EvalError> {
        let mut all = true;
        for (resource, rule_type) in checks {
            if !self.check(email, role, resource, *rule_type).await?.has_access() {
                all = false;
            }
        }
        Ok(all)
    }

    /// Drop all cached decisions. Called after any rule write so admin edits
    /// are immediately visible.
    pub async fn invalidate_cache(&self) {
        self.cache.clear().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::access_rule::{RoleAccessRule, UserAccessRule};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use uuid::Uuid;

    #[derive(Default)]
    struct FakeStore {
        role_rules: HashMap<(String, RuleType, String), AccessType>,
        user_rules: HashMap<(String, String, RuleType), AccessType>,
        fail: AtomicBool,
    }

    impl FakeStore {
        fn with_role_rule(mut self, resource: &str, rt: RuleType, role: &str, access: AccessType) -> Self {
            self.role_rules
                .insert((resource.to_string(), rt, role.to_string()), access);
            self
        }

        fn with_user_rule(mut self, email: &str, resource: &str, rt: RuleType, access: AccessType) -> Self {
            self.user_rules
                .insert((normalize_email(email), resource.to_string(), rt), access);
            self
        }

        fn failing(self) -> Self {
            self.fail.store(true, Ordering::SeqCst);
            self
        }
    }

    #[async_trait]
    impl RuleStore for FakeStore {
        async fn find_role_rule(
            &self,
            resource_name: &str,
            rule_type: RuleType,
            role: &str,
        ) -> Result<Option<RoleAccessRule>, StoreError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Timeout(Duration::from_millis(1)));
            }
            let access = self
                .role_rules
                .get(&(resource_name.to_string(), rule_type, role.to_string()))
                .copied();
            Ok(access.map(|access_type| RoleAccessRule {
                id: Uuid::new_v4(),
                resource_name: resource_name.to_string(),
                rule_type,
                role: role.to_string(),
                access_type,
                is_active: true,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }))
        }

        async fn find_user_rule(
            &self,
            user_email: &str,
            resource_name: &str,
            rule_type: RuleType,
        ) -> Result<Option<UserAccessRule>, StoreError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StoreError::Timeout(Duration::from_millis(1)));
            }
            let email = normalize_email(user_email);
            let access = self
                .user_rules
                .get(&(email.clone(), resource_name.to_string(), rule_type))
                .copied();
            Ok(access.map(|access_type| UserAccessRule {
                id: Uuid::new_v4(),
                user_email: email,
                resource_name: resource_name.to_string(),
                rule_type,
                access_type,
                is_active: true,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }))
        }
    }

    fn evaluator(store: FakeStore) -> PermissionEvaluator {
        PermissionEvaluator::new(Arc::new(store), DecisionCache::new(Duration::ZERO))
    }

    #[tokio::test]
    async fn individual_deny_beats_role_allow() {
        let eval = evaluator(
            FakeStore::default()
                .with_role_rule("reports/export", RuleType::Feature, "Admin", AccessType::Allow)
                .with_user_rule("ada@example.com", "reports/export", RuleType::Feature, AccessType::Deny),
        );

        let decision = eval
            .check("ada@example.com", Some("Admin"), "reports/export", RuleType::Feature)
            .await
            .unwrap();
        assert!(!decision.has_access());
        assert_eq!(decision.reason(), "Individual access denied");
    }

    #[tokio::test]
    async fn individual_allow_beats_role_deny() {
        let eval = evaluator(
            FakeStore::default()
                .with_role_rule("reports/export", RuleType::Feature, "Employee", AccessType::Deny)
                .with_user_rule("ada@example.com", "reports/export", RuleType::Feature, AccessType::Allow),
        );

        let decision = eval
            .check("ada@example.com", Some("Employee"), "reports/export", RuleType::Feature)
            .await
            .unwrap();
        assert!(decision.has_access());
        assert_eq!(decision.reason(), "Individual access granted");
    }

    #[tokio::test]
    async fn role_rule_applies_without_individual_rule() {
        let eval = evaluator(FakeStore::default().with_role_rule(
            "audits/list",
            RuleType::Page,
            "Quality Analyst",
            AccessType::Allow,
        ));

        let decision = eval
            .check("qa@example.com", Some("Quality Analyst"), "audits/list", RuleType::Page)
            .await
            .unwrap();
        assert!(decision.has_access());

        let decision = eval
            .check("qa@example.com", Some("Employee"), "audits/list", RuleType::Page)
            .await
            .unwrap();
        assert_eq!(decision, Decision::NoRuleConfigured);
    }

    #[tokio::test]
    async fn unconfigured_resource_yields_sentinel_reason() {
        let eval = evaluator(FakeStore::default());

        let decision = eval
            .check("ada@example.com", Some("Admin"), "brand/new-page", RuleType::Page)
            .await
            .unwrap();
        assert_eq!(decision, Decision::NoRuleConfigured);
        assert_eq!(decision.reason(), "No matching permission rule found");
    }

    #[tokio::test]
    async fn missing_role_skips_role_lookup() {
        let eval = evaluator(FakeStore::default().with_role_rule(
            "audits/list",
            RuleType::Page,
            "Admin",
            AccessType::Allow,
        ));

        let decision = eval
            .check("ada@example.com", None, "audits/list", RuleType::Page)
            .await
            .unwrap();
        assert_eq!(decision, Decision::NoRuleConfigured);

        // An individual rule still applies for roleless users.
        let eval = evaluator(FakeStore::default().with_user_rule(
            "ada@example.com",
            "audits/list",
            RuleType::Page,
            AccessType::Allow,
        ));
        let decision = eval
            .check("ada@example.com", None, "audits/list", RuleType::Page)
            .await
            .unwrap();
        assert!(decision.has_access());
    }

    #[tokio::test]
    async fn email_matching_is_case_and_whitespace_insensitive() {
        let eval = evaluator(FakeStore::default().with_user_rule(
            "user@example.com",
            "audits/list",
            RuleType::Page,
            AccessType::Allow,
        ));

        let decision = eval
            .check(" User@Example.com ", None, "audits/list", RuleType::Page)
            .await
            .unwrap();
        assert!(decision.has_access());
    }

    #[tokio::test]
    async fn store_failure_propagates_as_error_never_allow() {
        let eval = evaluator(FakeStore::default().failing());

        let result = eval
            .check("ada@example.com", Some("Admin"), "audits/list", RuleType::Page)
            .await;
        assert!(matches!(result, Err(EvalError::Store(_))));
    }

    #[tokio::test]
    async fn blank_resource_is_invalid_input() {
        let eval = evaluator(FakeStore::default());

        let result = eval
            .check("ada@example.com", Some("Admin"), "  ", RuleType::Page)
            .await;
        assert!(matches!(result, Err(EvalError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn combinators_match_truth_table() {
        let eval = evaluator(
            FakeStore::default()
                .with_role_rule("a", RuleType::Feature, "Admin", AccessType::Allow)
                .with_role_rule("b", RuleType::Feature, "Admin", AccessType::Allow),
        );
        let both = [("a", RuleType::Feature), ("b", RuleType::Feature)];
        assert!(eval.check_any("x@example.com", Some("Admin"), &both).await.unwrap());
        assert!(eval.check_all("x@example.com", Some("Admin"), &both).await.unwrap());

        let eval = evaluator(
            FakeStore::default()
                .with_role_rule("a", RuleType::Feature, "Admin", AccessType::Allow)
                .with_role_rule("b", RuleType::Feature, "Admin", AccessType::Deny),
        );
        assert!(eval.check_any("x@example.com", Some("Admin"), &both).await.unwrap());
        assert!(!eval.check_all("x@example.com", Some("Admin"), &both).await.unwrap());

        let eval = evaluator(
            FakeStore::default()
                .with_role_rule("a", RuleType::Feature, "Admin", AccessType::Deny)
                .with_role_rule("b", RuleType::Feature, "Admin", AccessType::Deny),
        );
        assert!(!eval.check_any("x@example.com", Some("Admin"), &both).await.unwrap());
        assert!(!eval.check_all("x@example.com", Some("Admin"), &both).await.unwrap());
    }

    #[tokio::test]
    async fn cached_decision_is_reused_until_invalidated() {
        let store = FakeStore::default().with_role_rule(
            "audits/list",
            RuleType::Page,
            "Admin",
            AccessType::Allow,
        );
        let eval = PermissionEvaluator::new(
            Arc::new(store),
            DecisionCache::new(Duration::from_secs(60)),
        );

        let first = eval
            .check("ada@example.com", Some("Admin"), "audits/list", RuleType::Page)
            .await
            .unwrap();
        assert!(first.has_access());

        // Same tuple hits the cache; invalidation forces a re-read.
        let second = eval
            .check("ada@example.com", Some("Admin"), "audits/list", RuleType::Page)
            .await
            .unwrap();
        assert_eq!(first, second);

        eval.invalidate_cache().await;
        let third = eval
            .check("ada@example.com", Some("Admin"), "audits/list", RuleType::Page)
            .await
            .unwrap();
        assert!(third.has_access());
    }
}
