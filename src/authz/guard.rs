use std::collections::HashMap;
use std::sync::Arc;

use super::evaluator::{Decision, EvalError, PermissionEvaluator};
use super::hierarchy::level_of;
use super::identity::Identity;
use super::store::RuleStore;
use super::DecisionCache;
use crate::errors::AppError;
use crate::events::{log_security_event, EventBus, RequestContext, SecurityEventKind};
use crate::models::access_rule::RuleType;

/// Request-boundary guards over the evaluator. Every rejection carries the
/// resource/rule-type context for the 403 body, and every denial is recorded
/// on the security event bus (fire-and-forget).
pub struct PermissionService {
    evaluator: PermissionEvaluator,
    event_bus: EventBus,
}

impl PermissionService {
    pub fn new(store: Arc<dyn RuleStore>, cache: DecisionCache, event_bus: EventBus) -> Self {
        Self {
            evaluator: PermissionEvaluator::new(store, cache),
            event_bus,
        }
    }

    pub fn evaluator(&self) -> &PermissionEvaluator {
        &self.evaluator
    }

    pub async fn invalidate_cache(&self) {
        self.evaluator.invalidate_cache().await;
    }

    /// Evaluate and enforce: any non-allow outcome rejects.
    pub async fn require_permission(
        &self,
        identity: &Identity,
        resource: &str,
        rule_type: RuleType,
    ) -> Result<(), AppError> {
        let decision = self.check(identity, resource, rule_type).await?;

        if decision.has_access() {
            return Ok(());
        }

        Err(self.deny(identity, resource, rule_type, &decision))
    }

    /// Like [`require_permission`], but when the denial is the unconfigured
    /// resource variant the caller passes if their role is in `allowed_roles`.
    /// Newly protected resources must not lock out privileged roles before an
    /// administrator seeds a rule; an explicit deny still always wins.
    pub async fn require_permission_or_role(
        &self,
        identity: &Identity,
        resource: &str,
        rule_type: RuleType,
        allowed_roles: &[&str],
    ) -> Result<(), AppError> {
        let decision = self.check(identity, resource, rule_type).await?;

        match decision {
            Decision::Allow { .. } => Ok(()),
            Decision::NoRuleConfigured => {
                if identity
                    .role_str()
                    .map(|role| role_matches(role, allowed_roles))
                    .unwrap_or(false)
                {
                    tracing::debug!(
                        email = %identity.email,
                        role = ?identity.role,
                        resource = %resource,
                        "no rule configured, allowed-roles fallback granted"
                    );
                    Ok(())
                } else {
                    Err(self.deny(identity, resource, rule_type, &Decision::NoRuleConfigured))
                }
            }
            deny @ Decision::Deny { .. } => Err(self.deny(identity, resource, rule_type, &deny)),
        }
    }

    /// OR combinator over (resource, type) pairs.
    pub async fn require_any_permission(
        &self,
        identity: &Identity,
        checks: &[(&str, RuleType)],
    ) -> Result<(), AppError> {
        let granted = self
            .evaluator
            .check_any(&identity.email, identity.role_str(), checks)
            .await
            .map_err(map_eval_error)?;

        if granted {
            return Ok(());
        }

        let names = joined_resource_names(checks);
        self.emit_denial(identity, &names, None, "None of the required permissions granted");
        Err(AppError::forbidden(format!(
            "None of the required permissions granted: {names}"
        )))
    }

    /// AND combinator over (resource, type) pairs.
    pub async fn require_all_permissions(
        &self,
        identity: &Identity,
        checks: &[(&str, RuleType)],
    ) -> Result<(), AppError> {
        let granted = self
            .evaluator
            .check_all(&identity.email, identity.role_str(), checks)
            .await
            .map_err(map_eval_error)?;

        if granted {
            return Ok(());
        }

        let names = joined_resource_names(checks);
        self.emit_denial(identity, &names, None, "Not all required permissions granted");
        Err(AppError::forbidden(format!(
            "Not all required permissions granted: {names}"
        )))
    }

    /// Pure role-membership gate, bypassing the rule store entirely. Exact
    /// match first, then case-insensitive.
    pub fn require_role(&self, identity: &Identity, roles: &[&str]) -> Result<(), AppError> {
        let matched = identity
            .role_str()
            .map(|role| role_matches(role, roles))
            .unwrap_or(false);

        if matched {
            return Ok(());
        }

        self.emit_denial(identity, "role check", None, "Insufficient role");
        Err(AppError::Forbidden {
            message: format!("Requires one of roles: {}", roles.join(", ")),
            resource: None,
            rule_type: None,
            user_role: identity.role.clone(),
        })
    }

    /// Rejects callers whose role level is below the threshold.
    pub fn require_min_role_level(&self, identity: &Identity, min_level: i64) -> Result<(), AppError> {
        let level = level_of(identity.role_str());
        if level >= min_level {
            return Ok(());
        }

        self.emit_denial(identity, "role level check", None, "Insufficient role level");
        Err(AppError::Forbidden {
            message: format!("Requires role level {min_level} or above"),
            resource: None,
            rule_type: None,
            user_role: identity.role.clone(),
        })
    }

    /// Batch query: each pair runs the full precedence independently with the
    /// identity fixed for the whole batch. Indeterminate checks (store error,
    /// blank name) come back `false` -- fail closed, never fail open.
    pub async fn check_batch(
        &self,
        identity: &Identity,
        checks: &[(String, RuleType)],
    ) -> HashMap<String, bool> {
        let mut results = HashMap::with_capacity(checks.len());

        for (resource, rule_type) in checks {
            let granted = match self
                .evaluator
                .check(&identity.email, identity.role_str(), resource, *rule_type)
                .await
            {
                Ok(decision) => decision.has_access(),
                Err(err) => {
                    tracing::warn!(
                        email = %identity.email,
                        resource = %resource,
                        error = %err,
                        "batch permission check failed, treating as denied"
                    );
                    false
                }
            };

            results.insert(format!("{}:{}", resource, rule_type.as_str()), granted);
        }

        results
    }

    async fn check(
        &self,
        identity: &Identity,
        resource: &str,
        rule_type: RuleType,
    ) -> Result<Decision, AppError> {
        self.evaluator
            .check(&identity.email, identity.role_str(), resource, rule_type)
            .await
            .map_err(map_eval_error)
    }

    fn deny(
        &self,
        identity: &Identity,
        resource: &str,
        rule_type: RuleType,
        decision: &Decision,
    ) -> AppError {
        self.emit_denial(identity, resource, Some(rule_type), decision.reason());
        AppError::forbidden_resource(
            decision.reason(),
            resource,
            rule_type.as_str(),
            identity.role.clone(),
        )
    }

    fn emit_denial(&self, identity: &Identity, resource: &str, rule_type: Option<RuleType>, reason: &str) {
        log_security_event(
            &self.event_bus,
            SecurityEventKind::PermissionDenied,
            Some(&identity.email),
            Some(resource),
            serde_json::json!({
                "reason": reason,
                "ruleType": rule_type.map(|rt| rt.as_str()),
                "userRole": identity.role,
                "impersonator": identity.impersonator,
            }),
            None::<RequestContext>,
        );
    }
}

fn role_matches(role: &str, allowed: &[&str]) -> bool {
    allowed.iter().any(|candidate| *candidate == role)
        || allowed.iter().any(|candidate| candidate.eq_ignore_ascii_case(role))
}

fn joined_resource_names(checks: &[(&str, RuleType)]) -> String {
    checks
        .iter()
        .map(|(name, rule_type)| format!("{}:{}", name, rule_type.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn map_eval_error(err: EvalError) -> AppError {
    match err {
        EvalError::InvalidInput(message) => AppError::bad_request(message),
        EvalError::Store(store_err) => AppError::store_unavailable(store_err.to_string()),
    }
}
