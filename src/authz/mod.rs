//! Authorization module - rule-based permission engine and request guards
//!
//! This module implements the access-control core:
//! - Role hierarchy (static role -> level table)
//! - Rule store (role rules + individual user overrides, read path)
//! - Permission evaluator with fixed precedence:
//!   individual deny > individual allow > role rule > no rule (deny)
//! - Request guards wrapping the evaluator with a fail-closed fallback
//!   policy for unconfigured resources
//! - Impersonation gating built on the role hierarchy

mod cache;
mod evaluator;
mod guard;
mod hierarchy;
mod identity;
mod store;

pub use cache::DecisionCache;
pub use evaluator::{Decision, EvalError, PermissionEvaluator, NO_MATCHING_RULE_REASON};
pub use guard::PermissionService;
pub use hierarchy::{level_of, TOP_ROLE};
pub use identity::Identity;
pub use store::{RuleStore, SqliteRuleStore, StoreError};

/// Well-known role names
pub mod roles {
    pub const SUPER_ADMIN: &str = "Super Admin";
    pub const ADMIN: &str = "Admin";
    pub const MANAGER: &str = "Manager";
    pub const QUALITY_SUPERVISOR: &str = "Quality Supervisor";
    pub const QUALITY_ANALYST: &str = "Quality Analyst";
    pub const EMPLOYEE: &str = "Employee";
    pub const GENERAL_USER: &str = "General User";
}

/// Well-known protected resource names
pub mod resources {
    pub const PERMISSION_SETTINGS: &str = "settings/permissions";
    pub const IMPERSONATION_PAGE: &str = "settings/impersonation";
    pub const SECURITY_EVENTS_PAGE: &str = "settings/security-events";
}
