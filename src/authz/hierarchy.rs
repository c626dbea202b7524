//! Static role hierarchy used for relative-privilege comparisons.

use super::roles;

/// The role allowed to impersonate anyone, including peers.
pub const TOP_ROLE: &str = roles::SUPER_ADMIN;

/// Fixed role -> level table. Quality Supervisor and Quality Analyst are
/// deliberately peers.
const ROLE_LEVELS: &[(&str, i64)] = &[
    (roles::SUPER_ADMIN, 100),
    (roles::ADMIN, 80),
    (roles::MANAGER, 60),
    (roles::QUALITY_SUPERVISOR, 40),
    (roles::QUALITY_ANALYST, 40),
    (roles::EMPLOYEE, 20),
    (roles::GENERAL_USER, 0),
];

/// Level for a role name. `None`, empty, and unrecognized roles all map to 0.
/// Pure lookup, never fails.
pub fn level_of(role: Option<&str>) -> i64 {
    let Some(role) = role else { return 0 };
    let role = role.trim();

    ROLE_LEVELS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(role))
        .map(|(_, level)| *level)
        .unwrap_or(0)
}
