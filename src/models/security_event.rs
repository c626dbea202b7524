use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Persisted security/audit record, read back for the admin audit view.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SecurityEventEntry {
    pub id: Uuid,
    #[schema(example = "login_failure")]
    pub event_type: String,
    pub actor_email: Option<String>,
    pub resource: Option<String>,
    #[schema(value_type = Object)]
    pub details: serde_json::Value,
    pub severity: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbSecurityEventEntry {
    pub id: String,
    pub event_type: String,
    pub actor_email: Option<String>,
    pub resource: Option<String>,
    pub details: String,
    pub severity: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl From<DbSecurityEventEntry> for SecurityEventEntry {
    fn from(db: DbSecurityEventEntry) -> Self {
        SecurityEventEntry {
            id: Uuid::parse_str(&db.id).unwrap_or_default(),
            event_type: db.event_type,
            actor_email: db.actor_email,
            resource: db.resource,
            details: serde_json::from_str(&db.details).unwrap_or_default(),
            severity: db.severity,
            ip: db.ip,
            user_agent: db.user_agent,
            occurred_at: db.occurred_at,
        }
    }
}
