use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// One row of the append-only impersonation audit trail. `ended_at` is the
/// only field ever mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ImpersonationLogEntry {
    pub id: Uuid,
    pub admin_email: String,
    pub target_email: String,
    pub reason: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbImpersonationLogEntry {
    pub id: String,
    pub admin_email: String,
    pub target_email: String,
    pub reason: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl From<DbImpersonationLogEntry> for ImpersonationLogEntry {
    fn from(db: DbImpersonationLogEntry) -> Self {
        ImpersonationLogEntry {
            id: Uuid::parse_str(&db.id).unwrap_or_default(),
            admin_email: db.admin_email,
            target_email: db.target_email,
            reason: db.reason,
            ip: db.ip,
            user_agent: db.user_agent,
            started_at: db.started_at,
            ended_at: db.ended_at,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ImpersonationStartRequest {
    #[schema(example = "analyst@example.com")]
    pub target_email: String,
    #[schema(example = "Reproducing a scorecard display issue")]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ImpersonationStartResponse {
    /// Short-lived credential minted for the target identity.
    pub token: String,
    pub target_email: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ImpersonationEndRequest {
    /// Required when ending from the admin's own session; inferred from the
    /// impersonation credential otherwise.
    pub target_email: Option<String>,
}
