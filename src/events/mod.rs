//! Security/audit event log.
//!
//! Events are published fire-and-forget onto a broadcast bus; a background
//! listener persists them into `security_events` with a SHA-256 hash chain.
//! Publish and persist failures are logged and swallowed: they must never
//! propagate back into the authorization path that emitted them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Kinds of security-relevant happenings recorded in the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    LoginSuccess,
    LoginFailure,
    PermissionChange,
    PermissionDenied,
    ApiAccess,
    ImpersonationStart,
    ImpersonationEnd,
}

impl SecurityEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventKind::LoginSuccess => "login_success",
            SecurityEventKind::LoginFailure => "login_failure",
            SecurityEventKind::PermissionChange => "permission_change",
            SecurityEventKind::PermissionDenied => "permission_denied",
            SecurityEventKind::ApiAccess => "api_access",
            SecurityEventKind::ImpersonationStart => "impersonation_start",
            SecurityEventKind::ImpersonationEnd => "impersonation_end",
        }
    }

    /// Retention class. Failed logins, rule edits, and impersonation are kept
    /// long-term; raw API access records are trimmed aggressively.
    pub fn severity(&self) -> &'static str {
        match self {
            SecurityEventKind::LoginFailure
            | SecurityEventKind::PermissionChange
            | SecurityEventKind::ImpersonationStart
            | SecurityEventKind::ImpersonationEnd => "critical",
            SecurityEventKind::LoginSuccess | SecurityEventKind::PermissionDenied => "important",
            SecurityEventKind::ApiAccess => "noise",
        }
    }
}

pub type EventBus = broadcast::Sender<Value>;

pub fn init_event_bus() -> (EventBus, broadcast::Receiver<Value>) {
    broadcast::channel(1024)
}

/// Request context captured alongside security events (IP, User-Agent).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extract context from Axum request headers
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Self {
        let ip = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.split(',').next().unwrap_or(s).trim().to_string())
            .or_else(|| {
                headers
                    .get("x-real-ip")
                    .and_then(|v| v.to_str().ok())
                    .map(String::from)
            });

        let user_agent = headers
            .get(axum::http::header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        Self { ip, user_agent }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SecurityEvent {
    id: Uuid,
    event_type: String,
    severity: String,
    occurred_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    actor_email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource: Option<String>,
    details: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<RequestContext>,
}

/// Publish a security event. Fire-and-forget: a full or closed bus only
/// produces a warning, never an error for the caller.
pub fn log_security_event(
    event_bus: &EventBus,
    kind: SecurityEventKind,
    actor_email: Option<&str>,
    resource: Option<&str>,
    details: Value,
    context: Option<RequestContext>,
) {
    let event = SecurityEvent {
        id: Uuid::new_v4(),
        event_type: kind.as_str().to_string(),
        severity: kind.severity().to_string(),
        occurred_at: Utc::now(),
        actor_email: actor_email.map(String::from),
        resource: resource.map(String::from),
        details,
        context,
    };

    match serde_json::to_value(&event) {
        Ok(value) => {
            if event_bus.send(value).is_err() {
                tracing::warn!(event_type = kind.as_str(), "security event bus has no receivers");
            }
        }
        Err(err) => {
            tracing::warn!(event_type = kind.as_str(), error = %err, "failed to serialize security event");
        }
    }
}

/// Convenience wrapper for API access records.
pub fn log_api_access(
    event_bus: &EventBus,
    actor_email: &str,
    resource: &str,
    context: Option<RequestContext>,
) {
    log_security_event(
        event_bus,
        SecurityEventKind::ApiAccess,
        Some(actor_email),
        Some(resource),
        Value::Object(Default::default()),
        context,
    );
}

/// Background task draining the bus into `security_events`. Each row links to
/// the previous one via SHA256(prev_hash || payload), giving a tamper-evident
/// append-only chain. Insert failures are logged and dropped, and a lagged
/// receiver (burst beyond the bus capacity) skips the lost events and keeps
/// draining instead of shutting the trail down.
pub async fn start_security_listener(mut rx: broadcast::Receiver<Value>, pool: SqlitePool) {
    tracing::info!("Security event listener started");
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "security event listener lagged, events lost");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let id = event
            .get("id")
            .and_then(|v| v.as_str())
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let event_type = event.get("event_type").and_then(|v| v.as_str()).unwrap_or("unknown");
        let severity = event.get("severity").and_then(|v| v.as_str()).unwrap_or("important");
        let actor_email = event.get("actor_email").and_then(|v| v.as_str()).map(String::from);
        let resource = event.get("resource").and_then(|v| v.as_str()).map(String::from);
        let details = event
            .get("details")
            .map(|v| v.to_string())
            .unwrap_or_else(|| "{}".to_string());
        let ip = event
            .pointer("/context/ip")
            .and_then(|v| v.as_str())
            .map(String::from);
        let user_agent = event
            .pointer("/context/user_agent")
            .and_then(|v| v.as_str())
            .map(String::from);

        let occurred_at = event
            .get("occurred_at")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let payload_str = event.to_string();

        // Chain onto the hash of the most recent event.
        let prev_hash: Option<String> = sqlx::query_scalar(
            "SELECT hash FROM security_events ORDER BY created_at DESC, occurred_at DESC LIMIT 1",
        )
        .fetch_optional(&pool)
        .await
        .ok()
        .flatten();

        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        if let Some(ref ph) = prev_hash {
            hasher.update(ph.as_bytes());
        }
        hasher.update(payload_str.as_bytes());
        let hash = hex::encode(hasher.finalize());

        let result = sqlx::query(
            r#"
            INSERT INTO security_events
                (id, event_type, actor_email, resource, details, severity, ip, user_agent, occurred_at, prev_hash, hash, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(event_type)
        .bind(&actor_email)
        .bind(&resource)
        .bind(&details)
        .bind(severity)
        .bind(&ip)
        .bind(&user_agent)
        .bind(occurred_at)
        .bind(&prev_hash)
        .bind(&hash)
        .bind(Utc::now())
        .execute(&pool)
        .await;

        if let Err(e) = result {
            tracing::error!("Failed to save security event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_classes() {
        assert_eq!(SecurityEventKind::LoginFailure.severity(), "critical");
        assert_eq!(SecurityEventKind::PermissionDenied.severity(), "important");
        assert_eq!(SecurityEventKind::ApiAccess.severity(), "noise");
    }

    #[test]
    fn kind_wire_names() {
        assert_eq!(SecurityEventKind::LoginSuccess.as_str(), "login_success");
        assert_eq!(SecurityEventKind::PermissionChange.as_str(), "permission_change");
        assert_eq!(SecurityEventKind::ImpersonationStart.as_str(), "impersonation_start");
    }

    #[tokio::test]
    async fn listener_keeps_draining_after_receiver_lag() {
        let dir = tempfile::tempdir().unwrap();
        let opts = sqlx::sqlite::SqliteConnectOptions::new()
            .filename(dir.path().join("events.db"))
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(opts).await.unwrap();
        sqlx::migrate::Migrator::new(
            std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"),
        )
        .await
        .unwrap()
        .run(&pool)
        .await
        .unwrap();

        // Tiny bus so a publish burst overflows before the listener runs.
        let (tx, rx) = broadcast::channel(1);
        let listener = tokio::spawn(start_security_listener(rx, pool.clone()));

        for i in 0..8 {
            log_security_event(
                &tx,
                SecurityEventKind::ApiAccess,
                Some("a@example.com"),
                Some(&format!("resource/{i}")),
                Value::Object(Default::default()),
                None,
            );
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        // The overflow dropped events, but the listener must still be alive.
        log_security_event(
            &tx,
            SecurityEventKind::LoginSuccess,
            Some("a@example.com"),
            None,
            serde_json::json!({}),
            None,
        );
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let saved: i64 = sqlx::query_scalar(
            "SELECT COUNT(1) FROM security_events WHERE event_type = 'login_success'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(saved, 1);

        listener.abort();
    }

    #[test]
    fn request_context_from_forwarded_header() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.9, 10.0.0.1".parse().unwrap());
        headers.insert(axum::http::header::USER_AGENT, "qa-audit-ui/2.1".parse().unwrap());

        let ctx = RequestContext::from_headers(&headers);
        assert_eq!(ctx.ip.as_deref(), Some("203.0.113.9"));
        assert_eq!(ctx.user_agent.as_deref(), Some("qa-audit-ui/2.1"));
    }
}
