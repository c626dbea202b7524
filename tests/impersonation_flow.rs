//! Impersonation gating and the act-as token lifecycle.

use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::json;
use sqlx::SqlitePool;
use tempfile::tempdir;
use tower::util::ServiceExt; // for `oneshot`

use audit_gate::create_app;

async fn setup() -> Result<(Router, SqlitePool, tempfile::TempDir)> {
    let dir = tempdir().context("failed to create tempdir")?;
    let db_path = dir.path().join("test.db");

    use sqlx::sqlite::SqliteConnectOptions;
    let opts = SqliteConnectOptions::new()
        .filename(db_path.as_path())
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    )
    .await?;
    migrator.run(&pool).await?;

    std::env::set_var("JWT_SECRET", "test-secret");
    std::env::set_var("AUTHZ_CACHE_TTL_SECS", "0");
    let app = create_app(pool.clone()).await?;

    Ok((app, pool, dir))
}

async fn register_user(app: &Router, pool: &SqlitePool, email: &str, role: &str) -> Result<String> {
    let req = Request::builder()
        .method("POST")
        .uri("/auth/register")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({"name": "Test User", "email": email, "password": "password123"}).to_string(),
        ))?;

    let resp: Response = app.clone().oneshot(req).await?;
    let status = resp.status();
    let body_bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    if status != StatusCode::CREATED {
        panic!("register failed: {} - {}", status, String::from_utf8_lossy(&body_bytes));
    }
    let auth_res: serde_json::Value = serde_json::from_slice(&body_bytes)?;
    let token = auth_res
        .get("token")
        .and_then(|v| v.as_str())
        .context("missing token")?
        .to_string();

    sqlx::query("UPDATE users SET role = ? WHERE email = ?")
        .bind(role)
        .bind(email)
        .execute(pool)
        .await?;

    Ok(token)
}

async fn start_impersonation(
    app: &Router,
    token: &str,
    target_email: &str,
) -> Result<(StatusCode, serde_json::Value)> {
    let req = Request::builder()
        .method("POST")
        .uri("/impersonation/start")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", token))
        .body(Body::from(
            json!({"target_email": target_email, "reason": "support session"}).to_string(),
        ))?;

    let resp: Response = app.clone().oneshot(req).await?;
    let status = resp.status();
    let body_bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    let v: serde_json::Value = serde_json::from_slice(&body_bytes)?;
    Ok((status, v))
}

#[tokio::test]
async fn admin_impersonates_lower_role_and_ends_session() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let admin_token = register_user(&app, &pool, "admin@example.com", "Admin").await?;
    let _ = register_user(&app, &pool, "emp@example.com", "Employee").await?;

    let (status, body) = start_impersonation(&app, &admin_token, "emp@example.com").await?;
    assert_eq!(status, StatusCode::OK, "start failed: {}", body);

    let act_token = body
        .get("token")
        .and_then(|v| v.as_str())
        .context("missing impersonation token")?
        .to_string();
    assert_eq!(body.get("target_email").and_then(|v| v.as_str()), Some("emp@example.com"));

    // The minted token is the target's identity.
    let req = Request::builder()
        .method("GET")
        .uri("/auth/me")
        .header("authorization", format!("Bearer {}", act_token))
        .body(Body::empty())?;
    let resp: Response = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let body_bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    let me: serde_json::Value = serde_json::from_slice(&body_bytes)?;
    assert_eq!(me.get("email").and_then(|v| v.as_str()), Some("emp@example.com"));

    // The audit trail has an open entry.
    let open: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM impersonation_log WHERE admin_email = 'admin@example.com' AND target_email = 'emp@example.com' AND ended_at IS NULL",
    )
    .fetch_one(&pool)
    .await?;
    assert_eq!(open, 1);

    // End from the impersonation credential itself.
    let req = Request::builder()
        .method("POST")
        .uri("/impersonation/end")
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {}", act_token))
        .body(Body::from(json!({}).to_string()))?;
    let resp: Response = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let open: i64 = sqlx::query_scalar(
        "SELECT COUNT(1) FROM impersonation_log WHERE ended_at IS NULL",
    )
    .fetch_one(&pool)
    .await?;
    assert_eq!(open, 0, "entry should be closed");

    Ok(())
}

#[tokio::test]
async fn self_impersonation_is_rejected() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let admin_token = register_user(&app, &pool, "admin@example.com", "Admin").await?;

    let (status, _body) = start_impersonation(&app, &admin_token, "Admin@Example.com ").await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn admin_cannot_impersonate_equal_or_higher_role() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let admin_token = register_user(&app, &pool, "admin@example.com", "Admin").await?;
    let _ = register_user(&app, &pool, "other-admin@example.com", "Admin").await?;
    let _ = register_user(&app, &pool, "root@example.com", "Super Admin").await?;

    let (status, _) = start_impersonation(&app, &admin_token, "other-admin@example.com").await?;
    assert_eq!(status, StatusCode::FORBIDDEN, "equal level must be rejected");

    let (status, _) = start_impersonation(&app, &admin_token, "root@example.com").await?;
    assert_eq!(status, StatusCode::FORBIDDEN, "higher level must be rejected");
    Ok(())
}

#[tokio::test]
async fn super_admin_impersonates_admin() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let root_token = register_user(&app, &pool, "root@example.com", "Super Admin").await?;
    let _ = register_user(&app, &pool, "admin@example.com", "Admin").await?;

    let (status, body) = start_impersonation(&app, &root_token, "admin@example.com").await?;
    assert_eq!(status, StatusCode::OK, "top role may impersonate anyone: {}", body);
    Ok(())
}

#[tokio::test]
async fn top_role_exemption_ignores_role_case() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    // Stored with nonstandard casing; the exemption must still apply, so an
    // equal-level target is allowed where it would be rejected for anyone
    // below the top role.
    let root_token = register_user(&app, &pool, "root@example.com", "super admin").await?;
    let _ = register_user(&app, &pool, "peer@example.com", "Super Admin").await?;

    let (status, body) = start_impersonation(&app, &root_token, "peer@example.com").await?;
    assert_eq!(status, StatusCode::OK, "case must not matter: {}", body);
    Ok(())
}

#[tokio::test]
async fn employee_cannot_start_impersonation() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let emp_token = register_user(&app, &pool, "emp@example.com", "Employee").await?;
    let _ = register_user(&app, &pool, "other@example.com", "General User").await?;

    let (status, _) = start_impersonation(&app, &emp_token, "other@example.com").await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn unknown_target_is_404() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let admin_token = register_user(&app, &pool, "admin@example.com", "Admin").await?;

    let (status, _) = start_impersonation(&app, &admin_token, "ghost@example.com").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn nested_impersonation_is_rejected() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let root_token = register_user(&app, &pool, "root@example.com", "Super Admin").await?;
    let _ = register_user(&app, &pool, "admin@example.com", "Admin").await?;
    let _ = register_user(&app, &pool, "emp@example.com", "Employee").await?;

    let (status, body) = start_impersonation(&app, &root_token, "admin@example.com").await?;
    assert_eq!(status, StatusCode::OK, "start failed: {}", body);
    let act_token = body
        .get("token")
        .and_then(|v| v.as_str())
        .context("missing impersonation token")?
        .to_string();

    // Acting-as-admin may not open a second hop.
    let (status, _) = start_impersonation(&app, &act_token, "emp@example.com").await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    Ok(())
}
