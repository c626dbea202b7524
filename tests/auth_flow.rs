//! Registration and login edge cases around email normalization.

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
    let app = create_app(pool.clone()).await?;

    Ok((app, pool, dir))
}

async fn post_json(app: &Router, uri: &str, body_json: serde_json::Value) -> Result<(StatusCode, serde_json::Value)> {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body_json.to_string()))?;

    let resp: Response = app.clone().oneshot(req).await?;
    let status = resp.status();
    let body_bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    let v: serde_json::Value = if body_bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body_bytes)?
    };
    Ok((status, v))
}

#[tokio::test]
async fn register_normalizes_email_and_assigns_base_role() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;

    let (status, body) = post_json(
        &app,
        "/auth/register",
        json!({"name": "Ada", "email": "  Ada@Example.COM ", "password": "password123"}),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "register failed: {}", body);
    assert_eq!(body.pointer("/user/email").and_then(|v| v.as_str()), Some("ada@example.com"));
    assert_eq!(body.pointer("/user/role").and_then(|v| v.as_str()), Some("General User"));
    Ok(())
}

#[tokio::test]
async fn duplicate_email_differing_only_in_case_conflicts() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;

    let (status, _) = post_json(
        &app,
        "/auth/register",
        json!({"name": "Ada", "email": "ada@example.com", "password": "password123"}),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, _) = post_json(
        &app,
        "/auth/register",
        json!({"name": "Imposter", "email": "ADA@example.com", "password": "password123"}),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT);
    Ok(())
}

#[tokio::test]
async fn login_accepts_unnormalized_email() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;

    let (status, _) = post_json(
        &app,
        "/auth/register",
        json!({"name": "Ada", "email": "ada@example.com", "password": "password123"}),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = post_json(
        &app,
        "/auth/login",
        json!({"email": " ADA@Example.com ", "password": "password123"}),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "login failed: {}", body);
    assert!(body.get("token").and_then(|v| v.as_str()).is_some());
    Ok(())
}

#[tokio::test]
async fn short_password_is_rejected() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;

    let (status, _) = post_json(
        &app,
        "/auth/register",
        json!({"name": "Ada", "email": "ada@example.com", "password": "short"}),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn me_returns_current_identity() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;

    let (status, body) = post_json(
        &app,
        "/auth/register",
        json!({"name": "Ada", "email": "ada@example.com", "password": "password123"}),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let token = body.get("token").and_then(|v| v.as_str()).context("missing token")?;

    let req = Request::builder()
        .method("GET")
        .uri("/auth/me")
        .header("authorization", format!("Bearer {}", token))
        .body(Body::empty())?;
    let resp: Response = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let body_bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    let me: serde_json::Value = serde_json::from_slice(&body_bytes)?;
    assert_eq!(me.get("email").and_then(|v| v.as_str()), Some("ada@example.com"));
    Ok(())
}
