//! End-to-end user flows against a throwaway Postgres container. Each test
//! skips itself when no container runtime is available.

use super::{
    app,
    tests::{FRONTEND, assert_error, json_body, json_request, register_body, signer},
};
use crate::api::handlers::auth::{AuthConfig, AuthState, utils::hash_refresh_token};
use anyhow::{Context, Result, anyhow};
use axum::{
    Router,
    body::Body,
    http::{
        Method, Request, StatusCode,
        header::{AUTHORIZATION, COOKIE, SET_COOKIE},
    },
    response::Response,
};
use serde_json::{Value, json};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use test_support::{postgres::PostgresContainer, runtime};
use tokio::sync::{Mutex, OnceCell};
use tower::ServiceExt;

const SCHEMA_SQL: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/sql/schema.sql"));

static TEST_CONTAINER: OnceCell<PostgresContainer> = OnceCell::const_new();
static TEST_MUTEX: Mutex<()> = Mutex::const_new(());

async fn get_test_pool() -> Result<PgPool> {
    let container = TEST_CONTAINER
        .get_or_try_init(|| async {
            let postgres = PostgresContainer::start().await?;
            postgres.wait_until_ready().await?;
            Ok::<PostgresContainer, anyhow::Error>(postgres)
        })
        .await?;

    let pool = container.pool_with_schema(SCHEMA_SQL).await?;
    sqlx::query("TRUNCATE users").execute(&pool).await?;
    Ok(pool)
}

struct TestApp {
    router: Router,
    pool: PgPool,
}

impl TestApp {
    async fn new() -> Result<Self> {
        let pool = get_test_pool().await?;
        let auth_state = Arc::new(AuthState::new(
            AuthConfig::new(FRONTEND.to_string()),
            signer(),
        ));
        let router = app(pool.clone(), auth_state)?;
        Ok(Self { router, pool })
    }

    async fn send(&self, request: Request<Body>) -> Result<Response> {
        Ok(self.router.clone().oneshot(request).await?)
    }

    async fn register(&self, username: &str, email: &str) -> Result<Value> {
        let mut body = register_body();
        body["username"] = json!(username);
        body["email"] = json!(email);
        let response = self
            .send(json_request(Method::POST, "/api/v1/users/register", &body)?)
            .await?;
        assert_eq!(response.status(), StatusCode::CREATED);
        json_body(response).await
    }

    async fn login(&self, username: &str, password: &str) -> Result<Response> {
        let body = json!({ "username": username, "password": password });
        self.send(json_request(Method::POST, "/api/v1/users/login", &body)?)
            .await
    }

    /// Log in and return `(access_token, refresh_token)` from the body.
    async fn session(&self, username: &str, password: &str) -> Result<(String, String)> {
        let response = self.login(username, password).await?;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await?;
        Ok((
            token_field(&body, "access_token")?,
            token_field(&body, "refresh_token")?,
        ))
    }

    async fn refresh_with_cookie(&self, refresh_token: &str) -> Result<Response> {
        self.send(
            Request::builder()
                .method(Method::POST)
                .uri("/api/v1/users/refresh-token")
                .header(COOKIE, format!("refreshToken={refresh_token}"))
                .body(Body::empty())?,
        )
        .await
    }

    async fn authed(
        &self,
        method: Method,
        uri: &str,
        access_token: &str,
        body: &Value,
    ) -> Result<Response> {
        let mut request = json_request(method, uri, body)?;
        request.headers_mut().insert(
            AUTHORIZATION,
            format!("Bearer {access_token}").parse()?,
        );
        self.send(request).await
    }

    async fn stored_refresh_hash(&self, username: &str) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT refresh_token_hash FROM users WHERE username = $1")
            .bind(username)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("refresh_token_hash")?)
    }
}

fn token_field(body: &Value, field: &str) -> Result<String> {
    body["data"][field]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| anyhow!("missing {field} in {body}"))
}

fn set_cookie_value(response: &Response, name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .find_map(|cookie| cookie.strip_prefix(prefix.as_str()))
        .and_then(|rest| rest.split(';').next())
        .map(str::to_string)
}

#[tokio::test]
async fn register_rejects_taken_identity() -> Result<()> {
    let _guard = TEST_MUTEX.lock().await;
    if let Err(err) = runtime::ensure_container_runtime() {
        eprintln!("Skipping integration test: {err}");
        return Ok(());
    }
    let test_app = TestApp::new().await?;

    let body = test_app.register("alice", "alice@example.com").await?;
    assert_eq!(body["data"]["username"], "alice");
    assert!(body["data"].get("password_hash").is_none());

    for (username, email) in [("alice", "new@example.com"), ("alice2", "ALICE@example.com")] {
        let mut body = register_body();
        body["username"] = json!(username);
        body["email"] = json!(email);
        let request = json_request(Method::POST, "/api/v1/users/register", &body)?;
        assert_error(
            test_app.send(request).await?,
            StatusCode::CONFLICT,
            "User with email or username already exists",
        )
        .await?;
    }
    Ok(())
}

#[tokio::test]
async fn login_sets_cookies_and_stores_refresh_hash() -> Result<()> {
    let _guard = TEST_MUTEX.lock().await;
    if let Err(err) = runtime::ensure_container_runtime() {
        eprintln!("Skipping integration test: {err}");
        return Ok(());
    }
    let test_app = TestApp::new().await?;
    test_app.register("alice", "alice@example.com").await?;
    assert_eq!(test_app.stored_refresh_hash("alice").await?, None);

    assert_error(
        test_app.login("alice", "not-the-password").await?,
        StatusCode::UNAUTHORIZED,
        "Invalid user credentials",
    )
    .await?;
    assert_error(
        test_app.login("nobody", "wonderland").await?,
        StatusCode::NOT_FOUND,
        "User does not exist",
    )
    .await?;

    let response = test_app.login("alice", "wonderland").await?;
    assert_eq!(response.status(), StatusCode::OK);
    let access_cookie =
        set_cookie_value(&response, "accessToken").context("accessToken cookie missing")?;
    let refresh_cookie =
        set_cookie_value(&response, "refreshToken").context("refreshToken cookie missing")?;

    let body = json_body(response).await?;
    assert_eq!(body["data"]["user"]["email"], "alice@example.com");
    assert_eq!(token_field(&body, "access_token")?, access_cookie);
    assert_eq!(token_field(&body, "refresh_token")?, refresh_cookie);
    assert_eq!(
        test_app.stored_refresh_hash("alice").await?,
        Some(hash_refresh_token(&refresh_cookie))
    );

    let request = Request::builder()
        .uri("/api/v1/users/current-user")
        .header(COOKIE, format!("accessToken={access_cookie}"))
        .body(Body::empty())?;
    let response = test_app.send(request).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await?["data"]["username"], "alice");
    Ok(())
}

#[tokio::test]
async fn refresh_token_is_single_use() -> Result<()> {
    let _guard = TEST_MUTEX.lock().await;
    if let Err(err) = runtime::ensure_container_runtime() {
        eprintln!("Skipping integration test: {err}");
        return Ok(());
    }
    let test_app = TestApp::new().await?;
    test_app.register("alice", "alice@example.com").await?;
    let (_, first) = test_app.session("alice", "wonderland").await?;

    let response = test_app.refresh_with_cookie(&first).await?;
    assert_eq!(response.status(), StatusCode::OK);
    let rotated_cookie =
        set_cookie_value(&response, "refreshToken").context("refreshToken cookie missing")?;
    let second = token_field(&json_body(response).await?, "refresh_token")?;
    assert_eq!(second, rotated_cookie);
    assert_ne!(second, first);

    assert_error(
        test_app.refresh_with_cookie(&first).await?,
        StatusCode::UNAUTHORIZED,
        "Refresh token is expired or used",
    )
    .await?;

    // The body is only read when no cookie is sent.
    let body = json!({ "refresh_token": second });
    let response = test_app
        .send(json_request(Method::POST, "/api/v1/users/refresh-token", &body)?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let third = token_field(&json_body(response).await?, "refresh_token")?;
    assert_eq!(
        test_app.stored_refresh_hash("alice").await?,
        Some(hash_refresh_token(&third))
    );
    Ok(())
}

#[tokio::test]
async fn logout_revokes_refresh_token() -> Result<()> {
    let _guard = TEST_MUTEX.lock().await;
    if let Err(err) = runtime::ensure_container_runtime() {
        eprintln!("Skipping integration test: {err}");
        return Ok(());
    }
    let test_app = TestApp::new().await?;
    test_app.register("alice", "alice@example.com").await?;
    let (access, refresh) = test_app.session("alice", "wonderland").await?;

    let response = test_app
        .authed(Method::POST, "/api/v1/users/logout", &access, &json!({}))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(set_cookie_value(&response, "refreshToken").as_deref(), Some(""));
    assert_eq!(test_app.stored_refresh_hash("alice").await?, None);

    assert_error(
        test_app.refresh_with_cookie(&refresh).await?,
        StatusCode::UNAUTHORIZED,
        "Refresh token is expired or used",
    )
    .await
}

#[tokio::test]
async fn change_password_checks_old_and_new() -> Result<()> {
    let _guard = TEST_MUTEX.lock().await;
    if let Err(err) = runtime::ensure_container_runtime() {
        eprintln!("Skipping integration test: {err}");
        return Ok(());
    }
    let test_app = TestApp::new().await?;
    test_app.register("alice", "alice@example.com").await?;
    let (access, _) = test_app.session("alice", "wonderland").await?;
    let uri = "/api/v1/users/change-password";

    let blank = json!({ "old_password": "wonderland", "new_password": "        " });
    assert_error(
        test_app.authed(Method::POST, uri, &access, &blank).await?,
        StatusCode::BAD_REQUEST,
        "Old and new password are required",
    )
    .await?;

    let wrong = json!({ "old_password": "looking-glass", "new_password": "through-the" });
    assert_error(
        test_app.authed(Method::POST, uri, &access, &wrong).await?,
        StatusCode::BAD_REQUEST,
        "Invalid old password",
    )
    .await?;

    let good = json!({ "old_password": "wonderland", "new_password": "looking-glass" });
    let response = test_app.authed(Method::POST, uri, &access, &good).await?;
    assert_eq!(response.status(), StatusCode::OK);

    assert_error(
        test_app.login("alice", "wonderland").await?,
        StatusCode::UNAUTHORIZED,
        "Invalid user credentials",
    )
    .await?;
    assert_eq!(
        test_app.login("alice", "looking-glass").await?.status(),
        StatusCode::OK
    );
    Ok(())
}

#[tokio::test]
async fn update_account_rules() -> Result<()> {
    let _guard = TEST_MUTEX.lock().await;
    if let Err(err) = runtime::ensure_container_runtime() {
        eprintln!("Skipping integration test: {err}");
        return Ok(());
    }
    let test_app = TestApp::new().await?;
    test_app.register("alice", "alice@example.com").await?;
    test_app.register("bob", "bob@example.com").await?;
    let (access, _) = test_app.session("alice", "wonderland").await?;
    let uri = "/api/v1/users/update-account";

    assert_error(
        test_app.authed(Method::PATCH, uri, &access, &json!({})).await?,
        StatusCode::BAD_REQUEST,
        "No updates provided",
    )
    .await?;

    let response = test_app
        .authed(Method::PATCH, uri, &access, &json!({ "fullname": "A", "password": "x" }))
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await?;
    assert!(
        body["message"]
            .as_str()
            .is_some_and(|message| message.contains("unknown field"))
    );

    assert_error(
        test_app
            .authed(Method::PATCH, uri, &access, &json!({ "email": "Bob@Example.com" }))
            .await?,
        StatusCode::CONFLICT,
        "Email is already in use",
    )
    .await?;

    let response = test_app
        .authed(Method::PATCH, uri, &access, &json!({ "fullname": "Alice L." }))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await?;
    assert_eq!(body["data"]["fullname"], "Alice L.");
    assert_eq!(body["data"]["email"], "alice@example.com");

    let avatar = json!({ "avatar": "https://cdn.example.com/new.png" });
    let response = test_app
        .authed(Method::PATCH, "/api/v1/users/avatar", &access, &avatar)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        json_body(response).await?["data"]["avatar"],
        "https://cdn.example.com/new.png"
    );
    Ok(())
}
