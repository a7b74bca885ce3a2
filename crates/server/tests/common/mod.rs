//! In-process test fixture: the full router over a temporary SQLite file,
//! driven with `tower::ServiceExt::oneshot`.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use helpdesk_core::{
    config::{AuthConfig, DatabaseConfig, ServerConfig},
    create_audit_system, create_authenticator, AuditStore, AuthMethod, Config, SqliteAuditStore,
    SqliteTicketStore,
};
use helpdesk_server::{api::create_router, state::AppState};

pub struct TestFixture {
    pub router: Router,
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Fixture with `auth.method = "none"`.
    pub async fn new() -> Self {
        Self::with_auth(AuthConfig {
            method: AuthMethod::None,
            api_key: None,
        })
        .await
    }

    /// Fixture requiring `key` on mutating routes.
    pub async fn with_api_key(key: &str) -> Self {
        Self::with_auth(AuthConfig {
            method: AuthMethod::ApiKey,
            api_key: Some(key.to_string()),
        })
        .await
    }

    async fn with_auth(auth: AuthConfig) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let authenticator = Arc::from(create_authenticator(&auth).expect("Bad auth config"));
        let config = Config {
            auth,
            server: ServerConfig::default(),
            database: DatabaseConfig {
                path: db_path.clone(),
            },
        };

        let audit_store: Arc<dyn AuditStore> =
            Arc::new(SqliteAuditStore::new(&db_path).expect("Failed to create audit store"));
        let ticket_store =
            Arc::new(SqliteTicketStore::new(&db_path).expect("Failed to create ticket store"));

        let (audit_handle, audit_writer) = create_audit_system(Arc::clone(&audit_store), 100);
        tokio::spawn(audit_writer.run());

        let state = Arc::new(AppState::new(
            config,
            authenticator,
            audit_handle,
            audit_store,
            ticket_store,
        ));

        Self {
            router: create_router(state),
            temp_dir,
        }
    }

    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None, &[]).await
    }

    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body), &[]).await
    }

    /// POST without a body (delete confirmation).
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None, &[]).await
    }

    pub async fn post_with_headers(
        &self,
        path: &str,
        body: Value,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        self.request("POST", path, Some(body), headers).await
    }

    /// Create a ticket and return the stored ticket JSON.
    pub async fn create_ticket(&self, body: Value) -> Value {
        let response = self.post("/api/v1/tickets", body).await;
        assert_eq!(
            response.status,
            StatusCode::CREATED,
            "create failed: {}",
            response.body
        );
        response.body["ticket"].clone()
    }

    /// Poll the audit log until at least `min` events match `query`.
    pub async fn wait_for_audit(&self, query: &str, min: u64) -> Value {
        let path = format!("/api/v1/audit?{}", query);
        for _ in 0..50 {
            let response = self.get(&path).await;
            if response.body["total"].as_u64().unwrap_or(0) >= min {
                return response.body;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("audit log never reached {} events for '{}'", min, query);
    }

    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);
        for (name, value) in headers {
            request_builder = request_builder.header(*name, *value);
        }

        let body = match body {
            Some(json_body) => {
                request_builder = request_builder.header("Content-Type", "application/json");
                Body::from(serde_json::to_vec(&json_body).unwrap())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(request_builder.body(body).unwrap())
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body_bytes).into()))
        };

        TestResponse { status, body }
    }
}

/// A valid create payload.
pub fn ticket_body(title: &str, priority: &str, status: &str) -> Value {
    json!({
        "title": title,
        "description": format!("{} details", title),
        "priority": priority,
        "status": status,
        "email": "reporter@example.com"
    })
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {{
        let response = &$response;
        assert_eq!(
            response.status,
            $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            response.status,
            serde_json::to_string_pretty(&response.body).unwrap_or_default()
        );
    }};
}
