//! Authentication and metrics middleware.

use axum::{
    body::Body,
    extract::{ConnectInfo, FromRequestParts, MatchedPath, State},
    http::{request::Parts, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use helpdesk_core::{AuthError, AuthRequest, Identity};

use crate::metrics::{
    route_label, AUTH_FAILURES_TOTAL, HTTP_REQUESTS_IN_FLIGHT, HTTP_REQUESTS_TOTAL,
    HTTP_REQUEST_DURATION,
};
use crate::state::AppState;

/// Record duration, count and in-flight gauge for every request.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let path = route_label(request.extensions().get::<MatchedPath>()).to_string();

    HTTP_REQUESTS_IN_FLIGHT.inc();
    let response = next.run(request).await;
    HTTP_REQUESTS_IN_FLIGHT.dec();

    let status = response.status().as_u16().to_string();
    let labels = [method.as_str(), path.as_str(), status.as_str()];
    HTTP_REQUEST_DURATION
        .with_label_values(&labels)
        .observe(start.elapsed().as_secs_f64());
    HTTP_REQUESTS_TOTAL.with_label_values(&labels).inc();

    response
}

/// Resolve the caller with the configured authenticator and store the
/// resulting [`Identity`] in the request extensions. Rejects with 401.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let authenticator = state.authenticator();

    if authenticator.method_name() == "none" {
        request.extensions_mut().insert(Identity::anonymous());
        return Ok(next.run(request).await);
    }

    let headers: HashMap<String, String> = request
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect();

    let source_ip = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST));

    let auth_request = AuthRequest { headers, source_ip };

    match authenticator.authenticate(&auth_request).await {
        Ok(identity) => {
            request.extensions_mut().insert(identity);
            Ok(next.run(request).await)
        }
        Err(e) => {
            let (reason, status) = match e {
                AuthError::NotAuthenticated => ("not_authenticated", StatusCode::UNAUTHORIZED),
                AuthError::InvalidCredentials(_) => {
                    ("invalid_credentials", StatusCode::UNAUTHORIZED)
                }
                AuthError::ConfigurationError(_) => {
                    ("internal_error", StatusCode::INTERNAL_SERVER_ERROR)
                }
            };
            tracing::debug!(%source_ip, reason, "Request rejected by authenticator");
            AUTH_FAILURES_TOTAL.with_label_values(&[reason]).inc();
            Err(status)
        }
    }
}

/// The authenticated user id, or "anonymous" on routes without auth.
#[derive(Debug, Clone)]
pub struct AuthUser(pub String);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .extensions
            .get::<Identity>()
            .map(|identity| identity.user_id.clone())
            .unwrap_or_else(|| Identity::anonymous().user_id);
        Ok(AuthUser(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        http::header,
        middleware,
        routing::get,
        Router,
    };
    use helpdesk_core::{
        config::{AuthConfig, AuthMethod, DatabaseConfig, ServerConfig},
        create_audit_system, create_authenticator, AuditStore, Config, SqliteAuditStore,
        SqliteTicketStore, TicketStore,
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn user_handler(AuthUser(user_id): AuthUser) -> String {
        user_id
    }

    fn test_app(method: AuthMethod, api_key: Option<&str>) -> Router {
        let auth = AuthConfig {
            method,
            api_key: api_key.map(String::from),
        };
        let authenticator = Arc::from(create_authenticator(&auth).unwrap());
        let audit_store: Arc<dyn AuditStore> = Arc::new(SqliteAuditStore::in_memory().unwrap());
        let (audit, _writer) = create_audit_system(Arc::clone(&audit_store), 16);
        let ticket_store: Arc<dyn TicketStore> = Arc::new(SqliteTicketStore::in_memory().unwrap());

        let config = Config {
            auth,
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
        };
        let state = Arc::new(AppState::new(
            config,
            authenticator,
            audit,
            audit_store,
            ticket_store,
        ));

        Router::new()
            .route("/whoami", get(user_handler))
            .layer(middleware::from_fn_with_state(state.clone(), auth_middleware))
            .with_state(state)
    }

    async fn call(app: Router, headers: &[(&str, &str)]) -> (StatusCode, String) {
        let mut builder = Request::builder().uri("/whoami");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let response = app
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_none_auth_is_anonymous() {
        let (status, user) = call(test_app(AuthMethod::None, None), &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(user, "anonymous");
    }

    #[tokio::test]
    async fn test_api_key_bearer() {
        let app = test_app(AuthMethod::ApiKey, Some("secret-key"));
        let (status, user) = call(app, &[(header::AUTHORIZATION.as_str(), "Bearer secret-key")]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(user, "api_key_user");
    }

    #[tokio::test]
    async fn test_api_key_header() {
        let app = test_app(AuthMethod::ApiKey, Some("secret-key"));
        let (status, _) = call(app, &[("X-API-Key", "secret-key")]).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_key_wrong() {
        let app = test_app(AuthMethod::ApiKey, Some("secret-key"));
        let (status, _) = call(app, &[(header::AUTHORIZATION.as_str(), "Bearer nope")]).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_api_key_missing() {
        let app = test_app(AuthMethod::ApiKey, Some("secret-key"));
        let (status, _) = call(app, &[]).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_auth_user_without_middleware() {
        let app: Router = Router::new().route("/whoami", get(user_handler));
        let (status, user) = call(app, &[]).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(user, "anonymous");
    }
}
