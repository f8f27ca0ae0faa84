//! La Tanda Auth Server
//!
//! HTTP server exposing the token and gate machinery behind a small set of
//! demonstration routes.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    http::request::Parts,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lt_auth::roles::permission;
use lt_auth::{AuthState, GateChain, GateError, GateLayer, PermissionGate};
use lt_core::{AppConfig, ConfigError};

mod health;
mod routes;

/// Shared state handed to every handler
#[derive(Debug, Clone)]
pub struct AppState {
    pub auth: AuthState,
    pub config: AppConfig,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: AppConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            auth: AuthState::from_settings(&config.auth)?,
            config,
            started_at: Instant::now(),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging
    init_tracing();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        host = %config.server.host,
        port = config.server.port,
        issuer = %config.auth.issuer,
        "Starting La Tanda auth server"
    );

    let state = Arc::new(AppState::new(config)?);
    let app = build_router(state.clone())?;

    // Start server
    let addr = state.config.server_addr();
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "info,lt_server=debug,lt_auth=debug,tower_http=debug".into()
            }),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();
}

/// Admin rejections are logged with the path before being returned
fn log_admin_rejection(parts: &Parts, err: GateError) -> Response {
    warn!(path = %parts.uri.path(), code = %err.code, "Admin route rejected");
    err.into_response()
}

/// Build the application router
fn build_router(state: Arc<AppState>) -> Result<Router, ConfigError> {
    let auth = &state.auth;

    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness));

    let auth_routes = Router::new()
        .route("/auth/refresh", post(routes::refresh_token))
        .route("/auth/status", get(routes::token_status));

    let api_routes = Router::new()
        .route(
            "/api/me",
            get(routes::current_user).route_layer(GateLayer::new(auth.require_auth())),
        )
        .route(
            "/api/groups",
            get(routes::list_groups).route_layer(GateLayer::new(auth.optional_auth())),
        )
        .route(
            "/api/admin/config",
            get(routes::admin_config).route_layer(
                GateLayer::new(
                    GateChain::new()
                        .then(auth.require_auth())
                        .then(auth.role_gate("IT")?),
                )
                .with_failure_handler(log_admin_rejection),
            ),
        )
        .route(
            "/api/reports",
            get(routes::reports).route_layer(GateLayer::new(
                GateChain::new()
                    .then(auth.require_auth())
                    .then(PermissionGate::any([permission::VIEW_REPORTS])),
            )),
        )
        .route(
            "/api/users/:id/profile",
            get(routes::user_profile).route_layer(GateLayer::new(
                GateChain::new()
                    .then(auth.require_auth())
                    .then(routes::profile_owner_gate()),
            )),
        );

    Ok(Router::new()
        .merge(health_routes)
        .merge(auth_routes)
        .merge(api_routes)
        .with_state(state.clone())
        .layer(
            ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        ))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use lt_auth::{Identity, Role};
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        let mut config = AppConfig::default();
        config.auth.jwt_secret = "server-test-secret-with-enough-bytes".to_string();
        Arc::new(AppState::new(config).unwrap())
    }

    fn test_app(state: &Arc<AppState>) -> Router {
        build_router(state.clone()).unwrap()
    }

    fn token_for(state: &AppState, subject_id: &str, role: Role) -> String {
        let identity =
            Identity::new(subject_id, format!("{subject_id}@latanda.online")).with_role(role);
        state.auth.codec.issue(&identity).unwrap()
    }

    async fn get_with_token(app: Router, uri: &str, token: Option<&str>) -> Response {
        let mut request = Request::builder().uri(uri);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        app.oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let state = test_state();
        let response = get_with_token(test_app(&state), "/health", None).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["components"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_me_requires_token() {
        let state = test_state();
        let response = get_with_token(test_app(&state), "/api/me", None).await;

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = json_body(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "NO_TOKEN");
    }

    #[tokio::test]
    async fn test_me_returns_resolved_user() {
        let state = test_state();
        let token = token_for(&state, "u1", Role::Mit);
        let response = get_with_token(test_app(&state), "/api/me", Some(&token)).await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["user"]["subject_id"], "u1");
        assert_eq!(body["user"]["role"], "MIT");
    }

    #[tokio::test]
    async fn test_groups_allow_anonymous() {
        let state = test_state();

        let body = json_body(get_with_token(test_app(&state), "/api/groups", None).await).await;
        assert_eq!(body["anonymous"], true);

        let body = json_body(
            get_with_token(test_app(&state), "/api/groups", Some("not-a-token")).await,
        )
        .await;
        assert_eq!(body["anonymous"], true);

        let token = token_for(&state, "u1", Role::User);
        let body =
            json_body(get_with_token(test_app(&state), "/api/groups", Some(&token)).await).await;
        assert_eq!(body["viewer"], "u1");
    }

    #[tokio::test]
    async fn test_admin_config_requires_it_role() {
        let state = test_state();

        let token = token_for(&state, "u1", Role::Mit);
        let response = get_with_token(test_app(&state), "/api/admin/config", Some(&token)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(json_body(response).await["error"]["code"], "INSUFFICIENT_ROLE");

        let token = token_for(&state, "u1", Role::It);
        let response = get_with_token(test_app(&state), "/api/admin/config", Some(&token)).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["issuer"], "latanda.online");
    }

    #[tokio::test]
    async fn test_reports_require_permission() {
        let state = test_state();

        let token = token_for(&state, "u1", Role::User);
        let response = get_with_token(test_app(&state), "/api/reports", Some(&token)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(json_body(response).await["error"]["code"], "FORBIDDEN");

        let token = token_for(&state, "u1", Role::Mit);
        let response = get_with_token(test_app(&state), "/api/reports", Some(&token)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_profile_ownership() {
        let state = test_state();

        let token = token_for(&state, "u1", Role::User);
        let response =
            get_with_token(test_app(&state), "/api/users/u1/profile", Some(&token)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response =
            get_with_token(test_app(&state), "/api/users/u2/profile", Some(&token)).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(json_body(response).await["error"]["code"], "NOT_OWNER");

        let admin = token_for(&state, "root", Role::Admin);
        let response =
            get_with_token(test_app(&state), "/api/users/u2/profile", Some(&admin)).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_refresh_endpoint() {
        let state = test_state();
        let token = token_for(&state, "u1", Role::User);

        let response = test_app(&state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/auth/refresh")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(serde_json::json!({ "token": token }).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        let refreshed = body["token"].as_str().unwrap();
        assert!(state.auth.codec.verify(refreshed).is_valid());
    }

    #[tokio::test]
    async fn test_refresh_rejects_garbage() {
        let state = test_state();

        let response = test_app(&state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/auth/refresh")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"token":"a.b.c"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error"]["code"], "INVALID_TOKEN");
    }

    #[tokio::test]
    async fn test_token_status() {
        let state = test_state();
        let token = token_for(&state, "u1", Role::User);

        let body =
            json_body(get_with_token(test_app(&state), "/auth/status", Some(&token)).await).await;
        assert_eq!(body["expiring_soon"], false);

        let response = get_with_token(test_app(&state), "/auth/status", None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_token_status_with_extreme_expiry() {
        use base64::engine::general_purpose::URL_SAFE_NO_PAD;
        use base64::Engine;

        let state = test_state();
        let token = format!(
            "{}.{}.signature",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#),
            URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{}}}"#, i64::MIN))
        );

        let response = get_with_token(test_app(&state), "/auth/status", Some(&token)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["expiring_soon"], true);
        assert!(body["expires_at"].is_null());
    }
}
