//! HTTP surface: the guard middleware plus a stub dispatcher standing in for
//! the protected API. Every request under the configured mount prefix goes
//! through the decision engine before it reaches a handler; everything else
//! passes through untouched.

use crate::errors::PalisadeError;
use crate::guard::{
    AuthError, DecisionEngine, NoOverrides, OverrideProvider, RequestDescriptor, TokenConfig,
    UserIdentity, Verdict,
};
use crate::settings::Settings;
use crate::storage::{self, DbIdentityResolver};
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use miette::IntoDiagnostic;
use sea_orm::DatabaseConnection;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub const DEFAULT_UNAUTHORIZED_MESSAGE: &str = "Sorry, you are not allowed to access this page.";

/// Request extension marking an authenticated caller. Set by the gate when a
/// token promotes the caller; a surrounding session layer may also insert it,
/// in which case the gate waves the request straight through.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser(pub UserIdentity);

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub db: DatabaseConnection,
    pub overrides: Arc<dyn OverrideProvider>,
}

impl AppState {
    pub fn new(settings: Settings, db: DatabaseConnection) -> Self {
        Self {
            settings: Arc::new(settings),
            db,
            overrides: Arc::new(NoOverrides),
        }
    }

    /// Replace the override provider; embedders hang their hooks here.
    pub fn with_overrides(mut self, overrides: Arc<dyn OverrideProvider>) -> Self {
        self.overrides = overrides;
        self
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .fallback(dispatch)
        .layer(middleware::from_fn_with_state(state.clone(), guard_gate))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(settings: Settings, db: DatabaseConnection) -> miette::Result<()> {
    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .into_diagnostic()?;
    let router = app(AppState::new(settings, db));

    tracing::info!("palisade gate listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await.into_diagnostic()?;
    axum::serve(listener, router).await.into_diagnostic()?;
    Ok(())
}

async fn healthz() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// The gate itself. Builds the request descriptor, rebuilds the policy
/// snapshot (overrides may be request-dependent, and settings edits take
/// effect immediately), and turns the verdict into either a pass-through or a
/// 401.
async fn guard_gate(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let Some(route) = api_route(&state.settings.api.prefix, request.uri().path()) else {
        // Not an API request.
        return next.run(request).await;
    };

    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(String::from);

    let descriptor = RequestDescriptor::new(request.method().clone(), route)
        .with_namespaces(state.settings.api.namespaces.iter().cloned())
        .with_authorization(authorization);

    let caller_is_authenticated = request.extensions().get::<AuthenticatedUser>().is_some();

    let config = match storage::load_policy_config(&state.db).await {
        Ok(config) => config,
        Err(error) => return internal_error(error),
    };
    let secret = match storage::get_or_create_jwt_secret(&state.db).await {
        Ok(secret) => secret,
        Err(error) => return internal_error(error),
    };

    let token_config = TokenConfig {
        issuer: state.settings.jwt_issuer(),
        audience: state.settings.jwt.audience.clone(),
        secret,
    };
    let resolver = DbIdentityResolver::new(state.db.clone());
    let engine = DecisionEngine::new(
        state.overrides.as_ref(),
        &resolver,
        token_config,
        state.settings.api.prefix.clone(),
    );

    match engine
        .decide(&descriptor, &config, caller_is_authenticated)
        .await
    {
        Verdict::Allow(promoted) => {
            if let Some(user) = promoted {
                tracing::debug!(user = %user.login, route = %descriptor.route, "caller promoted by token");
                request.extensions_mut().insert(AuthenticatedUser(user));
            }
            next.run(request).await
        }
        Verdict::Deny(reason) => {
            tracing::debug!(route = %descriptor.route, %reason, "anonymous request denied");
            unauthorized(state.overrides.as_ref())
        }
        Verdict::Error(error) => {
            tracing::debug!(route = %descriptor.route, %error, "token authentication failed");
            invalid_token(state.overrides.as_ref(), &error)
        }
    }
}

/// Stand-in for the protected API: just enough surface to drive the gate end
/// to end. The index lists the registered namespaces; every other route
/// echoes what the dispatcher would have seen.
async fn dispatch(State(state): State<AppState>, request: Request) -> Response {
    let Some(route) = api_route(&state.settings.api.prefix, request.uri().path()) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "code": "not_found", "message": "route not found" })),
        )
            .into_response();
    };

    if route == "/" {
        return Json(json!({ "namespaces": state.settings.api.namespaces })).into_response();
    }

    let user = request
        .extensions()
        .get::<AuthenticatedUser>()
        .map(|authenticated| authenticated.0.login.clone());

    Json(json!({
        "route": route,
        "method": request.method().as_str(),
        "authenticated": user.is_some(),
        "user": user,
    }))
    .into_response()
}

/// Map a full request path to the API route below the mount prefix. `None`
/// for paths outside the API.
fn api_route(prefix: &str, path: &str) -> Option<String> {
    let rest = path.strip_prefix(prefix)?;
    if !rest.is_empty() && !rest.starts_with('/') {
        // e.g. /wp-jsonx: shares the prefix string but not the mount.
        return None;
    }
    Some(if rest.is_empty() {
        "/".to_string()
    } else {
        rest.to_string()
    })
}

fn unauthorized(overrides: &dyn OverrideProvider) -> Response {
    let message = overrides
        .unauthorized_message()
        .unwrap_or_else(|| DEFAULT_UNAUTHORIZED_MESSAGE.to_string());
    error_response("unauthorized", message)
}

fn invalid_token(overrides: &dyn OverrideProvider, error: &AuthError) -> Response {
    // The default message embeds the failure detail; these are protocol-level
    // validation failures, safe to expose.
    let message = overrides
        .invalid_jwt_message()
        .unwrap_or_else(|| error.to_string());
    error_response("invalid_token", message)
}

fn error_response(code: &str, message: String) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "code": code,
            "message": message,
            "data": { "status": 401 },
        })),
    )
        .into_response()
}

fn internal_error(error: PalisadeError) -> Response {
    tracing::error!(%error, "guard evaluation failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "code": "internal_error", "message": "internal error" })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_route_mapping() {
        assert_eq!(api_route("/wp-json", "/wp-json"), Some("/".to_string()));
        assert_eq!(api_route("/wp-json", "/wp-json/"), Some("/".to_string()));
        assert_eq!(
            api_route("/wp-json", "/wp-json/wp/v2/posts"),
            Some("/wp/v2/posts".to_string())
        );
        assert_eq!(api_route("/wp-json", "/healthz"), None);
        assert_eq!(api_route("/wp-json", "/wp-jsonx/oops"), None);
    }
}
