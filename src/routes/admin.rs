//! Schema lifecycle administration

use crate::auth::require_admin;
use crate::error::{validation_error, ApiResult};
use crate::executor::RequestContext;
use crate::snapshot::{ManagerState, SnapshotSummary};
use crate::state::SharedState;
use axum::{
    extract::{Extension, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;
use validator::Validate;

/// Applied when the request sets no timeout
const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(60);

// ==================== Request/Response Types ====================

#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    /// Abandon the rebuild after this many milliseconds
    #[validate(range(min = 1, max = 300000))]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaStatusResponse {
    pub success: bool,
    pub state: ManagerState,
    pub snapshot: SnapshotSummary,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub success: bool,
    pub message: String,
    pub snapshot: SnapshotSummary,
}

// ==================== Handlers ====================

/// GET /admin/schema
pub async fn schema_status(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
) -> ApiResult<Json<SchemaStatusResponse>> {
    require_admin(&ctx)?;

    Ok(Json(SchemaStatusResponse {
        success: true,
        state: state.manager.state(),
        snapshot: state.manager.current_set().summary(),
    }))
}

/// POST /admin/schema/refresh
pub async fn refresh_schema(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    Json(payload): Json<RefreshRequest>,
) -> ApiResult<Json<RefreshResponse>> {
    require_admin(&ctx)?;
    payload
        .validate()
        .map_err(|e| validation_error(e.to_string()))?;

    let deadline = payload
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(DEFAULT_REFRESH_TIMEOUT);

    info!(subject = ?ctx.subject, "Manual schema refresh requested");
    let set = state
        .manager
        .refresh_now_with(&state.shutdown.child_token(), Some(deadline))
        .await?;

    Ok(Json(RefreshResponse {
        success: true,
        message: format!("Schema refreshed (version {})", set.version),
        snapshot: set.summary(),
    }))
}

#[cfg(test)]
mod tests {
    use crate::auth::create_token;
    use crate::config::RoleConfig;
    use crate::routes::tests::{app, app_with_shutdown, send, SECRET};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use axum::body::to_bytes;
    use axum::http::StatusCode;
    use pretty_assertions::assert_eq;

    async fn json_of(response: axum::response::Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_status_requires_admin() {
        let (app, _) = app(RoleConfig::default()).await;

        let response = send(&app, "GET", "/admin/schema", None, None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let user = create_token(SECRET, "user-1", None, false);
        let response = send(&app, "GET", "/admin/schema", Some(&user), None).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let admin = create_token(SECRET, "ops", None, true);
        let response = send(&app, "GET", "/admin/schema", Some(&admin), None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let json = json_of(response).await;
        assert_eq!(json["state"], "published");
        assert_eq!(json["snapshot"]["version"], 1);
        assert_eq!(json["snapshot"]["mode"], "structural");
    }

    #[tokio::test]
    async fn test_manual_refresh_publishes_new_version() {
        let (app, _) = app(RoleConfig::default()).await;
        let admin = create_token(SECRET, "ops", None, true);

        let response = send(
            &app,
            "POST",
            "/admin/schema/refresh",
            Some(&admin),
            Some(r#"{"timeoutMs":5000}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_of(response).await["snapshot"]["version"], 2);
    }

    #[tokio::test]
    async fn test_refresh_timeout_is_validated() {
        let (app, _) = app(RoleConfig::default()).await;
        let admin = create_token(SECRET, "ops", None, true);

        let response = send(
            &app,
            "POST",
            "/admin/schema/refresh",
            Some(&admin),
            Some(r#"{"timeoutMs":0}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_old_version() {
        let (app, log) = app(RoleConfig::default()).await;
        let admin = create_token(SECRET, "ops", None, true);
        log.fail_on("/* introspect:tables */");

        let response = send(&app, "POST", "/admin/schema/refresh", Some(&admin), Some("{}")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = send(&app, "GET", "/admin/schema", Some(&admin), None).await;
        assert_eq!(json_of(response).await["snapshot"]["version"], 1);
    }

    #[tokio::test]
    async fn test_refresh_past_deadline_times_out() {
        let (app, log) = app(RoleConfig::default()).await;
        let admin = create_token(SECRET, "ops", None, true);
        log.delay_on("introspect:tables", Duration::from_millis(500));

        let response = send(
            &app,
            "POST",
            "/admin/schema/refresh",
            Some(&admin),
            Some(r#"{"timeoutMs":20}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

        let response = send(&app, "GET", "/admin/schema", Some(&admin), None).await;
        let json = json_of(response).await;
        assert_eq!(json["snapshot"]["version"], 1);
        assert_eq!(json["state"], "published");
    }

    #[tokio::test]
    async fn test_refresh_during_shutdown_is_cancelled() {
        let shutdown = CancellationToken::new();
        let (app, _) = app_with_shutdown(RoleConfig::default(), shutdown.clone()).await;
        let admin = create_token(SECRET, "ops", None, true);
        shutdown.cancel();

        let response = send(&app, "POST", "/admin/schema/refresh", Some(&admin), Some("{}")).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let response = send(&app, "GET", "/admin/schema", Some(&admin), None).await;
        assert_eq!(json_of(response).await["snapshot"]["version"], 1);
    }
}
