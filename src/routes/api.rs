//! Generated API entry point

use crate::executor::RequestContext;
use crate::state::SharedState;
use axum::{
    extract::{Extension, Request, State},
    http::Uri,
    response::Response,
};
use tower::ServiceExt;

/// Hand the request to the handler of the caller's snapshot. The lookup
/// happens per request, so a freshly published snapshot serves the next
/// call while in-flight calls finish on the one they started with.
pub async fn dispatch(
    State(state): State<SharedState>,
    Extension(ctx): Extension<RequestContext>,
    mut request: Request,
) -> Response {
    let handler = state.manager.handler_for_context(&ctx);
    *request.uri_mut() = Uri::from_static("/");

    match handler.oneshot(request).await {
        Ok(response) => response,
        Err(never) => match never {},
    }
}

#[cfg(test)]
mod tests {
    use crate::auth::create_token;
    use crate::config::RoleConfig;
    use crate::routes::tests::{app, send, SECRET};
    use axum::body::to_bytes;
    use axum::http::StatusCode;
    use pretty_assertions::assert_eq;

    fn scoped() -> RoleConfig {
        RoleConfig {
            scoped_snapshots: true,
            roles: vec!["reader".to_string()],
            validate: true,
            role_security: true,
        }
    }

    #[tokio::test]
    async fn test_unscoped_api_serves_default_catalog() {
        let (app, _) = app(RoleConfig::default()).await;

        let response = send(&app, "GET", "/api", None, None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let names: Vec<&str> = json["catalog"]["types"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["Authors", "Books"]);
    }

    #[tokio::test]
    async fn test_scoped_api_fails_closed() {
        let (app, _) = app(scoped()).await;

        let response = send(&app, "GET", "/api", None, None).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let stranger = create_token(SECRET, "user-2", Some("writer"), false);
        let response = send(&app, "GET", "/api", Some(&stranger), None).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let reader = create_token(SECRET, "user-1", Some("reader"), false);
        let response = send(&app, "GET", "/api", Some(&reader), None).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_rows_come_from_role_snapshot() {
        let (app, log) = app(scoped()).await;
        let reader = create_token(SECRET, "user-1", Some("reader"), false);

        let response = send(&app, "POST", "/api", Some(&reader), Some(r#"{"type":"Books"}"#)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let statements = log.statements();
        let select = statements
            .iter()
            .position(|s| s.starts_with("SELECT row_to_json(r) FROM (SELECT \"id\", \"in_print\" FROM \"public\".\"books\""))
            .unwrap();
        assert_eq!(statements[select - 1], "SET ROLE \"reader\"");
        assert_eq!(statements[select + 1], "RESET ROLE");
    }
}
