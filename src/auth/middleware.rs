//! Authentication middleware
//!
//! Turns the bearer token, if any, into a [`RequestContext`] stored in the
//! request extensions. A request without a token continues
//! unauthenticated; a token that does not verify is rejected.

use crate::auth::decode_token;
use crate::error::AppError;
use crate::executor::RequestContext;
use crate::state::SharedState;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};

/// Attach the caller's context to the request
pub async fn auth_middleware(
    State(state): State<SharedState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let bearer = request
        .headers()
        .typed_try_get::<Authorization<Bearer>>()
        .map_err(|_| AppError::Unauthorized("Invalid authorization format".to_string()))?;

    let ctx = match bearer {
        Some(Authorization(bearer)) => decode_token(bearer.token(), &state.jwt_secret)?.into_context(),
        None => RequestContext::default(),
    };

    // Insert context into request extensions for handlers to use
    request.extensions_mut().insert(ctx);

    Ok(next.run(request).await)
}

/// Require the admin claim
pub fn require_admin(ctx: &RequestContext) -> Result<(), AppError> {
    if !ctx.authenticated {
        return Err(AppError::Unauthorized("Missing authorization header".to_string()));
    }
    if !ctx.admin {
        return Err(AppError::Forbidden("admin claim required".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_admin() {
        assert!(matches!(
            require_admin(&RequestContext::default()),
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            require_admin(&RequestContext::with_role("analyst")),
            Err(AppError::Forbidden(_))
        ));

        let admin = RequestContext {
            authenticated: true,
            admin: true,
            ..RequestContext::default()
        };
        assert!(require_admin(&admin).is_ok());
    }
}
