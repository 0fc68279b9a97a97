use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};

use crate::auth::AppState;
use crate::error::ApiError;

/// Resolve the bearer token with the shared validator and stash the
/// resulting `Identity` in request extensions.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let bearer = req
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .ok_or(ApiError::Unauthorized)?;

    let identity = state.validator.validate(bearer.token())?;

    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
