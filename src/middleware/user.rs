use crate::error::PaymentError;
use axum::{extract::Request, middleware::Next, response::Response};
use uuid::Uuid;

pub const USER_HEADER: &str = "X-User-Id";

/// Authenticated caller, placed in request extensions by [`require_user`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserId(pub Uuid);

pub async fn require_user(mut request: Request, next: Next) -> Result<Response, PaymentError> {
    let user_id = request
        .headers()
        .get(USER_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|raw| Uuid::parse_str(raw.trim()).ok())
        .ok_or(PaymentError::Unauthorized)?;

    request.extensions_mut().insert(UserId(user_id));
    tracing::debug!("User extracted: {}", user_id);

    Ok(next.run(request).await)
}
