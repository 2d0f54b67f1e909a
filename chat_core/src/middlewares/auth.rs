use super::TokenVerify;
use axum::{
    extract::{FromRequestParts, Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use serde::Deserialize;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: String,
}

/// Reads the token from `Authorization: Bearer` or, for EventSource clients,
/// from `?token=`, and stores the verified principal as a request extension.
pub async fn verify_token<T>(State(state): State<T>, req: Request, next: Next) -> Response
where
    T: TokenVerify + Clone + Send + Sync + 'static,
{
    let (mut parts, body) = req.into_parts();
    let token =
        match TypedHeader::<Authorization<Bearer>>::from_request_parts(&mut parts, &state).await {
            Ok(TypedHeader(Authorization(bearer))) => Some(bearer.token().to_string()),
            Err(_) => Query::<TokenQuery>::from_request_parts(&mut parts, &state)
                .await
                .ok()
                .map(|Query(q)| q.token),
        };

    let Some(token) = token else {
        let msg = "missing bearer token";
        warn!(uri = %parts.uri, "{}", msg);
        return (StatusCode::UNAUTHORIZED, msg).into_response();
    };

    let principal = match state.verify(&token) {
        Ok(principal) => principal,
        Err(e) => {
            let msg = format!("verify token failed: {:?}", e);
            warn!(uri = %parts.uri, "{}", msg);
            return (StatusCode::FORBIDDEN, msg).into_response();
        }
    };

    let mut req = Request::from_parts(parts, body);
    req.extensions_mut().insert(principal);
    next.run(req).await
}
