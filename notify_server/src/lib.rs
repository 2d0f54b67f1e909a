mod config;
mod error;
mod gateway;
mod sse;

pub use crate::config::{AppConfig, AuthConfig, ServerConfig};
pub use crate::error::AppError;
pub use crate::gateway::{ClientEvent, NotificationGateway, CHAT_MESSAGE_EVENT};

use axum::middleware::from_fn_with_state;
use axum::{response::IntoResponse, routing::get, Router};
use chat_core::middlewares::{set_layer, verify_token, TokenVerify};
use chat_core::{DecodingKey, Principal, PubSubBroker, RedisPubSub, Transport};
use sse::sse_handler;
use std::ops::Deref;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState(Arc<AppStateInner>);

pub struct AppStateInner {
    pub config: AppConfig,
    pub gateway: NotificationGateway,
    dk: DecodingKey,
}

pub fn get_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/events", get(sse_handler))
        .layer(from_fn_with_state(state.clone(), verify_token::<AppState>))
        .route("/", get(index_handler))
        .with_state(state);

    set_layer(router)
}

async fn index_handler() -> impl IntoResponse {
    "notify"
}

impl TokenVerify for AppState {
    type Error = AppError;

    fn verify(&self, token: &str) -> Result<Principal, Self::Error> {
        Ok(self.dk.verify(token)?)
    }
}

impl Deref for AppState {
    type Target = AppStateInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AppState {
    /// Connect to the Redis broker named in the config.
    pub async fn try_new(config: AppConfig) -> Result<Self, AppError> {
        let pubsub = RedisPubSub::connect(&config.server.redis_url).await?;
        Self::with_transport(config, Arc::new(pubsub))
    }

    pub fn with_transport(config: AppConfig, transport: Arc<dyn Transport>) -> Result<Self, AppError> {
        let dk = DecodingKey::load(&config.auth.pk)?;
        let broker = PubSubBroker::new(transport).with_subscribe_policy(config.subscribe);
        let gateway = NotificationGateway::new(broker);
        Ok(Self(Arc::new(AppStateInner {
            config,
            gateway,
            dk,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use axum::{body::Body, extract::Request, http::StatusCode};
    use chat_core::{EncodingKey, MemoryPubSub};
    use tower::ServiceExt;

    fn state() -> Result<AppState> {
        let config = AppConfig::load()?;
        Ok(AppState::with_transport(config, Arc::new(MemoryPubSub::new()))?)
    }

    #[tokio::test]
    async fn events_should_require_a_token() -> Result<()> {
        let app = get_router(state()?);
        let req = Request::builder().uri("/events").body(Body::empty())?;
        let res = app.oneshot(req).await?;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn events_should_open_an_event_stream() -> Result<()> {
        let state = state()?;
        let ek = EncodingKey::load(include_str!("../../chat_core/fixtures/encoding.pem"))?;
        let token = ek.sign(Principal::new("u2", "bob"))?;

        let app = get_router(state.clone());
        let req = Request::builder()
            .uri(format!("/events?token={token}"))
            .body(Body::empty())?;
        let res = app.oneshot(req).await?;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()["content-type"], "text/event-stream");
        assert_eq!(state.gateway.open_streams(), 1);

        drop(res);
        assert_eq!(state.gateway.open_streams(), 0);
        Ok(())
    }
}
