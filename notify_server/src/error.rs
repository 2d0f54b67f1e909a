use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("jwt error: {0}")]
    JwtError(#[from] anyhow::Error),

    #[error("pubsub error: {0}")]
    PubSubError(#[from] chat_core::PubSubError),
}
