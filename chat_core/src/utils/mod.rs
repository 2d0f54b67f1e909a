mod config;
mod jwt;

pub use config::load_config;
pub use jwt::{DecodingKey, EncodingKey};
