use anyhow::Result;
use chat_core::{load_config, RetryPolicy};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;
use tracing::Level;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    #[serde(
        serialize_with = "from_level",
        deserialize_with = "into_level",
        default = "debug_level"
    )]
    pub log_level: Level,
    #[serde(default = "RetryPolicy::publish")]
    pub publish: RetryPolicy,
    #[serde(default)]
    pub cache: CacheConfig,
}

fn debug_level() -> Level {
    Level::DEBUG
}

fn from_level<S>(v: &Level, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(v.as_str())
}

fn into_level<'de, D>(deserializer: D) -> Result<Level, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    String::deserialize(deserializer)
        .and_then(|s| s.parse::<Level>().map_err(|e| Error::custom(e.to_string())))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub db_url: String,
    pub redis_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub sk: String,
    pub pk: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub image_ttl_secs: u64,
    pub room_list_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            image_ttl_secs: 60 * 60,
            room_list_ttl_secs: 60,
        }
    }
}

impl CacheConfig {
    pub fn image_ttl(&self) -> Duration {
        Duration::from_secs(self.image_ttl_secs)
    }

    pub fn room_list_ttl(&self) -> Duration {
        Duration::from_secs(self.room_list_ttl_secs)
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        load_config("CHAT_CONFIG", "app.yaml")
    }
}
