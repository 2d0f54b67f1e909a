use anyhow::Result;
use chat_core::{load_config, RetryPolicy};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::Level;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    #[serde(
        serialize_with = "from_level",
        deserialize_with = "into_level",
        default = "info_level"
    )]
    pub log_level: Level,
    #[serde(default = "RetryPolicy::subscribe")]
    pub subscribe: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub pk: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub redis_url: String,
}

fn info_level() -> Level {
    Level::INFO
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

impl AppConfig {
    pub fn load() -> Result<Self> {
        load_config("NOTIFY_CONFIG", "notify.yaml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_config_should_work() {
        let cfg = AppConfig::load().unwrap();
        assert_eq!(cfg.server.port, 6687);
        assert_eq!(cfg.subscribe, RetryPolicy::subscribe());
    }
}
