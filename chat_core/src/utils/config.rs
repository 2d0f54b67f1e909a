use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use std::env;
use std::fs::File;

/// Load a yaml config from `./{filename}`, `/etc/config/{filename}`, or the path in `env_name`.
pub fn load_config<T: DeserializeOwned>(env_name: &str, filename: &str) -> Result<T> {
    let (source, reader) = match (
        File::open(filename),
        File::open(format!("/etc/config/{filename}")),
        env::var(env_name),
    ) {
        (Ok(reader), _, _) => (filename.to_string(), reader),
        (_, Ok(reader), _) => (format!("/etc/config/{filename}"), reader),
        (_, _, Ok(path)) => {
            let reader = File::open(&path).with_context(|| format!("open config {path}"))?;
            (path, reader)
        }
        _ => bail!("Config file not found: {filename} (or ${env_name})"),
    };
    serde_yaml::from_reader(reader).with_context(|| format!("parse config {source}"))
}
