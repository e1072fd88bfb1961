use std::env;
use std::fs;
use std::path::Path;

use clearway_core::config::{resolve_config_path, LoadOptions};
use serde::Serialize;
use toml::Value;

use crate::commands::{load_config, CommandResult};

#[derive(Debug, Serialize)]
struct ConfigEntry {
    key: &'static str,
    value: String,
    source: String,
}

/// Effective configuration with where each value came from (env > file > default).
pub fn run(options: LoadOptions) -> CommandResult {
    let config_file_path = resolve_config_path(options.config_path.as_deref());
    let config = match load_config("config", options) {
        Ok(config) => config,
        Err(result) => return result,
    };

    let config_file_doc = load_config_file_doc(config_file_path.as_deref());
    let entry = |key: &'static str, value: String, env_keys: &[&str]| ConfigEntry {
        key,
        value,
        source: field_source(key, env_keys, config_file_doc.as_ref(), config_file_path.as_deref()),
    };

    let entries = vec![
        entry("database.url", config.database.url.clone(), &["CLEARWAY_DATABASE_URL"]),
        entry(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["CLEARWAY_DATABASE_MAX_CONNECTIONS"],
        ),
        entry(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["CLEARWAY_DATABASE_TIMEOUT_SECS"],
        ),
        entry(
            "logging.level",
            config.logging.level.clone(),
            &["CLEARWAY_LOGGING_LEVEL", "CLEARWAY_LOG_LEVEL"],
        ),
        entry(
            "logging.format",
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
            &["CLEARWAY_LOGGING_FORMAT", "CLEARWAY_LOG_FORMAT"],
        ),
        entry(
            "sweep.interval_secs",
            config.sweep.interval_secs.to_string(),
            &["CLEARWAY_SWEEP_INTERVAL_SECS"],
        ),
    ];

    CommandResult::data("config", "config", entries)
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    let env_hit = env_keys
        .iter()
        .find(|key| env::var(key).is_ok_and(|value| !value.trim().is_empty()));
    if let Some(env_key) = env_hit {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::contains_path;

    #[test]
    fn contains_path_walks_nested_tables() {
        let doc = "[sweep]\ninterval_secs = 60\n".parse::<Value>().expect("parse toml");

        assert!(contains_path(&doc, "sweep.interval_secs"));
        assert!(!contains_path(&doc, "sweep.batch_size"));
        assert!(!contains_path(&doc, "database.url"));
    }
}
