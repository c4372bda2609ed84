use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use officeflow_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

/// `(key, env var)` for every setting the command reports, in print order.
const KEYS: &[(&str, &str)] = &[
    ("database.dsn", "OFFICEFLOW_DATABASE_DSN"),
    ("database.max_connections", "OFFICEFLOW_DATABASE_MAX_CONNECTIONS"),
    ("database.timeout_secs", "OFFICEFLOW_DATABASE_TIMEOUT_SECS"),
    ("server.bind", "OFFICEFLOW_SERVER_BIND"),
    ("server.mode", "OFFICEFLOW_SERVER_MODE"),
    ("server.request_timeout_secs", "OFFICEFLOW_SERVER_REQUEST_TIMEOUT_SECS"),
    ("server.graceful_shutdown_secs", "OFFICEFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS"),
    ("jwt.secret", "OFFICEFLOW_JWT_SECRET"),
    ("jwt.expire_seconds", "OFFICEFLOW_JWT_EXPIRE_SECONDS"),
    ("approval.cache_ttl_seconds", "OFFICEFLOW_APPROVAL_CACHE_TTL_SECONDS"),
    ("logging.level", "OFFICEFLOW_LOGGING_LEVEL"),
    ("logging.format", "OFFICEFLOW_LOGGING_FORMAT"),
];

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, env_key) in KEYS {
        let value = effective_value(&config, key);
        let source =
            field_source(key, env_key, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(render_line(key, &value, source));
    }

    lines.join("\n")
}

fn effective_value(config: &AppConfig, key: &str) -> String {
    match key {
        "database.dsn" => config.database.dsn.clone(),
        "database.max_connections" => config.database.max_connections.to_string(),
        "database.timeout_secs" => config.database.timeout_secs.to_string(),
        "server.bind" => config.server.bind.clone(),
        "server.mode" => config.server.mode.as_str().to_string(),
        "server.request_timeout_secs" => config.server.request_timeout_secs.to_string(),
        "server.graceful_shutdown_secs" => config.server.graceful_shutdown_secs.to_string(),
        "jwt.secret" => redact_secret(config.jwt.secret.expose_secret()),
        "jwt.expire_seconds" => config.jwt.expire_seconds.to_string(),
        "approval.cache_ttl_seconds" => match config.approval.cache_ttl_seconds {
            0 => "0 (cache disabled)".to_string(),
            ttl => ttl.to_string(),
        },
        "logging.level" => config.log_level().to_string(),
        "logging.format" => config.log_format().as_str().to_string(),
        _ => "<unknown>".to_string(),
    }
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("officeflow.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/officeflow.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
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

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: &str) -> String {
    if secret.trim().is_empty() {
        "<empty>".to_string()
    } else {
        format!("<redacted, {} bytes>", secret.len())
    }
}
