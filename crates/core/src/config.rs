use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MIN_JWT_SECRET_BYTES: usize = 16;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub jwt: JwtConfig,
    pub approval: ApprovalConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub dsn: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind: String,
    pub mode: ServerMode,
    pub request_timeout_secs: u64,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct JwtConfig {
    pub secret: SecretString,
    pub expire_seconds: u64,
}

#[derive(Clone, Debug)]
pub struct ApprovalConfig {
    pub cache_ttl_seconds: u64,
}

/// Unset fields fall back to the defaults of `server.mode`.
#[derive(Clone, Debug, Default)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub format: Option<LogFormat>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerMode {
    Debug,
    Release,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

/// Which backing store a DSN selects.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DsnKind {
    Sqlite,
    Memory,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_dsn: Option<String>,
    pub server_bind: Option<String>,
    pub server_mode: Option<ServerMode>,
    pub jwt_secret: Option<String>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                dsn: "sqlite://officeflow.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind: "127.0.0.1:8080".to_string(),
                mode: ServerMode::Release,
                request_timeout_secs: 10,
                graceful_shutdown_secs: 15,
            },
            jwt: JwtConfig { secret: String::new().into(), expire_seconds: 86_400 },
            approval: ApprovalConfig { cache_ttl_seconds: 0 },
            logging: LoggingConfig::default(),
        }
    }
}

impl std::str::FromStr for ServerMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "release" => Ok(Self::Release),
            other => Err(ConfigError::Validation(format!(
                "unsupported server mode `{other}` (expected debug|release)"
            ))),
        }
    }
}

impl ServerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Release => "release",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl LogFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compact => "compact",
            Self::Pretty => "pretty",
            Self::Json => "json",
        }
    }
}

impl DatabaseConfig {
    pub fn kind(&self) -> Option<DsnKind> {
        dsn_kind(&self.dsn)
    }
}

/// `sqlite:` URLs and `:memory:` select SQLite, `memory://` the in-process store.
pub fn dsn_kind(dsn: &str) -> Option<DsnKind> {
    let dsn = dsn.trim();
    if dsn.starts_with("memory://") {
        Some(DsnKind::Memory)
    } else if dsn.starts_with("sqlite:") || dsn == ":memory:" {
        Some(DsnKind::Sqlite)
    } else {
        None
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl ApprovalConfig {
    /// `None` disables the catalog cache.
    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.cache_ttl_seconds > 0).then(|| Duration::from_secs(self.cache_ttl_seconds))
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("officeflow.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Level after applying the mode default.
    pub fn log_level(&self) -> &str {
        match (&self.logging.level, self.server.mode) {
            (Some(level), _) => level.as_str(),
            (None, ServerMode::Debug) => "debug",
            (None, ServerMode::Release) => "info",
        }
    }

    /// Format after applying the mode default.
    pub fn log_format(&self) -> LogFormat {
        match (self.logging.format, self.server.mode) {
            (Some(format), _) => format,
            (None, ServerMode::Debug) => LogFormat::Pretty,
            (None, ServerMode::Release) => LogFormat::Compact,
        }
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(database) = patch.database {
            if let Some(dsn) = database.dsn {
                self.database.dsn = dsn;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind) = server.bind {
                self.server.bind = bind;
            }
            if let Some(mode) = server.mode {
                self.server.mode = mode.parse()?;
            }
            if let Some(request_timeout_secs) = server.request_timeout_secs {
                self.server.request_timeout_secs = request_timeout_secs;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(jwt) = patch.jwt {
            if let Some(secret) = jwt.secret {
                self.jwt.secret = secret.into();
            }
            if let Some(expire_seconds) = jwt.expire_seconds {
                self.jwt.expire_seconds = expire_seconds;
            }
        }

        if let Some(approval) = patch.approval {
            if let Some(cache_ttl_seconds) = approval.cache_ttl_seconds {
                self.approval.cache_ttl_seconds = cache_ttl_seconds;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = Some(level);
            }
            if let Some(format) = logging.format {
                self.logging.format = Some(format);
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("OFFICEFLOW_DATABASE_DSN") {
            self.database.dsn = value;
        }
        if let Some(value) = read_env("OFFICEFLOW_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("OFFICEFLOW_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("OFFICEFLOW_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("OFFICEFLOW_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("OFFICEFLOW_SERVER_BIND") {
            self.server.bind = value;
        }
        if let Some(value) = read_env("OFFICEFLOW_SERVER_MODE") {
            self.server.mode = value.parse()?;
        }
        if let Some(value) = read_env("OFFICEFLOW_SERVER_REQUEST_TIMEOUT_SECS") {
            self.server.request_timeout_secs =
                parse_u64("OFFICEFLOW_SERVER_REQUEST_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("OFFICEFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("OFFICEFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("OFFICEFLOW_JWT_SECRET") {
            self.jwt.secret = value.into();
        }
        if let Some(value) = read_env("OFFICEFLOW_JWT_EXPIRE_SECONDS") {
            self.jwt.expire_seconds = parse_u64("OFFICEFLOW_JWT_EXPIRE_SECONDS", &value)?;
        }

        if let Some(value) = read_env("OFFICEFLOW_APPROVAL_CACHE_TTL_SECONDS") {
            self.approval.cache_ttl_seconds =
                parse_u64("OFFICEFLOW_APPROVAL_CACHE_TTL_SECONDS", &value)?;
        }

        let log_level =
            read_env("OFFICEFLOW_LOGGING_LEVEL").or_else(|| read_env("OFFICEFLOW_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = Some(value);
        }
        let log_format =
            read_env("OFFICEFLOW_LOGGING_FORMAT").or_else(|| read_env("OFFICEFLOW_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = Some(value.parse()?);
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(dsn) = overrides.database_dsn {
            self.database.dsn = dsn;
        }
        if let Some(bind) = overrides.server_bind {
            self.server.bind = bind;
        }
        if let Some(mode) = overrides.server_mode {
            self.server.mode = mode;
        }
        if let Some(secret) = overrides.jwt_secret {
            self.jwt.secret = secret.into();
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = Some(level);
        }
        if let Some(format) = overrides.log_format {
            self.logging.format = Some(format);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_jwt(&self.jwt)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("officeflow.toml"), PathBuf::from("config/officeflow.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    if database.kind().is_none() {
        return Err(ConfigError::Validation(
            "database.dsn must be a sqlite URL (`sqlite://...`, `sqlite::memory:`, `:memory:`) or `memory://`"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind.trim().parse::<SocketAddr>().is_err() {
        return Err(ConfigError::Validation(format!(
            "server.bind must be a socket address such as 127.0.0.1:8080 (got `{}`)",
            server.bind
        )));
    }

    if server.request_timeout_secs == 0 || server.request_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "server.request_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_jwt(jwt: &JwtConfig) -> Result<(), ConfigError> {
    let secret = jwt.secret.expose_secret();
    if secret.trim().is_empty() {
        return Err(ConfigError::Validation(
            "jwt.secret is required (set OFFICEFLOW_JWT_SECRET or [jwt] secret)".to_string(),
        ));
    }
    if secret.len() < MIN_JWT_SECRET_BYTES {
        return Err(ConfigError::Validation(format!(
            "jwt.secret must be at least {MIN_JWT_SECRET_BYTES} bytes long"
        )));
    }

    if jwt.expire_seconds == 0 {
        return Err(ConfigError::Validation(
            "jwt.expire_seconds must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let Some(level) = &logging.level else {
        return Ok(());
    };
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    jwt: Option<JwtPatch>,
    approval: Option<ApprovalPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    dsn: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind: Option<String>,
    mode: Option<String>,
    request_timeout_secs: Option<u64>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct JwtPatch {
    secret: Option<String>,
    expire_seconds: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ApprovalPatch {
    cache_ttl_seconds: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};
    use std::time::Duration;

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{
        dsn_kind, AppConfig, ConfigError, ConfigOverrides, DsnKind, LoadOptions, LogFormat,
        ServerMode,
    };

    const TEST_SECRET: &str = "test-secret-0123456789abcdef";

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_OFFICEFLOW_SECRET", TEST_SECRET);

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("officeflow.toml");
            fs::write(
                &path,
                r#"
[jwt]
secret = "${TEST_OFFICEFLOW_SECRET}"
expire_seconds = 600

[approval]
cache_ttl_seconds = 30
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.jwt.secret.expose_secret() == TEST_SECRET,
                "jwt secret should be interpolated from environment",
            )?;
            ensure(config.jwt.expire_seconds == 600, "expire_seconds should come from file")?;
            ensure(
                config.approval.cache_ttl() == Some(Duration::from_secs(30)),
                "cache ttl should come from file",
            )?;
            Ok(())
        })();

        clear_vars(&["TEST_OFFICEFLOW_SECRET"]);
        result
    }

    #[test]
    fn logging_defaults_follow_server_mode() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("OFFICEFLOW_JWT_SECRET", TEST_SECRET);
        env::set_var("OFFICEFLOW_SERVER_MODE", "debug");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            ensure(config.server.mode == ServerMode::Debug, "mode should be debug")?;
            ensure(config.log_level() == "debug", "debug mode should default to debug level")?;
            ensure(
                config.log_format() == LogFormat::Pretty,
                "debug mode should default to pretty logs",
            )?;
            Ok(())
        })();

        clear_vars(&["OFFICEFLOW_JWT_SECRET", "OFFICEFLOW_SERVER_MODE"]);
        result
    }

    #[test]
    fn logging_env_aliases_win_over_mode_defaults() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("OFFICEFLOW_JWT_SECRET", TEST_SECRET);
        env::set_var("OFFICEFLOW_LOG_LEVEL", "warn");
        env::set_var("OFFICEFLOW_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.log_level() == "warn", "warn level should be set from env var")?;
            ensure(config.log_format() == LogFormat::Json, "json format should be set from env")?;
            Ok(())
        })();

        clear_vars(&["OFFICEFLOW_JWT_SECRET", "OFFICEFLOW_LOG_LEVEL", "OFFICEFLOW_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("OFFICEFLOW_DATABASE_DSN", "sqlite://from-env.db");
        env::set_var("OFFICEFLOW_SERVER_BIND", "0.0.0.0:9000");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("officeflow.toml");
            fs::write(
                &path,
                r#"
[database]
dsn = "sqlite://from-file.db"

[server]
bind = "127.0.0.1:7000"

[jwt]
secret = "file-secret-0123456789"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_dsn: Some("memory://".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.database.dsn == "memory://", "override dsn should win")?;
            ensure(config.log_level() == "debug", "overridden log level should be debug")?;
            ensure(config.server.bind == "0.0.0.0:9000", "env bind should win over file")?;
            ensure(
                config.jwt.secret.expose_secret() == "file-secret-0123456789",
                "file secret should win over defaults",
            )?;
            Ok(())
        })();

        clear_vars(&["OFFICEFLOW_DATABASE_DSN", "OFFICEFLOW_SERVER_BIND"]);
        result
    }

    #[test]
    fn missing_or_short_jwt_secret_fails_validation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let missing = match AppConfig::load(LoadOptions::default()) {
            Ok(_) => return Err("expected validation failure without jwt secret".to_string()),
            Err(error) => error,
        };
        ensure(
            matches!(missing, ConfigError::Validation(ref message) if message.contains("jwt.secret")),
            "validation failure should mention jwt.secret",
        )?;

        env::set_var("OFFICEFLOW_JWT_SECRET", "short");
        let result = match AppConfig::load(LoadOptions::default()) {
            Ok(_) => Err("short secret should be rejected".to_string()),
            Err(ConfigError::Validation(message)) if message.contains("16 bytes") => Ok(()),
            Err(other) => Err(format!("unexpected error: {other}")),
        };

        clear_vars(&["OFFICEFLOW_JWT_SECRET"]);
        result
    }

    #[test]
    fn invalid_bind_and_dsn_are_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("OFFICEFLOW_JWT_SECRET", TEST_SECRET);

        let result = (|| -> Result<(), String> {
            let bad_bind = AppConfig::load(LoadOptions {
                overrides: ConfigOverrides {
                    server_bind: Some("localhost".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            });
            ensure(
                matches!(bad_bind, Err(ConfigError::Validation(ref m)) if m.contains("server.bind")),
                "non socket-address bind should be rejected",
            )?;

            let bad_dsn = AppConfig::load(LoadOptions {
                overrides: ConfigOverrides {
                    database_dsn: Some("postgres://localhost/oa".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            });
            ensure(
                matches!(bad_dsn, Err(ConfigError::Validation(ref m)) if m.contains("database.dsn")),
                "non sqlite dsn should be rejected",
            )
        })();

        clear_vars(&["OFFICEFLOW_JWT_SECRET"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("OFFICEFLOW_JWT_SECRET", "super-secret-signing-key");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("super-secret-signing-key"),
                "debug output should not contain the jwt secret",
            )?;
            ensure(
                config.log_format() == LogFormat::Compact,
                "release mode should default to compact logs",
            )?;
            ensure(config.approval.cache_ttl().is_none(), "cache should be disabled by default")?;
            Ok(())
        })();

        clear_vars(&["OFFICEFLOW_JWT_SECRET"]);
        result
    }

    #[test]
    fn dsn_kind_selects_backend() {
        assert_eq!(dsn_kind("sqlite://officeflow.db"), Some(DsnKind::Sqlite));
        assert_eq!(dsn_kind("sqlite::memory:"), Some(DsnKind::Sqlite));
        assert_eq!(dsn_kind(":memory:"), Some(DsnKind::Sqlite));
        assert_eq!(dsn_kind("memory://"), Some(DsnKind::Memory));
        assert_eq!(dsn_kind("mysql://root@localhost/oa"), None);
    }
}
