use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub telegram: TelegramConfig,
    pub tracker: TrackerConfig,
    pub dialog: DialogConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    pub api_base_url: String,
    pub poll_timeout_secs: u64,
}

/// Connection and custom-field settings for the Jira-compatible tracker.
#[derive(Clone, Debug)]
pub struct TrackerConfig {
    pub base_url: String,
    pub username: String,
    pub api_token: SecretString,
    pub story_points_field: String,
    pub sprint_field: String,
    pub epic_link_field: String,
    pub request_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct DialogConfig {
    pub media_sweep_interval_ms: u64,
    pub media_quiescence_ms: u64,
    pub users_file: PathBuf,
}

impl DialogConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.media_sweep_interval_ms)
    }

    pub fn quiescence_window(&self) -> Duration {
        Duration::from_millis(self.media_quiescence_ms)
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub tracker_base_url: Option<String>,
    pub tracker_username: Option<String>,
    pub tracker_api_token: Option<String>,
    pub users_file: Option<PathBuf>,
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
                url: "sqlite://taskwire.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            telegram: TelegramConfig {
                bot_token: String::new().into(),
                api_base_url: "https://api.telegram.org".to_string(),
                poll_timeout_secs: 30,
            },
            tracker: TrackerConfig {
                base_url: String::new(),
                username: String::new(),
                api_token: String::new().into(),
                story_points_field: "customfield_10106".to_string(),
                sprint_field: "customfield_10100".to_string(),
                epic_link_field: "customfield_10101".to_string(),
                request_timeout_secs: 20,
            },
            dialog: DialogConfig {
                media_sweep_interval_ms: 2_000,
                media_quiescence_ms: 5_000,
                users_file: PathBuf::from("users.json"),
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
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

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("taskwire.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(telegram) = patch.telegram {
            if let Some(bot_token) = telegram.bot_token {
                self.telegram.bot_token = secret_value(bot_token);
            }
            if let Some(api_base_url) = telegram.api_base_url {
                self.telegram.api_base_url = api_base_url;
            }
            if let Some(poll_timeout_secs) = telegram.poll_timeout_secs {
                self.telegram.poll_timeout_secs = poll_timeout_secs;
            }
        }

        if let Some(tracker) = patch.tracker {
            if let Some(base_url) = tracker.base_url {
                self.tracker.base_url = base_url;
            }
            if let Some(username) = tracker.username {
                self.tracker.username = username;
            }
            if let Some(api_token) = tracker.api_token {
                self.tracker.api_token = secret_value(api_token);
            }
            if let Some(field) = tracker.story_points_field {
                self.tracker.story_points_field = field;
            }
            if let Some(field) = tracker.sprint_field {
                self.tracker.sprint_field = field;
            }
            if let Some(field) = tracker.epic_link_field {
                self.tracker.epic_link_field = field;
            }
            if let Some(request_timeout_secs) = tracker.request_timeout_secs {
                self.tracker.request_timeout_secs = request_timeout_secs;
            }
        }

        if let Some(dialog) = patch.dialog {
            if let Some(interval) = dialog.media_sweep_interval_ms {
                self.dialog.media_sweep_interval_ms = interval;
            }
            if let Some(window) = dialog.media_quiescence_ms {
                self.dialog.media_quiescence_ms = window;
            }
            if let Some(users_file) = dialog.users_file {
                self.dialog.users_file = users_file;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("TASKWIRE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("TASKWIRE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("TASKWIRE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("TASKWIRE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("TASKWIRE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TASKWIRE_TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = secret_value(value);
        }
        if let Some(value) = read_env("TASKWIRE_TELEGRAM_API_BASE_URL") {
            self.telegram.api_base_url = value;
        }
        if let Some(value) = read_env("TASKWIRE_TELEGRAM_POLL_TIMEOUT_SECS") {
            self.telegram.poll_timeout_secs =
                parse_u64("TASKWIRE_TELEGRAM_POLL_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TASKWIRE_TRACKER_BASE_URL") {
            self.tracker.base_url = value;
        }
        if let Some(value) = read_env("TASKWIRE_TRACKER_USERNAME") {
            self.tracker.username = value;
        }
        if let Some(value) = read_env("TASKWIRE_TRACKER_API_TOKEN") {
            self.tracker.api_token = secret_value(value);
        }
        if let Some(value) = read_env("TASKWIRE_TRACKER_REQUEST_TIMEOUT_SECS") {
            self.tracker.request_timeout_secs =
                parse_u64("TASKWIRE_TRACKER_REQUEST_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TASKWIRE_DIALOG_MEDIA_SWEEP_INTERVAL_MS") {
            self.dialog.media_sweep_interval_ms =
                parse_u64("TASKWIRE_DIALOG_MEDIA_SWEEP_INTERVAL_MS", &value)?;
        }
        if let Some(value) = read_env("TASKWIRE_DIALOG_MEDIA_QUIESCENCE_MS") {
            self.dialog.media_quiescence_ms =
                parse_u64("TASKWIRE_DIALOG_MEDIA_QUIESCENCE_MS", &value)?;
        }
        if let Some(value) = read_env("TASKWIRE_DIALOG_USERS_FILE") {
            self.dialog.users_file = PathBuf::from(value);
        }

        if let Some(value) = read_env("TASKWIRE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("TASKWIRE_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("TASKWIRE_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("TASKWIRE_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("TASKWIRE_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("TASKWIRE_LOGGING_LEVEL").or_else(|| read_env("TASKWIRE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("TASKWIRE_LOGGING_FORMAT").or_else(|| read_env("TASKWIRE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(bot_token) = overrides.telegram_bot_token {
            self.telegram.bot_token = secret_value(bot_token);
        }
        if let Some(base_url) = overrides.tracker_base_url {
            self.tracker.base_url = base_url;
        }
        if let Some(username) = overrides.tracker_username {
            self.tracker.username = username;
        }
        if let Some(api_token) = overrides.tracker_api_token {
            self.tracker.api_token = secret_value(api_token);
        }
        if let Some(users_file) = overrides.users_file {
            self.dialog.users_file = users_file;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_telegram(&self.telegram)?;
        validate_tracker(&self.tracker)?;
        validate_dialog(&self.dialog)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("taskwire.toml"), PathBuf::from("config/taskwire.toml")]
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
        if ch != '$' || !matches!(chars.peek(), Some('{')) {
            output.push(ch);
            continue;
        }

        chars.next();
        let mut key = String::new();
        loop {
            match chars.next() {
                Some('}') => break,
                Some(next) => key.push(next),
                None => return Err(ConfigError::UnterminatedInterpolation),
            }
        }

        let value =
            env::var(&key).map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
        output.push_str(&value);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
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

fn validate_telegram(telegram: &TelegramConfig) -> Result<(), ConfigError> {
    let token = telegram.bot_token.expose_secret();
    if token.is_empty() {
        return Err(ConfigError::Validation(
            "telegram.bot_token is required. Ask @BotFather for a token with /newbot or /token"
                .to_string(),
        ));
    }

    let well_formed = token
        .split_once(':')
        .map(|(bot_id, secret)| {
            !bot_id.is_empty() && bot_id.chars().all(|c| c.is_ascii_digit()) && !secret.is_empty()
        })
        .unwrap_or(false);
    if !well_formed {
        return Err(ConfigError::Validation(
            "telegram.bot_token must look like `<bot id>:<secret>` as issued by @BotFather"
                .to_string(),
        ));
    }

    if !is_http_url(&telegram.api_base_url) {
        return Err(ConfigError::Validation(
            "telegram.api_base_url must start with http:// or https://".to_string(),
        ));
    }

    if telegram.poll_timeout_secs == 0 || telegram.poll_timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "telegram.poll_timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    Ok(())
}

fn validate_tracker(tracker: &TrackerConfig) -> Result<(), ConfigError> {
    if tracker.base_url.trim().is_empty() {
        return Err(ConfigError::Validation(
            "tracker.base_url is required (for example `https://yourteam.atlassian.net`)"
                .to_string(),
        ));
    }
    if !is_http_url(&tracker.base_url) {
        return Err(ConfigError::Validation(
            "tracker.base_url must start with http:// or https://".to_string(),
        ));
    }
    if tracker.username.trim().is_empty() {
        return Err(ConfigError::Validation("tracker.username is required".to_string()));
    }
    if tracker.api_token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "tracker.api_token is required. Create one at https://id.atlassian.com/manage-profile/security/api-tokens".to_string(),
        ));
    }

    for (key, value) in [
        ("tracker.story_points_field", &tracker.story_points_field),
        ("tracker.sprint_field", &tracker.sprint_field),
        ("tracker.epic_link_field", &tracker.epic_link_field),
    ] {
        if value.trim().is_empty() {
            return Err(ConfigError::Validation(format!("{key} must not be empty")));
        }
    }

    if tracker.request_timeout_secs == 0 || tracker.request_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "tracker.request_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_dialog(dialog: &DialogConfig) -> Result<(), ConfigError> {
    if dialog.media_sweep_interval_ms == 0 {
        return Err(ConfigError::Validation(
            "dialog.media_sweep_interval_ms must be greater than zero".to_string(),
        ));
    }
    if dialog.media_quiescence_ms == 0 {
        return Err(ConfigError::Validation(
            "dialog.media_quiescence_ms must be greater than zero".to_string(),
        ));
    }
    if dialog.users_file.as_os_str().is_empty() {
        return Err(ConfigError::Validation("dialog.users_file must not be empty".to_string()));
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
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
    telegram: Option<TelegramPatch>,
    tracker: Option<TrackerPatch>,
    dialog: Option<DialogPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TelegramPatch {
    bot_token: Option<String>,
    api_base_url: Option<String>,
    poll_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TrackerPatch {
    base_url: Option<String>,
    username: Option<String>,
    api_token: Option<String>,
    story_points_field: Option<String>,
    sprint_field: Option<String>,
    epic_link_field: Option<String>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct DialogPatch {
    media_sweep_interval_ms: Option<u64>,
    media_quiescence_ms: Option<u64>,
    users_file: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
