use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::ExposeSecret;
use taskwire_core::config::{AppConfig, LoadOptions};
use toml::Value;

struct Field {
    key: &'static str,
    env: &'static [&'static str],
    value: String,
}

impl Field {
    fn new(key: &'static str, env: &'static [&'static str], value: impl Into<String>) -> Self {
        Self { key, env, value: value.into() }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in effective_fields(&config) {
        let source = field_source(
            field.key,
            field.env,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn effective_fields(config: &AppConfig) -> Vec<Field> {
    vec![
        Field::new("database.url", &["TASKWIRE_DATABASE_URL"], config.database.url.clone()),
        Field::new(
            "database.max_connections",
            &["TASKWIRE_DATABASE_MAX_CONNECTIONS"],
            config.database.max_connections.to_string(),
        ),
        Field::new(
            "database.timeout_secs",
            &["TASKWIRE_DATABASE_TIMEOUT_SECS"],
            config.database.timeout_secs.to_string(),
        ),
        Field::new(
            "telegram.bot_token",
            &["TASKWIRE_TELEGRAM_BOT_TOKEN"],
            redact_bot_token(config.telegram.bot_token.expose_secret()),
        ),
        Field::new(
            "telegram.api_base_url",
            &["TASKWIRE_TELEGRAM_API_BASE_URL"],
            config.telegram.api_base_url.clone(),
        ),
        Field::new(
            "telegram.poll_timeout_secs",
            &["TASKWIRE_TELEGRAM_POLL_TIMEOUT_SECS"],
            config.telegram.poll_timeout_secs.to_string(),
        ),
        Field::new("tracker.base_url", &["TASKWIRE_TRACKER_BASE_URL"], config.tracker.base_url.clone()),
        Field::new("tracker.username", &["TASKWIRE_TRACKER_USERNAME"], config.tracker.username.clone()),
        Field::new(
            "tracker.api_token",
            &["TASKWIRE_TRACKER_API_TOKEN"],
            redact_secret(config.tracker.api_token.expose_secret()),
        ),
        Field::new("tracker.story_points_field", &[], config.tracker.story_points_field.clone()),
        Field::new("tracker.sprint_field", &[], config.tracker.sprint_field.clone()),
        Field::new("tracker.epic_link_field", &[], config.tracker.epic_link_field.clone()),
        Field::new(
            "dialog.media_sweep_interval_ms",
            &["TASKWIRE_DIALOG_MEDIA_SWEEP_INTERVAL_MS"],
            config.dialog.media_sweep_interval_ms.to_string(),
        ),
        Field::new(
            "dialog.media_quiescence_ms",
            &["TASKWIRE_DIALOG_MEDIA_QUIESCENCE_MS"],
            config.dialog.media_quiescence_ms.to_string(),
        ),
        Field::new(
            "dialog.users_file",
            &["TASKWIRE_DIALOG_USERS_FILE"],
            config.dialog.users_file.display().to_string(),
        ),
        Field::new(
            "server.bind_address",
            &["TASKWIRE_SERVER_BIND_ADDRESS"],
            config.server.bind_address.clone(),
        ),
        Field::new(
            "server.health_check_port",
            &["TASKWIRE_SERVER_HEALTH_CHECK_PORT"],
            config.server.health_check_port.to_string(),
        ),
        Field::new(
            "logging.level",
            &["TASKWIRE_LOGGING_LEVEL", "TASKWIRE_LOG_LEVEL"],
            config.logging.level.clone(),
        ),
        Field::new(
            "logging.format",
            &["TASKWIRE_LOGGING_FORMAT", "TASKWIRE_LOG_FORMAT"],
            format!("{:?}", config.logging.format),
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    ["taskwire.toml", "config/taskwire.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
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
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
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

/// Keeps the public bot id, hides the secret half.
fn redact_bot_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    match trimmed.split_once(':') {
        Some((bot_id, _)) => format!("{bot_id}:***"),
        None => "<redacted>".to_string(),
    }
}

fn redact_secret(secret: &str) -> String {
    if secret.trim().is_empty() {
        "<empty>".to_string()
    } else {
        "<redacted>".to_string()
    }
}
