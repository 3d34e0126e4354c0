use std::env;
use std::sync::{Mutex, OnceLock};

use serde_json::Value;
use taskwire_cli::commands::{config, doctor, migrate};
use tempfile::TempDir;

const BOT_TOKEN: &str = "123456:ABC-secret";

fn valid_env(users_file: &str) -> Vec<(&'static str, String)> {
    vec![
        ("TASKWIRE_TELEGRAM_BOT_TOKEN", BOT_TOKEN.to_string()),
        ("TASKWIRE_TRACKER_BASE_URL", "https://jira.example.com".to_string()),
        ("TASKWIRE_TRACKER_USERNAME", "taskbot".to_string()),
        ("TASKWIRE_TRACKER_API_TOKEN", "jira-secret".to_string()),
        ("TASKWIRE_DATABASE_URL", "sqlite::memory:".to_string()),
        ("TASKWIRE_DIALOG_USERS_FILE", users_file.to_string()),
    ]
}

fn users_file(dir: &TempDir, body: &str) -> String {
    let path = dir.path().join("users.json");
    std::fs::write(&path, body).expect("write users file");
    path.display().to_string()
}

#[test]
fn migrate_returns_success_with_valid_env() {
    let dir = TempDir::new().expect("temp dir");
    let users = users_file(&dir, r#"{ "users": [] }"#);

    with_env(&valid_env(&users), || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "expected successful migrate run");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
        assert_eq!(payload["details"]["migrations"][0]["version"], 1);
    });
}

#[test]
fn migrate_returns_config_failure_without_tokens() {
    with_env(&[], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn doctor_passes_with_valid_env_and_users() {
    let dir = TempDir::new().expect("temp dir");
    let users = users_file(&dir, r#"{ "users": [ { "chat_username": "alice" } ] }"#);

    with_env(&valid_env(&users), || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 0, "expected passing doctor report: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "pass");
        let names: Vec<&str> = payload["checks"]
            .as_array()
            .expect("checks")
            .iter()
            .filter_map(|check| check["name"].as_str())
            .collect();
        assert_eq!(
            names,
            vec![
                "config_validation",
                "telegram_token",
                "tracker_endpoint",
                "users_file",
                "database_connectivity"
            ]
        );
    });
}

#[test]
fn doctor_flags_an_empty_users_file() {
    let dir = TempDir::new().expect("temp dir");
    let users = users_file(&dir, r#"{ "users": [] }"#);

    with_env(&valid_env(&users), || {
        let result = doctor::run(true);
        assert_eq!(result.exit_code, 1);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["overall_status"], "fail");
        let users_check = payload["checks"]
            .as_array()
            .expect("checks")
            .iter()
            .find(|check| check["name"] == "users_file")
            .cloned()
            .expect("users_file check");
        assert_eq!(users_check["status"], "fail");
    });
}

#[test]
fn doctor_skips_dependent_checks_when_config_is_invalid() {
    with_env(&[], || {
        let result = doctor::run(false);
        assert_eq!(result.exit_code, 1);
        assert!(result.output.contains("- [fail] config_validation"));
        assert!(result.output.contains("- [skip] database_connectivity"));
    });
}

#[test]
fn config_redacts_secrets_and_attributes_env_sources() {
    let dir = TempDir::new().expect("temp dir");
    let users = users_file(&dir, r#"{ "users": [] }"#);

    with_env(&valid_env(&users), || {
        let output = config::run();
        assert!(output.contains("- telegram.bot_token = 123456:*** (source: env (TASKWIRE_TELEGRAM_BOT_TOKEN))"));
        assert!(output.contains("- tracker.api_token = <redacted>"));
        assert!(!output.contains("ABC-secret"));
        assert!(!output.contains("jira-secret"));
        assert!(output.contains("- server.bind_address = 127.0.0.1 (source: default)"));
    });
}

fn with_env(vars: &[(&str, String)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "TASKWIRE_DATABASE_URL",
        "TASKWIRE_DATABASE_MAX_CONNECTIONS",
        "TASKWIRE_DATABASE_TIMEOUT_SECS",
        "TASKWIRE_TELEGRAM_BOT_TOKEN",
        "TASKWIRE_TELEGRAM_API_BASE_URL",
        "TASKWIRE_TELEGRAM_POLL_TIMEOUT_SECS",
        "TASKWIRE_TRACKER_BASE_URL",
        "TASKWIRE_TRACKER_USERNAME",
        "TASKWIRE_TRACKER_API_TOKEN",
        "TASKWIRE_TRACKER_REQUEST_TIMEOUT_SECS",
        "TASKWIRE_DIALOG_MEDIA_SWEEP_INTERVAL_MS",
        "TASKWIRE_DIALOG_MEDIA_QUIESCENCE_MS",
        "TASKWIRE_DIALOG_USERS_FILE",
        "TASKWIRE_SERVER_BIND_ADDRESS",
        "TASKWIRE_SERVER_HEALTH_CHECK_PORT",
        "TASKWIRE_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "TASKWIRE_LOGGING_LEVEL",
        "TASKWIRE_LOGGING_FORMAT",
        "TASKWIRE_LOG_LEVEL",
        "TASKWIRE_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}
