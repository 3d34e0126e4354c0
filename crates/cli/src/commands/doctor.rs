use secrecy::ExposeSecret;
use serde::Serialize;
use taskwire_core::config::{AppConfig, LoadOptions};
use taskwire_db::{connect_with_settings, JsonFileUserDirectory};

use crate::commands::CommandResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl DoctorCheck {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const DEPENDENT_CHECKS: [&str; 4] =
    ["telegram_token", "tracker_endpoint", "users_file", "database_connectivity"];

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass("config_validation", "configuration loaded and validated"));
            checks.push(check_telegram_token(&config));
            checks.push(check_tracker_endpoint(&config));
            checks.extend(run_async_checks(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            checks.extend(DEPENDENT_CHECKS.into_iter().map(|name| DoctorCheck {
                name,
                status: CheckStatus::Skipped,
                details: "skipped because configuration did not load".to_string(),
            }));
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_telegram_token(config: &AppConfig) -> DoctorCheck {
    let token = config.telegram.bot_token.expose_secret();
    let bot_id = token.split_once(':').map(|(bot_id, _)| bot_id).unwrap_or_default();
    DoctorCheck::pass("telegram_token", format!("token for bot id {bot_id} is well formed"))
}

fn check_tracker_endpoint(config: &AppConfig) -> DoctorCheck {
    let base_url = config.tracker.base_url.trim().trim_end_matches('/');
    let host = base_url.split_once("://").map(|(_, rest)| rest).unwrap_or_default();
    if host.is_empty() || host.starts_with('/') {
        return DoctorCheck::fail("tracker_endpoint", format!("`{base_url}` has no host"));
    }
    if base_url.contains("/rest/") {
        return DoctorCheck::fail(
            "tracker_endpoint",
            "tracker.base_url must be the site root, without a /rest/ path",
        );
    }
    DoctorCheck::pass(
        "tracker_endpoint",
        format!("issues will be created at {base_url} as `{}`", config.tracker.username),
    )
}

fn run_async_checks(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            let details = format!("failed to initialize async runtime: {error}");
            return vec![
                DoctorCheck::fail("users_file", details.clone()),
                DoctorCheck::fail("database_connectivity", details),
            ];
        }
    };

    runtime.block_on(async {
        vec![check_users_file(config).await, check_database_connectivity(config).await]
    })
}

async fn check_users_file(config: &AppConfig) -> DoctorCheck {
    let path = &config.dialog.users_file;
    match JsonFileUserDirectory::load(path).await {
        Ok(directory) if directory.is_empty().await => DoctorCheck::fail(
            "users_file",
            format!("`{}` lists no users; nobody can create tasks", path.display()),
        ),
        Ok(directory) => DoctorCheck::pass(
            "users_file",
            format!("`{}` lists {} user(s)", path.display(), directory.len().await),
        ),
        Err(error) => {
            DoctorCheck::fail("users_file", format!("`{}` is not usable: {error}", path.display()))
        }
    }
}

async fn check_database_connectivity(config: &AppConfig) -> DoctorCheck {
    let connected = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await;

    match connected {
        Ok(pool) => {
            pool.close().await;
            DoctorCheck::pass(
                "database_connectivity",
                format!("connected using `{}`", config.database.url),
            )
        }
        Err(error) => DoctorCheck::fail(
            "database_connectivity",
            format!("failed to connect to database: {error}"),
        ),
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
