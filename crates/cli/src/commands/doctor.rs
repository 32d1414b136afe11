use conduit_agent::channel::remote::RemoteRuntimeClient;
use conduit_agent::channel::AgentChannel;
use conduit_agent::template::TemplateStore;
use conduit_core::config::{AppConfig, ChannelMode, LoadOptions};
use conduit_db::connect_with_settings;
use serde::Serialize;

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

    fn skipped(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Skipped, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

const DEPENDENT_CHECKS: [&str; 3] =
    ["database_connectivity", "template_directory", "runtime_availability"];

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass(
                "config_validation",
                format!("configuration loaded and validated (mode={})", config.channel.mode.as_str()),
            ));
            checks.extend(async_checks(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            checks.extend(DEPENDENT_CHECKS.into_iter().map(|name| {
                DoctorCheck::skipped(name, "skipped because configuration did not load")
            }));
        }
    }

    // Skipped checks do not fail the report; only an explicit failure does.
    let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if failed {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn async_checks(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            let details = format!("failed to initialize async runtime: {error}");
            return DEPENDENT_CHECKS
                .into_iter()
                .map(|name| DoctorCheck::fail(name, details.clone()))
                .collect();
        }
    };

    runtime.block_on(async {
        vec![
            check_database_connectivity(config).await,
            check_template_directory(config).await,
            check_runtime_availability(config).await,
        ]
    })
}

async fn check_database_connectivity(config: &AppConfig) -> DoctorCheck {
    match connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    {
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

async fn check_template_directory(config: &AppConfig) -> DoctorCheck {
    let store = TemplateStore::new(&config.templates.dir);
    if !store.dir().is_dir() {
        return DoctorCheck::fail(
            "template_directory",
            format!("template directory `{}` does not exist", store.dir().display()),
        );
    }

    let names = store.names().await;
    DoctorCheck::pass(
        "template_directory",
        format!("{} template(s) in `{}`", names.len(), store.dir().display()),
    )
}

async fn check_runtime_availability(config: &AppConfig) -> DoctorCheck {
    if config.channel.mode == ChannelMode::DirectInProcess {
        return DoctorCheck::skipped(
            "runtime_availability",
            "direct mode runs agents in-process; no runtime api to probe",
        );
    }

    let client = match RemoteRuntimeClient::from_config(&config.channel) {
        Ok(client) => client,
        Err(error) => {
            return DoctorCheck::fail(
                "runtime_availability",
                format!("failed to build runtime client: {error}"),
            );
        }
    };

    if client.is_available().await {
        DoctorCheck::pass(
            "runtime_availability",
            format!("runtime api reachable at `{}`", config.channel.api_base_url),
        )
    } else {
        DoctorCheck::fail(
            "runtime_availability",
            format!("runtime api unreachable at `{}`", config.channel.api_base_url),
        )
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
