use std::env;
use std::fs;
use std::path::Path;

use conduit_core::config::{resolve_config_path, AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

struct Field {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

impl Field {
    fn new(key: &'static str, value: impl Into<String>, env_keys: &'static [&'static str]) -> Self {
        Self { key, value: value.into(), env_keys }
    }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = resolve_config_path(None);
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn fields(config: &AppConfig) -> Vec<Field> {
    let api_key = config
        .completion
        .api_key
        .as_ref()
        .map_or_else(|| "<unset>".to_string(), |key| redact_token(key.expose_secret()));

    vec![
        Field::new("database.url", &config.database.url, &["CONDUIT_DATABASE_URL"]),
        Field::new(
            "database.max_connections",
            config.database.max_connections.to_string(),
            &["CONDUIT_DATABASE_MAX_CONNECTIONS"],
        ),
        Field::new(
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            &["CONDUIT_DATABASE_TIMEOUT_SECS"],
        ),
        Field::new(
            "runtime.root",
            config.runtime.root.display().to_string(),
            &["CONDUIT_RUNTIME_ROOT"],
        ),
        Field::new(
            "runtime.startup_config",
            config.runtime.startup_config_path().display().to_string(),
            &["CONDUIT_RUNTIME_STARTUP_CONFIG"],
        ),
        Field::new("runtime.command", &config.runtime.command, &["CONDUIT_RUNTIME_COMMAND"]),
        Field::new("runtime.args", config.runtime.args.join(" "), &["CONDUIT_RUNTIME_ARGS"]),
        Field::new(
            "runtime.ready_markers",
            config.runtime.ready_markers.join(" | "),
            &["CONDUIT_RUNTIME_READY_MARKERS"],
        ),
        Field::new(
            "runtime.startup_timeout_secs",
            config.runtime.startup_timeout_secs.to_string(),
            &["CONDUIT_RUNTIME_STARTUP_TIMEOUT_SECS"],
        ),
        Field::new(
            "runtime.shutdown_timeout_secs",
            config.runtime.shutdown_timeout_secs.to_string(),
            &["CONDUIT_RUNTIME_SHUTDOWN_TIMEOUT_SECS"],
        ),
        Field::new(
            "runtime.autostart",
            config.runtime.autostart.to_string(),
            &["CONDUIT_RUNTIME_AUTOSTART"],
        ),
        Field::new("channel.mode", config.channel.mode.as_str(), &["CONDUIT_CHANNEL_MODE"]),
        Field::new(
            "channel.api_base_url",
            &config.channel.api_base_url,
            &["CONDUIT_CHANNEL_API_BASE_URL"],
        ),
        Field::new(
            "channel.loopback_url",
            &config.channel.loopback_url,
            &["CONDUIT_CHANNEL_LOOPBACK_URL"],
        ),
        Field::new(
            "channel.request_timeout_secs",
            config.channel.request_timeout_secs.to_string(),
            &["CONDUIT_CHANNEL_REQUEST_TIMEOUT_SECS"],
        ),
        Field::new(
            "templates.dir",
            config.templates.dir.display().to_string(),
            &["CONDUIT_TEMPLATES_DIR"],
        ),
        Field::new(
            "completion.base_url",
            &config.completion.base_url,
            &["CONDUIT_COMPLETION_BASE_URL"],
        ),
        Field::new(
            "completion.provider",
            &config.completion.provider,
            &["CONDUIT_COMPLETION_PROVIDER"],
        ),
        Field::new("completion.model", &config.completion.model, &["CONDUIT_COMPLETION_MODEL"]),
        Field::new("completion.api_key", api_key, &["CONDUIT_COMPLETION_API_KEY"]),
        Field::new(
            "completion.timeout_secs",
            config.completion.timeout_secs.to_string(),
            &["CONDUIT_COMPLETION_TIMEOUT_SECS"],
        ),
        Field::new(
            "completion.temperature",
            config.completion.temperature.to_string(),
            &["CONDUIT_COMPLETION_TEMPERATURE"],
        ),
        Field::new(
            "completion.max_tokens",
            config.completion.max_tokens.to_string(),
            &["CONDUIT_COMPLETION_MAX_TOKENS"],
        ),
        Field::new("cache.ttl_secs", config.cache.ttl_secs.to_string(), &["CONDUIT_CACHE_TTL_SECS"]),
        Field::new(
            "server.bind_address",
            &config.server.bind_address,
            &["CONDUIT_SERVER_BIND_ADDRESS"],
        ),
        Field::new(
            "server.health_check_port",
            config.server.health_check_port.to_string(),
            &["CONDUIT_SERVER_HEALTH_CHECK_PORT"],
        ),
        Field::new(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            &["CONDUIT_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        Field::new(
            "logging.level",
            &config.logging.level,
            &["CONDUIT_LOGGING_LEVEL", "CONDUIT_LOG_LEVEL"],
        ),
        Field::new(
            "logging.format",
            format!("{:?}", config.logging.format).to_ascii_lowercase(),
            &["CONDUIT_LOGGING_FORMAT", "CONDUIT_LOG_FORMAT"],
        ),
    ]
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

/// Keeps a recognizable key prefix such as `sk-` and hides the rest.
fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
