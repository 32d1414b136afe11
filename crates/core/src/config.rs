use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::agent::DefinitionDefaults;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub runtime: RuntimeConfig,
    pub channel: ChannelConfig,
    pub templates: TemplatesConfig,
    pub completion: CompletionConfig,
    pub cache: CacheConfig,
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
pub struct RuntimeConfig {
    pub root: PathBuf,
    pub startup_config: PathBuf,
    pub command: String,
    pub args: Vec<String>,
    pub ready_markers: Vec<String>,
    pub startup_timeout_secs: u64,
    pub shutdown_timeout_secs: u64,
    pub autostart: bool,
}

#[derive(Clone, Debug)]
pub struct ChannelConfig {
    pub mode: ChannelMode,
    pub api_base_url: String,
    pub loopback_url: String,
    pub request_timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct TemplatesConfig {
    pub dir: PathBuf,
}

#[derive(Clone, Debug)]
pub struct CompletionConfig {
    pub base_url: String,
    pub provider: String,
    pub model: String,
    pub api_key: Option<SecretString>,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub ttl_secs: u64,
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

/// Transport used to reach the agent runtime. Resolved once at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelMode {
    #[serde(rename = "process")]
    Process,
    #[serde(rename = "direct")]
    DirectInProcess,
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
    pub channel_mode: Option<ChannelMode>,
    pub api_base_url: Option<String>,
    pub runtime_root: Option<PathBuf>,
    pub templates_dir: Option<PathBuf>,
    pub completion_api_key: Option<String>,
    pub completion_model: Option<String>,
    pub cache_ttl_secs: Option<u64>,
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
                url: "sqlite://conduit.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            runtime: RuntimeConfig {
                root: PathBuf::from("runtime"),
                startup_config: PathBuf::from(".env"),
                command: "bun".to_string(),
                args: vec!["start".to_string()],
                ready_markers: vec![
                    "AgentServer is listening".to_string(),
                    "Server running".to_string(),
                    "REST API bound".to_string(),
                ],
                startup_timeout_secs: 60,
                shutdown_timeout_secs: 10,
                autostart: false,
            },
            channel: ChannelConfig {
                mode: ChannelMode::Process,
                api_base_url: "http://localhost:3000".to_string(),
                loopback_url: "http://127.0.0.1:3000".to_string(),
                request_timeout_secs: 30,
            },
            templates: TemplatesConfig { dir: PathBuf::from("characters") },
            completion: CompletionConfig {
                base_url: "https://api.openai.com/v1".to_string(),
                provider: "openai".to_string(),
                model: "gpt-4o-mini".to_string(),
                api_key: None,
                timeout_secs: 30,
                temperature: 0.7,
                max_tokens: 1024,
            },
            cache: CacheConfig { ttl_secs: 300 },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl RuntimeConfig {
    /// The startup config path, resolved against the runtime root when relative.
    pub fn startup_config_path(&self) -> PathBuf {
        if self.startup_config.is_absolute() {
            self.startup_config.clone()
        } else {
            self.root.join(&self.startup_config)
        }
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl ChannelConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl CompletionConfig {
    pub fn definition_defaults(&self) -> DefinitionDefaults {
        DefinitionDefaults { model_provider: self.provider.clone(), model: self.model.clone() }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl ChannelMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Process => "process",
            Self::DirectInProcess => "direct",
        }
    }
}

impl std::str::FromStr for ChannelMode {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "process" | "http" => Ok(Self::Process),
            "direct" | "in_process" | "in-process" => Ok(Self::DirectInProcess),
            other => Err(ConfigError::Validation(format!(
                "unsupported channel mode `{other}` (expected process|direct)"
            ))),
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

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("conduit.toml"));
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

        if let Some(runtime) = patch.runtime {
            if let Some(root) = runtime.root {
                self.runtime.root = root;
            }
            if let Some(startup_config) = runtime.startup_config {
                self.runtime.startup_config = startup_config;
            }
            if let Some(command) = runtime.command {
                self.runtime.command = command;
            }
            if let Some(args) = runtime.args {
                self.runtime.args = args;
            }
            if let Some(ready_markers) = runtime.ready_markers {
                self.runtime.ready_markers = ready_markers;
            }
            if let Some(startup_timeout_secs) = runtime.startup_timeout_secs {
                self.runtime.startup_timeout_secs = startup_timeout_secs;
            }
            if let Some(shutdown_timeout_secs) = runtime.shutdown_timeout_secs {
                self.runtime.shutdown_timeout_secs = shutdown_timeout_secs;
            }
            if let Some(autostart) = runtime.autostart {
                self.runtime.autostart = autostart;
            }
        }

        if let Some(channel) = patch.channel {
            if let Some(mode) = channel.mode {
                self.channel.mode = mode;
            }
            if let Some(api_base_url) = channel.api_base_url {
                self.channel.api_base_url = api_base_url;
            }
            if let Some(loopback_url) = channel.loopback_url {
                self.channel.loopback_url = loopback_url;
            }
            if let Some(request_timeout_secs) = channel.request_timeout_secs {
                self.channel.request_timeout_secs = request_timeout_secs;
            }
        }

        if let Some(templates) = patch.templates {
            if let Some(dir) = templates.dir {
                self.templates.dir = dir;
            }
        }

        if let Some(completion) = patch.completion {
            if let Some(base_url) = completion.base_url {
                self.completion.base_url = base_url;
            }
            if let Some(provider) = completion.provider {
                self.completion.provider = provider;
            }
            if let Some(model) = completion.model {
                self.completion.model = model;
            }
            if let Some(completion_api_key_value) = completion.api_key {
                self.completion.api_key = Some(secret_value(completion_api_key_value));
            }
            if let Some(timeout_secs) = completion.timeout_secs {
                self.completion.timeout_secs = timeout_secs;
            }
            if let Some(temperature) = completion.temperature {
                self.completion.temperature = temperature;
            }
            if let Some(max_tokens) = completion.max_tokens {
                self.completion.max_tokens = max_tokens;
            }
        }

        if let Some(cache) = patch.cache {
            if let Some(ttl_secs) = cache.ttl_secs {
                self.cache.ttl_secs = ttl_secs;
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
        if let Some(value) = read_env("CONDUIT_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CONDUIT_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("CONDUIT_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CONDUIT_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("CONDUIT_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CONDUIT_RUNTIME_ROOT") {
            self.runtime.root = PathBuf::from(value);
        }
        if let Some(value) = read_env("CONDUIT_RUNTIME_STARTUP_CONFIG") {
            self.runtime.startup_config = PathBuf::from(value);
        }
        if let Some(value) = read_env("CONDUIT_RUNTIME_COMMAND") {
            self.runtime.command = value;
        }
        if let Some(value) = read_env("CONDUIT_RUNTIME_ARGS") {
            self.runtime.args = value.split_whitespace().map(str::to_string).collect();
        }
        if let Some(value) = read_env("CONDUIT_RUNTIME_READY_MARKERS") {
            self.runtime.ready_markers = split_list(&value);
        }
        if let Some(value) = read_env("CONDUIT_RUNTIME_STARTUP_TIMEOUT_SECS") {
            self.runtime.startup_timeout_secs =
                parse_u64("CONDUIT_RUNTIME_STARTUP_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CONDUIT_RUNTIME_SHUTDOWN_TIMEOUT_SECS") {
            self.runtime.shutdown_timeout_secs =
                parse_u64("CONDUIT_RUNTIME_SHUTDOWN_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CONDUIT_RUNTIME_AUTOSTART") {
            self.runtime.autostart = parse_bool("CONDUIT_RUNTIME_AUTOSTART", &value)?;
        }

        if let Some(value) = read_env("CONDUIT_CHANNEL_MODE") {
            self.channel.mode =
                value.parse().map_err(|_| ConfigError::InvalidEnvOverride {
                    key: "CONDUIT_CHANNEL_MODE".to_string(),
                    value: value.clone(),
                })?;
        }
        if let Some(value) = read_env("CONDUIT_CHANNEL_API_BASE_URL") {
            self.channel.api_base_url = value;
        }
        if let Some(value) = read_env("CONDUIT_CHANNEL_LOOPBACK_URL") {
            self.channel.loopback_url = value;
        }
        if let Some(value) = read_env("CONDUIT_CHANNEL_REQUEST_TIMEOUT_SECS") {
            self.channel.request_timeout_secs =
                parse_u64("CONDUIT_CHANNEL_REQUEST_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CONDUIT_TEMPLATES_DIR") {
            self.templates.dir = PathBuf::from(value);
        }

        if let Some(value) = read_env("CONDUIT_COMPLETION_BASE_URL") {
            self.completion.base_url = value;
        }
        if let Some(value) = read_env("CONDUIT_COMPLETION_PROVIDER") {
            self.completion.provider = value;
        }
        if let Some(value) = read_env("CONDUIT_COMPLETION_MODEL") {
            self.completion.model = value;
        }
        if let Some(value) = read_env("CONDUIT_COMPLETION_API_KEY") {
            self.completion.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("CONDUIT_COMPLETION_TIMEOUT_SECS") {
            self.completion.timeout_secs = parse_u64("CONDUIT_COMPLETION_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("CONDUIT_COMPLETION_TEMPERATURE") {
            self.completion.temperature = parse_f32("CONDUIT_COMPLETION_TEMPERATURE", &value)?;
        }
        if let Some(value) = read_env("CONDUIT_COMPLETION_MAX_TOKENS") {
            self.completion.max_tokens = parse_u32("CONDUIT_COMPLETION_MAX_TOKENS", &value)?;
        }

        if let Some(value) = read_env("CONDUIT_CACHE_TTL_SECS") {
            self.cache.ttl_secs = parse_u64("CONDUIT_CACHE_TTL_SECS", &value)?;
        }

        if let Some(value) = read_env("CONDUIT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CONDUIT_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port =
                parse_u16("CONDUIT_SERVER_HEALTH_CHECK_PORT", &value)?;
        }
        if let Some(value) = read_env("CONDUIT_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("CONDUIT_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("CONDUIT_LOGGING_LEVEL").or_else(|| read_env("CONDUIT_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("CONDUIT_LOGGING_FORMAT").or_else(|| read_env("CONDUIT_LOG_FORMAT"));
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
        if let Some(channel_mode) = overrides.channel_mode {
            self.channel.mode = channel_mode;
        }
        if let Some(api_base_url) = overrides.api_base_url {
            self.channel.api_base_url = api_base_url;
        }
        if let Some(runtime_root) = overrides.runtime_root {
            self.runtime.root = runtime_root;
        }
        if let Some(templates_dir) = overrides.templates_dir {
            self.templates.dir = templates_dir;
        }
        if let Some(completion_api_key) = overrides.completion_api_key {
            self.completion.api_key = Some(secret_value(completion_api_key));
        }
        if let Some(completion_model) = overrides.completion_model {
            self.completion.model = completion_model;
        }
        if let Some(cache_ttl_secs) = overrides.cache_ttl_secs {
            self.cache.ttl_secs = cache_ttl_secs;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_runtime(&self.runtime)?;
        validate_channel(&self.channel)?;
        validate_completion(&self.completion)?;
        validate_cache(&self.cache)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("conduit.toml"), PathBuf::from("config/conduit.toml")]
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

fn validate_runtime(runtime: &RuntimeConfig) -> Result<(), ConfigError> {
    if runtime.command.trim().is_empty() {
        return Err(ConfigError::Validation("runtime.command must not be empty".to_string()));
    }

    if runtime.ready_markers.iter().all(|marker| marker.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "runtime.ready_markers must contain at least one non-empty marker".to_string(),
        ));
    }

    if runtime.startup_timeout_secs == 0 || runtime.startup_timeout_secs > 600 {
        return Err(ConfigError::Validation(
            "runtime.startup_timeout_secs must be in range 1..=600".to_string(),
        ));
    }

    if runtime.shutdown_timeout_secs == 0 || runtime.shutdown_timeout_secs > 120 {
        return Err(ConfigError::Validation(
            "runtime.shutdown_timeout_secs must be in range 1..=120".to_string(),
        ));
    }

    Ok(())
}

fn validate_channel(channel: &ChannelConfig) -> Result<(), ConfigError> {
    if !is_http_url(&channel.api_base_url) {
        return Err(ConfigError::Validation(
            "channel.api_base_url must start with http:// or https://".to_string(),
        ));
    }

    if channel.mode == ChannelMode::DirectInProcess && !is_http_url(&channel.loopback_url) {
        return Err(ConfigError::Validation(
            "channel.loopback_url must start with http:// or https:// in direct mode".to_string(),
        ));
    }

    if channel.request_timeout_secs == 0 || channel.request_timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "channel.request_timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_completion(completion: &CompletionConfig) -> Result<(), ConfigError> {
    if !is_http_url(&completion.base_url) {
        return Err(ConfigError::Validation(
            "completion.base_url must start with http:// or https://".to_string(),
        ));
    }

    if completion.model.trim().is_empty() {
        return Err(ConfigError::Validation("completion.model must not be empty".to_string()));
    }

    if completion.timeout_secs == 0 || completion.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "completion.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    if !(0.0..=2.0).contains(&completion.temperature) {
        return Err(ConfigError::Validation(
            "completion.temperature must be in range 0.0..=2.0".to_string(),
        ));
    }

    if completion.max_tokens == 0 {
        return Err(ConfigError::Validation(
            "completion.max_tokens must be greater than zero".to_string(),
        ));
    }

    let blank_key =
        completion.api_key.as_ref().map(|value| value.expose_secret().trim().is_empty());
    if blank_key == Some(true) {
        return Err(ConfigError::Validation(
            "completion.api_key must not be blank when set".to_string(),
        ));
    }

    Ok(())
}

fn validate_cache(cache: &CacheConfig) -> Result<(), ConfigError> {
    if cache.ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "cache.ttl_secs must be greater than zero".to_string(),
        ));
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

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
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

fn parse_f32(key: &str, value: &str) -> Result<f32, ConfigError> {
    value.parse::<f32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    runtime: Option<RuntimePatch>,
    channel: Option<ChannelPatch>,
    templates: Option<TemplatesPatch>,
    completion: Option<CompletionPatch>,
    cache: Option<CachePatch>,
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
struct RuntimePatch {
    root: Option<PathBuf>,
    startup_config: Option<PathBuf>,
    command: Option<String>,
    args: Option<Vec<String>>,
    ready_markers: Option<Vec<String>>,
    startup_timeout_secs: Option<u64>,
    shutdown_timeout_secs: Option<u64>,
    autostart: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct ChannelPatch {
    mode: Option<ChannelMode>,
    api_base_url: Option<String>,
    loopback_url: Option<String>,
    request_timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct TemplatesPatch {
    dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct CompletionPatch {
    base_url: Option<String>,
    provider: Option<String>,
    model: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct CachePatch {
    ttl_secs: Option<u64>,
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
