use conduit_core::config::{AppConfig, ChannelMode};

use crate::commands::{load_config, CommandResult};

/// Startup preflight. Nothing is spawned; the server binary owns the runtime.
pub fn run() -> CommandResult {
    let config = match load_config("start") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    match preflight(&config) {
        Ok(message) => CommandResult::success("start", message),
        Err(failure) => failure,
    }
}

fn preflight(config: &AppConfig) -> Result<String, CommandResult> {
    let mut notes = vec![format!("mode={}", config.channel.mode.as_str())];

    if config.channel.mode == ChannelMode::Process {
        let startup_config = config.runtime.startup_config_path();
        if !startup_config.is_file() {
            return Err(CommandResult::failure(
                "start",
                "runtime_config_missing",
                format!(
                    "agent runtime startup config not found at `{}`",
                    startup_config.display()
                ),
                3,
            ));
        }
        notes.push(format!("startup_config={}", startup_config.display()));
        notes.push(format!("runtime_command={}", config.runtime.command));
    }

    if !config.templates.dir.is_dir() {
        notes.push(format!("templates_dir={} (missing)", config.templates.dir.display()));
    }

    Ok(format!("startup preflight passed ({})", notes.join(", ")))
}
