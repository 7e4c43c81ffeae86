pub mod config;
pub mod doctor;
pub mod migrate;
pub mod seed;
pub mod simulate;

use std::future::Future;

use serde::Serialize;

use cotiza_core::config::{AppConfig, LoadOptions};
use cotiza_db::{connect_with_settings, DbPool};

/// Error class, operator-facing message, and process exit code.
pub(crate) type Failure = (&'static str, String, u8);

/// Shared scaffolding for commands that load config and do async work:
/// exit code 2 is reserved for config problems and 3 for runtime setup, so
/// command-specific failures start at 4.
pub(crate) fn run_to_completion<F, Fut>(command: &'static str, work: F) -> CommandResult
where
    F: FnOnce(AppConfig) -> Fut,
    Fut: Future<Output = Result<String, Failure>>,
{
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                command,
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    match runtime.block_on(work(config)) {
        Ok(message) => CommandResult::success(command, message),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(command, error_class, message, exit_code)
        }
    }
}

pub(crate) async fn open_pool(config: &AppConfig) -> Result<DbPool, Failure> {
    connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(|error| ("db_connectivity", error.to_string(), 4u8))
}

/// Outcome of one subcommand run. Every command prints a single JSON envelope
/// so the CLI stays scriptable.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

impl CommandResult {
    pub fn success(command: &'static str, message: impl Into<String>) -> Self {
        Envelope { command, status: Status::Ok, error_class: None, message: message.into() }
            .into_result(0)
    }

    pub fn failure(
        command: &'static str,
        error_class: &'static str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        Envelope {
            command,
            status: Status::Error,
            error_class: Some(error_class),
            message: message.into(),
        }
        .into_result(exit_code)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
enum Status {
    Ok,
    Error,
}

#[derive(Debug, Serialize)]
struct Envelope {
    command: &'static str,
    status: Status,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_class: Option<&'static str>,
    message: String,
}

impl Envelope {
    fn into_result(self, exit_code: u8) -> CommandResult {
        let output = serde_json::to_string(&self).unwrap_or_else(|error| {
            format!(
                "{{\"command\":{:?},\"status\":\"error\",\"error_class\":\"serialization\",\"message\":{:?}}}",
                self.command,
                error.to_string()
            )
        });
        CommandResult { exit_code, output }
    }
}
