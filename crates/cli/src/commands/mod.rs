pub mod config;
pub mod doctor;
pub mod migrate;
pub mod sweep;
pub mod templates;
pub mod workflow;

use std::sync::Arc;

use clearway_core::config::{AppConfig, LoadOptions, LogFormat, LoggingConfig};
use clearway_core::errors::ApplicationError;
use clearway_core::workflows::WorkflowTemplateCatalog;
use clearway_db::{connect_with_settings, migrations, SqlWorkflowRepository};
use clearway_engine::{TracingAuditSink, WorkflowService};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::runtime::Runtime;
use uuid::Uuid;

pub type CliWorkflowService = WorkflowService<SqlWorkflowRepository, TracingAuditSink>;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            correlation_id: None,
        };
        Self { exit_code: 0, output: serialize_payload(&payload) }
    }

    /// Success envelope carrying a data payload under `key`.
    pub fn data(command: &str, key: &str, value: impl Serialize) -> Self {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(error) => {
                return Self::failure(command, "serialization", error.to_string(), 1);
            }
        };

        let mut payload = Map::new();
        payload.insert("command".to_string(), Value::String(command.to_string()));
        payload.insert("status".to_string(), Value::String("ok".to_string()));
        payload.insert(key.to_string(), value);
        Self { exit_code: 0, output: serialize_payload(&payload) }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            correlation_id: None,
        };
        Self { exit_code, output: serialize_payload(&payload) }
    }

    /// Maps an engine error through the interface layer so the operator sees
    /// a stable class, a safe message and the correlation id to grep logs for.
    pub fn application_failure(
        command: &str,
        error: ApplicationError,
        correlation_id: &str,
    ) -> Self {
        let error_class = error.error_class();
        let exit_code = match &error {
            ApplicationError::Domain(_) => 6,
            ApplicationError::NotFound(_) => 7,
            ApplicationError::Conflict(_) => 8,
            ApplicationError::Persistence(_) => 9,
            ApplicationError::Configuration(_) => 2,
        };
        let detail = error.to_string();
        let interface = error.into_interface(correlation_id);
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: format!("{} ({detail})", interface.user_message()),
            correlation_id: Some(interface.correlation_id().to_string()),
        };
        Self { exit_code, output: serialize_payload(&payload) }
    }
}

fn serialize_payload(payload: &impl Serialize) -> String {
    serde_json::to_string(payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

pub(crate) fn load_config(command: &str, options: LoadOptions) -> Result<AppConfig, CommandResult> {
    AppConfig::load(options).map_err(|error| {
        CommandResult::failure(
            command,
            "config_validation",
            format!("configuration issue: {error}"),
            2,
        )
    })
}

pub(crate) fn build_runtime(command: &str) -> Result<Runtime, CommandResult> {
    tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
        CommandResult::failure(
            command,
            "runtime_init",
            format!("failed to initialize async runtime: {error}"),
            3,
        )
    })
}

/// Installs the stderr subscriber once per process; later calls are no-ops.
pub(crate) fn init_logging(logging: &LoggingConfig) {
    use tracing::Level;

    let log_level = logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let _ = match logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}

/// Connects, applies pending migrations and wires a service for one command.
pub(crate) async fn open_service(
    config: &AppConfig,
) -> Result<CliWorkflowService, (&'static str, String, u8)> {
    let pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

    migrations::run_pending(&pool).await.map_err(|error| ("migration", error.to_string(), 5u8))?;

    Ok(WorkflowService::new(
        Arc::new(SqlWorkflowRepository::new(pool)),
        WorkflowTemplateCatalog::new(),
        TracingAuditSink,
    )
    .with_correlation_id(format!("cli-{}", Uuid::new_v4())))
}

/// Runs `body` against a freshly opened service, mapping every failure to a
/// `CommandResult`.
pub(crate) fn with_service<F, Fut>(command: &str, options: LoadOptions, body: F) -> CommandResult
where
    F: FnOnce(CliWorkflowService) -> Fut,
    Fut: std::future::Future<Output = CommandResult>,
{
    let config = match load_config(command, options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    init_logging(&config.logging);

    let runtime = match build_runtime(command) {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    runtime.block_on(async {
        match open_service(&config).await {
            Ok(service) => body(service).await,
            Err((error_class, message, exit_code)) => {
                CommandResult::failure(command, error_class, message, exit_code)
            }
        }
    })
}
