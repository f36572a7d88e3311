pub mod businesses;
pub mod chat;
pub mod check;
pub mod config;

use serde::Serialize;
use serde_json::{json, Value};
use slotform_core::business::BusinessCatalog;
use slotform_core::config::{AppConfig, LoadOptions};
use slotform_core::errors::ApplicationError;
use uuid::Uuid;

pub const EXIT_CONFIG: u8 = 2;
pub const EXIT_BUSINESS_CONFIG: u8 = 3;
pub const EXIT_IO: u8 = 4;

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
    details: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::success_with_details(command, message, None)
    }

    pub fn success_with_details(
        command: &str,
        message: impl Into<String>,
        details: Option<Value>,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            details,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    pub fn failure_with_details(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
        details: Option<Value>,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            details,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    /// Failure payload for an application error, mapped through its interface form.
    /// `details` carries the user-facing hint and the correlation id.
    pub fn from_error(command: &str, error: ApplicationError) -> Self {
        let (error_class, exit_code) = match &error {
            ApplicationError::Configuration(_) => ("config_validation", EXIT_CONFIG),
            ApplicationError::UnknownBusiness(_) => ("unknown_business", EXIT_BUSINESS_CONFIG),
            ApplicationError::BusinessConfiguration(_) => ("business_config", EXIT_BUSINESS_CONFIG),
            ApplicationError::Domain(_) => ("invalid_input", EXIT_BUSINESS_CONFIG),
            ApplicationError::Integration(_) => ("integration", EXIT_IO),
            ApplicationError::Io(_) => ("io", EXIT_IO),
        };
        let interface = error.into_interface(Uuid::new_v4().to_string());
        let details = json!({
            "hint": interface.user_message(),
            "correlation_id": interface.correlation_id(),
        });
        Self::failure_with_details(command, error_class, interface.to_string(), exit_code, Some(details))
    }

    /// Finished without a payload; `chat` writes its transcript directly.
    pub fn quiet() -> Self {
        Self { exit_code: 0, output: String::new() }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

pub(crate) fn load_config(command: &str, options: LoadOptions) -> Result<AppConfig, CommandResult> {
    AppConfig::load(options).map_err(|error| CommandResult::from_error(command, error.into()))
}

pub(crate) fn load_catalog(command: &str, config: &AppConfig) -> Result<BusinessCatalog, CommandResult> {
    BusinessCatalog::load_dir(&config.business.config_dir)
        .map_err(|error| CommandResult::from_error(command, error.into()))
}
