use std::fs;
use std::path::PathBuf;

use serde::Serialize;
use slotform_core::business::load_file;
use slotform_core::config::LoadOptions;
use slotform_core::errors::ApplicationError;

use super::{load_config, CommandResult, EXIT_BUSINESS_CONFIG};

const COMMAND: &str = "check";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
}

#[derive(Debug, Serialize)]
struct FileCheck {
    file: String,
    business: Option<String>,
    status: CheckStatus,
    details: String,
}

/// Loads every business file on its own so one broken file does not hide the others.
pub fn run(options: LoadOptions) -> CommandResult {
    let config = match load_config(COMMAND, options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    crate::init_logging(&config);

    let dir = &config.business.config_dir;
    let mut paths: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().and_then(|extension| extension.to_str()) == Some("json"))
            .collect(),
        Err(error) => {
            return CommandResult::from_error(
                COMMAND,
                ApplicationError::BusinessConfiguration(format!(
                    "could not read `{}`: {error}",
                    dir.display()
                )),
            );
        }
    };
    paths.sort();

    let mut checks: Vec<FileCheck> = paths
        .iter()
        .map(|path| match load_file(path) {
            Ok(line) => FileCheck {
                file: path.display().to_string(),
                business: Some(line.id().to_string()),
                status: CheckStatus::Pass,
                details: format!("{} slot(s)", line.schema().definitions().len()),
            },
            Err(error) => FileCheck {
                file: path.display().to_string(),
                business: None,
                status: CheckStatus::Fail,
                details: error.to_string(),
            },
        })
        .collect();

    let default_line = &config.business.default_line;
    if !checks.iter().any(|check| check.business.as_deref() == Some(default_line.as_str())) {
        checks.push(FileCheck {
            file: dir.join(format!("{default_line}.json")).display().to_string(),
            business: Some(default_line.clone()),
            status: CheckStatus::Fail,
            details: "default business line is missing or invalid".to_string(),
        });
    }

    let failed = checks.iter().filter(|check| check.status == CheckStatus::Fail).count();
    let details = serde_json::to_value(&checks).ok();
    if failed == 0 {
        CommandResult::success_with_details(
            COMMAND,
            format!("{} business config file(s) valid", checks.len()),
            details,
        )
    } else {
        CommandResult::failure_with_details(
            COMMAND,
            "business_config",
            format!("{failed} check(s) failed"),
            EXIT_BUSINESS_CONFIG,
            details,
        )
    }
}
