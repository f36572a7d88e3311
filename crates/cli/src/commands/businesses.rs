use serde::Serialize;
use slotform_core::config::LoadOptions;

use super::{load_catalog, load_config, CommandResult};

const COMMAND: &str = "businesses";

#[derive(Debug, Serialize)]
struct BusinessSummary {
    id: String,
    display_name: String,
    slots: usize,
    required_slots: usize,
    default: bool,
}

pub fn run(options: LoadOptions) -> CommandResult {
    let config = match load_config(COMMAND, options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let catalog = match load_catalog(COMMAND, &config) {
        Ok(catalog) => catalog,
        Err(result) => return result,
    };

    let summaries: Vec<BusinessSummary> = catalog
        .iter()
        .map(|line| {
            let definitions = line.schema().definitions();
            BusinessSummary {
                id: line.id().to_string(),
                display_name: line.display_name().to_string(),
                slots: definitions.len(),
                required_slots: definitions.iter().filter(|definition| definition.required).count(),
                default: line.id() == config.business.default_line,
            }
        })
        .collect();

    let message = format!(
        "{} business line(s) loaded from {}",
        summaries.len(),
        config.business.config_dir.display()
    );
    CommandResult::success_with_details(COMMAND, message, serde_json::to_value(&summaries).ok())
}
