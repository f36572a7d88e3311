use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use slotform_core::config::{resolve_config_path, LoadOptions};
use toml::Value;

use super::{load_config, CommandResult};

const COMMAND: &str = "config";

struct Sources {
    file_path: Option<PathBuf>,
    file_doc: Option<Value>,
}

pub fn run(options: LoadOptions) -> CommandResult {
    let file_path = resolve_config_path(options.config_path.as_deref());
    let config = match load_config(COMMAND, options) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let sources = Sources { file_doc: load_config_file_doc(file_path.as_deref()), file_path };

    let llm_api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };
    let entries: [(&str, String, &[&str]); 10] = [
        (
            "business.config_dir",
            config.business.config_dir.display().to_string(),
            &["SLOTFORM_BUSINESS_CONFIG_DIR"],
        ),
        (
            "business.default_line",
            config.business.default_line.clone(),
            &["SLOTFORM_BUSINESS_DEFAULT_LINE"],
        ),
        ("llm.provider", config.llm.provider.as_str().to_string(), &["SLOTFORM_LLM_PROVIDER"]),
        ("llm.model", config.llm.model.clone(), &["SLOTFORM_LLM_MODEL"]),
        (
            "llm.base_url",
            config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            &["SLOTFORM_LLM_BASE_URL"],
        ),
        ("llm.api_key", llm_api_key.to_string(), &["SLOTFORM_LLM_API_KEY"]),
        ("llm.timeout_secs", config.llm.timeout_secs.to_string(), &["SLOTFORM_LLM_TIMEOUT_SECS"]),
        ("llm.max_retries", config.llm.max_retries.to_string(), &["SLOTFORM_LLM_MAX_RETRIES"]),
        (
            "logging.level",
            config.logging.level.clone(),
            &["SLOTFORM_LOGGING_LEVEL", "SLOTFORM_LOG_LEVEL"],
        ),
        (
            "logging.format",
            format!("{:?}", config.logging.format).to_lowercase(),
            &["SLOTFORM_LOGGING_FORMAT", "SLOTFORM_LOG_FORMAT"],
        ),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_keys) in &entries {
        lines.push(render_line(key, value, field_source(key, env_keys, &sources)));
    }
    CommandResult::success(COMMAND, lines.join("\n"))
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(key_path: &str, env_keys: &[&str], sources: &Sources) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = &sources.file_doc {
        if contains_path(doc, key_path) {
            let file_path = sources
                .file_path
                .as_ref()
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
