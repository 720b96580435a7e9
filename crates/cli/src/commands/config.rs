use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use fixdesk_core::config::{AppConfig, LoadOptions};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use toml::Value;

use crate::commands::CommandResult;

#[derive(Debug, Serialize)]
pub struct ConfigEntry {
    pub key: &'static str,
    pub value: String,
    pub source: String,
}

pub fn run() -> CommandResult {
    run_with(LoadOptions::default())
}

/// Effective configuration with the source of each value (env > file > default).
pub fn run_with(options: LoadOptions) -> CommandResult {
    let config_file_path = detect_config_path(options.config_path.as_deref());
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let entries: Vec<ConfigEntry> = effective_values(&config)
        .into_iter()
        .map(|(key, value)| ConfigEntry {
            key,
            value,
            source: field_source(key, config_file_doc.as_ref(), config_file_path.as_deref()),
        })
        .collect();

    match serde_json::to_value(&entries) {
        Ok(details) => CommandResult::success_with(
            "config",
            "effective config (source precedence: env > file > default)",
            Some(details),
        ),
        Err(error) => CommandResult::failure("config", "serialization", error.to_string(), 3),
    }
}

fn effective_values(config: &AppConfig) -> Vec<(&'static str, String)> {
    fn optional(value: Option<&str>) -> String {
        value.unwrap_or("<unset>").to_string()
    }

    vec![
        ("database.url", config.database.url.clone()),
        ("database.max_connections", config.database.max_connections.to_string()),
        ("database.timeout_secs", config.database.timeout_secs.to_string()),
        ("server.bind_address", config.server.bind_address.clone()),
        ("server.port", config.server.port.to_string()),
        ("server.graceful_shutdown_secs", config.server.graceful_shutdown_secs.to_string()),
        ("llm.provider", format!("{:?}", config.llm.provider)),
        ("llm.model", config.llm.model.clone()),
        ("llm.base_url", optional(config.llm.base_url.as_deref())),
        ("llm.api_key", redact_secret(config.llm.api_key.as_ref())),
        ("llm.timeout_secs", config.llm.timeout_secs.to_string()),
        ("llm.routing_enabled", config.llm.routing_enabled.to_string()),
        ("llm.extraction_enabled", config.llm.extraction_enabled.to_string()),
        ("quoting.base_url", optional(config.quoting.base_url.as_deref())),
        ("quoting.api_key", redact_secret(config.quoting.api_key.as_ref())),
        ("quoting.currency_symbol", config.quoting.currency_symbol.clone()),
        ("quoting.guarantee_days", config.quoting.guarantee_days.to_string()),
        ("scheduling.base_url", optional(config.scheduling.base_url.as_deref())),
        ("scheduling.api_key", redact_secret(config.scheduling.api_key.as_ref())),
        ("notification.webhook_url", optional(config.notification.webhook_url.as_deref())),
        ("funnel.slot_ttl_secs", config.funnel.slot_ttl_secs.to_string()),
        ("funnel.off_topic_threshold", config.funnel.off_topic_threshold.to_string()),
        (
            "lexicon.path",
            config
                .lexicon
                .path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "<built-in>".to_string()),
        ),
        ("logging.level", config.logging.level.clone()),
        ("logging.format", format!("{:?}", config.logging.format)),
    ]
}

fn env_key(key_path: &str) -> String {
    format!("FIXDESK_{}", key_path.replace('.', "_").to_ascii_uppercase())
}

fn detect_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }

    [PathBuf::from("fixdesk.toml"), PathBuf::from("config/fixdesk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    let env_key = env_key(key_path);
    if env::var_os(&env_key).is_some() {
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

fn redact_secret(secret: Option<&SecretString>) -> String {
    let Some(secret) = secret else {
        return "<unset>".to_string();
    };
    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::{env_key, redact_secret};

    #[test]
    fn env_keys_follow_the_section_layout() {
        assert_eq!(env_key("llm.api_key"), "FIXDESK_LLM_API_KEY");
        assert_eq!(env_key("funnel.slot_ttl_secs"), "FIXDESK_FUNNEL_SLOT_TTL_SECS");
    }

    #[test]
    fn secrets_keep_only_their_prefix() {
        assert_eq!(redact_secret(None), "<unset>");
        assert_eq!(redact_secret(Some(&SecretString::from("sk-live-123".to_string()))), "sk-***");
        assert_eq!(redact_secret(Some(&SecretString::from("plainsecret".to_string()))), "<redacted>");
    }
}
