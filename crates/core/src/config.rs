use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Duration;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub quoting: QuotingConfig,
    pub scheduling: SchedulingConfig,
    pub notification: NotificationConfig,
    pub funnel: FunnelConfig,
    pub lexicon: LexiconConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub routing_enabled: bool,
    pub extraction_enabled: bool,
}

#[derive(Clone, Debug)]
pub struct QuotingConfig {
    /// Absent means the offline price table is used.
    pub base_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub timeout_secs: u64,
    pub currency_symbol: String,
    pub guarantee_days: u32,
}

#[derive(Clone, Debug)]
pub struct SchedulingConfig {
    pub base_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct NotificationConfig {
    pub webhook_url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct FunnelConfig {
    pub slot_ttl_secs: u64,
    pub disambiguation_cooldown_secs: u64,
    pub off_topic_threshold: u32,
    pub quote_cache_ttl_secs: u64,
}

impl FunnelConfig {
    pub fn slot_ttl(&self) -> Duration {
        seconds(self.slot_ttl_secs)
    }

    pub fn disambiguation_cooldown(&self) -> Duration {
        seconds(self.disambiguation_cooldown_secs)
    }

    pub fn quote_cache_ttl(&self) -> Duration {
        seconds(self.quote_cache_ttl_secs)
    }
}

fn seconds(value: u64) -> Duration {
    Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX / 1000))
}

#[derive(Clone, Debug, Default)]
pub struct LexiconConfig {
    pub path: Option<PathBuf>,
    pub knowledge_path: Option<PathBuf>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    OpenAi,
    Anthropic,
    Ollama,
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
    pub llm_provider: Option<LlmProvider>,
    pub llm_model: Option<String>,
    pub server_port: Option<u16>,
    pub quoting_base_url: Option<String>,
    pub scheduling_base_url: Option<String>,
    pub notification_webhook_url: Option<String>,
    pub lexicon_path: Option<PathBuf>,
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
                url: "sqlite://fixdesk.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            llm: LlmConfig {
                provider: LlmProvider::Ollama,
                api_key: None,
                base_url: Some("http://localhost:11434".to_string()),
                model: "llama3.1".to_string(),
                timeout_secs: 20,
                max_retries: 1,
                routing_enabled: true,
                extraction_enabled: true,
            },
            quoting: QuotingConfig {
                base_url: None,
                api_key: None,
                timeout_secs: 8,
                currency_symbol: "R$".to_string(),
                guarantee_days: 90,
            },
            scheduling: SchedulingConfig { base_url: None, api_key: None, timeout_secs: 8 },
            notification: NotificationConfig { webhook_url: None, timeout_secs: 5 },
            funnel: FunnelConfig {
                slot_ttl_secs: 1800,
                disambiguation_cooldown_secs: 30,
                off_topic_threshold: 3,
                quote_cache_ttl_secs: 1800,
            },
            lexicon: LexiconConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" | "open_ai" => Ok(Self::OpenAi),
            "anthropic" => Ok(Self::Anthropic),
            "ollama" => Ok(Self::Ollama),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|anthropic|ollama)"
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("fixdesk.toml"));
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

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(api_key) = llm.api_key {
                self.llm.api_key = Some(secret_value(api_key));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
            if let Some(routing_enabled) = llm.routing_enabled {
                self.llm.routing_enabled = routing_enabled;
            }
            if let Some(extraction_enabled) = llm.extraction_enabled {
                self.llm.extraction_enabled = extraction_enabled;
            }
        }

        if let Some(quoting) = patch.quoting {
            if let Some(base_url) = quoting.base_url {
                self.quoting.base_url = Some(base_url);
            }
            if let Some(api_key) = quoting.api_key {
                self.quoting.api_key = Some(secret_value(api_key));
            }
            if let Some(timeout_secs) = quoting.timeout_secs {
                self.quoting.timeout_secs = timeout_secs;
            }
            if let Some(currency_symbol) = quoting.currency_symbol {
                self.quoting.currency_symbol = currency_symbol;
            }
            if let Some(guarantee_days) = quoting.guarantee_days {
                self.quoting.guarantee_days = guarantee_days;
            }
        }

        if let Some(scheduling) = patch.scheduling {
            if let Some(base_url) = scheduling.base_url {
                self.scheduling.base_url = Some(base_url);
            }
            if let Some(api_key) = scheduling.api_key {
                self.scheduling.api_key = Some(secret_value(api_key));
            }
            if let Some(timeout_secs) = scheduling.timeout_secs {
                self.scheduling.timeout_secs = timeout_secs;
            }
        }

        if let Some(notification) = patch.notification {
            if let Some(webhook_url) = notification.webhook_url {
                self.notification.webhook_url = Some(webhook_url);
            }
            if let Some(timeout_secs) = notification.timeout_secs {
                self.notification.timeout_secs = timeout_secs;
            }
        }

        if let Some(funnel) = patch.funnel {
            if let Some(slot_ttl_secs) = funnel.slot_ttl_secs {
                self.funnel.slot_ttl_secs = slot_ttl_secs;
            }
            if let Some(cooldown) = funnel.disambiguation_cooldown_secs {
                self.funnel.disambiguation_cooldown_secs = cooldown;
            }
            if let Some(off_topic_threshold) = funnel.off_topic_threshold {
                self.funnel.off_topic_threshold = off_topic_threshold;
            }
            if let Some(quote_cache_ttl_secs) = funnel.quote_cache_ttl_secs {
                self.funnel.quote_cache_ttl_secs = quote_cache_ttl_secs;
            }
        }

        if let Some(lexicon) = patch.lexicon {
            if let Some(path) = lexicon.path {
                self.lexicon.path = Some(path);
            }
            if let Some(knowledge_path) = lexicon.knowledge_path {
                self.lexicon.knowledge_path = Some(knowledge_path);
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
        if let Some(value) = read_env("FIXDESK_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("FIXDESK_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("FIXDESK_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("FIXDESK_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("FIXDESK_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("FIXDESK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("FIXDESK_SERVER_PORT") {
            self.server.port = parse_u16("FIXDESK_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("FIXDESK_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("FIXDESK_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("FIXDESK_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("FIXDESK_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("FIXDESK_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("FIXDESK_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("FIXDESK_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("FIXDESK_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("FIXDESK_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("FIXDESK_LLM_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("FIXDESK_LLM_ROUTING_ENABLED") {
            self.llm.routing_enabled = parse_bool("FIXDESK_LLM_ROUTING_ENABLED", &value)?;
        }
        if let Some(value) = read_env("FIXDESK_LLM_EXTRACTION_ENABLED") {
            self.llm.extraction_enabled = parse_bool("FIXDESK_LLM_EXTRACTION_ENABLED", &value)?;
        }

        if let Some(value) = read_env("FIXDESK_QUOTING_BASE_URL") {
            self.quoting.base_url = Some(value);
        }
        if let Some(value) = read_env("FIXDESK_QUOTING_API_KEY") {
            self.quoting.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("FIXDESK_QUOTING_TIMEOUT_SECS") {
            self.quoting.timeout_secs = parse_u64("FIXDESK_QUOTING_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("FIXDESK_QUOTING_CURRENCY_SYMBOL") {
            self.quoting.currency_symbol = value;
        }
        if let Some(value) = read_env("FIXDESK_QUOTING_GUARANTEE_DAYS") {
            self.quoting.guarantee_days = parse_u32("FIXDESK_QUOTING_GUARANTEE_DAYS", &value)?;
        }

        if let Some(value) = read_env("FIXDESK_SCHEDULING_BASE_URL") {
            self.scheduling.base_url = Some(value);
        }
        if let Some(value) = read_env("FIXDESK_SCHEDULING_API_KEY") {
            self.scheduling.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("FIXDESK_SCHEDULING_TIMEOUT_SECS") {
            self.scheduling.timeout_secs = parse_u64("FIXDESK_SCHEDULING_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("FIXDESK_NOTIFICATION_WEBHOOK_URL") {
            self.notification.webhook_url = Some(value);
        }
        if let Some(value) = read_env("FIXDESK_NOTIFICATION_TIMEOUT_SECS") {
            self.notification.timeout_secs =
                parse_u64("FIXDESK_NOTIFICATION_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("FIXDESK_FUNNEL_SLOT_TTL_SECS") {
            self.funnel.slot_ttl_secs = parse_u64("FIXDESK_FUNNEL_SLOT_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("FIXDESK_FUNNEL_DISAMBIGUATION_COOLDOWN_SECS") {
            self.funnel.disambiguation_cooldown_secs =
                parse_u64("FIXDESK_FUNNEL_DISAMBIGUATION_COOLDOWN_SECS", &value)?;
        }
        if let Some(value) = read_env("FIXDESK_FUNNEL_OFF_TOPIC_THRESHOLD") {
            self.funnel.off_topic_threshold =
                parse_u32("FIXDESK_FUNNEL_OFF_TOPIC_THRESHOLD", &value)?;
        }
        if let Some(value) = read_env("FIXDESK_FUNNEL_QUOTE_CACHE_TTL_SECS") {
            self.funnel.quote_cache_ttl_secs =
                parse_u64("FIXDESK_FUNNEL_QUOTE_CACHE_TTL_SECS", &value)?;
        }

        if let Some(value) = read_env("FIXDESK_LEXICON_PATH") {
            self.lexicon.path = Some(PathBuf::from(value));
        }
        if let Some(value) = read_env("FIXDESK_LEXICON_KNOWLEDGE_PATH") {
            self.lexicon.knowledge_path = Some(PathBuf::from(value));
        }

        let log_level =
            read_env("FIXDESK_LOGGING_LEVEL").or_else(|| read_env("FIXDESK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("FIXDESK_LOGGING_FORMAT").or_else(|| read_env("FIXDESK_LOG_FORMAT"));
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
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(base_url) = overrides.quoting_base_url {
            self.quoting.base_url = Some(base_url);
        }
        if let Some(base_url) = overrides.scheduling_base_url {
            self.scheduling.base_url = Some(base_url);
        }
        if let Some(webhook_url) = overrides.notification_webhook_url {
            self.notification.webhook_url = Some(webhook_url);
        }
        if let Some(path) = overrides.lexicon_path {
            self.lexicon.path = Some(path);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_llm(&self.llm)?;
        validate_collaborators(self)?;
        validate_funnel(&self.funnel)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("fixdesk.toml"), PathBuf::from("config/fixdesk.toml")]
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

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::OpenAi | LlmProvider::Anthropic => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for openai/anthropic providers".to_string(),
                ));
            }
        }
        LlmProvider::Ollama => {
            let missing =
                llm.base_url.as_ref().map(|value| value.trim().is_empty()).unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.base_url is required for ollama provider".to_string(),
                ));
            }
        }
    }

    if let Some(base_url) = &llm.base_url {
        validate_url("llm.base_url", base_url)?;
    }

    Ok(())
}

fn validate_collaborators(config: &AppConfig) -> Result<(), ConfigError> {
    let urls = [
        ("quoting.base_url", config.quoting.base_url.as_deref()),
        ("scheduling.base_url", config.scheduling.base_url.as_deref()),
        ("notification.webhook_url", config.notification.webhook_url.as_deref()),
    ];
    for (key, url) in urls {
        if let Some(url) = url {
            validate_url(key, url)?;
        }
    }

    let timeouts = [
        ("quoting.timeout_secs", config.quoting.timeout_secs),
        ("scheduling.timeout_secs", config.scheduling.timeout_secs),
        ("notification.timeout_secs", config.notification.timeout_secs),
    ];
    for (key, timeout_secs) in timeouts {
        if timeout_secs == 0 || timeout_secs > 300 {
            return Err(ConfigError::Validation(format!("{key} must be in range 1..=300")));
        }
    }

    if config.quoting.currency_symbol.trim().is_empty() {
        return Err(ConfigError::Validation(
            "quoting.currency_symbol must not be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_url(key: &str, url: &str) -> Result<(), ConfigError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(ConfigError::Validation(format!("{key} must start with http:// or https://")));
    }
    Ok(())
}

fn validate_funnel(funnel: &FunnelConfig) -> Result<(), ConfigError> {
    if funnel.slot_ttl_secs == 0 || funnel.quote_cache_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "funnel.slot_ttl_secs and funnel.quote_cache_ttl_secs must be greater than zero"
                .to_string(),
        ));
    }

    if funnel.off_topic_threshold == 0 {
        return Err(ConfigError::Validation(
            "funnel.off_topic_threshold must be greater than zero".to_string(),
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

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    llm: Option<LlmPatch>,
    quoting: Option<QuotingPatch>,
    scheduling: Option<SchedulingPatch>,
    notification: Option<NotificationPatch>,
    funnel: Option<FunnelPatch>,
    lexicon: Option<LexiconPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    routing_enabled: Option<bool>,
    extraction_enabled: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct QuotingPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
    currency_symbol: Option<String>,
    guarantee_days: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct SchedulingPatch {
    base_url: Option<String>,
    api_key: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct NotificationPatch {
    webhook_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct FunnelPatch {
    slot_ttl_secs: Option<u64>,
    disambiguation_cooldown_secs: Option<u64>,
    off_topic_threshold: Option<u32>,
    quote_cache_ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LexiconPatch {
    path: Option<PathBuf>,
    knowledge_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_are_valid_and_offline() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.quoting.base_url.is_none(), "quoting should default to offline")?;
        ensure(config.scheduling.base_url.is_none(), "scheduling should default to offline")?;
        ensure(config.funnel.slot_ttl_secs == 1800, "slot ttl should default to 30 minutes")?;
        ensure(config.funnel.off_topic_threshold == 3, "off-topic threshold should be 3")?;
        ensure(config.quoting.currency_symbol == "R$", "currency symbol should default to R$")?;
        ensure(
            config.funnel.disambiguation_cooldown().num_seconds() == 30,
            "cooldown should default to 30 seconds",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_FIXDESK_LLM_KEY", "sk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("fixdesk.toml");
            fs::write(
                &path,
                r#"
[llm]
provider = "open_ai"
api_key = "${TEST_FIXDESK_LLM_KEY}"
base_url = "https://api.openai.com/v1"

[funnel]
off_topic_threshold = 5
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.llm.provider == LlmProvider::OpenAi, "provider should come from file")?;
            ensure(
                config.llm.api_key.as_ref().map(|key| key.expose_secret() == "sk-from-env")
                    == Some(true),
                "api key should be interpolated from environment",
            )?;
            ensure(config.funnel.off_topic_threshold == 5, "funnel patch should apply")?;
            Ok(())
        })();

        clear_vars(&["TEST_FIXDESK_LLM_KEY"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("FIXDESK_LOG_LEVEL", "warn");
        env::set_var("FIXDESK_LOG_FORMAT", "json");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Json),
                "json logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["FIXDESK_LOG_LEVEL", "FIXDESK_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("FIXDESK_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("FIXDESK_QUOTING_BASE_URL", "https://quotes.from-env.test");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("fixdesk.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[quoting]
base_url = "https://quotes.from-file.test"
guarantee_days = 120

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.quoting.base_url.as_deref() == Some("https://quotes.from-env.test"),
                "env quoting url should win over file",
            )?;
            ensure(config.quoting.guarantee_days == 120, "file guarantee should apply")?;
            Ok(())
        })();

        clear_vars(&["FIXDESK_DATABASE_URL", "FIXDESK_QUOTING_BASE_URL"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("FIXDESK_SCHEDULING_BASE_URL", "ftp://calendar");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("scheduling.base_url")
            );
            ensure(has_message, "validation failure should mention scheduling.base_url")
        })();

        clear_vars(&["FIXDESK_SCHEDULING_BASE_URL"]);
        result
    }

    #[test]
    fn hosted_llm_provider_requires_api_key() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("FIXDESK_LLM_PROVIDER", "anthropic");

        let result = (|| -> Result<(), String> {
            let error = AppConfig::load(LoadOptions::default())
                .err()
                .ok_or_else(|| "expected missing api key error".to_string())?;
            ensure(error.to_string().contains("llm.api_key"), "error should name llm.api_key")
        })();

        clear_vars(&["FIXDESK_LLM_PROVIDER"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("FIXDESK_QUOTING_API_KEY", "quote-secret-value");
        env::set_var("FIXDESK_SCHEDULING_API_KEY", "calendar-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("quote-secret-value"),
                "debug output should not contain quoting key",
            )?;
            ensure(
                !debug.contains("calendar-secret-value"),
                "debug output should not contain scheduling key",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["FIXDESK_QUOTING_API_KEY", "FIXDESK_SCHEDULING_API_KEY"]);
        result
    }
}
