use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::ptp::BusinessRules;

/// Process-wide configuration, loaded once at startup and constant
/// thereafter. Precedence: defaults < config file < `RECOVERIES_*`
/// environment < programmatic overrides.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub business_rules: BusinessRules,
    pub llm: LlmConfig,
    pub gateway: GatewayConfig,
    pub prompts: PromptsConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub transport: LlmTransport,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub enabled: bool,
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct PromptsConfig {
    pub base_url: Option<String>,
    pub project: String,
    pub timeout_secs: u64,
    pub cache_ttl_secs: u64,
    pub environment: Option<String>,
    pub system_slug: Option<String>,
    pub system_version: Option<String>,
    pub extraction_slug: Option<String>,
    pub extraction_version: Option<String>,
    pub fallback_dir: PathBuf,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmTransport {
    Direct,
    Gateway,
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
    pub log_level: Option<String>,
    pub llm_transport: Option<LlmTransport>,
    pub llm_api_key: Option<String>,
    pub llm_model: Option<String>,
    pub gateway_enabled: Option<bool>,
    pub gateway_base_url: Option<String>,
    pub prompts_base_url: Option<String>,
    pub system_slug: Option<String>,
    pub extraction_slug: Option<String>,
    pub min_ptp_percent: Option<f64>,
    pub max_ptp_days: Option<u32>,
    pub fallback_dir: Option<PathBuf>,
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
            business_rules: BusinessRules::default(),
            llm: LlmConfig {
                transport: LlmTransport::Direct,
                api_key: None,
                base_url: None,
                model: "claude-sonnet-4-20250514".to_string(),
                timeout_secs: 30,
            },
            gateway: GatewayConfig {
                enabled: false,
                base_url: "http://localhost:3000".to_string(),
                timeout_secs: 30,
            },
            prompts: PromptsConfig {
                base_url: None,
                project: "recoveries-agent".to_string(),
                timeout_secs: 10,
                cache_ttl_secs: 60,
                environment: None,
                system_slug: Some("andrea-recoveries-agent".to_string()),
                system_version: None,
                extraction_slug: Some("extract-ptp-json".to_string()),
                extraction_version: None,
                fallback_dir: PathBuf::from("prompts"),
            },
            server: ServerConfig { bind_address: "127.0.0.1".to_string(), port: 8000 },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LlmTransport {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "gateway" => Ok(Self::Gateway),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm transport `{other}` (expected direct|gateway)"
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("recoveries.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(rules) = patch.business_rules {
            if let Some(min_ptp_percent) = rules.min_ptp_percent {
                self.business_rules.min_ptp_percent = min_ptp_percent;
            }
            if let Some(max_ptp_days) = rules.max_ptp_days {
                self.business_rules.max_ptp_days = max_ptp_days;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(transport) = llm.transport {
                self.llm.transport = transport;
            }
            if let Some(api_key_value) = llm.api_key {
                self.llm.api_key = Some(SecretString::from(api_key_value));
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
        }

        if let Some(gateway) = patch.gateway {
            if let Some(enabled) = gateway.enabled {
                self.gateway.enabled = enabled;
            }
            if let Some(base_url) = gateway.base_url {
                self.gateway.base_url = base_url;
            }
            if let Some(timeout_secs) = gateway.timeout_secs {
                self.gateway.timeout_secs = timeout_secs;
            }
        }

        if let Some(prompts) = patch.prompts {
            if let Some(base_url) = prompts.base_url {
                self.prompts.base_url = Some(base_url);
            }
            if let Some(project) = prompts.project {
                self.prompts.project = project;
            }
            if let Some(timeout_secs) = prompts.timeout_secs {
                self.prompts.timeout_secs = timeout_secs;
            }
            if let Some(cache_ttl_secs) = prompts.cache_ttl_secs {
                self.prompts.cache_ttl_secs = cache_ttl_secs;
            }
            if let Some(environment) = prompts.environment {
                self.prompts.environment = Some(environment);
            }
            if let Some(system_slug) = prompts.system_slug {
                self.prompts.system_slug = Some(system_slug);
            }
            if let Some(system_version) = prompts.system_version {
                self.prompts.system_version = Some(system_version);
            }
            if let Some(extraction_slug) = prompts.extraction_slug {
                self.prompts.extraction_slug = Some(extraction_slug);
            }
            if let Some(extraction_version) = prompts.extraction_version {
                self.prompts.extraction_version = Some(extraction_version);
            }
            if let Some(fallback_dir) = prompts.fallback_dir {
                self.prompts.fallback_dir = fallback_dir;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
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
        if let Some(value) = read_env("RECOVERIES_MIN_PTP_PERCENT") {
            self.business_rules.min_ptp_percent = parse_f64("RECOVERIES_MIN_PTP_PERCENT", &value)?;
        }
        if let Some(value) = read_env("RECOVERIES_MAX_PTP_DAYS") {
            self.business_rules.max_ptp_days = parse_u32("RECOVERIES_MAX_PTP_DAYS", &value)?;
        }

        if let Some(value) = read_env("RECOVERIES_LLM_TRANSPORT") {
            self.llm.transport = value.parse()?;
        }
        if let Some(value) = read_env("RECOVERIES_LLM_API_KEY") {
            self.llm.api_key = Some(SecretString::from(value));
        }
        if let Some(value) = read_env("RECOVERIES_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("RECOVERIES_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("RECOVERIES_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("RECOVERIES_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("RECOVERIES_GATEWAY_ENABLED") {
            self.gateway.enabled = parse_bool("RECOVERIES_GATEWAY_ENABLED", &value)?;
        }
        if let Some(value) = read_env("RECOVERIES_GATEWAY_BASE_URL") {
            self.gateway.base_url = value;
        }
        if let Some(value) = read_env("RECOVERIES_GATEWAY_TIMEOUT_SECS") {
            self.gateway.timeout_secs = parse_u64("RECOVERIES_GATEWAY_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("RECOVERIES_PROMPTS_BASE_URL") {
            self.prompts.base_url = Some(value);
        }
        if let Some(value) = read_env("RECOVERIES_PROMPTS_PROJECT") {
            self.prompts.project = value;
        }
        if let Some(value) = read_env("RECOVERIES_PROMPTS_TIMEOUT_SECS") {
            self.prompts.timeout_secs = parse_u64("RECOVERIES_PROMPTS_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("RECOVERIES_PROMPT_CACHE_TTL_SECS") {
            self.prompts.cache_ttl_secs = parse_u64("RECOVERIES_PROMPT_CACHE_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("RECOVERIES_PROMPTS_ENVIRONMENT") {
            self.prompts.environment = Some(value);
        }
        if let Some(value) = read_env("RECOVERIES_SYSTEM_PROMPT_SLUG") {
            self.prompts.system_slug = Some(value);
        }
        if let Some(value) = read_env("RECOVERIES_SYSTEM_PROMPT_VERSION") {
            self.prompts.system_version = Some(value);
        }
        if let Some(value) = read_env("RECOVERIES_EXTRACT_PTP_PROMPT_SLUG") {
            self.prompts.extraction_slug = Some(value);
        }
        if let Some(value) = read_env("RECOVERIES_EXTRACT_PTP_PROMPT_VERSION") {
            self.prompts.extraction_version = Some(value);
        }
        if let Some(value) = read_env("RECOVERIES_PROMPTS_FALLBACK_DIR") {
            self.prompts.fallback_dir = PathBuf::from(value);
        }

        if let Some(value) = read_env("RECOVERIES_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("RECOVERIES_SERVER_PORT") {
            self.server.port = parse_u16("RECOVERIES_SERVER_PORT", &value)?;
        }

        let log_level =
            read_env("RECOVERIES_LOGGING_LEVEL").or_else(|| read_env("RECOVERIES_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("RECOVERIES_LOGGING_FORMAT").or_else(|| read_env("RECOVERIES_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(transport) = overrides.llm_transport {
            self.llm.transport = transport;
        }
        if let Some(api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(SecretString::from(api_key));
        }
        if let Some(model) = overrides.llm_model {
            self.llm.model = model;
        }
        if let Some(enabled) = overrides.gateway_enabled {
            self.gateway.enabled = enabled;
        }
        if let Some(base_url) = overrides.gateway_base_url {
            self.gateway.base_url = base_url;
        }
        if let Some(base_url) = overrides.prompts_base_url {
            self.prompts.base_url = Some(base_url);
        }
        if let Some(system_slug) = overrides.system_slug {
            self.prompts.system_slug = Some(system_slug);
        }
        if let Some(extraction_slug) = overrides.extraction_slug {
            self.prompts.extraction_slug = Some(extraction_slug);
        }
        if let Some(min_ptp_percent) = overrides.min_ptp_percent {
            self.business_rules.min_ptp_percent = min_ptp_percent;
        }
        if let Some(max_ptp_days) = overrides.max_ptp_days {
            self.business_rules.max_ptp_days = max_ptp_days;
        }
        if let Some(fallback_dir) = overrides.fallback_dir {
            self.prompts.fallback_dir = fallback_dir;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_business_rules(&self.business_rules)?;
        validate_llm(&self.llm)?;
        validate_gateway(&self.gateway)?;
        validate_prompts(&self.prompts)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("recoveries.toml"), PathBuf::from("config/recoveries.toml")]
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

/// Expands `${VAR}` references in the raw config text. A referenced
/// variable that is unset is an error rather than an empty string.
fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let tail = &rest[start + 2..];
        let Some(end) = tail.find('}') else {
            return Err(ConfigError::UnterminatedInterpolation);
        };
        let key = &tail[..end];
        let value =
            env::var(key).map_err(|_| ConfigError::MissingEnvInterpolation { var: key.into() })?;
        output.push_str(&value);
        rest = &tail[end + 1..];
    }

    output.push_str(rest);
    Ok(output)
}

fn validate_business_rules(rules: &BusinessRules) -> Result<(), ConfigError> {
    if !(rules.min_ptp_percent > 0.0 && rules.min_ptp_percent <= 1.0) {
        return Err(ConfigError::Validation(
            "business_rules.min_ptp_percent must be in range (0, 1]".to_string(),
        ));
    }

    if rules.max_ptp_days == 0 || rules.max_ptp_days > 365 {
        return Err(ConfigError::Validation(
            "business_rules.max_ptp_days must be in range 1..=365".to_string(),
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

    if llm.model.trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }

    if llm.transport == LlmTransport::Direct {
        let missing = llm
            .api_key
            .as_ref()
            .map(|value| value.expose_secret().trim().is_empty())
            .unwrap_or(true);
        if missing {
            return Err(ConfigError::Validation(
                "llm.api_key is required for the direct transport".to_string(),
            ));
        }
    }

    Ok(())
}

fn validate_gateway(gateway: &GatewayConfig) -> Result<(), ConfigError> {
    // A disabled gateway with a selected gateway transport is legal config;
    // the model adapter reports it as a transport failure at invoke time.
    if gateway.base_url.trim().is_empty() {
        return Err(ConfigError::Validation("gateway.base_url must not be empty".to_string()));
    }
    if !gateway.base_url.starts_with("http://") && !gateway.base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "gateway.base_url must start with http:// or https://".to_string(),
        ));
    }
    if gateway.timeout_secs == 0 || gateway.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "gateway.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_prompts(prompts: &PromptsConfig) -> Result<(), ConfigError> {
    if let Some(base_url) = &prompts.base_url {
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::Validation(
                "prompts.base_url must start with http:// or https://".to_string(),
            ));
        }
    }

    if prompts.project.trim().is_empty() {
        return Err(ConfigError::Validation("prompts.project must not be empty".to_string()));
    }

    if prompts.timeout_secs == 0 || prompts.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "prompts.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    // The prompt service accepts an environment OR a pinned version,
    // never both.
    if prompts.environment.is_some()
        && (prompts.system_version.is_some() || prompts.extraction_version.is_some())
    {
        return Err(ConfigError::Validation(
            "prompts.environment and prompt version pins are mutually exclusive".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }
    if server.port == 0 {
        return Err(ConfigError::Validation(
            "server.port must be greater than zero".to_string(),
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

fn parse_f64(key: &str, value: &str) -> Result<f64, ConfigError> {
    value.parse::<f64>().map_err(|_| ConfigError::InvalidEnvOverride {
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
    business_rules: Option<BusinessRulesPatch>,
    llm: Option<LlmPatch>,
    gateway: Option<GatewayPatch>,
    prompts: Option<PromptsPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct BusinessRulesPatch {
    min_ptp_percent: Option<f64>,
    max_ptp_days: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    transport: Option<LlmTransport>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct GatewayPatch {
    enabled: Option<bool>,
    base_url: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PromptsPatch {
    base_url: Option<String>,
    project: Option<String>,
    timeout_secs: Option<u64>,
    cache_ttl_secs: Option<u64>,
    environment: Option<String>,
    system_slug: Option<String>,
    system_version: Option<String>,
    extraction_slug: Option<String>,
    extraction_version: Option<String>,
    fallback_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
