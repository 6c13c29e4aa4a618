use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::plan::{MAX_NODE_RETRIES, MAX_TIMEOUT_MS, MIN_TIMEOUT_MS};
use crate::policy::DEFAULT_FORBIDDEN_TERMS;

#[derive(Clone, Debug)]
pub struct RouterConfig {
    pub executor: ExecutorConfig,
    pub planner: PlannerConfig,
    pub policy: PolicyConfig,
    pub llm: LlmConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutorConfig {
    pub base_delay_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannerConfig {
    pub default_timeout_ms: u64,
    pub response_timeout_ms: u64,
    pub refund_timeout_ms: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyConfig {
    pub forbidden_terms: Vec<String>,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub model: String,
    pub fallback_model: String,
    pub api_key: Option<SecretString>,
    pub base_url: String,
    pub temperature: f32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    pub orders_path: PathBuf,
    pub refunds_path: PathBuf,
    pub database_url: Option<String>,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
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
    pub base_delay_ms: Option<u64>,
    pub forbidden_terms: Option<Vec<String>>,
    pub llm_model: Option<String>,
    pub llm_api_key: Option<String>,
    pub orders_path: Option<PathBuf>,
    pub refunds_path: Option<PathBuf>,
    pub database_url: Option<String>,
    pub log_level: Option<String>,
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
    #[error("pattern `{label}` does not compile: {source}")]
    InvalidPattern { label: String, source: regex::Error },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { base_delay_ms: 250 }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 8_000,
            response_timeout_ms: 12_000,
            refund_timeout_ms: 15_000,
            max_retries: 2,
        }
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self { forbidden_terms: DEFAULT_FORBIDDEN_TERMS.iter().map(|t| t.to_string()).collect() }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            fallback_model: DEFAULT_MODEL.to_string(),
            api_key: None,
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            temperature: 0.1,
            timeout_secs: 30,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            orders_path: PathBuf::from("assets/orders.json"),
            refunds_path: PathBuf::from("assets/refunds.json"),
            database_url: None,
        }
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            executor: ExecutorConfig::default(),
            planner: PlannerConfig::default(),
            policy: PolicyConfig::default(),
            llm: LlmConfig::default(),
            store: StoreConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
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

impl LlmConfig {
    /// Model name with any `-latest` alias suffix removed.
    pub fn resolved_model(&self) -> &str {
        self.model.strip_suffix("-latest").unwrap_or(&self.model)
    }
}

impl RouterConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("deskroute.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(executor) = patch.executor {
            if let Some(base_delay_ms) = executor.base_delay_ms {
                self.executor.base_delay_ms = base_delay_ms;
            }
        }

        if let Some(planner) = patch.planner {
            if let Some(value) = planner.default_timeout_ms {
                self.planner.default_timeout_ms = value;
            }
            if let Some(value) = planner.response_timeout_ms {
                self.planner.response_timeout_ms = value;
            }
            if let Some(value) = planner.refund_timeout_ms {
                self.planner.refund_timeout_ms = value;
            }
            if let Some(value) = planner.max_retries {
                self.planner.max_retries = value;
            }
        }

        if let Some(policy) = patch.policy {
            if let Some(forbidden_terms) = policy.forbidden_terms {
                self.policy.forbidden_terms = forbidden_terms;
            }
        }

        if let Some(llm) = patch.llm {
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(fallback_model) = llm.fallback_model {
                self.llm.fallback_model = fallback_model;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(llm_api_key_value.into());
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = base_url;
            }
            if let Some(temperature) = llm.temperature {
                self.llm.temperature = temperature;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
        }

        if let Some(store) = patch.store {
            if let Some(orders_path) = store.orders_path {
                self.store.orders_path = orders_path;
            }
            if let Some(refunds_path) = store.refunds_path {
                self.store.refunds_path = refunds_path;
            }
            if let Some(database_url) = store.database_url {
                self.store.database_url = Some(database_url);
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
        if let Some(value) = read_env("DESKROUTE_EXECUTOR_BASE_DELAY_MS") {
            self.executor.base_delay_ms = parse_u64("DESKROUTE_EXECUTOR_BASE_DELAY_MS", &value)?;
        }

        if let Some(value) = read_env("DESKROUTE_PLANNER_DEFAULT_TIMEOUT_MS") {
            self.planner.default_timeout_ms =
                parse_u64("DESKROUTE_PLANNER_DEFAULT_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("DESKROUTE_PLANNER_RESPONSE_TIMEOUT_MS") {
            self.planner.response_timeout_ms =
                parse_u64("DESKROUTE_PLANNER_RESPONSE_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("DESKROUTE_PLANNER_REFUND_TIMEOUT_MS") {
            self.planner.refund_timeout_ms =
                parse_u64("DESKROUTE_PLANNER_REFUND_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("DESKROUTE_PLANNER_MAX_RETRIES") {
            self.planner.max_retries = parse_u32("DESKROUTE_PLANNER_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("DESKROUTE_POLICY_FORBIDDEN_TERMS") {
            self.policy.forbidden_terms = value
                .split(',')
                .map(str::trim)
                .filter(|term| !term.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(value) = read_env("DESKROUTE_LLM_MODEL").or_else(|| read_env("GEMINI_MODEL")) {
            self.llm.model = value;
        }
        let api_key = read_env("DESKROUTE_LLM_API_KEY").or_else(|| read_env("GOOGLE_API_KEY"));
        if let Some(value) = api_key {
            self.llm.api_key = Some(value.into());
        }
        if let Some(value) = read_env("DESKROUTE_LLM_BASE_URL") {
            self.llm.base_url = value;
        }
        if let Some(value) = read_env("DESKROUTE_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("DESKROUTE_LLM_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("DESKROUTE_STORE_ORDERS_PATH") {
            self.store.orders_path = PathBuf::from(value);
        }
        if let Some(value) = read_env("DESKROUTE_STORE_REFUNDS_PATH") {
            self.store.refunds_path = PathBuf::from(value);
        }
        if let Some(value) = read_env("DESKROUTE_STORE_DATABASE_URL") {
            self.store.database_url = Some(value);
        }

        let log_level =
            read_env("DESKROUTE_LOGGING_LEVEL").or_else(|| read_env("DESKROUTE_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("DESKROUTE_LOGGING_FORMAT").or_else(|| read_env("DESKROUTE_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(base_delay_ms) = overrides.base_delay_ms {
            self.executor.base_delay_ms = base_delay_ms;
        }
        if let Some(forbidden_terms) = overrides.forbidden_terms {
            self.policy.forbidden_terms = forbidden_terms;
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(llm_api_key.into());
        }
        if let Some(orders_path) = overrides.orders_path {
            self.store.orders_path = orders_path;
        }
        if let Some(refunds_path) = overrides.refunds_path {
            self.store.refunds_path = refunds_path;
        }
        if let Some(database_url) = overrides.database_url {
            self.store.database_url = Some(database_url);
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_executor(&self.executor)?;
        validate_planner(&self.planner)?;
        validate_policy(&self.policy)?;
        validate_llm(&self.llm)?;
        validate_store(&self.store)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("deskroute.toml"), PathBuf::from("config/deskroute.toml")]
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

fn validate_executor(executor: &ExecutorConfig) -> Result<(), ConfigError> {
    if executor.base_delay_ms == 0 || executor.base_delay_ms > 60_000 {
        return Err(ConfigError::Validation(
            "executor.base_delay_ms must be in range 1..=60000".to_string(),
        ));
    }
    Ok(())
}

fn validate_planner(planner: &PlannerConfig) -> Result<(), ConfigError> {
    let timeouts = [
        ("planner.default_timeout_ms", planner.default_timeout_ms),
        ("planner.response_timeout_ms", planner.response_timeout_ms),
        ("planner.refund_timeout_ms", planner.refund_timeout_ms),
    ];
    for (key, value) in timeouts {
        if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&value) {
            return Err(ConfigError::Validation(format!(
                "{key} must be in range {MIN_TIMEOUT_MS}..={MAX_TIMEOUT_MS}"
            )));
        }
    }

    if planner.max_retries > MAX_NODE_RETRIES {
        return Err(ConfigError::Validation(format!(
            "planner.max_retries must be in range 0..={MAX_NODE_RETRIES}"
        )));
    }
    Ok(())
}

fn validate_policy(policy: &PolicyConfig) -> Result<(), ConfigError> {
    if policy.forbidden_terms.iter().all(|term| term.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "policy.forbidden_terms must contain at least one non-blank term".to_string(),
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
    if llm.resolved_model().trim().is_empty() {
        return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
    }
    if !llm.base_url.starts_with("http://") && !llm.base_url.starts_with("https://") {
        return Err(ConfigError::Validation(
            "llm.base_url must start with http:// or https://".to_string(),
        ));
    }
    if !(0.0..=2.0).contains(&llm.temperature) {
        return Err(ConfigError::Validation("llm.temperature must be in range 0..=2".to_string()));
    }
    // A missing key is reported by the client at call time, not here.
    if let Some(api_key) = &llm.api_key {
        if api_key.expose_secret().trim().is_empty() {
            return Err(ConfigError::Validation("llm.api_key must not be blank".to_string()));
        }
    }
    Ok(())
}

fn validate_store(store: &StoreConfig) -> Result<(), ConfigError> {
    if let Some(url) = &store.database_url {
        let url = url.trim();
        let sqlite_url =
            url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
        if !sqlite_url {
            return Err(ConfigError::Validation(
                "store.database_url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                    .to_string(),
            ));
        }
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

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    executor: Option<ExecutorPatch>,
    planner: Option<PlannerPatch>,
    policy: Option<PolicyPatch>,
    llm: Option<LlmPatch>,
    store: Option<StorePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct ExecutorPatch {
    base_delay_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PlannerPatch {
    default_timeout_ms: Option<u64>,
    response_timeout_ms: Option<u64>,
    refund_timeout_ms: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct PolicyPatch {
    forbidden_terms: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    model: Option<String>,
    fallback_model: Option<String>,
    api_key: Option<String>,
    base_url: Option<String>,
    temperature: Option<f32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct StorePatch {
    orders_path: Option<PathBuf>,
    refunds_path: Option<PathBuf>,
    database_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
