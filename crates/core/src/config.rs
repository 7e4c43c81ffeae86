use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::resolver::ResolverConfig;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub llm: LlmConfig,
    pub quoting: QuotingConfig,
    pub resolver: ResolverConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

/// Business knobs for the quoting flow itself.
#[derive(Clone, Debug)]
pub struct QuotingConfig {
    pub tax_rate: Decimal,
    pub shipping_cost: Decimal,
    pub validity_days: i64,
    pub session_ttl_minutes: i64,
    /// Bounded wait for the per-session turn lock before the caller is told
    /// to retry.
    pub lock_wait_ms: u64,
    /// Optimistic-save retries before a turn gives up with a retry reply.
    pub max_save_retries: u32,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    #[serde(rename = "openai")]
    OpenAi,
    Ollama,
    /// Deterministic keyword interpreter, no network calls. Used by the CLI
    /// simulator and in tests.
    Rules,
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
    pub llm_api_key: Option<String>,
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
                url: "sqlite://cotiza.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            llm: LlmConfig {
                provider: LlmProvider::Rules,
                api_key: None,
                base_url: None,
                model: "gpt-4o-mini".to_string(),
                timeout_secs: 15,
                max_retries: 1,
            },
            quoting: QuotingConfig {
                tax_rate: Decimal::new(16, 2),
                shipping_cost: Decimal::ZERO,
                validity_days: 30,
                session_ttl_minutes: 120,
                lock_wait_ms: 5_000,
                max_save_retries: 3,
            },
            resolver: ResolverConfig::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

fn overwrite<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::Validation(message.to_string())
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAi),
            "ollama" => Ok(Self::Ollama),
            "rules" => Ok(Self::Rules),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected openai|ollama|rules)"
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
            config.apply_patch(patch)?;
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("cotiza.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) -> Result<(), ConfigError> {
        if let Some(database) = patch.database {
            overwrite(&mut self.database.url, database.url);
            overwrite(&mut self.database.max_connections, database.max_connections);
            overwrite(&mut self.database.timeout_secs, database.timeout_secs);
        }

        if let Some(llm) = patch.llm {
            overwrite(&mut self.llm.provider, llm.provider);
            overwrite(&mut self.llm.api_key, llm.api_key.map(secret_value).map(Some));
            overwrite(&mut self.llm.base_url, llm.base_url.map(Some));
            overwrite(&mut self.llm.model, llm.model);
            overwrite(&mut self.llm.timeout_secs, llm.timeout_secs);
            overwrite(&mut self.llm.max_retries, llm.max_retries);
        }

        if let Some(quoting) = patch.quoting {
            if let Some(tax_rate) = quoting.tax_rate {
                self.quoting.tax_rate = parse_setting("quoting.tax_rate", &tax_rate)?;
            }
            if let Some(shipping_cost) = quoting.shipping_cost {
                self.quoting.shipping_cost =
                    parse_setting("quoting.shipping_cost", &shipping_cost)?;
            }
            overwrite(&mut self.quoting.validity_days, quoting.validity_days);
            overwrite(&mut self.quoting.session_ttl_minutes, quoting.session_ttl_minutes);
            overwrite(&mut self.quoting.lock_wait_ms, quoting.lock_wait_ms);
            overwrite(&mut self.quoting.max_save_retries, quoting.max_save_retries);
        }

        if let Some(resolver) = patch.resolver {
            overwrite(&mut self.resolver.score_threshold, resolver.score_threshold);
            overwrite(&mut self.resolver.ambiguity_margin, resolver.ambiguity_margin);
            overwrite(&mut self.resolver.max_candidates, resolver.max_candidates);
        }

        if let Some(logging) = patch.logging {
            overwrite(&mut self.logging.level, logging.level);
            overwrite(&mut self.logging.format, logging.format);
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("COTIZA_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("COTIZA_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_setting("COTIZA_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("COTIZA_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_setting("COTIZA_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("COTIZA_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        if let Some(value) = read_env("COTIZA_LLM_API_KEY") {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("COTIZA_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("COTIZA_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("COTIZA_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_setting("COTIZA_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("COTIZA_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_setting("COTIZA_LLM_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("COTIZA_QUOTING_TAX_RATE") {
            self.quoting.tax_rate = parse_setting("COTIZA_QUOTING_TAX_RATE", &value)?;
        }
        if let Some(value) = read_env("COTIZA_QUOTING_SHIPPING_COST") {
            self.quoting.shipping_cost = parse_setting("COTIZA_QUOTING_SHIPPING_COST", &value)?;
        }
        if let Some(value) = read_env("COTIZA_QUOTING_VALIDITY_DAYS") {
            self.quoting.validity_days = parse_setting("COTIZA_QUOTING_VALIDITY_DAYS", &value)?;
        }
        if let Some(value) = read_env("COTIZA_QUOTING_SESSION_TTL_MINUTES") {
            self.quoting.session_ttl_minutes =
                parse_setting("COTIZA_QUOTING_SESSION_TTL_MINUTES", &value)?;
        }

        let log_level = read_env("COTIZA_LOGGING_LEVEL").or_else(|| read_env("COTIZA_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("COTIZA_LOGGING_FORMAT").or_else(|| read_env("COTIZA_LOG_FORMAT"));
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
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_llm(&self.llm)?;
        validate_quoting(&self.quoting)?;
        validate_resolver(&self.resolver)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("cotiza.toml"), PathBuf::from("config/cotiza.toml")]
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
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find('}').ok_or(ConfigError::UnterminatedInterpolation)?;
        let key = &after[..end];
        let value = env::var(key)
            .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.to_string() })?;
        output.push_str(&value);
        rest = &after[end + 1..];
    }

    output.push_str(rest);
    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(invalid(
            "database.url must point at sqlite (`sqlite://...`, `sqlite::...`, or `:memory:`)",
        ));
    }
    if database.max_connections == 0 {
        return Err(invalid("database.max_connections must be at least 1"));
    }
    if !(1..=300).contains(&database.timeout_secs) {
        return Err(invalid("database.timeout_secs must be between 1 and 300"));
    }

    Ok(())
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if !(1..=300).contains(&llm.timeout_secs) {
        return Err(invalid("llm.timeout_secs must be between 1 and 300"));
    }

    let blank_key =
        llm.api_key.as_ref().map_or(true, |value| value.expose_secret().trim().is_empty());
    let blank_url = llm.base_url.as_ref().map_or(true, |value| value.trim().is_empty());

    match llm.provider {
        LlmProvider::OpenAi if blank_key => {
            Err(invalid("llm.api_key is required for the openai provider"))
        }
        LlmProvider::Ollama if blank_url => {
            Err(invalid("llm.base_url is required for the ollama provider"))
        }
        _ => Ok(()),
    }
}

fn validate_quoting(quoting: &QuotingConfig) -> Result<(), ConfigError> {
    if quoting.tax_rate < Decimal::ZERO || quoting.tax_rate >= Decimal::ONE {
        return Err(invalid("quoting.tax_rate must be in range [0, 1)"));
    }
    if quoting.shipping_cost < Decimal::ZERO {
        return Err(invalid("quoting.shipping_cost cannot be negative"));
    }
    if quoting.validity_days <= 0 {
        return Err(invalid("quoting.validity_days must be at least 1"));
    }
    if quoting.session_ttl_minutes <= 0 {
        return Err(invalid("quoting.session_ttl_minutes must be at least 1"));
    }
    if quoting.lock_wait_ms == 0 {
        return Err(invalid("quoting.lock_wait_ms must be at least 1"));
    }
    if quoting.max_save_retries == 0 {
        return Err(invalid("quoting.max_save_retries must be at least 1"));
    }

    Ok(())
}

fn validate_resolver(resolver: &ResolverConfig) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&resolver.score_threshold) {
        return Err(invalid("resolver.score_threshold must be in range [0, 1]"));
    }
    if !(0.0..=1.0).contains(&resolver.ambiguity_margin) {
        return Err(invalid("resolver.ambiguity_margin must be in range [0, 1]"));
    }
    if resolver.max_candidates == 0 {
        return Err(invalid("resolver.max_candidates must be at least 1"));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    match logging.level.trim().to_ascii_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(invalid("logging.level must be one of trace|debug|info|warn|error")),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_setting<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    llm: Option<LlmPatch>,
    quoting: Option<QuotingPatch>,
    resolver: Option<ResolverPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct QuotingPatch {
    tax_rate: Option<String>,
    shipping_cost: Option<String>,
    validity_days: Option<i64>,
    session_ttl_minutes: Option<i64>,
    lock_wait_ms: Option<u64>,
    max_save_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ResolverPatch {
    score_threshold: Option<f64>,
    ambiguity_margin: Option<f64>,
    max_candidates: Option<usize>,
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

    use rust_decimal::Decimal;
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
    fn defaults_validate_out_of_the_box() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.quoting.tax_rate == Decimal::new(16, 2), "default tax rate should be 16%")?;
        ensure(config.quoting.validity_days == 30, "default validity should be 30 days")?;
        ensure(
            matches!(config.llm.provider, LlmProvider::Rules),
            "default provider should need no credentials",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_COTIZA_API_KEY", "sk-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("cotiza.toml");
            fs::write(
                &path,
                r#"
[llm]
provider = "openai"
api_key = "${TEST_COTIZA_API_KEY}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            let api_key = config
                .llm
                .api_key
                .as_ref()
                .ok_or_else(|| "api key should be set".to_string())?;
            ensure(
                api_key.expose_secret() == "sk-from-env",
                "api key should be loaded from environment",
            )
        })();

        clear_vars(&["TEST_COTIZA_API_KEY"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("COTIZA_DATABASE_URL", "sqlite://from-env.db");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("cotiza.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[quoting]
tax_rate = "0.08"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-env.db",
                "env database url should win over the file",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.quoting.tax_rate == Decimal::new(8, 2),
                "file tax rate should apply",
            )
        })();

        clear_vars(&["COTIZA_DATABASE_URL"]);
        result
    }

    #[test]
    fn openai_provider_without_api_key_fails_validation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("COTIZA_LLM_PROVIDER", "openai");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("llm.api_key")
            );
            ensure(has_message, "validation failure should mention llm.api_key")
        })();

        clear_vars(&["COTIZA_LLM_PROVIDER"]);
        result
    }

    #[test]
    fn out_of_range_tax_rate_fails_validation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("COTIZA_QUOTING_TAX_RATE", "1.5");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("quoting.tax_rate")
            );
            ensure(has_message, "validation failure should mention quoting.tax_rate")
        })();

        clear_vars(&["COTIZA_QUOTING_TAX_RATE"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("COTIZA_LLM_PROVIDER", "openai");
        env::set_var("COTIZA_LLM_API_KEY", "sk-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("sk-secret-value"), "debug output should not contain api key")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )
        })();

        clear_vars(&["COTIZA_LLM_PROVIDER", "COTIZA_LLM_API_KEY"]);
        result
    }
}
