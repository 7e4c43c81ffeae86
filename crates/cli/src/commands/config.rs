use std::env;
use std::fs;
use std::path::PathBuf;

use cotiza_core::config::{AppConfig, LoadOptions};
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let file = ConfigFile::detect();
    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for entry in entries(&config) {
        let source = file.source_for(&entry);
        lines.push(format!("- {} = {} (source: {source})", entry.key, entry.value));
    }
    lines.join("\n")
}

struct Entry {
    key: &'static str,
    value: String,
    env_key: Option<&'static str>,
}

impl Entry {
    fn new(key: &'static str, value: impl ToString, env_key: Option<&'static str>) -> Self {
        Self { key, value: value.to_string(), env_key }
    }
}

fn entries(config: &AppConfig) -> Vec<Entry> {
    let api_key = if config.llm.api_key.is_some() { "<redacted>" } else { "<unset>" };

    vec![
        Entry::new("database.url", &config.database.url, Some("COTIZA_DATABASE_URL")),
        Entry::new(
            "database.max_connections",
            config.database.max_connections,
            Some("COTIZA_DATABASE_MAX_CONNECTIONS"),
        ),
        Entry::new(
            "database.timeout_secs",
            config.database.timeout_secs,
            Some("COTIZA_DATABASE_TIMEOUT_SECS"),
        ),
        Entry::new("llm.provider", format!("{:?}", config.llm.provider), Some("COTIZA_LLM_PROVIDER")),
        Entry::new("llm.model", &config.llm.model, Some("COTIZA_LLM_MODEL")),
        Entry::new(
            "llm.base_url",
            config.llm.base_url.as_deref().unwrap_or("<unset>"),
            Some("COTIZA_LLM_BASE_URL"),
        ),
        Entry::new("llm.api_key", api_key, Some("COTIZA_LLM_API_KEY")),
        Entry::new("quoting.tax_rate", config.quoting.tax_rate, Some("COTIZA_QUOTING_TAX_RATE")),
        Entry::new(
            "quoting.shipping_cost",
            config.quoting.shipping_cost,
            Some("COTIZA_QUOTING_SHIPPING_COST"),
        ),
        Entry::new(
            "quoting.validity_days",
            config.quoting.validity_days,
            Some("COTIZA_QUOTING_VALIDITY_DAYS"),
        ),
        Entry::new(
            "quoting.session_ttl_minutes",
            config.quoting.session_ttl_minutes,
            Some("COTIZA_QUOTING_SESSION_TTL_MINUTES"),
        ),
        Entry::new("resolver.score_threshold", config.resolver.score_threshold, None),
        Entry::new("resolver.ambiguity_margin", config.resolver.ambiguity_margin, None),
        Entry::new("resolver.max_candidates", config.resolver.max_candidates, None),
        Entry::new("logging.level", &config.logging.level, Some("COTIZA_LOGGING_LEVEL")),
        Entry::new(
            "logging.format",
            format!("{:?}", config.logging.format),
            Some("COTIZA_LOGGING_FORMAT"),
        ),
    ]
}

struct ConfigFile {
    path: Option<PathBuf>,
    doc: Option<Value>,
}

impl ConfigFile {
    fn detect() -> Self {
        let path = ["cotiza.toml", "config/cotiza.toml"]
            .into_iter()
            .map(PathBuf::from)
            .find(|candidate| candidate.exists());
        let doc = path
            .as_deref()
            .and_then(|path| fs::read_to_string(path).ok())
            .and_then(|raw| raw.parse::<Value>().ok());
        Self { path, doc }
    }

    fn source_for(&self, entry: &Entry) -> String {
        if let Some(env_key) = entry.env_key {
            if env::var_os(env_key).is_some() {
                return format!("env ({env_key})");
            }
        }

        if self.doc.as_ref().is_some_and(|doc| contains_path(doc, entry.key)) {
            let shown = self
                .path
                .as_ref()
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({shown})");
        }

        "default".to_string()
    }
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    key_path.split('.').try_fold(root, |node, key| node.get(key)).is_some()
}
