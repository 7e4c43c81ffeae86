use cotiza_core::config::{AppConfig, LlmProvider, LoadOptions};
use cotiza_db::connect_with_settings;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct Check {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

impl Check {
    fn pass(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Pass, details: details.into() }
    }

    fn fail(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Fail, details: details.into() }
    }

    fn skipped(name: &'static str, details: impl Into<String>) -> Self {
        Self { name, status: CheckStatus::Skipped, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
struct Report {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<Check>,
}

impl Report {
    // Skipped checks do not fail readiness.
    fn from_checks(checks: Vec<Check>) -> Self {
        let failed = checks.iter().filter(|check| check.status == CheckStatus::Fail).count();
        let overall_status = if failed == 0 { CheckStatus::Pass } else { CheckStatus::Fail };
        let summary = if failed == 0 {
            format!("{} checks passed", checks.len())
        } else {
            format!("{failed} of {} checks failed", checks.len())
        };
        Self { overall_status, summary, checks }
    }

    fn render_human(&self) -> String {
        let mut lines = vec![format!("doctor: {}", self.summary)];
        for check in &self.checks {
            let marker = match check.status {
                CheckStatus::Pass => "ok",
                CheckStatus::Fail => "FAIL",
                CheckStatus::Skipped => "skip",
            };
            lines.push(format!("  [{marker}] {}: {}", check.name, check.details));
        }
        lines.join("\n")
    }
}

pub fn run(json_output: bool) -> String {
    let report = Report::from_checks(gather_checks());

    if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":{:?}}}",
                format!("doctor serialization failed: {error}")
            )
        })
    } else {
        report.render_human()
    }
}

fn gather_checks() -> Vec<Check> {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return vec![Check::fail("config_validation", error.to_string())],
    };

    vec![
        Check::pass("config_validation", "configuration loaded and validated"),
        credentials_check(&config),
        database_check(&config),
    ]
}

fn credentials_check(config: &AppConfig) -> Check {
    match config.llm.provider {
        LlmProvider::Rules => {
            Check::skipped("interpreter_credentials", "rules interpreter runs without credentials")
        }
        // Validation already guarantees the key/url is set; report which one.
        LlmProvider::OpenAi => Check::pass("interpreter_credentials", "openai api key configured"),
        LlmProvider::Ollama => Check::pass(
            "interpreter_credentials",
            format!("ollama base url configured: {}", config.llm.base_url.as_deref().unwrap_or("")),
        ),
    }
}

fn database_check(config: &AppConfig) -> Check {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return Check::fail(
                "database_connectivity",
                format!("failed to initialize async runtime: {error}"),
            );
        }
    };

    let connected = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| error.to_string())?;
        pool.close().await;
        Ok::<(), String>(())
    });

    match connected {
        Ok(()) => Check::pass(
            "database_connectivity",
            format!("connected using `{}`", config.database.url),
        ),
        Err(error) => {
            Check::fail("database_connectivity", format!("failed to connect to database: {error}"))
        }
    }
}
