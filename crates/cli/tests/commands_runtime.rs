use std::env;
use std::sync::{Mutex, OnceLock};

use cotiza_cli::commands::{config, doctor, migrate, seed};
use serde_json::Value;

#[test]
fn migrate_returns_success_with_memory_database() {
    with_env(&[("COTIZA_DATABASE_URL", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 0, "migrate should succeed against a memory database");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "ok");
    });
}

#[test]
fn migrate_reports_config_failure_for_invalid_tax_rate() {
    with_env(&[("COTIZA_QUOTING_TAX_RATE", "2.0")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "config failures should exit with code 2");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
    });
}

#[test]
fn seed_loads_the_demo_catalog() {
    with_env(
        &[
            ("COTIZA_DATABASE_URL", "sqlite::memory:"),
            // One connection so the in-memory database survives between the
            // migration and the seed inserts.
            ("COTIZA_DATABASE_MAX_CONNECTIONS", "1"),
        ],
        || {
            let result = seed::run();
            assert_eq!(result.exit_code, 0, "seed should succeed against a memory database");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "seed");
            assert_eq!(payload["status"], "ok");
            let message = payload["message"].as_str().unwrap_or("");
            assert!(message.contains("8 products"), "unexpected seed summary: {message}");
        },
    );
}

#[test]
fn seed_is_idempotent_across_runs() {
    with_env(
        &[
            ("COTIZA_DATABASE_URL", "sqlite::memory:"),
            ("COTIZA_DATABASE_MAX_CONNECTIONS", "1"),
        ],
        || {
            let first = seed::run();
            assert_eq!(first.exit_code, 0, "first seed run should succeed");

            let second = seed::run();
            assert_eq!(second.exit_code, 0, "second seed run should succeed");

            let first_payload = parse_payload(&first.output);
            let second_payload = parse_payload(&second.output);
            assert_eq!(first_payload["message"], second_payload["message"]);
        },
    );
}

#[test]
fn config_redacts_secrets_and_attributes_sources() {
    with_env(
        &[
            ("COTIZA_LLM_PROVIDER", "openai"),
            ("COTIZA_LLM_API_KEY", "sk-test-value"),
            ("COTIZA_DATABASE_URL", "sqlite::memory:"),
        ],
        || {
            let output = config::run();

            assert!(!output.contains("sk-test-value"), "api key must never be printed");
            assert!(output.contains("llm.api_key = <redacted> (source: env (COTIZA_LLM_API_KEY))"));
            assert!(output.contains("database.url = sqlite::memory: (source: env (COTIZA_DATABASE_URL))"));
            assert!(output.contains("quoting.tax_rate = 0.16 (source: default)"));
        },
    );
}

#[test]
fn doctor_passes_with_defaults_and_memory_database() {
    with_env(&[("COTIZA_DATABASE_URL", "sqlite::memory:")], || {
        let output = doctor::run(true);
        let payload: Value = serde_json::from_str(&output).expect("doctor JSON output");

        assert_eq!(payload["overall_status"], "pass");
        let checks = payload["checks"].as_array().expect("checks array");
        assert!(checks
            .iter()
            .any(|check| check["name"] == "interpreter_credentials"
                && check["status"] == "skipped"));
        assert!(checks
            .iter()
            .any(|check| check["name"] == "database_connectivity" && check["status"] == "pass"));
    });
}

#[test]
fn doctor_reports_config_failures() {
    with_env(&[("COTIZA_LLM_PROVIDER", "openai")], || {
        let output = doctor::run(true);
        let payload: Value = serde_json::from_str(&output).expect("doctor JSON output");

        assert_eq!(payload["overall_status"], "fail");
        let checks = payload["checks"].as_array().expect("checks array");
        assert!(checks
            .iter()
            .any(|check| check["name"] == "config_validation" && check["status"] == "fail"));
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex poisoned");

    let keys = [
        "COTIZA_DATABASE_URL",
        "COTIZA_DATABASE_MAX_CONNECTIONS",
        "COTIZA_DATABASE_TIMEOUT_SECS",
        "COTIZA_LLM_PROVIDER",
        "COTIZA_LLM_API_KEY",
        "COTIZA_LLM_BASE_URL",
        "COTIZA_LLM_MODEL",
        "COTIZA_LLM_TIMEOUT_SECS",
        "COTIZA_LLM_MAX_RETRIES",
        "COTIZA_QUOTING_TAX_RATE",
        "COTIZA_QUOTING_SHIPPING_COST",
        "COTIZA_QUOTING_VALIDITY_DAYS",
        "COTIZA_QUOTING_SESSION_TTL_MINUTES",
        "COTIZA_LOGGING_LEVEL",
        "COTIZA_LOGGING_FORMAT",
        "COTIZA_LOG_LEVEL",
        "COTIZA_LOG_FORMAT",
    ];

    let previous_values: Vec<(&str, Option<String>)> =
        keys.iter().map(|key| (*key, env::var(key).ok())).collect();

    for key in &keys {
        env::remove_var(key);
    }
    for (key, value) in vars {
        env::set_var(key, value);
    }

    test_fn();

    for (key, value) in previous_values {
        if let Some(value) = value {
            env::set_var(key, value);
        } else {
            env::remove_var(key);
        }
    }
}
