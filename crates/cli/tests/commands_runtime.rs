use std::env;
use std::sync::{Mutex, OnceLock};

use officeflow_cli::commands::{config, doctor, migrate, seed, token};
use serde_json::Value;

const SECRET: &str = "cli-runtime-test-secret";

#[test]
fn migrate_returns_success_with_valid_env() {
    with_env(
        &[("OFFICEFLOW_JWT_SECRET", SECRET), ("OFFICEFLOW_DATABASE_DSN", "sqlite::memory:")],
        || {
            let result = migrate::run();
            assert_eq!(result.exit_code, 0, "expected successful migrate run");

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "migrate");
            assert_eq!(payload["status"], "ok");
        },
    );
}

#[test]
fn migrate_is_a_noop_for_the_memory_backend() {
    with_env(
        &[("OFFICEFLOW_JWT_SECRET", SECRET), ("OFFICEFLOW_DATABASE_DSN", "memory://")],
        || {
            let result = migrate::run();
            assert_eq!(result.exit_code, 0);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["status"], "ok");
        },
    );
}

#[test]
fn commands_fail_config_validation_without_a_jwt_secret() {
    with_env(&[("OFFICEFLOW_DATABASE_DSN", "sqlite::memory:")], || {
        let result = migrate::run();
        assert_eq!(result.exit_code, 2, "expected config validation failure code");

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "migrate");
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["error_class"], "config_validation");
        assert!(payload["message"].as_str().unwrap_or_default().contains("jwt.secret"));
    });
}

#[test]
fn seed_reports_the_demo_dataset_summary() {
    with_env(
        &[("OFFICEFLOW_JWT_SECRET", SECRET), ("OFFICEFLOW_DATABASE_DSN", "sqlite::memory:")],
        || {
            let result = seed::run(false);
            assert_eq!(result.exit_code, 0, "expected seed success: {}", result.output);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["command"], "seed");
            assert_eq!(payload["status"], "ok");
            let message = payload["message"].as_str().unwrap_or_default();
            assert!(message.starts_with("demo dataset loaded:"), "{message}");
            assert!(message.contains("3 flows"), "{message}");
        },
    );
}

#[test]
fn seed_is_idempotent_across_runs_on_a_file_database() {
    let dir = tempfile::tempdir().expect("tempdir");
    let dsn = format!("sqlite://{}?mode=rwc", dir.path().join("officeflow.db").display());

    with_env(&[("OFFICEFLOW_JWT_SECRET", SECRET), ("OFFICEFLOW_DATABASE_DSN", &dsn)], || {
        let first = seed::run(false);
        assert_eq!(first.exit_code, 0, "expected first seed success: {}", first.output);

        let second = seed::run(false);
        assert_eq!(second.exit_code, 0, "expected second seed success: {}", second.output);

        let reset = seed::run(true);
        assert_eq!(reset.exit_code, 0, "expected reset seed success: {}", reset.output);

        let first_payload = parse_payload(&first.output);
        assert_eq!(first_payload["message"], parse_payload(&second.output)["message"]);
        assert_eq!(first_payload["message"], parse_payload(&reset.output)["message"]);
    });
}

#[test]
fn seed_rejects_the_memory_backend() {
    with_env(
        &[("OFFICEFLOW_JWT_SECRET", SECRET), ("OFFICEFLOW_DATABASE_DSN", "memory://")],
        || {
            let result = seed::run(false);
            assert_eq!(result.exit_code, 2);

            let payload = parse_payload(&result.output);
            assert_eq!(payload["error_class"], "unsupported_backend");
        },
    );
}

#[test]
fn token_issues_a_bearer_token_for_a_user() {
    with_env(&[("OFFICEFLOW_JWT_SECRET", SECRET)], || {
        let result = token::run(42, &["admin".to_string()]);
        assert_eq!(result.exit_code, 0, "expected token success: {}", result.output);

        let payload = parse_payload(&result.output);
        assert_eq!(payload["command"], "token");
        let token = payload["message"].as_str().unwrap_or_default();
        assert_eq!(token.split('.').count(), 3, "expected a compact JWT, got {token}");
    });
}

#[test]
fn token_rejects_non_positive_user_ids() {
    with_env(&[("OFFICEFLOW_JWT_SECRET", SECRET)], || {
        let result = token::run(0, &[]);
        assert_eq!(result.exit_code, 2);
        assert_eq!(parse_payload(&result.output)["error_class"], "invalid_input");
    });
}

#[test]
fn config_output_redacts_the_jwt_secret() {
    with_env(&[("OFFICEFLOW_JWT_SECRET", SECRET)], || {
        let output = config::run();

        assert!(!output.contains(SECRET), "secret leaked: {output}");
        assert!(output.contains("- jwt.secret = <redacted"));
        assert!(output.contains("(source: env (OFFICEFLOW_JWT_SECRET))"));
        assert!(output.contains("- server.mode = release (source: default)"));
    });
}

#[test]
fn doctor_json_reports_every_check() {
    with_env(
        &[("OFFICEFLOW_JWT_SECRET", SECRET), ("OFFICEFLOW_DATABASE_DSN", "memory://")],
        || {
            let report = parse_payload(&doctor::run(true));

            assert_eq!(report["overall_status"], "pass", "{report}");
            let names: Vec<&str> = report["checks"]
                .as_array()
                .expect("checks")
                .iter()
                .filter_map(|check| check["name"].as_str())
                .collect();
            assert_eq!(names, ["config_validation", "token_signing", "store_connectivity"]);
        },
    );
}

#[test]
fn doctor_skips_dependent_checks_when_config_fails() {
    with_env(&[], || {
        let report = parse_payload(&doctor::run(true));

        assert_eq!(report["overall_status"], "fail");
        assert_eq!(report["checks"][0]["status"], "fail");
        assert_eq!(report["checks"][1]["status"], "skipped");
        assert_eq!(report["checks"][2]["status"], "skipped");
    });
}

fn parse_payload(output: &str) -> Value {
    serde_json::from_str(output).expect("command output should be valid JSON")
}

fn with_env(vars: &[(&str, &str)], test_fn: impl FnOnce()) {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    let _guard =
        ENV_LOCK.get_or_init(|| Mutex::new(())).lock().expect("env mutex should not be poisoned");

    let keys = [
        "OFFICEFLOW_DATABASE_DSN",
        "OFFICEFLOW_DATABASE_MAX_CONNECTIONS",
        "OFFICEFLOW_DATABASE_TIMEOUT_SECS",
        "OFFICEFLOW_SERVER_BIND",
        "OFFICEFLOW_SERVER_MODE",
        "OFFICEFLOW_SERVER_REQUEST_TIMEOUT_SECS",
        "OFFICEFLOW_SERVER_GRACEFUL_SHUTDOWN_SECS",
        "OFFICEFLOW_JWT_SECRET",
        "OFFICEFLOW_JWT_EXPIRE_SECONDS",
        "OFFICEFLOW_APPROVAL_CACHE_TTL_SECONDS",
        "OFFICEFLOW_LOGGING_LEVEL",
        "OFFICEFLOW_LOGGING_FORMAT",
        "OFFICEFLOW_LOG_LEVEL",
        "OFFICEFLOW_LOG_FORMAT",
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
