use officeflow_core::config::{AppConfig, LoadOptions, MIN_JWT_SECRET_BYTES};
use officeflow_core::domain::directory::UserId;
use officeflow_core::tokens::TokenService;
use officeflow_db::StoreBackend;
use secrecy::ExposeSecret;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct DoctorCheck {
    name: &'static str,
    status: CheckStatus,
    details: String,
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> String {
    let report = build_report();

    if json_output {
        return serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
    }

    render_human(&report)
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.push(check_token_signing(&config));
            checks.push(check_store(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["token_signing", "store_connectivity"] {
                checks.push(DoctorCheck {
                    name,
                    status: CheckStatus::Skipped,
                    details: "skipped because configuration did not load".to_string(),
                });
            }
        }
    }

    let all_pass = checks.iter().all(|check| check.status == CheckStatus::Pass);
    let overall_status = if all_pass { CheckStatus::Pass } else { CheckStatus::Fail };
    let summary = if all_pass {
        "doctor: all readiness checks passed".to_string()
    } else {
        "doctor: one or more readiness checks failed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

/// Issues and verifies a throwaway token with the configured secret.
fn check_token_signing(config: &AppConfig) -> DoctorCheck {
    let tokens = TokenService::from_config(&config.jwt);
    let result = tokens
        .issue(UserId(1), &[])
        .and_then(|token| tokens.verify(&token))
        .map(|caller| caller.user_id == UserId(1));

    match result {
        Ok(true) => DoctorCheck {
            name: "token_signing",
            status: CheckStatus::Pass,
            details: format!(
                "HS256 secret of {} bytes (minimum {MIN_JWT_SECRET_BYTES}), tokens live {}s",
                config.jwt.secret.expose_secret().len(),
                config.jwt.expire_seconds
            ),
        },
        Ok(false) => DoctorCheck {
            name: "token_signing",
            status: CheckStatus::Fail,
            details: "verified token carried a different subject".to_string(),
        },
        Err(error) => DoctorCheck {
            name: "token_signing",
            status: CheckStatus::Fail,
            details: error.to_string(),
        },
    }
}

fn check_store(config: &AppConfig) -> DoctorCheck {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck {
                name: "store_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            };
        }
    };

    let result = runtime.block_on(async {
        let backend = StoreBackend::open(&config.database)
            .await
            .map_err(|error| format!("failed to open store: {error}"))?;
        backend.ping().await.map_err(|error| format!("store ping failed: {error}"))?;
        if let Some(pool) = backend.pool() {
            pool.close().await;
        }
        Ok::<&'static str, String>(backend.name())
    });

    match result {
        Ok(backend) => DoctorCheck {
            name: "store_connectivity",
            status: CheckStatus::Pass,
            details: format!("{backend} store reachable at `{}`", config.database.dsn),
        },
        Err(error) => {
            DoctorCheck { name: "store_connectivity", status: CheckStatus::Fail, details: error }
        }
    }
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

fn escape_json(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
