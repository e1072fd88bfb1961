use clearway_core::config::{AppConfig, LoadOptions};
use clearway_core::workflows::WorkflowTemplateCatalog;
use clearway_db::connect_with_settings;
use serde::Serialize;
use sqlx::Row;

use crate::commands::CommandResult;

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

/// Readiness report; exits non-zero when any check did not pass.
pub fn run(options: LoadOptions, json_output: bool) -> CommandResult {
    let report = build_report(options);
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { 1 };

    let output = if json_output {
        serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        })
    } else {
        render_human(&report)
    };

    CommandResult { exit_code, output }
}

fn build_report(options: LoadOptions) -> DoctorReport {
    let mut checks = vec![check_workflow_catalog()];

    match AppConfig::load(options) {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Pass,
                details: "configuration loaded and validated".to_string(),
            });
            checks.extend(check_database(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck {
                name: "config_validation",
                status: CheckStatus::Fail,
                details: error.to_string(),
            });
            for name in ["database_connectivity", "workflow_schema"] {
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

fn check_workflow_catalog() -> DoctorCheck {
    let catalog = WorkflowTemplateCatalog::new();
    let empty: Vec<_> = catalog
        .workflow_types()
        .iter()
        .filter(|workflow_type| catalog.template(**workflow_type).is_empty())
        .map(|workflow_type| workflow_type.as_str())
        .collect();

    if empty.is_empty() {
        DoctorCheck {
            name: "workflow_catalog",
            status: CheckStatus::Pass,
            details: format!("{} workflow templates available", catalog.workflow_types().len()),
        }
    } else {
        DoctorCheck {
            name: "workflow_catalog",
            status: CheckStatus::Fail,
            details: format!("templates without steps: {}", empty.join(", ")),
        }
    }
}

fn check_database(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Fail,
                details: format!("failed to initialize async runtime: {error}"),
            }];
        }
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| format!("failed to connect to database: {error}"))?;

        let schema = sqlx::query(
            "SELECT COUNT(*) AS count FROM sqlite_master
             WHERE type = 'table' AND name = 'approval_workflow'",
        )
        .fetch_one(&pool)
        .await
        .map(|row| row.get::<i64, _>("count") == 1)
        .map_err(|error| error.to_string());

        pool.close().await;
        Ok::<Result<bool, String>, String>(schema)
    });

    match result {
        Ok(schema) => {
            let connectivity = DoctorCheck {
                name: "database_connectivity",
                status: CheckStatus::Pass,
                details: format!("connected using `{}`", config.database.url),
            };
            let schema = match schema {
                Ok(true) => DoctorCheck {
                    name: "workflow_schema",
                    status: CheckStatus::Pass,
                    details: "approval_workflow table present".to_string(),
                },
                Ok(false) => DoctorCheck {
                    name: "workflow_schema",
                    status: CheckStatus::Fail,
                    details: "approval_workflow table missing; run `clearway migrate`".to_string(),
                },
                Err(error) => DoctorCheck {
                    name: "workflow_schema",
                    status: CheckStatus::Fail,
                    details: format!("schema inspection failed: {error}"),
                },
            };
            vec![connectivity, schema]
        }
        Err(error) => vec![
            DoctorCheck { name: "database_connectivity", status: CheckStatus::Fail, details: error },
            DoctorCheck {
                name: "workflow_schema",
                status: CheckStatus::Skipped,
                details: "skipped because the database is unreachable".to_string(),
            },
        ],
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
