use std::time::Duration;

use leadline_core::config::{AppConfig, LlmProvider, LoadOptions, SheetBackendKind};
use leadline_db::{connect_with_config, ping, GoogleSheet, SheetBackend};
use serde::Serialize;

use crate::commands::{current_thread_runtime, escape_json, CommandResult};

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

impl DoctorCheck {
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
struct DoctorReport {
    overall_status: CheckStatus,
    summary: String,
    checks: Vec<DoctorCheck>,
}

/// Exit code 1 when any check fails; skipped checks do not fail the run.
pub fn run(json_output: bool) -> CommandResult {
    let report = build_report();
    let exit_code = if report.overall_status == CheckStatus::Fail { 1 } else { 0 };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult::rendered(exit_code, output);
    }

    CommandResult::rendered(exit_code, render_human(&report))
}

fn build_report() -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::pass(
                "config_validation",
                "configuration loaded and validated",
            ));
            checks.push(check_script(&config));
            checks.push(check_llm(&config));
            checks.push(check_speech(&config));
            checks.extend(check_storage(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::fail("config_validation", error.to_string()));
            for name in ["llm_readiness", "speech_readiness", "database_connectivity", "sheet_backend"]
            {
                checks.push(DoctorCheck::skipped(
                    name,
                    "skipped because configuration did not load",
                ));
            }
        }
    }

    let failed = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if failed { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if failed {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_script(config: &AppConfig) -> DoctorCheck {
    DoctorCheck::pass(
        "question_script",
        format!("{} questions, header [{}]", config.script.len(), config.script.header().join(", ")),
    )
}

fn check_llm(config: &AppConfig) -> DoctorCheck {
    match config.llm.provider {
        LlmProvider::Disabled => DoctorCheck::pass(
            "llm_readiness",
            "provider disabled; questions are asked verbatim without a model",
        ),
        provider => DoctorCheck::pass(
            "llm_readiness",
            format!("{provider:?} configured with model `{}`", config.llm.model),
        ),
    }
}

fn check_speech(config: &AppConfig) -> DoctorCheck {
    if !config.speech.enabled {
        return DoctorCheck::skipped(
            "speech_readiness",
            "speech disabled; voice answers receive the clarification prompt",
        );
    }
    DoctorCheck::pass(
        "speech_readiness",
        format!(
            "transcription `{}` and voice `{}` via {}; audio written to `{}`",
            config.speech.transcription_model,
            config.speech.voice,
            config.speech.base_url,
            config.speech.audio_dir.display()
        ),
    )
}

fn check_storage(config: &AppConfig) -> Vec<DoctorCheck> {
    match config.sheets.backend {
        SheetBackendKind::Memory => vec![
            DoctorCheck::skipped("database_connectivity", "memory backend uses no database"),
            DoctorCheck::pass(
                "sheet_backend",
                format!(
                    "memory sheet `{}`; leads are lost when the server stops",
                    config.sheets.sheet_name
                ),
            ),
        ],
        SheetBackendKind::Sqlite => check_sqlite(config),
        SheetBackendKind::Google => vec![
            DoctorCheck::skipped("database_connectivity", "google backend uses no database"),
            check_google(config),
        ],
    }
}

fn check_sqlite(config: &AppConfig) -> Vec<DoctorCheck> {
    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            let details = format!("failed to initialize async runtime: {error}");
            return vec![
                DoctorCheck::fail("database_connectivity", details),
                DoctorCheck::skipped("sheet_backend", "skipped because the runtime did not start"),
            ];
        }
    };

    runtime.block_on(async {
        let pool = match connect_with_config(&config.database).await {
            Ok(pool) => pool,
            Err(error) => {
                return vec![
                    DoctorCheck::fail(
                        "database_connectivity",
                        format!("failed to connect to database: {error}"),
                    ),
                    DoctorCheck::skipped(
                        "sheet_backend",
                        "skipped because the database is unreachable",
                    ),
                ];
            }
        };

        let connectivity = match ping(&pool).await {
            Ok(()) => DoctorCheck::pass(
                "database_connectivity",
                format!("connected using `{}`", config.database.url),
            ),
            Err(error) => DoctorCheck::fail("database_connectivity", error.to_string()),
        };

        let table: Result<i64, sqlx::Error> = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'sheet_row'",
        )
        .fetch_one(&pool)
        .await;
        let sheet = match table {
            Ok(1) => DoctorCheck::pass(
                "sheet_backend",
                format!("sqlite sheet `{}` is migrated", config.sheets.sheet_name),
            ),
            Ok(_) => DoctorCheck::fail(
                "sheet_backend",
                "table `sheet_row` is missing; run `leadline migrate`",
            ),
            Err(error) => DoctorCheck::fail("sheet_backend", error.to_string()),
        };

        pool.close().await;
        vec![connectivity, sheet]
    })
}

fn check_google(config: &AppConfig) -> DoctorCheck {
    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(config.sheets.timeout_secs))
        .build()
    {
        Ok(client) => client,
        Err(error) => return DoctorCheck::fail("sheet_backend", error.to_string()),
    };
    let sheet = match GoogleSheet::from_config(&config.sheets, client) {
        Ok(sheet) => sheet,
        Err(error) => return DoctorCheck::fail("sheet_backend", error.to_string()),
    };

    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return DoctorCheck::fail(
                "sheet_backend",
                format!("failed to initialize async runtime: {error}"),
            );
        }
    };

    match runtime.block_on(sheet.row_values(1)) {
        Ok(Some(header)) if header == config.script.header() => DoctorCheck::pass(
            "sheet_backend",
            format!("google sheet `{}` reachable with matching header", config.sheets.sheet_name),
        ),
        Ok(_) => DoctorCheck::pass(
            "sheet_backend",
            format!(
                "google sheet `{}` reachable; header will be written on the first lead",
                config.sheets.sheet_name
            ),
        ),
        Err(error) => DoctorCheck::fail("sheet_backend", error.to_string()),
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
