//! Downstream execution shell.
//!
//! Runs the build/test tool of the generated project (e.g. `dbt build`) with a
//! fixed argument vector and a timeout, and recovers pass/warn/error/skip
//! counts from its combined output. A `KEY=value` summary line is preferred;
//! bracketed per-node tags (`[PASS in 0.1s]`, `[ERROR ...]`) are counted when
//! no summary line is printed. With neither, the exit code decides.

use crate::capability::{Evaluation, Evaluator};
use crate::config::EvaluationConfig;
use crate::error::{MigrateError, Result};
use crate::state::MigrationState;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

static SUMMARY_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^.*\bTOTAL=\d+.*$").unwrap());

static KEY_VALUE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b([A-Z][A-Z_-]*)=(\d+)").unwrap());

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(PASS|OK|WARN|ERROR|SKIP)\b[^\]\n]*\]").unwrap());

/// Captured result of one shell invocation.
#[derive(Debug, Clone)]
pub struct ShellOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// Stdout followed by stderr.
    pub output: String,
}

/// Runs a fixed command line with a timeout.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    command: Vec<String>,
    timeout: Duration,
    working_dir: Option<PathBuf>,
}

impl ShellRunner {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self {
            command,
            timeout,
            working_dir: None,
        }
    }

    pub fn from_config(config: &EvaluationConfig, project_root: Option<PathBuf>) -> Self {
        Self {
            command: config.command.clone(),
            timeout: config.timeout(),
            working_dir: config.working_dir.clone().or(project_root),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub async fn run(&self) -> Result<ShellOutput> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| MigrateError::Config("evaluation command is empty".into()))?;

        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        debug!("Running {:?}", self.command);
        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => result.map_err(|e| {
                MigrateError::capability("evaluation shell", program, e.to_string())
            })?,
            Err(_) => {
                return Err(MigrateError::Timeout {
                    capability: "evaluation shell".into(),
                    seconds: self.timeout.as_secs(),
                })
            }
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(ShellOutput {
            exit_code: output.status.code(),
            output: text,
        })
    }
}

/// Recover counts from tool output.
pub fn parse_output(output: &str, exit_code: Option<i32>) -> Evaluation {
    if let Some(line) = SUMMARY_LINE_RE.find_iter(output).last() {
        let mut evaluation = Evaluation {
            detail: line.as_str().trim().to_string(),
            ..Evaluation::default()
        };
        for caps in KEY_VALUE_RE.captures_iter(line.as_str()) {
            let value: u32 = caps[2].parse().unwrap_or(0);
            match &caps[1] {
                "PASS" => evaluation.passed = value,
                "WARN" => evaluation.warnings = value,
                "ERROR" => evaluation.errors = value,
                "SKIP" => evaluation.skipped = value,
                "TOTAL" => evaluation.total = value,
                _ => {}
            }
        }
        evaluation.ok = evaluation.errors == 0;
        return evaluation;
    }

    let mut evaluation = Evaluation::default();
    let mut tagged = false;
    for caps in TAG_RE.captures_iter(output) {
        tagged = true;
        match &caps[1] {
            "PASS" | "OK" => evaluation.passed += 1,
            "WARN" => evaluation.warnings += 1,
            "ERROR" => evaluation.errors += 1,
            "SKIP" => evaluation.skipped += 1,
            _ => {}
        }
    }
    if tagged {
        evaluation.total =
            evaluation.passed + evaluation.warnings + evaluation.errors + evaluation.skipped;
        evaluation.ok = evaluation.errors == 0;
        evaluation.detail = format!(
            "{} passed, {} warned, {} errored, {} skipped",
            evaluation.passed, evaluation.warnings, evaluation.errors, evaluation.skipped
        );
        return evaluation;
    }

    evaluation.ok = exit_code == Some(0);
    evaluation.detail = match exit_code {
        Some(code) => format!("no summary in output, exit code {}", code),
        None => "no summary in output, terminated by signal".to_string(),
    };
    evaluation
}

/// Evaluation capability backed by the downstream shell.
#[derive(Debug, Clone)]
pub struct ShellEvaluator {
    runner: ShellRunner,
}

impl ShellEvaluator {
    pub fn new(runner: ShellRunner) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Evaluator for ShellEvaluator {
    async fn evaluate(&self, state: &MigrationState) -> Result<Evaluation> {
        info!(
            "Evaluating {} completed models with downstream shell",
            state.completed_count
        );
        let output = self.runner.run().await?;
        let evaluation = parse_output(&output.output, output.exit_code);
        if evaluation.ok {
            info!("Evaluation passed: {}", evaluation.detail);
        } else {
            warn!("Evaluation failed: {}", evaluation.detail);
        }
        Ok(evaluation)
    }
}
