//! Final run summary.

use crate::capability::Evaluation;
use crate::error::Result;
use crate::source::ObjectKind;
use crate::state::{MigrationState, ObjectStatus, Phase};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Write as _;

/// How the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every object completed and evaluation raised nothing.
    Succeeded,
    /// The run reached `complete` with failed objects or evaluation errors.
    CompletedWithFailures,
    /// A fatal phase error stopped the run.
    Aborted,
    /// Interrupted before reaching `complete`; resumable.
    Cancelled,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunOutcome::Succeeded => "succeeded",
            RunOutcome::CompletedWithFailures => "completed_with_failures",
            RunOutcome::Aborted => "aborted",
            RunOutcome::Cancelled => "cancelled",
        })
    }
}

/// Per-object row of the summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectSummary {
    pub name: String,
    pub source_ref: String,
    pub kind: ObjectKind,
    pub status: ObjectStatus,
    pub attempts: u32,
    pub validation_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

/// One phase visit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseSummary {
    pub phase: Phase,
    pub started_at: DateTime<Utc>,
    pub duration_ms: i64,
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Unique run identifier.
    pub run_id: String,

    pub outcome: RunOutcome,

    /// Phase the state was left in.
    pub phase: Phase,

    /// When the migration started.
    pub started_at: DateTime<Utc>,

    /// When the report was produced.
    pub finished_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,

    /// Mean validation score over completed objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_score: Option<f64>,

    pub objects: Vec<ObjectSummary>,

    /// List of failed object names.
    pub failed_objects: Vec<String>,

    pub phases: Vec<PhaseSummary>,

    /// Fatal and run-level errors since assessment last started.
    pub errors: Vec<String>,

    /// Errors left over from an earlier aborted assessment of a resumed run.
    #[serde(default)]
    pub earlier_errors: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<Evaluation>,

    /// Guardrail blocks recorded during the run.
    #[serde(default)]
    pub guardrail_blocks: usize,
}

impl MigrationReport {
    /// Fold the final state into a summary.
    pub fn from_state(state: &MigrationState, cancelled: bool) -> Self {
        let finished_at = Utc::now();
        let outcome = if state.phase == Phase::Complete {
            if state.failed_count > 0 || !state.current_errors().is_empty() {
                RunOutcome::CompletedWithFailures
            } else {
                RunOutcome::Succeeded
            }
        } else if cancelled {
            RunOutcome::Cancelled
        } else {
            RunOutcome::Aborted
        };

        let objects: Vec<ObjectSummary> = state
            .objects
            .iter()
            .map(|o| ObjectSummary {
                name: o.name.clone(),
                source_ref: o.source_ref.clone(),
                kind: o.kind,
                status: o.status,
                attempts: o.attempts,
                validation_score: o.validation_score,
                artifact_ref: o.artifact_ref.clone(),
                errors: o.errors.clone(),
            })
            .collect();

        let failed_objects = state
            .objects
            .iter()
            .filter(|o| o.status == ObjectStatus::Failed)
            .map(|o| o.name.clone())
            .collect();

        let phases = state
            .phases
            .iter()
            .map(|p| PhaseSummary {
                phase: p.phase,
                started_at: p.started_at,
                duration_ms: p
                    .finished_at
                    .map(|_| p.duration_ms())
                    .unwrap_or_else(|| (finished_at - p.started_at).num_milliseconds()),
            })
            .collect();

        Self {
            run_id: state.run_id.clone(),
            outcome,
            phase: state.phase,
            started_at: state.started_at,
            finished_at,
            duration_seconds: (finished_at - state.started_at).num_milliseconds() as f64 / 1000.0,
            total: state.objects.len(),
            completed: state.completed_count,
            failed: state.failed_count,
            pending: state.pending_count(),
            mean_score: state.mean_score(),
            objects,
            failed_objects,
            phases,
            errors: state.current_errors().to_vec(),
            earlier_errors: state.errors.len() - state.current_errors().len(),
            evaluation: state.evaluation.clone(),
            guardrail_blocks: 0,
        }
    }

    pub fn with_guardrail_blocks(mut self, blocks: usize) -> Self {
        self.guardrail_blocks = blocks;
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Succeeded
    }

    /// Process exit code: 0 only for a fully successful run.
    pub fn exit_code(&self) -> u8 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    /// Convert to JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Human-readable summary.
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Run {}: {}", self.run_id, self.outcome);
        let _ = writeln!(
            out,
            "Objects: {} total, {} completed, {} failed, {} pending",
            self.total, self.completed, self.failed, self.pending
        );
        if let Some(score) = self.mean_score {
            let _ = writeln!(out, "Mean validation score: {:.2}", score);
        }
        let phases: Vec<String> = self
            .phases
            .iter()
            .map(|p| format!("{} ({}ms)", p.phase, p.duration_ms))
            .collect();
        let _ = writeln!(out, "Phases: {}", phases.join(" -> "));

        for object in &self.objects {
            let _ = writeln!(
                out,
                "  {:<40} {:<10} {:<11} attempts={} score={:.2}",
                object.source_ref,
                object.kind.to_string(),
                object.status.to_string(),
                object.attempts,
                object.validation_score
            );
            for error in &object.errors {
                let _ = writeln!(out, "      - {}", error);
            }
        }

        if let Some(evaluation) = &self.evaluation {
            let _ = writeln!(
                out,
                "Evaluation: {} ({})",
                if evaluation.ok { "ok" } else { "failed" },
                evaluation.detail
            );
        }
        if self.guardrail_blocks > 0 {
            let _ = writeln!(out, "Guardrail blocks: {}", self.guardrail_blocks);
        }
        if !self.errors.is_empty() {
            let _ = writeln!(out, "Errors:");
            for error in &self.errors {
                let _ = writeln!(out, "  - {}", error);
            }
        }
        let _ = write!(out, "Duration: {:.1}s", self.duration_seconds);
        out
    }
}
