//! Migration state and checkpointing.
//!
//! [`MigrationState`] is the single source of truth for a run. Only the
//! orchestrator mutates it; snapshots are taken at phase and object
//! boundaries through a [`CheckpointStore`].

mod backend;
mod noop;

pub use backend::{CheckpointStore, FileCheckpointStore};
pub use noop::NoOpCheckpointStore;

use crate::capability::Evaluation;
use crate::error::{MigrateError, Result};
use crate::planner::{Plan, PlannedObject};
use crate::source::ObjectKind;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use std::path::Path;

type HmacSha256 = Hmac<Sha256>;

/// Run phase. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Assessing,
    Planning,
    Executing,
    Evaluating,
    Complete,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Assessing => "assessing",
            Phase::Planning => "planning",
            Phase::Executing => "executing",
            Phase::Evaluating => "evaluating",
            Phase::Complete => "complete",
        })
    }
}

/// Object lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectStatus {
    Pending,
    InProgress,
    Testing,
    Failed,
    Completed,
}

impl ObjectStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ObjectStatus::Completed | ObjectStatus::Failed)
    }
}

impl fmt::Display for ObjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ObjectStatus::Pending => "pending",
            ObjectStatus::InProgress => "in_progress",
            ObjectStatus::Testing => "testing",
            ObjectStatus::Failed => "failed",
            ObjectStatus::Completed => "completed",
        })
    }
}

/// One object's migration lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub name: String,
    pub source_ref: String,
    #[serde(default)]
    pub kind: ObjectKind,
    pub status: ObjectStatus,
    pub attempts: u32,
    /// Errors of the current (or last) attempt.
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<String>,
    #[serde(default)]
    pub validation_score: f64,
}

impl ObjectRecord {
    pub fn pending(planned: &PlannedObject) -> Self {
        Self {
            name: planned.name.clone(),
            source_ref: planned.source_ref.clone(),
            kind: planned.kind,
            status: ObjectStatus::Pending,
            attempts: 0,
            errors: Vec::new(),
            artifact_ref: None,
            validation_score: 0.0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Start a new attempt: count it, clear the previous attempt's errors.
    pub fn begin_attempt(&mut self) {
        self.attempts += 1;
        self.status = ObjectStatus::InProgress;
        self.errors.clear();
    }

    pub fn mark_completed(&mut self, artifact_ref: String, score: f64) {
        self.status = ObjectStatus::Completed;
        self.artifact_ref = Some(artifact_ref);
        self.validation_score = score.clamp(0.0, 1.0);
        self.errors.clear();
    }

    pub fn mark_failed(&mut self) {
        self.status = ObjectStatus::Failed;
    }
}

/// One visit of a phase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRecord {
    pub phase: Phase,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl PhaseRecord {
    pub fn duration_ms(&self) -> i64 {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
            .unwrap_or(0)
    }
}

/// Migration state for one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationState {
    /// Unique run identifier.
    pub run_id: String,

    /// SHA256 hash of the configuration.
    pub config_hash: String,

    /// When the migration started.
    pub started_at: DateTime<Utc>,

    /// When the run reached `complete`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    pub phase: Phase,

    /// Planned objects in execution order.
    pub objects: Vec<ObjectRecord>,

    /// Index of the next object to execute.
    pub cursor: usize,

    pub completed_count: usize,
    pub failed_count: usize,

    /// Attempts per object. Fixed at creation.
    pub max_retries: u32,

    /// Fatal and unexpected errors in the order they happened.
    #[serde(default)]
    pub errors: Vec<String>,

    /// Index into `errors` where the current attempt at the run began.
    /// Errors before it belong to an earlier, aborted assessment.
    #[serde(default)]
    pub error_watermark: usize,

    /// Phase visits, oldest first.
    #[serde(default)]
    pub phases: Vec<PhaseRecord>,

    /// Result of the evaluation capability, once it ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<Evaluation>,

    /// HMAC-SHA256 signature for integrity validation.
    /// Computed over serialized state (excluding this field) using config_hash as key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hmac: Option<String>,
}

impl MigrationState {
    /// Create a new migration state in `assessing`.
    pub fn new(run_id: String, config_hash: String, max_retries: u32) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            config_hash,
            started_at: now,
            completed_at: None,
            phase: Phase::Assessing,
            objects: Vec::new(),
            cursor: 0,
            completed_count: 0,
            failed_count: 0,
            max_retries: max_retries.max(1),
            errors: Vec::new(),
            error_watermark: 0,
            phases: vec![PhaseRecord {
                phase: Phase::Assessing,
                started_at: now,
                finished_at: None,
            }],
            evaluation: None,
            hmac: None,
        }
    }

    /// Move to `next`. Moving backwards is an error; staying put is a no-op.
    pub fn advance(&mut self, next: Phase) -> Result<()> {
        if next < self.phase {
            return Err(MigrateError::State(format!(
                "invalid phase transition {} -> {}",
                self.phase, next
            )));
        }
        if next == self.phase {
            return Ok(());
        }

        let now = Utc::now();
        if let Some(last) = self.phases.last_mut() {
            last.finished_at.get_or_insert(now);
        }
        self.phases.push(PhaseRecord {
            phase: next,
            started_at: now,
            finished_at: None,
        });
        self.phase = next;

        if next == Phase::Complete {
            self.completed_at = Some(now);
            if let Some(last) = self.phases.last_mut() {
                last.finished_at = Some(now);
            }
        }
        Ok(())
    }

    /// Whether the run ever entered `phase`.
    pub fn visited(&self, phase: Phase) -> bool {
        self.phases.iter().any(|p| p.phase == phase)
    }

    /// Phases in the order they were entered.
    pub fn phase_sequence(&self) -> Vec<Phase> {
        self.phases.iter().map(|p| p.phase).collect()
    }

    /// Replace the object list with a fresh plan.
    pub fn apply_plan(&mut self, plan: &Plan) {
        self.objects = plan.objects.iter().map(ObjectRecord::pending).collect();
        self.cursor = 0;
        self.completed_count = 0;
        self.failed_count = 0;
    }

    /// Record under the cursor, if any remain.
    pub fn current_mut(&mut self) -> Option<&mut ObjectRecord> {
        self.objects.get_mut(self.cursor)
    }

    /// Count the terminal record under the cursor and move past it.
    pub fn advance_cursor(&mut self) -> Result<()> {
        let record = self.objects.get(self.cursor).ok_or_else(|| {
            MigrateError::State(format!("cursor {} past the last object", self.cursor))
        })?;
        match record.status {
            ObjectStatus::Completed => self.completed_count += 1,
            ObjectStatus::Failed => self.failed_count += 1,
            status => {
                return Err(MigrateError::State(format!(
                    "object {} is still {}",
                    record.name, status
                )))
            }
        }
        self.cursor += 1;
        Ok(())
    }

    pub fn all_objects_done(&self) -> bool {
        self.cursor >= self.objects.len()
    }

    /// Objects not yet terminal.
    pub fn pending_count(&self) -> usize {
        self.objects.iter().filter(|o| !o.is_terminal()).count()
    }

    /// Mean validation score of completed objects, if any completed.
    pub fn mean_score(&self) -> Option<f64> {
        let scores: Vec<f64> = self
            .objects
            .iter()
            .filter(|o| o.status == ObjectStatus::Completed)
            .map(|o| o.validation_score)
            .collect();
        if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        }
    }

    pub fn record_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    /// Mark the start of a fresh assessment. Earlier errors stay in the log
    /// but no longer count against this run.
    pub fn restart_assessment(&mut self) {
        self.error_watermark = self.errors.len();
    }

    /// Errors recorded since assessment last started.
    pub fn current_errors(&self) -> &[String] {
        &self.errors[self.error_watermark.min(self.errors.len())..]
    }

    /// Put records at or after the cursor back to `pending` so an interrupted
    /// run can pick up where it stopped.
    pub fn reset_unfinished(&mut self) {
        for record in self.objects.iter_mut().skip(self.cursor) {
            if !record.is_terminal() {
                record.status = ObjectStatus::Pending;
                record.attempts = 0;
                record.errors.clear();
            }
        }
    }

    /// Structural checks on a loaded snapshot.
    pub fn check_invariants(&self) -> Result<()> {
        let total = self.objects.len();
        if self.cursor > total {
            return Err(MigrateError::State(format!(
                "cursor {} exceeds {} objects",
                self.cursor, total
            )));
        }
        if self.completed_count + self.failed_count > total {
            return Err(MigrateError::State(format!(
                "{} completed + {} failed exceeds {} objects",
                self.completed_count, self.failed_count, total
            )));
        }
        if self.error_watermark > self.errors.len() {
            return Err(MigrateError::State(format!(
                "error watermark {} exceeds {} errors",
                self.error_watermark,
                self.errors.len()
            )));
        }
        if self.max_retries == 0 {
            return Err(MigrateError::State("max_retries must be positive".into()));
        }
        if let Some(record) = self.objects.iter().find(|o| o.attempts > self.max_retries) {
            return Err(MigrateError::State(format!(
                "object {} has {} attempts, bound is {}",
                record.name, record.attempts, self.max_retries
            )));
        }
        Ok(())
    }

    /// Compute HMAC-SHA256 signature for state integrity validation.
    ///
    /// Uses config_hash as HMAC key, so a state file only verifies against
    /// the configuration that produced it.
    fn compute_hmac(&self) -> Result<String> {
        let mut state_for_signing = self.clone();
        state_for_signing.hmac = None;

        let content = serde_json::to_string(&state_for_signing)?;

        let mut mac = HmacSha256::new_from_slice(self.config_hash.as_bytes())
            .map_err(|e| MigrateError::State(format!("Failed to create HMAC: {}", e)))?;

        mac.update(content.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Load state from a file with integrity validation.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let state: Self = serde_json::from_str(&content)?;

        match &state.hmac {
            Some(stored) => {
                if stored != &state.compute_hmac()? {
                    return Err(MigrateError::State(
                        "State file integrity check failed: HMAC mismatch (possible tampering)"
                            .to_string(),
                    ));
                }
            }
            None => {
                tracing::warn!("State file has no HMAC signature, integrity cannot be verified");
            }
        }

        state.check_invariants()?;
        Ok(state)
    }

    /// Save state to a file (atomic write with HMAC).
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();

        self.hmac = Some(self.compute_hmac()?);
        let content = serde_json::to_string_pretty(self)?;

        // Atomic write: write to temp file, then rename
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Validate that the config hash matches for resume.
    pub fn validate_config(&self, config_hash: &str) -> Result<()> {
        if self.config_hash != config_hash {
            return Err(MigrateError::ConfigChanged);
        }
        Ok(())
    }
}
