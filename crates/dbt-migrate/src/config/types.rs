//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where the source schema metadata comes from.
    pub source: SourceConfig,

    /// Target transformation project.
    #[serde(default)]
    pub project: ProjectConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Guardrail filter settings.
    #[serde(default)]
    pub guardrails: GuardrailConfig,

    /// Downstream build/test shell used during evaluation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<EvaluationConfig>,
}

/// Source metadata configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Path to the extracted metadata catalog (JSON or YAML).
    pub metadata: PathBuf,

    /// Restrict the migration to one source schema (default: all schemas).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

/// Target project configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Project name (default: "migrated").
    #[serde(default = "default_project_name")]
    pub name: String,

    /// Root directory generated artifacts are written to. Nothing is written
    /// when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,

    /// Directory for models, relative to the project root (default: "models/staging").
    #[serde(default = "default_models_dir")]
    pub models_dir: String,

    /// Model name prefix (default: "stg_").
    #[serde(default = "default_model_prefix")]
    pub model_prefix: String,

    /// Materialization passed through to generated models (default: view).
    #[serde(default)]
    pub materialization: Materialization,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: default_project_name(),
            root: None,
            models_dir: default_models_dir(),
            model_prefix: default_model_prefix(),
            materialization: Materialization::default(),
        }
    }
}

/// Storage strategy of a generated model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Materialization {
    #[default]
    View,
    Table,
    Incremental,
    Ephemeral,
}

impl Materialization {
    pub fn as_str(&self) -> &'static str {
        match self {
            Materialization::View => "view",
            Materialization::Table => "table",
            Materialization::Incremental => "incremental",
            Materialization::Ephemeral => "ephemeral",
        }
    }
}

/// Migration behavior configuration.
///
/// `max_retries` has no default: a config without it is rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Attempts per object (generate/validate/repair iterations).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,

    /// Objects to include (wildcard patterns on `schema.name`).
    #[serde(default)]
    pub include_objects: Vec<String>,

    /// Objects to exclude (wildcard patterns on `schema.name`).
    #[serde(default)]
    pub exclude_objects: Vec<String>,

    /// Generator call timeout in seconds (default: 120).
    #[serde(default = "default_capability_timeout")]
    pub generator_timeout_secs: u64,

    /// Repair call timeout in seconds (default: 120).
    #[serde(default = "default_capability_timeout")]
    pub repair_timeout_secs: u64,

    /// Assessment call timeout in seconds (default: 60).
    #[serde(default = "default_assessment_timeout")]
    pub assessment_timeout_secs: u64,

    /// Minimum mean validation score of completed objects checked during
    /// evaluation (default: 0.6).
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            max_retries: None,
            include_objects: Vec::new(),
            exclude_objects: Vec::new(),
            generator_timeout_secs: default_capability_timeout(),
            repair_timeout_secs: default_capability_timeout(),
            assessment_timeout_secs: default_assessment_timeout(),
            quality_threshold: default_quality_threshold(),
        }
    }
}

impl MigrationConfig {
    pub fn generator_timeout(&self) -> Duration {
        Duration::from_secs(self.generator_timeout_secs)
    }

    pub fn repair_timeout(&self) -> Duration {
        Duration::from_secs(self.repair_timeout_secs)
    }

    pub fn assessment_timeout(&self) -> Duration {
        Duration::from_secs(self.assessment_timeout_secs)
    }
}

/// Guardrail filter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailConfig {
    /// Enable pattern blocking (default: true). Events are recorded either way.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Calls allowed per key within the window (default: 30).
    #[serde(default = "default_rate_limit")]
    pub rate_limit: usize,

    /// Sliding window length in seconds (default: 60).
    #[serde(default = "default_rate_window")]
    pub rate_window_secs: u64,

    /// Audit events retained before the oldest are evicted (default: 1000).
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for GuardrailConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rate_limit: default_rate_limit(),
            rate_window_secs: default_rate_window(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl GuardrailConfig {
    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window_secs)
    }
}

/// Downstream execution shell configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Program and arguments, e.g. `["dbt", "build"]`.
    pub command: Vec<String>,

    /// Timeout in seconds (default: 600).
    #[serde(default = "default_evaluation_timeout")]
    pub timeout_secs: u64,

    /// Working directory (default: project root).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

impl EvaluationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

// Default value functions for serde
fn default_project_name() -> String {
    "migrated".to_string()
}

fn default_models_dir() -> String {
    "models/staging".to_string()
}

fn default_model_prefix() -> String {
    "stg_".to_string()
}

fn default_capability_timeout() -> u64 {
    120
}

fn default_assessment_timeout() -> u64 {
    60
}

fn default_evaluation_timeout() -> u64 {
    600
}

fn default_quality_threshold() -> f64 {
    0.6
}

fn default_rate_limit() -> usize {
    30
}

fn default_rate_window() -> u64 {
    60
}

fn default_event_capacity() -> usize {
    1000
}

fn default_true() -> bool {
    true
}
