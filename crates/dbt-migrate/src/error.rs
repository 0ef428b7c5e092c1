//! Error types for the migration library.

use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, empty metadata, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source metadata could not be loaded or is inconsistent
    #[error("Source metadata error: {0}")]
    Metadata(String),

    /// An external capability (generator, repairer, assessor, evaluator) failed
    #[error("{capability} failed for {subject}: {message}")]
    Capability {
        capability: String,
        subject: String,
        message: String,
    },

    /// An external capability did not answer within its timeout
    #[error("{capability} timed out after {seconds}s")]
    Timeout { capability: String, seconds: u64 },

    /// Text was blocked by the guardrail filter
    #[error("Guardrail blocked {direction} text: {reason}")]
    Guardrail { direction: String, reason: String },

    /// Call rejected by the sliding-window rate limiter
    #[error("Rate limit exceeded for {key}: {limit} calls per {window_secs}s")]
    RateLimited {
        key: String,
        limit: usize,
        window_secs: u64,
    },

    /// Validation of a generated artifact failed
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A phase-level capability (assessment, evaluation) failed
    #[error("Phase {phase} failed: {message}")]
    Phase { phase: String, message: String },

    /// State file / checkpoint error or an invalid state transition
    #[error("State error: {0}")]
    State(String),

    /// Config hash mismatch on resume
    #[error("Config has changed since last run - cannot resume. Run without --resume to start fresh.")]
    ConfigChanged,

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a Capability error
    pub fn capability(
        capability: impl Into<String>,
        subject: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        MigrateError::Capability {
            capability: capability.into(),
            subject: subject.into(),
            message: message.into(),
        }
    }

    /// Create a Phase error
    pub fn phase(phase: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Phase {
            phase: phase.into(),
            message: message.into(),
        }
    }

    /// Whether the error is retried inside the per-object loop rather than
    /// ending the run.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MigrateError::Capability { .. }
                | MigrateError::Timeout { .. }
                | MigrateError::Guardrail { .. }
                | MigrateError::RateLimited { .. }
                | MigrateError::Validation(_)
        )
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        1
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        // Add error chain for wrapped errors
        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
