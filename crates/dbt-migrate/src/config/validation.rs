//! Configuration validation.

use super::Config;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.metadata.as_os_str().is_empty() {
        return Err(MigrateError::Config("source.metadata is required".into()));
    }
    if let Some(schema) = &config.source.schema {
        if schema.trim().is_empty() {
            return Err(MigrateError::Config(
                "source.schema must not be empty when set".into(),
            ));
        }
    }

    // Project validation
    if config.project.name.trim().is_empty() {
        return Err(MigrateError::Config("project.name is required".into()));
    }
    if config.project.models_dir.trim().is_empty() {
        return Err(MigrateError::Config("project.models_dir is required".into()));
    }

    // Migration config validation
    match config.migration.max_retries {
        None => {
            return Err(MigrateError::Config(
                "migration.max_retries is required".into(),
            ))
        }
        Some(0) => {
            return Err(MigrateError::Config(
                "migration.max_retries must be at least 1".into(),
            ))
        }
        Some(_) => {}
    }
    if config.migration.generator_timeout_secs == 0 || config.migration.repair_timeout_secs == 0 {
        return Err(MigrateError::Config(
            "migration capability timeouts must be at least 1 second".into(),
        ));
    }
    if config.migration.assessment_timeout_secs == 0 {
        return Err(MigrateError::Config(
            "migration.assessment_timeout_secs must be at least 1".into(),
        ));
    }
    if !(0.0..=1.0).contains(&config.migration.quality_threshold) {
        return Err(MigrateError::Config(format!(
            "migration.quality_threshold must be within [0, 1], got {}",
            config.migration.quality_threshold
        )));
    }

    // Guardrail validation
    if config.guardrails.rate_limit == 0 {
        return Err(MigrateError::Config(
            "guardrails.rate_limit must be at least 1".into(),
        ));
    }
    if config.guardrails.rate_window_secs == 0 {
        return Err(MigrateError::Config(
            "guardrails.rate_window_secs must be at least 1".into(),
        ));
    }
    if config.guardrails.event_capacity == 0 {
        return Err(MigrateError::Config(
            "guardrails.event_capacity must be at least 1".into(),
        ));
    }

    // Evaluation shell validation
    if let Some(eval) = &config.evaluation {
        if eval.command.is_empty() || eval.command[0].trim().is_empty() {
            return Err(MigrateError::Config(
                "evaluation.command must name a program".into(),
            ));
        }
        if eval.timeout_secs == 0 {
            return Err(MigrateError::Config(
                "evaluation.timeout_secs must be at least 1".into(),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        EvaluationConfig, GuardrailConfig, MigrationConfig, ProjectConfig, SourceConfig,
    };
    use std::path::PathBuf;

    fn valid_config() -> Config {
        Config {
            source: SourceConfig {
                metadata: PathBuf::from("metadata.json"),
                schema: None,
            },
            project: ProjectConfig::default(),
            migration: MigrationConfig {
                max_retries: Some(3),
                ..MigrationConfig::default()
            },
            guardrails: GuardrailConfig::default(),
            evaluation: None,
        }
    }

    #[test]
    fn test_valid_config() {
        let config = valid_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_missing_metadata_path() {
        let mut config = valid_config();
        config.source.metadata = PathBuf::new();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_missing_max_retries() {
        let mut config = valid_config();
        config.migration.max_retries = None;
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("max_retries is required"));
    }

    #[test]
    fn test_zero_max_retries() {
        let mut config = valid_config();
        config.migration.max_retries = Some(0);
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_quality_threshold_out_of_range() {
        let mut config = valid_config();
        config.migration.quality_threshold = 1.5;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_rate_limit() {
        let mut config = valid_config();
        config.guardrails.rate_limit = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_empty_evaluation_command() {
        let mut config = valid_config();
        config.evaluation = Some(EvaluationConfig {
            command: Vec::new(),
            timeout_secs: 60,
            working_dir: None,
        });
        assert!(validate(&config).is_err());
    }
}
