//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Effective retry bound. Only meaningful after [`Config::validate`].
    pub fn max_retries(&self) -> u32 {
        self.migration.max_retries.unwrap_or(1).max(1)
    }

    /// Compute a SHA256 hash of the configuration for resume validation.
    pub fn hash(&self) -> String {
        let yaml = serde_yaml::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Starter configuration written by `init`.
    pub fn starter_yaml(metadata: &str) -> String {
        format!(
            r#"# dbt-migrate configuration
source:
  metadata: {metadata}
  # schema: dbo

project:
  name: migrated
  root: ./project
  models_dir: models/staging
  model_prefix: stg_
  materialization: view

migration:
  max_retries: 3
  include_objects: []
  exclude_objects: []
  generator_timeout_secs: 120
  repair_timeout_secs: 120
  assessment_timeout_secs: 60
  quality_threshold: 0.6

guardrails:
  enabled: true
  rate_limit: 30
  rate_window_secs: 60
  event_capacity: 1000

# evaluation:
#   command: ["dbt", "build"]
#   timeout_secs: 600
"#
        )
    }
}
