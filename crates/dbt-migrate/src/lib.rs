//! # dbt-migrate
//!
//! Migrates relational schema objects (tables, views, procedures) into
//! dbt-style projects: one SQL model plus one properties document per object.
//!
//! This library provides:
//!
//! - **Phase orchestration** from assessment through evaluation
//! - **Bounded repair loops** of generate → guardrail → validate → repair
//! - **Static validation** of column coverage, constraint tests, type mapping
//!   and documentation
//! - **Guardrails** for injection and destructive SQL, with rate limiting
//! - **Resume capability** via HMAC-signed JSON state files
//!
//! ## Example
//!
//! ```rust,no_run
//! use dbt_migrate::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> dbt_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::from_config(config)?;
//!     let report = orchestrator.run(None).await?;
//!     println!("{}", report.to_text());
//!     Ok(())
//! }
//! ```

pub mod artifact;
pub mod capability;
pub mod config;
pub mod error;
pub mod guardrail;
pub mod orchestrator;
pub mod planner;
pub mod report;
pub mod shell;
pub mod source;
pub mod state;
pub mod template;
pub mod typemap;
pub mod validate;

// Re-exports for convenient access
pub use artifact::Artifact;
pub use capability::{Assessor, Evaluation, Evaluator, Generator, Repairer};
pub use config::{Config, EvaluationConfig, GuardrailConfig, MigrationConfig, ProjectConfig};
pub use error::{MigrateError, Result};
pub use guardrail::{guarded, Direction, GuardrailFilter};
pub use orchestrator::{Orchestrator, RetryLoop};
pub use planner::{CatalogAssessor, Plan, PlannedObject};
pub use report::{MigrationReport, RunOutcome};
pub use shell::{ShellEvaluator, ShellRunner};
pub use source::{MetadataCatalog, SourceObject};
pub use state::{MigrationState, ObjectStatus, Phase};
pub use template::{TemplateGenerator, TemplateRepairer};
pub use validate::{CheckStatus, ValidationEngine, ValidationReport};
