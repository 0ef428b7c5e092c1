//! External capabilities the orchestrator drives.
//!
//! Generation, repair, assessment and evaluation are supplied from outside
//! the core (a language model, a template engine, a build tool). Each is an
//! async trait object; failures come back as ordinary [`MigrateError`]s and
//! every call is bounded by [`with_timeout`].

use crate::artifact::Artifact;
use crate::error::{MigrateError, Result};
use crate::planner::Plan;
use crate::source::MetadataCatalog;
use crate::state::MigrationState;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Produces an artifact for one source object.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate the artifact for `source_ref`. `prior_errors` carries the
    /// errors of the previous attempt, empty on the first.
    async fn generate(&self, source_ref: &str, prior_errors: &[String]) -> Result<Artifact>;
}

/// Fixes an artifact that failed the guardrail or validation.
#[async_trait]
pub trait Repairer: Send + Sync {
    async fn repair(
        &self,
        source_ref: &str,
        artifact: &Artifact,
        failure_details: &[String],
    ) -> Result<Artifact>;
}

/// Turns the source catalog into an ordered plan.
#[async_trait]
pub trait Assessor: Send + Sync {
    async fn assess(&self, catalog: &MetadataCatalog) -> Result<Plan>;
}

/// Cross-object evaluation run once every object is terminal.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, state: &MigrationState) -> Result<Evaluation>;
}

/// Outcome of an evaluation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub ok: bool,
    pub passed: u32,
    pub warnings: u32,
    pub errors: u32,
    pub skipped: u32,
    pub total: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

#[async_trait]
impl<T: Generator + ?Sized> Generator for Arc<T> {
    async fn generate(&self, source_ref: &str, prior_errors: &[String]) -> Result<Artifact> {
        (**self).generate(source_ref, prior_errors).await
    }
}

#[async_trait]
impl<T: Repairer + ?Sized> Repairer for Arc<T> {
    async fn repair(
        &self,
        source_ref: &str,
        artifact: &Artifact,
        failure_details: &[String],
    ) -> Result<Artifact> {
        (**self).repair(source_ref, artifact, failure_details).await
    }
}

/// Await `fut`, failing with [`MigrateError::Timeout`] after `limit`.
pub async fn with_timeout<T, F>(capability: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(MigrateError::Timeout {
            capability: capability.to_string(),
            seconds: limit.as_secs(),
        }),
    }
}
