//! Guardrail interceptor for generator and repairer capabilities.

use super::{Direction, GuardrailFilter};
use crate::artifact::Artifact;
use crate::capability::{Generator, Repairer};
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// A capability wrapped by a [`GuardrailFilter`].
///
/// Before delegating, the wrapper rate-limits on the source reference and
/// input-checks the text it forwards. Blocks surface as ordinary capability
/// errors, so the retry loop treats them like any other failed call. Output
/// checking stays with the caller, which sees every candidate artifact.
pub struct Guarded<C> {
    inner: C,
    filter: Arc<GuardrailFilter>,
}

/// Wrap `capability` with `filter`.
pub fn guarded<C>(capability: C, filter: Arc<GuardrailFilter>) -> Guarded<C> {
    Guarded {
        inner: capability,
        filter,
    }
}

impl<C> Guarded<C> {
    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn admit(&self, source_ref: &str, forwarded: &[String]) -> Result<()> {
        self.filter.enforce_rate(source_ref)?;
        let mut text = source_ref.to_string();
        for line in forwarded {
            text.push('\n');
            text.push_str(line);
        }
        self.filter.enforce(&text, Direction::Input)
    }
}

#[async_trait]
impl<C: Generator> Generator for Guarded<C> {
    async fn generate(&self, source_ref: &str, prior_errors: &[String]) -> Result<Artifact> {
        self.admit(source_ref, prior_errors)?;
        self.inner.generate(source_ref, prior_errors).await
    }
}

#[async_trait]
impl<C: Repairer> Repairer for Guarded<C> {
    async fn repair(
        &self,
        source_ref: &str,
        artifact: &Artifact,
        failure_details: &[String],
    ) -> Result<Artifact> {
        self.admit(source_ref, failure_details)?;
        self.inner.repair(source_ref, artifact, failure_details).await
    }
}
