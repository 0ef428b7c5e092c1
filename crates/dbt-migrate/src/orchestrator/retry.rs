//! Per-object generate → guardrail → validate → repair loop.

use crate::artifact::Artifact;
use crate::capability::{with_timeout, Generator, Repairer};
use crate::error::{MigrateError, Result};
use crate::guardrail::{Direction, GuardrailFilter};
use crate::source::SourceObject;
use crate::state::{ObjectRecord, ObjectStatus};
use crate::validate::{ValidationEngine, ValidationReport};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// An artifact that passed validation.
#[derive(Debug, Clone)]
pub struct Accepted {
    pub artifact: Artifact,
    pub report: ValidationReport,
}

/// Drives one object to a terminal status within `max_retries` attempts.
///
/// Every iteration counts exactly one attempt. A repaired artifact is never
/// accepted directly: it becomes the next attempt's candidate and goes back
/// through the guardrail and the validation engine.
pub struct RetryLoop {
    generator: Arc<dyn Generator>,
    repairer: Option<Arc<dyn Repairer>>,
    guardrail: Arc<GuardrailFilter>,
    engine: ValidationEngine,
    generator_timeout: Duration,
    repair_timeout: Duration,
}

impl RetryLoop {
    pub fn new(
        generator: Arc<dyn Generator>,
        repairer: Option<Arc<dyn Repairer>>,
        guardrail: Arc<GuardrailFilter>,
        engine: ValidationEngine,
    ) -> Self {
        Self {
            generator,
            repairer,
            guardrail,
            engine,
            generator_timeout: Duration::from_secs(120),
            repair_timeout: Duration::from_secs(120),
        }
    }

    pub fn with_timeouts(mut self, generator: Duration, repair: Duration) -> Self {
        self.generator_timeout = generator;
        self.repair_timeout = repair;
        self
    }

    async fn generate(&self, source_ref: &str, prior_errors: &[String]) -> Result<Artifact> {
        with_timeout(
            "generator",
            self.generator_timeout,
            self.generator.generate(source_ref, prior_errors),
        )
        .await
    }

    /// Invoke the repairer once. `None` when no repairer is configured.
    async fn repair(
        &self,
        source_ref: &str,
        artifact: &Artifact,
        failures: &[String],
    ) -> Option<Result<Artifact>> {
        let repairer = self.repairer.as_ref()?;
        Some(
            with_timeout(
                "repairer",
                self.repair_timeout,
                repairer.repair(source_ref, artifact, failures),
            )
            .await,
        )
    }

    /// Run `record` to a terminal status. Returns the accepted artifact when
    /// the object completed.
    pub async fn run(
        &self,
        record: &mut ObjectRecord,
        source: &SourceObject,
        max_retries: u32,
        cancel: &CancellationToken,
    ) -> Option<Accepted> {
        let source_ref = record.source_ref.clone();
        let mut candidate: Option<Artifact> = None;
        let mut last_artifact: Option<Artifact> = None;
        let mut prior_errors: Vec<String> = Vec::new();

        while record.attempts < max_retries {
            if record.attempts > 0 && cancel.is_cancelled() {
                info!("{}: cancelled after {} attempt(s)", record.name, record.attempts);
                record.errors.push(MigrateError::Cancelled.to_string());
                record.mark_failed();
                return None;
            }

            record.begin_attempt();
            let attempt = record.attempts;
            let final_attempt = attempt == max_retries;
            debug!("{}: attempt {}/{}", record.name, attempt, max_retries);

            // 1. Candidate: a pending repair, else a fresh generation.
            let artifact = match candidate.take() {
                Some(repaired) => repaired,
                None => match self.generate(&source_ref, &prior_errors).await {
                    Ok(generated) => generated,
                    Err(e) => {
                        warn!("{}: generator failed: {}", record.name, e);
                        record.errors.push(e.to_string());
                        let previous = last_artifact
                            .clone()
                            .unwrap_or_else(|| Artifact::new(String::new(), String::new()));
                        match self.repair(&source_ref, &previous, &record.errors).await {
                            Some(Ok(repaired)) => repaired,
                            Some(Err(e)) => {
                                warn!("{}: repair failed: {}", record.name, e);
                                record.errors.push(e.to_string());
                                prior_errors = record.errors.clone();
                                continue;
                            }
                            None => {
                                prior_errors = record.errors.clone();
                                continue;
                            }
                        }
                    }
                },
            };
            last_artifact = Some(artifact.clone());

            // 2. Output guardrail before anything reads the artifact.
            if let Err(e) = self.guardrail.enforce(&artifact.text(), Direction::Output) {
                warn!("{}: {}", record.name, e);
                record.errors.push(e.to_string());
                if !final_attempt {
                    self.queue_repair(record, &source_ref, &artifact, &mut candidate)
                        .await;
                }
                prior_errors = record.errors.clone();
                continue;
            }

            // 3. Validation.
            record.status = ObjectStatus::Testing;
            let report = self.engine.validate(&artifact, source);

            // 4. Accept.
            if report.overall_status.is_acceptable() {
                info!(
                    "{}: {} on attempt {} (score {:.2})",
                    record.name, report.overall_status, attempt, report.score
                );
                record.mark_completed(artifact.reference.clone(), report.score);
                return Some(Accepted { artifact, report });
            }

            // 5. Failed validation.
            record.errors.extend(report.failure_details());
            prior_errors = record.errors.clone();
            if final_attempt {
                break;
            }
            debug!(
                "{}: validation failed on attempt {}: {:?}",
                record.name, attempt, record.errors
            );
            if self
                .queue_repair(record, &source_ref, &artifact, &mut candidate)
                .await
            {
                record.errors.clear();
            }
        }

        warn!(
            "{}: failed after {} attempt(s): {}",
            record.name,
            record.attempts,
            record.errors.join("; ")
        );
        record.mark_failed();
        None
    }

    /// Repair `artifact` with the record's current errors. On success the
    /// repaired artifact is queued as the next candidate.
    async fn queue_repair(
        &self,
        record: &mut ObjectRecord,
        source_ref: &str,
        artifact: &Artifact,
        candidate: &mut Option<Artifact>,
    ) -> bool {
        match self.repair(source_ref, artifact, &record.errors).await {
            Some(Ok(repaired)) => {
                *candidate = Some(repaired);
                true
            }
            Some(Err(e)) => {
                warn!("{}: repair failed: {}", record.name, e);
                record.errors.push(e.to_string());
                false
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::PlannedObject;
    use crate::source::{Column, ObjectKind};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn source() -> SourceObject {
        let column = |name: &str| Column {
            name: name.into(),
            data_type: "int".into(),
            is_nullable: true,
            description: None,
            max_length: 0,
            precision: 0,
            scale: 0,
        };
        SourceObject {
            schema: "dbo".into(),
            name: "orders".into(),
            kind: ObjectKind::Table,
            description: None,
            columns: vec![column("id"), column("a"), column("b"), column("c")],
            primary_key: Vec::new(),
            foreign_keys: Vec::new(),
            definition: None,
        }
    }

    fn record() -> ObjectRecord {
        ObjectRecord::pending(&PlannedObject {
            name: "orders".into(),
            source_ref: "dbo.orders".into(),
            kind: ObjectKind::Table,
        })
    }

    /// Returns the SQL in `outputs` in turn, repeating the last one.
    struct Scripted {
        outputs: Vec<std::result::Result<&'static str, &'static str>>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(outputs: Vec<std::result::Result<&'static str, &'static str>>) -> Self {
            Self {
                outputs,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn next(&self, source_ref: &str) -> Result<Artifact> {
            let i = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.outputs[i.min(self.outputs.len() - 1)] {
                Ok(sql) => Ok(Artifact::new("models/staging/stg_orders.sql", sql)),
                Err(msg) => Err(MigrateError::capability("generator", source_ref, msg)),
            }
        }
    }

    #[async_trait]
    impl Generator for Scripted {
        async fn generate(&self, source_ref: &str, _prior: &[String]) -> Result<Artifact> {
            self.next(source_ref)
        }
    }

    #[async_trait]
    impl Repairer for Scripted {
        async fn repair(&self, source_ref: &str, _a: &Artifact, _f: &[String]) -> Result<Artifact> {
            self.next(source_ref)
        }
    }

    fn retry_loop(generator: Arc<Scripted>, repairer: Option<Arc<Scripted>>) -> RetryLoop {
        RetryLoop::new(
            generator,
            repairer.map(|r| r as Arc<dyn Repairer>),
            Arc::new(GuardrailFilter::default()),
            ValidationEngine::default(),
        )
    }

    const FULL: &str = "select id, a, b, c from src";
    const MISSING_THREE: &str = "select id from src";

    #[tokio::test]
    async fn test_first_attempt_success() {
        let generator = Arc::new(Scripted::new(vec![Ok(FULL)]));
        let mut record = record();
        let accepted = retry_loop(generator.clone(), None)
            .run(&mut record, &source(), 3, &CancellationToken::new())
            .await;
        assert!(accepted.is_some());
        assert_eq!(record.status, ObjectStatus::Completed);
        assert_eq!(record.attempts, 1);
        assert!(record.errors.is_empty());
        assert_eq!(
            record.artifact_ref.as_deref(),
            Some("models/staging/stg_orders.sql")
        );
        assert_eq!(generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_with_noop_repair() {
        let generator = Arc::new(Scripted::new(vec![Ok(MISSING_THREE)]));
        let repairer = Arc::new(Scripted::new(vec![Ok(MISSING_THREE)]));
        let mut record = record();
        let accepted = retry_loop(generator.clone(), Some(repairer.clone()))
            .run(&mut record, &source(), 3, &CancellationToken::new())
            .await;

        assert!(accepted.is_none());
        assert_eq!(record.status, ObjectStatus::Failed);
        assert_eq!(record.attempts, 3);
        assert!(record.errors.iter().any(|e| e.contains("missing columns")));
        // Repaired artifacts are re-validated instead of regenerated
        assert_eq!(generator.calls(), 1);
        assert_eq!(repairer.calls(), 2);
    }

    #[tokio::test]
    async fn test_repaired_artifact_is_revalidated_and_accepted() {
        let generator = Arc::new(Scripted::new(vec![Ok(MISSING_THREE)]));
        let repairer = Arc::new(Scripted::new(vec![Ok(FULL)]));
        let mut record = record();
        let accepted = retry_loop(generator, Some(repairer))
            .run(&mut record, &source(), 3, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(accepted.artifact.sql, FULL);
        assert_eq!(record.status, ObjectStatus::Completed);
        assert_eq!(record.attempts, 2);
    }

    #[tokio::test]
    async fn test_guardrail_blocks_before_validation() {
        let generator = Arc::new(Scripted::new(vec![Ok("DROP TABLE customers")]));
        let mut record = record();
        let accepted = retry_loop(generator.clone(), None)
            .run(&mut record, &source(), 2, &CancellationToken::new())
            .await;
        assert!(accepted.is_none());
        assert_eq!(record.status, ObjectStatus::Failed);
        assert_eq!(record.attempts, 2);
        assert!(record.errors.iter().all(|e| e.contains("Guardrail")));
        assert!(!record.errors.iter().any(|e| e.contains("destructive_lint")));
        assert_eq!(generator.calls(), 2);
    }

    #[tokio::test]
    async fn test_generator_failure_consumes_attempts() {
        let generator = Arc::new(Scripted::new(vec![Err("model unavailable")]));
        let mut record = record();
        retry_loop(generator.clone(), None)
            .run(&mut record, &source(), 3, &CancellationToken::new())
            .await;
        assert_eq!(record.status, ObjectStatus::Failed);
        assert_eq!(record.attempts, 3);
        assert_eq!(generator.calls(), 3);
    }

    #[tokio::test]
    async fn test_generator_failure_falls_back_to_repair() {
        let generator = Arc::new(Scripted::new(vec![Err("model unavailable")]));
        let repairer = Arc::new(Scripted::new(vec![Ok(FULL)]));
        let mut record = record();
        let accepted = retry_loop(generator, Some(repairer))
            .run(&mut record, &source(), 3, &CancellationToken::new())
            .await;
        assert!(accepted.is_some());
        assert_eq!(record.attempts, 1);
    }

    #[tokio::test]
    async fn test_cancellation_between_attempts() {
        let generator = Arc::new(Scripted::new(vec![Ok(MISSING_THREE)]));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut record = record();
        retry_loop(generator.clone(), None)
            .run(&mut record, &source(), 3, &cancel)
            .await;
        // The first attempt still runs to completion
        assert_eq!(record.attempts, 1);
        assert_eq!(record.status, ObjectStatus::Failed);
        assert!(record.errors.iter().any(|e| e.contains("cancelled")));
    }
}
