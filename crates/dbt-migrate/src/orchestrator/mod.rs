//! Migration orchestrator - main workflow coordinator.
//!
//! Drives a run through `assessing → planning → executing → evaluating →
//! complete`. Objects are processed strictly in plan order, one
//! [`RetryLoop`] at a time, and the state is checkpointed at every phase and
//! object boundary so an interrupted run can resume at its cursor.

mod retry;

pub use retry::{Accepted, RetryLoop};

use crate::artifact::Artifact;
use crate::capability::{with_timeout, Assessor, Evaluator, Generator, Repairer};
use crate::config::Config;
use crate::error::{MigrateError, Result};
use crate::guardrail::{guarded, GuardrailFilter};
use crate::planner::{CatalogAssessor, Plan};
use crate::report::MigrationReport;
use crate::source::MetadataCatalog;
use crate::state::{
    CheckpointStore, FileCheckpointStore, MigrationState, NoOpCheckpointStore, Phase,
};
use crate::template::{TemplateGenerator, TemplateRepairer};
use crate::validate::ValidationEngine;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    catalog: Arc<MetadataCatalog>,
    generator: Arc<dyn Generator>,
    repairer: Option<Arc<dyn Repairer>>,
    assessor: Arc<dyn Assessor>,
    evaluator: Option<Arc<dyn Evaluator>>,
    checkpoint: Arc<dyn CheckpointStore>,
    guardrail: Arc<GuardrailFilter>,
    engine: ValidationEngine,
    state: Option<MigrationState>,
}

impl Orchestrator {
    /// Create a new orchestrator.
    ///
    /// The configuration is validated here and an empty catalog is refused,
    /// so nothing runs against a configuration that cannot succeed.
    pub fn new(
        config: Config,
        catalog: Arc<MetadataCatalog>,
        generator: Arc<dyn Generator>,
    ) -> Result<Self> {
        config.validate()?;
        if catalog.is_empty() {
            return Err(MigrateError::Config(
                "source catalog contains no objects".into(),
            ));
        }

        let assessor = Arc::new(CatalogAssessor::new(&config.migration));
        let guardrail = Arc::new(GuardrailFilter::new(&config.guardrails));

        Ok(Self {
            config,
            catalog,
            generator,
            repairer: None,
            assessor,
            evaluator: None,
            checkpoint: Arc::new(NoOpCheckpointStore::new()),
            guardrail,
            engine: ValidationEngine::default(),
            state: None,
        })
    }

    /// Create an orchestrator that renders models with the built-in template
    /// generator and repairer, reading the catalog named by the config.
    pub fn from_config(config: Config) -> Result<Self> {
        config.validate()?;
        let mut catalog = MetadataCatalog::load(&config.source.metadata)?;
        if let Some(schema) = &config.source.schema {
            catalog.retain_schema(schema);
        }
        let catalog = Arc::new(catalog);

        let template = TemplateGenerator::new(catalog.clone(), config.project.clone());
        let repairer = TemplateRepairer::new(template.clone());
        Ok(Self::new(config, catalog, Arc::new(template))?.with_repairer(Arc::new(repairer)))
    }

    pub fn with_repairer(mut self, repairer: Arc<dyn Repairer>) -> Self {
        self.repairer = Some(repairer);
        self
    }

    pub fn with_assessor(mut self, assessor: Arc<dyn Assessor>) -> Self {
        self.assessor = assessor;
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn with_checkpoint(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint = store;
        self
    }

    /// Set the state file path for resume capability.
    pub fn with_state_file(self, path: PathBuf) -> Self {
        self.with_checkpoint(Arc::new(FileCheckpointStore::new(path)))
    }

    pub fn with_guardrail(mut self, guardrail: Arc<GuardrailFilter>) -> Self {
        self.guardrail = guardrail;
        self
    }

    pub fn with_validation(mut self, engine: ValidationEngine) -> Self {
        self.engine = engine;
        self
    }

    /// The filter shared with the guarded capabilities.
    pub fn guardrail(&self) -> &Arc<GuardrailFilter> {
        &self.guardrail
    }

    /// Load existing state for resume.
    pub async fn resume(mut self) -> Result<Self> {
        if let Some(state) = self.checkpoint.load().await? {
            state.validate_config(&self.config.hash())?;
            info!(
                "Resuming run {} from {} checkpoint (phase {}, cursor {}/{})",
                state.run_id,
                self.checkpoint.backend_type(),
                state.phase,
                state.cursor,
                state.objects.len()
            );
            self.state = Some(state);
        } else {
            info!("No checkpoint found, starting a new run");
        }
        Ok(self)
    }

    /// Run the migration.
    pub async fn run(mut self, cancel: Option<CancellationToken>) -> Result<MigrationReport> {
        let cancel = cancel.unwrap_or_default();
        let mut state = match self.state.take() {
            Some(state) => state,
            None => MigrationState::new(
                uuid::Uuid::new_v4().to_string(),
                self.config.hash(),
                self.config.max_retries(),
            ),
        };

        info!("Starting migration run: {}", state.run_id);

        if state.phase == Phase::Complete {
            info!("Run {} is already complete", state.run_id);
            return Ok(self.report(&state, false));
        }

        // Phases 1-2: Assess and plan
        if state.phase <= Phase::Planning {
            state.restart_assessment();
            let plan = match self.assess().await {
                Ok(plan) => plan,
                Err(e) => {
                    error!("{}", e);
                    state.record_error(e.to_string());
                    self.save_state(&state).await?;
                    return Ok(self.report(&state, false));
                }
            };

            state.advance(Phase::Planning)?;
            state.apply_plan(&plan);
            info!("Phase 2: Planned {} objects", plan.len());
            if plan.is_empty() {
                info!("Nothing to migrate, skipping execution");
                state.advance(Phase::Evaluating)?;
            } else {
                state.advance(Phase::Executing)?;
            }
            self.save_state(&state).await?;
        }

        // Phase 3: Execute objects in plan order
        if state.phase == Phase::Executing {
            if !self.execute(&mut state, &cancel).await? {
                self.save_state(&state).await?;
                let report = self.report(&state, true);
                warn!(
                    "Migration cancelled: {} of {} objects terminal, resume to continue",
                    report.completed + report.failed,
                    report.total
                );
                return Ok(report);
            }
            state.advance(Phase::Evaluating)?;
            self.save_state(&state).await?;
        }

        // Phase 4: Evaluate
        if state.phase == Phase::Evaluating {
            self.evaluate(&mut state).await;
            state.advance(Phase::Complete)?;
            self.save_state(&state).await?;
        }

        let report = self.report(&state, false);
        info!(
            "Migration {}: {} objects, {} completed, {} failed in {:.1}s",
            report.outcome,
            report.total,
            report.completed,
            report.failed,
            report.duration_seconds
        );
        Ok(report)
    }

    /// Run the assessment capability. Any failure is fatal to the run.
    async fn assess(&self) -> Result<Plan> {
        info!("Phase 1: Assessing {} source objects", self.catalog.len());
        with_timeout(
            "assessor",
            self.config.migration.assessment_timeout(),
            self.assessor.assess(&self.catalog),
        )
        .await
        .map_err(|e| MigrateError::phase(Phase::Assessing.to_string(), e.to_string()))
    }

    /// Process objects from the cursor on. Returns `false` when cancelled
    /// before every object reached a terminal status.
    async fn execute(&self, state: &mut MigrationState, cancel: &CancellationToken) -> Result<bool> {
        state.reset_unfinished();

        let generator: Arc<dyn Generator> =
            Arc::new(guarded(self.generator.clone(), self.guardrail.clone()));
        let repairer = self.repairer.clone().map(|r| {
            Arc::new(guarded(r, self.guardrail.clone())) as Arc<dyn Repairer>
        });
        let retry = RetryLoop::new(
            generator,
            repairer,
            self.guardrail.clone(),
            self.engine.clone(),
        )
        .with_timeouts(
            self.config.migration.generator_timeout(),
            self.config.migration.repair_timeout(),
        );

        let total = state.objects.len();
        let max_retries = state.max_retries;
        info!(
            "Phase 3: Executing {} of {} objects (max {} attempts each)",
            total - state.cursor,
            total,
            max_retries
        );

        while !state.all_objects_done() {
            if cancel.is_cancelled() {
                return Ok(false);
            }

            let position = state.cursor + 1;
            let mut write_error = None;
            if let Some(record) = state.current_mut() {
                debug!("[{}/{}] {}", position, total, record.source_ref);
                match self.catalog.get(&record.source_ref) {
                    Some(source) => {
                        if let Some(accepted) = retry.run(record, source, max_retries, cancel).await
                        {
                            if let Err(e) = self.write_artifact(&accepted.artifact) {
                                write_error = Some(format!(
                                    "{}: failed to write {}: {}",
                                    record.name, accepted.artifact.reference, e
                                ));
                            }
                        }
                    }
                    None => {
                        warn!("{}: not found in source catalog", record.source_ref);
                        record
                            .errors
                            .push(format!("source object {} not found", record.source_ref));
                        record.mark_failed();
                    }
                }
            }
            if let Some(message) = write_error {
                warn!("{}", message);
                state.record_error(message);
            }

            state.advance_cursor()?;
            self.save_state(state).await?;
        }

        info!(
            "Execution finished: {} completed, {} failed",
            state.completed_count, state.failed_count
        );
        Ok(true)
    }

    /// Write an accepted artifact under the project root, if one is set.
    fn write_artifact(&self, artifact: &Artifact) -> Result<()> {
        if let Some(root) = &self.config.project.root {
            let path = artifact.write_to(root)?;
            debug!("Wrote {:?}", path);
        }
        Ok(())
    }

    /// Quality gate plus the optional evaluation capability. Failures are
    /// recorded on the state and never block completion.
    async fn evaluate(&self, state: &mut MigrationState) {
        info!("Phase 4: Evaluating");

        let threshold = self.config.migration.quality_threshold;
        if let Some(mean) = state.mean_score() {
            if mean < threshold {
                let e = MigrateError::phase(
                    Phase::Evaluating.to_string(),
                    format!(
                        "mean validation score {:.2} is below the quality threshold {:.2}",
                        mean, threshold
                    ),
                );
                warn!("{}", e);
                state.record_error(e.to_string());
            }
        }

        let evaluator = match &self.evaluator {
            Some(evaluator) => evaluator,
            None => return,
        };
        match evaluator.evaluate(state).await {
            Ok(evaluation) => {
                if !evaluation.ok {
                    let e = MigrateError::phase(
                        Phase::Evaluating.to_string(),
                        format!(
                            "evaluation reported {} error(s): {}",
                            evaluation.errors, evaluation.detail
                        ),
                    );
                    state.record_error(e.to_string());
                }
                state.evaluation = Some(evaluation);
            }
            Err(e) => {
                let e = MigrateError::phase(Phase::Evaluating.to_string(), e.to_string());
                error!("{}", e);
                state.record_error(e.to_string());
            }
        }
    }

    async fn save_state(&self, state: &MigrationState) -> Result<()> {
        self.checkpoint.save(state).await
    }

    fn report(&self, state: &MigrationState, cancelled: bool) -> MigrationReport {
        MigrationReport::from_state(state, cancelled)
            .with_guardrail_blocks(self.guardrail.blocked_count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Evaluation;
    use crate::report::RunOutcome;
    use crate::source::{Column, ForeignKey, ObjectKind, SourceObject};
    use crate::state::ObjectStatus;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn column(name: &str, nullable: bool) -> Column {
        Column {
            name: name.into(),
            data_type: "int".into(),
            is_nullable: nullable,
            description: None,
            max_length: 0,
            precision: 0,
            scale: 0,
        }
    }

    /// `orders` references `customers` but is listed first.
    fn catalog() -> Arc<MetadataCatalog> {
        Arc::new(MetadataCatalog::new(vec![
            SourceObject {
                schema: "dbo".into(),
                name: "orders".into(),
                kind: ObjectKind::Table,
                description: Some("Customer orders".into()),
                columns: vec![column("id", false), column("customer_id", false)],
                primary_key: vec!["id".into()],
                foreign_keys: vec![ForeignKey {
                    name: "fk_orders_customers".into(),
                    columns: vec!["customer_id".into()],
                    ref_schema: "dbo".into(),
                    ref_table: "customers".into(),
                    ref_columns: vec!["id".into()],
                }],
                definition: None,
            },
            SourceObject {
                schema: "dbo".into(),
                name: "customers".into(),
                kind: ObjectKind::Table,
                description: Some("Customer master".into()),
                columns: vec![column("id", false), column("email", true)],
                primary_key: vec!["id".into()],
                foreign_keys: Vec::new(),
                definition: None,
            },
        ]))
    }

    fn config(max_retries: u32) -> Config {
        Config::from_yaml(&format!(
            "source:\n  metadata: catalog.json\nmigration:\n  max_retries: {}\n",
            max_retries
        ))
        .unwrap()
    }

    /// Template generator that records calls and can cancel the run after
    /// its first generation.
    struct Recording {
        inner: TemplateGenerator,
        calls: Mutex<Vec<String>>,
        cancel_after_first: Option<CancellationToken>,
    }

    impl Recording {
        fn new(catalog: Arc<MetadataCatalog>) -> Self {
            Self {
                inner: TemplateGenerator::new(catalog, Default::default()),
                calls: Mutex::new(Vec::new()),
                cancel_after_first: None,
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Generator for Recording {
        async fn generate(&self, source_ref: &str, prior: &[String]) -> Result<Artifact> {
            self.calls.lock().unwrap().push(source_ref.to_string());
            if let Some(cancel) = &self.cancel_after_first {
                cancel.cancel();
            }
            self.inner.generate(source_ref, prior).await
        }
    }

    /// Always returns the same SQL.
    struct Fixed(&'static str);

    #[async_trait]
    impl Generator for Fixed {
        async fn generate(&self, _source_ref: &str, _prior: &[String]) -> Result<Artifact> {
            Ok(Artifact::new("models/staging/stg_x.sql", self.0))
        }
    }

    /// Valid template output whose reference points outside the project.
    struct Escaping(TemplateGenerator);

    #[async_trait]
    impl Generator for Escaping {
        async fn generate(&self, source_ref: &str, prior: &[String]) -> Result<Artifact> {
            let mut artifact = self.0.generate(source_ref, prior).await?;
            artifact.reference = format!("../{}", artifact.reference.replace('/', "_"));
            Ok(artifact)
        }
    }

    struct FailingAssessor;

    #[async_trait]
    impl Assessor for FailingAssessor {
        async fn assess(&self, _catalog: &MetadataCatalog) -> Result<Plan> {
            Err(MigrateError::capability("assessor", "catalog", "service down"))
        }
    }

    struct StaticEvaluator(Evaluation);

    #[async_trait]
    impl Evaluator for StaticEvaluator {
        async fn evaluate(&self, _state: &MigrationState) -> Result<Evaluation> {
            Ok(self.0.clone())
        }
    }

    fn assert_conserved(report: &MigrationReport) {
        assert_eq!(report.completed + report.failed + report.pending, report.total);
    }

    #[tokio::test]
    async fn test_all_objects_complete_first_attempt() {
        let catalog = catalog();
        let generator = Arc::new(Recording::new(catalog.clone()));
        let report = Orchestrator::new(config(3), catalog, generator.clone())
            .unwrap()
            .run(None)
            .await
            .unwrap();

        assert_eq!(report.outcome, RunOutcome::Succeeded);
        assert_eq!(report.total, 2);
        assert_eq!(report.completed, 2);
        assert_eq!(report.failed, 0);
        assert!(report.objects.iter().all(|o| o.attempts == 1));
        assert_eq!(report.phase, Phase::Complete);
        assert_conserved(&report);
        // Foreign key target first
        assert_eq!(generator.calls(), vec!["dbo.customers", "dbo.orders"]);
    }

    #[tokio::test]
    async fn test_object_fails_after_exhausting_attempts() {
        let report = Orchestrator::new(config(3), catalog(), Arc::new(Fixed("select id from src")))
            .unwrap()
            .run(None)
            .await
            .unwrap();

        assert_eq!(report.outcome, RunOutcome::CompletedWithFailures);
        assert_eq!(report.failed, 2);
        assert!(report
            .objects
            .iter()
            .all(|o| o.status == ObjectStatus::Failed && o.attempts == 3));
        assert!(report.objects[0]
            .errors
            .iter()
            .any(|e| e.starts_with("not_null_tests")));
        assert_eq!(report.failed_objects.len(), 2);
        assert_eq!(report.exit_code(), 1);
        assert_conserved(&report);
    }

    #[tokio::test]
    async fn test_destructive_output_is_blocked() {
        let report = Orchestrator::new(config(1), catalog(), Arc::new(Fixed("DROP TABLE customers")))
            .unwrap()
            .run(None)
            .await
            .unwrap();

        assert_eq!(report.failed, 2);
        assert!(report.guardrail_blocks >= 2);
        for object in &report.objects {
            assert!(object.errors.iter().any(|e| e.contains("schema drop")));
            assert!(!object.errors.iter().any(|e| e.contains("destructive_lint")));
        }
    }

    #[tokio::test]
    async fn test_empty_plan_skips_execution() {
        let mut config = config(3);
        config.migration.exclude_objects = vec!["*".into()];
        let report = Orchestrator::new(config, catalog(), Arc::new(Fixed("select 1")))
            .unwrap()
            .run(None)
            .await
            .unwrap();

        assert_eq!(report.outcome, RunOutcome::Succeeded);
        assert_eq!(report.total, 0);
        let phases: Vec<Phase> = report.phases.iter().map(|p| p.phase).collect();
        assert_eq!(
            phases,
            vec![
                Phase::Assessing,
                Phase::Planning,
                Phase::Evaluating,
                Phase::Complete
            ]
        );
    }

    #[tokio::test]
    async fn test_assessment_failure_aborts() {
        let report = Orchestrator::new(config(3), catalog(), Arc::new(Fixed("select 1")))
            .unwrap()
            .with_assessor(Arc::new(FailingAssessor))
            .run(None)
            .await
            .unwrap();

        assert_eq!(report.outcome, RunOutcome::Aborted);
        assert_eq!(report.phase, Phase::Assessing);
        assert_eq!(report.total, 0);
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].contains("assessing"));
    }

    #[tokio::test]
    async fn test_resume_after_aborted_assessment_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let state_file = dir.path().join("state.json");
        let catalog = catalog();

        let report = Orchestrator::new(config(3), catalog.clone(), Arc::new(Fixed("select 1")))
            .unwrap()
            .with_assessor(Arc::new(FailingAssessor))
            .with_state_file(state_file.clone())
            .run(None)
            .await
            .unwrap();
        assert_eq!(report.outcome, RunOutcome::Aborted);

        let report = Orchestrator::new(config(3), catalog.clone(), Arc::new(Recording::new(catalog)))
            .unwrap()
            .with_state_file(state_file.clone())
            .resume()
            .await
            .unwrap()
            .run(None)
            .await
            .unwrap();
        assert_eq!(report.outcome, RunOutcome::Succeeded);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.completed, 2);
        assert!(report.errors.is_empty());
        assert_eq!(report.earlier_errors, 1);

        // The aborted attempt stays in the log
        let saved = MigrationState::load(&state_file).unwrap();
        assert_eq!(saved.errors.len(), 1);
        assert!(saved.errors[0].contains("assessing"));
    }

    #[tokio::test]
    async fn test_empty_catalog_rejected() {
        let result = Orchestrator::new(
            config(3),
            Arc::new(MetadataCatalog::new(Vec::new())),
            Arc::new(Fixed("select 1")),
        );
        assert!(matches!(result, Err(MigrateError::Config(_))));
    }

    #[tokio::test]
    async fn test_evaluation_failures_recorded() {
        let catalog = catalog();
        let evaluation = Evaluation {
            ok: false,
            errors: 2,
            total: 5,
            detail: "PASS=3 ERROR=2 TOTAL=5".into(),
            ..Evaluation::default()
        };
        let report = Orchestrator::new(
            config(3),
            catalog.clone(),
            Arc::new(Recording::new(catalog)),
        )
        .unwrap()
        .with_evaluator(Arc::new(StaticEvaluator(evaluation)))
        .run(None)
        .await
        .unwrap();

        assert_eq!(report.phase, Phase::Complete);
        assert_eq!(report.outcome, RunOutcome::CompletedWithFailures);
        assert_eq!(report.completed, 2);
        assert_eq!(report.evaluation.as_ref().map(|e| e.errors), Some(2));
    }

    #[tokio::test]
    async fn test_cancel_and_resume_at_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let state_file = dir.path().join("state.json");
        let catalog = catalog();

        let cancel = CancellationToken::new();
        let mut first = Recording::new(catalog.clone());
        first.cancel_after_first = Some(cancel.clone());
        let report = Orchestrator::new(config(3), catalog.clone(), Arc::new(first))
            .unwrap()
            .with_state_file(state_file.clone())
            .run(Some(cancel))
            .await
            .unwrap();
        assert_eq!(report.outcome, RunOutcome::Cancelled);
        assert_eq!(report.completed, 1);
        assert_eq!(report.pending, 1);
        assert_conserved(&report);

        let saved = MigrationState::load(&state_file).unwrap();
        assert_eq!(saved.phase, Phase::Executing);
        assert_eq!(saved.cursor, 1);

        let second = Arc::new(Recording::new(catalog.clone()));
        let report = Orchestrator::new(config(3), catalog, second.clone())
            .unwrap()
            .with_state_file(state_file.clone())
            .resume()
            .await
            .unwrap()
            .run(None)
            .await
            .unwrap();
        assert_eq!(report.outcome, RunOutcome::Succeeded);
        assert_eq!(report.run_id, saved.run_id);
        assert_eq!(report.completed, 2);
        assert_eq!(second.calls(), vec!["dbo.orders"]);
    }

    #[tokio::test]
    async fn test_resume_refuses_changed_config() {
        let dir = tempfile::tempdir().unwrap();
        let state_file = dir.path().join("state.json");
        let catalog = catalog();

        Orchestrator::new(config(3), catalog.clone(), Arc::new(Fixed("select 1")))
            .unwrap()
            .with_state_file(state_file.clone())
            .run(None)
            .await
            .unwrap();

        let result = Orchestrator::new(config(5), catalog, Arc::new(Fixed("select 1")))
            .unwrap()
            .with_state_file(state_file)
            .resume()
            .await;
        assert!(matches!(result, Err(MigrateError::ConfigChanged)));
    }

    #[tokio::test]
    async fn test_artifacts_written_under_project_root() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = catalog();
        let mut config = config(3);
        config.project.root = Some(dir.path().to_path_buf());

        let report = Orchestrator::new(
            config,
            catalog.clone(),
            Arc::new(Recording::new(catalog)),
        )
        .unwrap()
        .run(None)
        .await
        .unwrap();

        assert!(report.is_success());
        assert!(dir.path().join("models/staging/stg_orders.sql").exists());
        assert!(dir.path().join("models/staging/stg_customers.yml").exists());
    }

    #[tokio::test]
    async fn test_artifact_outside_project_root_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("project");
        let catalog = catalog();
        let mut config = config(3);
        config.project.root = Some(root.clone());

        let generator = Escaping(TemplateGenerator::new(catalog.clone(), Default::default()));
        let report = Orchestrator::new(config, catalog, Arc::new(generator))
            .unwrap()
            .run(None)
            .await
            .unwrap();

        assert_eq!(report.outcome, RunOutcome::CompletedWithFailures);
        assert_eq!(report.errors.len(), 2);
        assert!(report
            .errors
            .iter()
            .all(|e| e.contains("escapes the project root")));
        let escaped: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path() != root)
            .collect();
        assert!(escaped.is_empty());
    }
}
