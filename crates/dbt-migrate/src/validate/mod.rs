//! Static validation of generated artifacts against their source object.
//!
//! Every check is a pure function of the artifact and the source metadata, so
//! validating the same pair twice yields the same report. Checks are
//! independent of each other except that an empty model skips the structural
//! checks that need a projection to look at.

pub mod projection;
mod types;

pub use projection::Projection;
pub use types::{CheckKind, CheckStatus, ValidationCheck, ValidationReport};

use crate::artifact::{Artifact, ModelProperties, ModelSpec, TestKind};
use crate::source::SourceObject;
use crate::typemap;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static DESTRUCTIVE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(delete|drop|truncate|insert|update)\b").unwrap());

/// Tunables for the validation checks.
#[derive(Debug, Clone)]
pub struct ValidationOptions {
    /// Missing columns tolerated as a warning; more fail the coverage check.
    pub coverage_warn_limit: usize,

    /// Documentation score (out of 4) needed to pass.
    pub docs_pass_threshold: f64,
}

impl Default for ValidationOptions {
    fn default() -> Self {
        Self {
            coverage_warn_limit: 2,
            docs_pass_threshold: 3.5,
        }
    }
}

/// Runs the static checks over one artifact.
#[derive(Debug, Clone, Default)]
pub struct ValidationEngine {
    options: ValidationOptions,
}

impl ValidationEngine {
    pub fn new(options: ValidationOptions) -> Self {
        Self { options }
    }

    /// Validate `artifact` against `object`.
    pub fn validate(&self, artifact: &Artifact, object: &SourceObject) -> ValidationReport {
        let (props, props_error) = match artifact.parse_properties() {
            Ok(props) => (props, None),
            Err(e) => (ModelProperties::default(), Some(e.to_string())),
        };
        let model = props.model_for(&object.name);

        let exists = !artifact.sql.trim().is_empty();
        let mut checks = vec![if exists {
            ValidationCheck::new(
                CheckKind::Existence,
                "model_exists",
                CheckStatus::Passed,
                format!("{} is present", artifact.reference),
            )
        } else {
            ValidationCheck::new(
                CheckKind::Existence,
                "model_exists",
                CheckStatus::Failed,
                format!("{} is empty", artifact.reference),
            )
        }];

        checks.push(self.check_coverage(artifact, object));

        checks.push(check_not_null(object, model, props_error.as_deref()));
        checks.push(check_unique(object, model, props_error.as_deref()));
        checks.push(check_relationships(object, model, props_error.as_deref()));

        checks.push(check_types(object));
        checks.push(self.check_documentation(object, model));
        checks.push(check_destructive(artifact));

        // An empty model has no projection for the structural checks to read
        if !exists {
            for check in checks.iter_mut().filter(|c| c.kind.is_structural()) {
                let replacement = skipped(check.kind, &check.name);
                *check = replacement;
            }
        }

        let report = ValidationReport::from_checks(object.full_name(), checks);
        debug!(
            "Validated {}: {} (score {:.2})",
            report.object, report.overall_status, report.score
        );
        report
    }

    fn check_coverage(&self, artifact: &Artifact, object: &SourceObject) -> ValidationCheck {
        if object.columns.is_empty() {
            return skipped(CheckKind::ColumnCoverage, "column_coverage");
        }

        let projection = Projection::analyze(&artifact.sql);
        let missing = projection.missing(object.columns.iter().map(|c| c.name.as_str()));
        let expected = object.columns.len();
        let covered = expected - missing.len();

        let (status, detail) = if missing.is_empty() {
            (
                CheckStatus::Passed,
                format!("all {} source columns exposed", expected),
            )
        } else if missing.len() <= self.options.coverage_warn_limit {
            (
                CheckStatus::Warning,
                format!("missing columns: {}", missing.join(", ")),
            )
        } else {
            (
                CheckStatus::Failed,
                format!("missing columns: {}", missing.join(", ")),
            )
        };

        ValidationCheck::new(CheckKind::ColumnCoverage, "column_coverage", status, detail)
            .with_values(expected.to_string(), covered.to_string())
    }

    fn check_documentation(&self, object: &SourceObject, model: Option<&ModelSpec>) -> ValidationCheck {
        let Some(model) = model else {
            return ValidationCheck::new(
                CheckKind::Documentation,
                "documentation",
                CheckStatus::Warning,
                "no properties document for the model",
            )
            .with_values("4.0", "0.0");
        };

        let mut score = 0.0;
        if model
            .description
            .as_deref()
            .map(|d| !d.trim().is_empty())
            .unwrap_or(false)
        {
            score += 1.0;
        }

        let described = object
            .columns
            .iter()
            .filter(|c| model.column(&c.name).map(|s| s.has_description()).unwrap_or(false))
            .count();
        if described > 0 {
            score += 1.0;
        }
        if !object.columns.is_empty() {
            score += described as f64 / object.columns.len() as f64;
        }
        if model.has_any_column_test() {
            score += 1.0;
        }

        let status = if score >= self.options.docs_pass_threshold {
            CheckStatus::Passed
        } else {
            CheckStatus::Warning
        };
        ValidationCheck::new(
            CheckKind::Documentation,
            "documentation",
            status,
            format!(
                "documentation score {:.2}/4, {} of {} columns described",
                score,
                described,
                object.columns.len()
            ),
        )
        .with_values("4.0", format!("{:.2}", score))
    }
}

fn skipped(kind: CheckKind, name: &str) -> ValidationCheck {
    ValidationCheck::new(kind, name, CheckStatus::Skipped, "not applicable")
}

/// Shared shape of the three constraint checks: `required` lists what needs a
/// test, `missing` what lacks one.
fn constraint_check(
    kind: CheckKind,
    name: &str,
    required: Vec<String>,
    missing: Vec<String>,
    props_error: Option<&str>,
) -> ValidationCheck {
    if required.is_empty() {
        return skipped(kind, name);
    }
    let status = if missing.is_empty() {
        CheckStatus::Passed
    } else {
        CheckStatus::Failed
    };
    let mut detail = if missing.is_empty() {
        format!("{} required tests present", required.len())
    } else {
        format!("missing tests for: {}", missing.join(", "))
    };
    if let (CheckStatus::Failed, Some(err)) = (status, props_error) {
        detail.push_str(&format!(" ({})", err));
    }
    ValidationCheck::new(kind, name, status, detail)
        .with_values(required.len().to_string(), (required.len() - missing.len()).to_string())
}

fn has_column_test(model: Option<&ModelSpec>, column: &str, kind: TestKind) -> bool {
    model
        .and_then(|m| m.column(column))
        .map(|c| c.has_test(kind))
        .unwrap_or(false)
}

fn check_not_null(
    object: &SourceObject,
    model: Option<&ModelSpec>,
    props_error: Option<&str>,
) -> ValidationCheck {
    let required: Vec<String> = object
        .non_nullable_columns()
        .map(|c| c.name.clone())
        .collect();
    let missing = required
        .iter()
        .filter(|c| !has_column_test(model, c, TestKind::NotNull))
        .cloned()
        .collect();
    constraint_check(CheckKind::NotNullTests, "not_null_tests", required, missing, props_error)
}

fn check_unique(
    object: &SourceObject,
    model: Option<&ModelSpec>,
    props_error: Option<&str>,
) -> ValidationCheck {
    let required = object.primary_key.clone();
    let missing = required
        .iter()
        .filter(|c| !has_column_test(model, c, TestKind::Unique))
        .cloned()
        .collect();
    constraint_check(CheckKind::UniquenessTests, "unique_tests", required, missing, props_error)
}

fn check_relationships(
    object: &SourceObject,
    model: Option<&ModelSpec>,
    props_error: Option<&str>,
) -> ValidationCheck {
    let required: Vec<String> = object
        .foreign_keys
        .iter()
        .map(|fk| format!("{} -> {}", fk.columns.join(","), fk.ref_table))
        .collect();
    let missing = object
        .foreign_keys
        .iter()
        .zip(required.iter())
        .filter(|(fk, _)| {
            !fk.columns.iter().any(|column| {
                model
                    .and_then(|m| m.column(column))
                    .map(|spec| {
                        spec.column_tests()
                            .iter()
                            .any(|t| t.kind == TestKind::Relationships && t.points_at(&fk.ref_table))
                    })
                    .unwrap_or(false)
            })
        })
        .map(|(_, label)| label.clone())
        .collect();
    constraint_check(
        CheckKind::ReferentialTests,
        "relationship_tests",
        required,
        missing,
        props_error,
    )
}

fn check_types(object: &SourceObject) -> ValidationCheck {
    if object.columns.is_empty() {
        return skipped(CheckKind::TypeMapping, "type_mapping");
    }
    let unknown: Vec<String> = object
        .columns
        .iter()
        .filter(|c| typemap::classify(&c.data_type).is_none())
        .map(|c| format!("{} ({})", c.name, c.data_type))
        .collect();

    if unknown.is_empty() {
        ValidationCheck::new(
            CheckKind::TypeMapping,
            "type_mapping",
            CheckStatus::Passed,
            format!("all {} column types mapped", object.columns.len()),
        )
    } else {
        ValidationCheck::new(
            CheckKind::TypeMapping,
            "type_mapping",
            CheckStatus::Warning,
            format!("unmapped types: {}", unknown.join(", ")),
        )
    }
}

fn check_destructive(artifact: &Artifact) -> ValidationCheck {
    let code = projection::scrub(&artifact.sql, true);
    let mut found: Vec<String> = DESTRUCTIVE_RE
        .find_iter(&code)
        .map(|m| m.as_str().to_lowercase())
        .collect();
    found.dedup();

    if found.is_empty() {
        ValidationCheck::new(
            CheckKind::DestructiveLint,
            "destructive_lint",
            CheckStatus::Passed,
            "no destructive statements",
        )
    } else {
        ValidationCheck::new(
            CheckKind::DestructiveLint,
            "destructive_lint",
            CheckStatus::Failed,
            format!("destructive keywords: {}", found.join(", ")),
        )
    }
}
