//! Type definitions for artifact validation reports.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of a validation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Existence,
    ColumnCoverage,
    NotNullTests,
    UniquenessTests,
    ReferentialTests,
    TypeMapping,
    Documentation,
    DestructiveLint,
}

impl CheckKind {
    /// Weight in the validation score. Constraint and relationship checks
    /// count one and a half times a structural check.
    pub fn weight(&self) -> f64 {
        match self {
            CheckKind::NotNullTests | CheckKind::UniquenessTests | CheckKind::ReferentialTests => {
                1.5
            }
            _ => 1.0,
        }
    }

    /// Structural checks are skipped when the artifact is empty.
    pub fn is_structural(&self) -> bool {
        matches!(self, CheckKind::ColumnCoverage | CheckKind::TypeMapping)
    }
}

/// Outcome of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Warning,
    Failed,
    Skipped,
}

impl CheckStatus {
    /// Severity rank used by the reduction; skipped checks rank below passed.
    fn severity(&self) -> u8 {
        match self {
            CheckStatus::Skipped => 0,
            CheckStatus::Passed => 1,
            CheckStatus::Warning => 2,
            CheckStatus::Failed => 3,
        }
    }

    /// Whether an object with this overall status is accepted.
    pub fn is_acceptable(&self) -> bool {
        matches!(self, CheckStatus::Passed | CheckStatus::Warning)
    }
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CheckStatus::Passed => "passed",
            CheckStatus::Warning => "warning",
            CheckStatus::Failed => "failed",
            CheckStatus::Skipped => "skipped",
        })
    }
}

/// A single check result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationCheck {
    pub kind: CheckKind,
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_value: Option<String>,
}

impl ValidationCheck {
    pub fn new(
        kind: CheckKind,
        name: impl Into<String>,
        status: CheckStatus,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            status,
            detail: detail.into(),
            source_value: None,
            target_value: None,
        }
    }

    pub fn with_values(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.source_value = Some(source.into());
        self.target_value = Some(target.into());
        self
    }
}

/// Output of one validation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Source reference of the validated object.
    pub object: String,
    pub checks: Vec<ValidationCheck>,
    pub overall_status: CheckStatus,
    /// Weighted pass ratio in [0, 1].
    pub score: f64,
}

impl ValidationReport {
    /// Build a report, reducing the check statuses and computing the score.
    pub fn from_checks(object: impl Into<String>, checks: Vec<ValidationCheck>) -> Self {
        let overall_status = reduce(checks.iter().map(|c| c.status));
        let score = weighted_score(&checks);
        Self {
            object: object.into(),
            checks,
            overall_status,
            score,
        }
    }

    pub fn check(&self, kind: CheckKind) -> Option<&ValidationCheck> {
        self.checks.iter().find(|c| c.kind == kind)
    }

    pub fn failed_checks(&self) -> impl Iterator<Item = &ValidationCheck> {
        self.checks
            .iter()
            .filter(|c| c.status == CheckStatus::Failed)
    }

    /// `name: detail` lines for every failed check, fed back to the repairer.
    pub fn failure_details(&self) -> Vec<String> {
        self.failed_checks()
            .map(|c| format!("{}: {}", c.name, c.detail))
            .collect()
    }

    pub fn count(&self, status: CheckStatus) -> usize {
        self.checks.iter().filter(|c| c.status == status).count()
    }
}

/// Worst status wins: failed > warning > passed. Skipped never raises the
/// result; a report of only skipped checks is passed.
pub fn reduce<I: IntoIterator<Item = CheckStatus>>(statuses: I) -> CheckStatus {
    statuses
        .into_iter()
        .filter(|s| *s != CheckStatus::Skipped)
        .max_by_key(CheckStatus::severity)
        .unwrap_or(CheckStatus::Passed)
}

/// Passed weight over the weight of every non-skipped check.
pub fn weighted_score(checks: &[ValidationCheck]) -> f64 {
    let (passed, total) = checks
        .iter()
        .filter(|c| c.status != CheckStatus::Skipped)
        .fold((0.0, 0.0), |(passed, total), c| {
            let w = c.kind.weight();
            let passed = if c.status == CheckStatus::Passed {
                passed + w
            } else {
                passed
            };
            (passed, total + w)
        });
    if total > 0.0 {
        passed / total
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(kind: CheckKind, status: CheckStatus) -> ValidationCheck {
        ValidationCheck::new(kind, format!("{:?}", kind), status, "")
    }

    #[test]
    fn test_reduce_worst_wins_regardless_of_order() {
        use CheckStatus::*;
        assert_eq!(reduce([Passed, Warning, Failed]), Failed);
        assert_eq!(reduce([Failed, Warning, Passed]), Failed);
        assert_eq!(reduce([Warning, Passed]), Warning);
        assert_eq!(reduce([Passed, Skipped]), Passed);
        assert_eq!(reduce([Skipped]), Passed);
    }

    #[test]
    fn test_weighted_score() {
        let checks = vec![
            check(CheckKind::Existence, CheckStatus::Passed),
            check(CheckKind::ColumnCoverage, CheckStatus::Warning),
            check(CheckKind::UniquenessTests, CheckStatus::Passed),
            check(CheckKind::ReferentialTests, CheckStatus::Skipped),
        ];
        // (1.0 + 1.5) / (1.0 + 1.0 + 1.5)
        let score = weighted_score(&checks);
        assert!((score - 2.5 / 3.5).abs() < 1e-9);
    }

    #[test]
    fn test_failure_details() {
        let mut failed = check(CheckKind::ColumnCoverage, CheckStatus::Failed);
        failed.detail = "missing columns: a, b, c".into();
        let report = ValidationReport::from_checks(
            "dbo.t",
            vec![check(CheckKind::Existence, CheckStatus::Passed), failed],
        );
        assert_eq!(report.overall_status, CheckStatus::Failed);
        assert_eq!(
            report.failure_details(),
            vec!["ColumnCoverage: missing columns: a, b, c"]
        );
        assert_eq!(report.count(CheckStatus::Passed), 1);
    }
}
