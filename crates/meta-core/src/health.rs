//! Pre-apply and post-apply validation: aggregates
//! independent per-item checks into one report instead of failing hard on
//! the first problem.

use serde::{Deserialize, Serialize};

use crate::apply::{ComponentStatus, ExecutionOutcome};
use crate::error::Result;
use crate::manifest::Manifest;
use crate::reporter::Reporter;
use crate::resolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: Status,
    pub checks: Vec<CheckResult>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == Status::Healthy
    }
}

fn summarize(checks: Vec<CheckResult>) -> HealthReport {
    let failed = checks.iter().filter(|c| !c.passed).count();
    let status = if failed == 0 {
        Status::Healthy
    } else if failed < checks.len() {
        Status::Degraded
    } else {
        Status::Unhealthy
    };
    HealthReport { status, checks }
}

fn check(name: &str, result: Result<()>) -> CheckResult {
    match result {
        Ok(()) => CheckResult {
            name: name.to_string(),
            passed: true,
            detail: "ok".to_string(),
        },
        Err(e) => CheckResult {
            name: name.to_string(),
            passed: false,
            detail: e.to_string(),
        },
    }
}

/// Runs before `apply`: manifest validity, acyclic dependency graph, and
/// that the workspace lock is currently free. Mutates nothing.
pub fn run_preflight(manifest: &Manifest, lock_free: bool, reporter: &mut dyn Reporter) -> HealthReport {
    reporter.info("validating manifest...");
    let mut checks = vec![check("manifest_valid", crate::manifest::validate(manifest))];

    reporter.info("checking dependency graph for cycles...");
    checks.push(check(
        "acyclic_dependency_graph",
        resolver::topo_order(&manifest.components).map(|_| ()),
    ));

    checks.push(CheckResult {
        name: "workspace_lock_free".to_string(),
        passed: lock_free,
        detail: if lock_free {
            "ok".to_string()
        } else {
            "workspace is locked by another invocation".to_string()
        },
    });

    summarize(checks)
}

/// Runs after `apply`: every [`ExecutionOutcome`] becomes one check — a
/// `Failed` outcome fails it, `Healthy` and `Skipped` both pass (a skip is
/// an intentional consequence of fail-fast or continue-on-error, not a
/// defect of its own).
pub fn run_postcheck(outcomes: &[ExecutionOutcome], reporter: &mut dyn Reporter) -> HealthReport {
    reporter.info("verifying component outcomes...");
    let checks = outcomes
        .iter()
        .map(|outcome| {
            let passed = !matches!(outcome.status, ComponentStatus::Failed { .. });
            let detail = match &outcome.status {
                ComponentStatus::Healthy => "ok".to_string(),
                ComponentStatus::Skipped { reason } => format!("skipped: {reason}"),
                ComponentStatus::Failed { kind_tag, message } => format!("{kind_tag}: {message}"),
            };
            CheckResult {
                name: outcome.component.clone(),
                passed,
                detail,
            }
        })
        .collect();
    summarize(checks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::ComponentAction;
    use crate::manifest::{BuildKind, Isolation, Mode};
    use crate::reporter::RecordingReporter;
    use std::collections::BTreeMap;

    fn manifest() -> Manifest {
        let mut components = BTreeMap::new();
        components.insert(
            "a".to_string(),
            crate::manifest::Component {
                name: "a".into(),
                repo: "r".into(),
                version: "v1.0.0".into(),
                build_kind: BuildKind::Generic,
                build_target: None,
                depends_on: vec![],
                isolation: Isolation::None,
            },
        );
        Manifest {
            mode: Mode::Reference,
            components,
            environments: BTreeMap::new(),
            features: BTreeMap::new(),
        }
    }

    #[test]
    fn preflight_is_healthy_for_a_valid_manifest_and_free_lock() {
        let mut reporter = RecordingReporter::default();
        let report = run_preflight(&manifest(), true, &mut reporter);
        assert!(report.is_healthy());
    }

    #[test]
    fn preflight_is_unhealthy_when_the_lock_is_held() {
        let mut reporter = RecordingReporter::default();
        let report = run_preflight(&manifest(), false, &mut reporter);
        assert_eq!(report.status, Status::Degraded);
    }

    #[test]
    fn postcheck_is_healthy_when_every_outcome_succeeded() {
        let mut reporter = RecordingReporter::default();
        let outcomes = vec![ExecutionOutcome {
            component: "a".to_string(),
            action: ComponentAction::Clone,
            status: ComponentStatus::Healthy,
        }];
        let report = run_postcheck(&outcomes, &mut reporter);
        assert!(report.is_healthy());
    }

    #[test]
    fn postcheck_is_unhealthy_when_every_outcome_failed() {
        let mut reporter = RecordingReporter::default();
        let outcomes = vec![ExecutionOutcome {
            component: "a".to_string(),
            action: ComponentAction::Clone,
            status: ComponentStatus::Failed {
                kind_tag: "GitError".to_string(),
                message: "boom".to_string(),
            },
        }];
        let report = run_postcheck(&outcomes, &mut reporter);
        assert_eq!(report.status, Status::Unhealthy);
    }
}
