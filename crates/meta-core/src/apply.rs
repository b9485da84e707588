//! Apply orchestrator: plans, schedules, and executes
//! dependency-ordered component materialization with bounded parallelism,
//! progress, cancellation, and continue-on-error/retry policy.
//!
//! Scheduling avoids any shared `Arc<Mutex<ExecutionState>>`: each
//! level's workers are scoped threads that send an [`ExecutionOutcome`]
//! down an `mpsc` channel; the call site (the only aggregator) owns the
//! `Vec` the outcomes land in. No engine state is ever shared behind a
//! mutex.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::manifest::{Component, Manifest, Mode};
use crate::resolver;
use crate::retry::{calculate_delay, RetryConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentAction {
    Noop,
    Clone,
    Checkout,
    VendorImport,
    UpdateDepsOnly,
}

/// What the planner observes on disk for one component before deciding an
/// action. Supplied by the caller (a real filesystem probe in `meta-cli`,
/// a deterministic fixture in tests) so `build_plan` itself stays pure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OnDiskState {
    Absent,
    PresentMismatched { pin: String },
    PresentMatching { deps_satisfied: bool },
}

pub fn classify(mode: Mode, on_disk: &OnDiskState, desired_pin: &str) -> ComponentAction {
    match on_disk {
        OnDiskState::Absent => match mode {
            Mode::Reference => ComponentAction::Clone,
            Mode::Vendored => ComponentAction::VendorImport,
        },
        OnDiskState::PresentMismatched { pin } if pin != desired_pin => match mode {
            Mode::Reference => ComponentAction::Checkout,
            Mode::Vendored => ComponentAction::VendorImport,
        },
        OnDiskState::PresentMismatched { .. } => ComponentAction::UpdateDepsOnly,
        OnDiskState::PresentMatching { deps_satisfied: true } => ComponentAction::Noop,
        OnDiskState::PresentMatching { deps_satisfied: false } => ComponentAction::UpdateDepsOnly,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanEntry {
    pub component: String,
    pub action: ComponentAction,
    pub before_pin: Option<String>,
    pub after_pin: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub environment: String,
    pub entries: Vec<PlanEntry>,
}

/// `plan(env)`: a pure function of `(manifest, environment, on-disk state)`.
/// Two calls with identical inputs yield identical plans — the topological
/// order is deterministic (`resolver::topo_order`) and `on_disk` is the only
/// other input, supplied by the caller.
pub fn build_plan(
    manifest: &Manifest,
    env: &str,
    on_disk: impl Fn(&str) -> OnDiskState,
) -> Result<Plan> {
    let pins = manifest
        .environments
        .get(env)
        .ok_or_else(|| Error::manifest(format!("unknown environment {env}")))?;
    build_plan_from_pins(manifest, env, pins, on_disk)
}

/// Same as [`build_plan`] but takes an arbitrary pin map rather than one of
/// the manifest's named environments — used by `rollback` to plan against a
/// pin set reconstructed from a lock file, snapshot, or changeset.
pub fn build_plan_from_pins(
    manifest: &Manifest,
    label: &str,
    pins: &BTreeMap<String, String>,
    on_disk: impl Fn(&str) -> OnDiskState,
) -> Result<Plan> {
    let order = resolver::topo_order(&manifest.components)?;
    let mut entries = Vec::new();
    for name in order {
        let Some(pin) = pins.get(&name) else {
            continue;
        };
        let state = on_disk(&name);
        let action = classify(manifest.mode, &state, pin);
        let before_pin = match &state {
            OnDiskState::Absent => None,
            OnDiskState::PresentMismatched { pin } => Some(pin.clone()),
            OnDiskState::PresentMatching { .. } => Some(pin.clone()),
        };
        entries.push(PlanEntry {
            component: name,
            action,
            before_pin,
            after_pin: pin.clone(),
        });
    }

    Ok(Plan {
        environment: label.to_string(),
        entries,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentStatus {
    Healthy,
    Failed { kind_tag: String, message: String },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub component: String,
    pub action: ComponentAction,
    pub status: ComponentStatus,
}

/// Materializes one component. Implementations wrap the git driver, vendor
/// engine, and package-manager install; `&dyn` so
/// the orchestrator itself never depends on a concrete transport. Must be
/// `Sync` because scoped worker threads call it concurrently for
/// independent components within a level.
pub trait ComponentExecutor: Sync {
    fn execute(&self, component: &str, action: ComponentAction) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    pub parallel_jobs: usize,
    pub continue_on_error: bool,
    pub retry: u32,
    pub skip_packages: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            parallel_jobs: 4,
            continue_on_error: false,
            retry: 1,
            skip_packages: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApplySummary {
    pub outcomes: Vec<ExecutionOutcome>,
    pub cancelled: bool,
}

impl ApplySummary {
    pub fn all_healthy(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| matches!(o.status, ComponentStatus::Healthy))
    }
}

fn skipped(component: &str, reason: &str) -> ExecutionOutcome {
    ExecutionOutcome {
        component: component.to_string(),
        action: ComponentAction::Noop,
        status: ComponentStatus::Skipped {
            reason: reason.to_string(),
        },
    }
}

/// Runs one component with bounded retry; a `Cancelled` check happens
/// before every attempt so cooperative cancellation is observed at an I/O
/// boundary, not mid-syscall.
fn run_one(
    component: &str,
    action: ComponentAction,
    max_attempts: u32,
    cancelled: &AtomicBool,
    executor: &(dyn ComponentExecutor + Sync),
) -> ExecutionOutcome {
    if action == ComponentAction::Noop {
        return ExecutionOutcome {
            component: component.to_string(),
            action,
            status: ComponentStatus::Healthy,
        };
    }

    let config = RetryConfig {
        max_attempts: max_attempts.max(1),
        ..RetryConfig::default()
    };

    let mut attempt = 1;
    loop {
        if cancelled.load(Ordering::SeqCst) {
            return skipped(component, "cancelled");
        }
        match executor.execute(component, action) {
            Ok(()) => {
                return ExecutionOutcome {
                    component: component.to_string(),
                    action,
                    status: ComponentStatus::Healthy,
                }
            }
            Err(err) if err.is_retryable() && attempt < config.max_attempts => {
                std::thread::sleep(calculate_delay(&config, attempt));
                attempt += 1;
            }
            Err(err) => {
                return ExecutionOutcome {
                    component: component.to_string(),
                    action,
                    status: ComponentStatus::Failed {
                        kind_tag: err.kind_tag().to_string(),
                        message: err.to_string(),
                    },
                }
            }
        }
    }
}

/// Runs every component in `level` concurrently (bounded by the level's own
/// size — the worker pool draws from the ready set as it's computed
/// one level at a time). Workers are scoped threads; the channel receiver
/// is the sole aggregator of outcomes, so no engine state is ever shared
/// behind a mutex.
fn execute_level(
    level: &[String],
    actions: &BTreeMap<String, ComponentAction>,
    max_attempts: u32,
    cancelled: &AtomicBool,
    executor: &(dyn ComponentExecutor + Sync),
) -> Vec<ExecutionOutcome> {
    let (tx, rx) = mpsc::channel::<ExecutionOutcome>();

    std::thread::scope(|scope| {
        for name in level {
            let tx = tx.clone();
            let action = actions[name];
            scope.spawn(move || {
                let outcome = run_one(name, action, max_attempts, cancelled, executor);
                let _ = tx.send(outcome);
            });
        }
        drop(tx);

        let mut outcomes: Vec<ExecutionOutcome> = rx.iter().collect();
        outcomes.sort_by(|a, b| a.component.cmp(&b.component));
        outcomes
    })
}

/// Computes the full set of transitive dependents of `component` — used to
/// skip everything downstream of a failure under `continue-on-error`.
fn transitive_dependents(components: &BTreeMap<String, Component>, component: &str) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    let mut stack = vec![component.to_string()];
    while let Some(current) = stack.pop() {
        for dependent in resolver::reverse_deps(components, &current) {
            if seen.insert(dependent.clone()) {
                stack.push(dependent);
            }
        }
    }
    seen.into_iter().collect()
}

/// Executes `plan` level by level (dependency-ordered, alphabetical within
/// a level), honoring `options.continue_on_error`: on `fail-fast` the first
/// failure stops dispatch of any further level, though components already
/// running in the same level complete; under `continue-on-error` only the
/// failed component's transitive dependents are skipped, everything else
/// proceeds.
pub fn run(
    manifest: &Manifest,
    plan: &Plan,
    options: &ApplyOptions,
    executor: &(dyn ComponentExecutor + Sync),
    cancelled: &AtomicBool,
) -> Result<ApplySummary> {
    let levels = resolver::levels(&manifest.components)?;
    let actions: BTreeMap<String, ComponentAction> = plan
        .entries
        .iter()
        .map(|e| (e.component.clone(), e.action))
        .collect();

    let mut outcomes = Vec::new();
    let mut skip: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();
    let mut stop = false;

    for level in levels {
        let relevant: Vec<String> = level
            .into_iter()
            .filter(|name| actions.contains_key(name))
            .collect();
        if relevant.is_empty() {
            continue;
        }

        if stop || cancelled.load(Ordering::SeqCst) {
            for name in &relevant {
                outcomes.push(skipped(name, "cancelled"));
            }
            continue;
        }

        let mut runnable = Vec::new();
        for name in &relevant {
            if skip.contains(name) {
                outcomes.push(skipped(name, "dependency failed"));
            } else {
                runnable.push(name.clone());
            }
        }
        if runnable.is_empty() {
            continue;
        }

        let level_outcomes = execute_level(&runnable, &actions, options.retry, cancelled, executor);
        for outcome in level_outcomes {
            if let ComponentStatus::Failed { .. } = &outcome.status {
                if options.continue_on_error {
                    for dependent in transitive_dependents(&manifest.components, &outcome.component) {
                        skip.insert(dependent);
                    }
                } else {
                    stop = true;
                }
            }
            outcomes.push(outcome);
        }
    }

    Ok(ApplySummary {
        outcomes,
        cancelled: cancelled.load(Ordering::SeqCst),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{BuildKind, Isolation};
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    fn component(name: &str, deps: &[&str]) -> Component {
        Component {
            name: name.to_string(),
            repo: "r".into(),
            version: "v1.0.0".into(),
            build_kind: BuildKind::Generic,
            build_target: None,
            depends_on: deps.iter().map(|s| s.to_string()).collect(),
            isolation: Isolation::None,
        }
    }

    fn manifest_ab() -> Manifest {
        let mut components = BTreeMap::new();
        components.insert("a".to_string(), component("a", &[]));
        components.insert("b".to_string(), component("b", &["a"]));
        let mut dev = BTreeMap::new();
        dev.insert("a".to_string(), "v1.0.0".to_string());
        dev.insert("b".to_string(), "v1.0.0".to_string());
        let mut environments = BTreeMap::new();
        environments.insert("dev".to_string(), dev);
        Manifest {
            mode: Mode::Reference,
            components,
            environments,
            features: BTreeMap::new(),
        }
    }

    #[test]
    fn classify_absent_reference_is_clone() {
        let action = classify(Mode::Reference, &OnDiskState::Absent, "v1.0.0");
        assert_eq!(action, ComponentAction::Clone);
    }

    #[test]
    fn classify_absent_vendored_is_vendor_import() {
        let action = classify(Mode::Vendored, &OnDiskState::Absent, "v1.0.0");
        assert_eq!(action, ComponentAction::VendorImport);
    }

    #[test]
    fn classify_matching_pin_and_deps_is_noop() {
        let action = classify(
            Mode::Reference,
            &OnDiskState::PresentMatching { deps_satisfied: true },
            "v1.0.0",
        );
        assert_eq!(action, ComponentAction::Noop);
    }

    #[test]
    fn classify_matching_pin_missing_deps_is_update_deps_only() {
        let action = classify(
            Mode::Reference,
            &OnDiskState::PresentMatching { deps_satisfied: false },
            "v1.0.0",
        );
        assert_eq!(action, ComponentAction::UpdateDepsOnly);
    }

    #[test]
    fn classify_mismatched_pin_reference_is_checkout() {
        let action = classify(
            Mode::Reference,
            &OnDiskState::PresentMismatched { pin: "v0.9.0".into() },
            "v1.0.0",
        );
        assert_eq!(action, ComponentAction::Checkout);
    }

    #[test]
    fn build_plan_is_deterministic_for_identical_inputs() {
        let manifest = manifest_ab();
        let p1 = build_plan(&manifest, "dev", |_| OnDiskState::Absent).unwrap();
        let p2 = build_plan(&manifest, "dev", |_| OnDiskState::Absent).unwrap();
        assert_eq!(
            p1.entries.iter().map(|e| &e.component).collect::<Vec<_>>(),
            p2.entries.iter().map(|e| &e.component).collect::<Vec<_>>()
        );
        assert_eq!(p1.entries[0].component, "a");
        assert_eq!(p1.entries[1].component, "b");
    }

    struct RecordingExecutor {
        calls: Mutex<BTreeSet<String>>,
        fail: BTreeSet<String>,
    }

    impl ComponentExecutor for RecordingExecutor {
        fn execute(&self, component: &str, _action: ComponentAction) -> Result<()> {
            self.calls.lock().unwrap().insert(component.to_string());
            if self.fail.contains(component) {
                Err(Error::dependency(component, "simulated failure"))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn apply_runs_dependency_before_dependent_and_reports_healthy() {
        let manifest = manifest_ab();
        let plan = build_plan(&manifest, "dev", |_| OnDiskState::Absent).unwrap();
        let executor = RecordingExecutor {
            calls: Mutex::new(BTreeSet::new()),
            fail: BTreeSet::new(),
        };
        let cancelled = AtomicBool::new(false);
        let summary = run(&manifest, &plan, &ApplyOptions::default(), &executor, &cancelled).unwrap();

        assert!(summary.all_healthy());
        assert_eq!(summary.outcomes.len(), 2);
    }

    #[test]
    fn fail_fast_skips_dependents_of_a_failed_component() {
        let manifest = manifest_ab();
        let plan = build_plan(&manifest, "dev", |_| OnDiskState::Absent).unwrap();
        let mut fail = BTreeSet::new();
        fail.insert("a".to_string());
        let executor = RecordingExecutor {
            calls: Mutex::new(BTreeSet::new()),
            fail,
        };
        let cancelled = AtomicBool::new(false);
        let options = ApplyOptions {
            continue_on_error: false,
            retry: 1,
            ..Default::default()
        };
        let summary = run(&manifest, &plan, &options, &executor, &cancelled).unwrap();

        let b_outcome = summary.outcomes.iter().find(|o| o.component == "b").unwrap();
        assert_eq!(
            b_outcome.status,
            ComponentStatus::Skipped { reason: "cancelled".to_string() }
        );
    }

    #[test]
    fn continue_on_error_skips_only_the_failed_components_dependents() {
        let manifest = manifest_ab();
        let plan = build_plan(&manifest, "dev", |_| OnDiskState::Absent).unwrap();
        let mut fail = BTreeSet::new();
        fail.insert("a".to_string());
        let executor = RecordingExecutor {
            calls: Mutex::new(BTreeSet::new()),
            fail,
        };
        let cancelled = AtomicBool::new(false);
        let options = ApplyOptions {
            continue_on_error: true,
            retry: 1,
            ..Default::default()
        };
        let summary = run(&manifest, &plan, &options, &executor, &cancelled).unwrap();

        let a_outcome = summary.outcomes.iter().find(|o| o.component == "a").unwrap();
        assert!(matches!(a_outcome.status, ComponentStatus::Failed { .. }));
        let b_outcome = summary.outcomes.iter().find(|o| o.component == "b").unwrap();
        assert_eq!(
            b_outcome.status,
            ComponentStatus::Skipped { reason: "dependency failed".to_string() }
        );
    }

    #[test]
    fn cancellation_before_dispatch_skips_every_remaining_component() {
        let manifest = manifest_ab();
        let plan = build_plan(&manifest, "dev", |_| OnDiskState::Absent).unwrap();
        let executor = RecordingExecutor {
            calls: Mutex::new(BTreeSet::new()),
            fail: BTreeSet::new(),
        };
        let cancelled = AtomicBool::new(true);
        let summary = run(&manifest, &plan, &ApplyOptions::default(), &executor, &cancelled).unwrap();

        assert!(summary
            .outcomes
            .iter()
            .all(|o| matches!(o.status, ComponentStatus::Skipped { .. })));
    }

    #[test]
    fn noop_action_never_calls_the_executor() {
        let manifest = manifest_ab();
        let plan = build_plan(&manifest, "dev", |_| OnDiskState::PresentMatching {
            deps_satisfied: true,
        })
        .unwrap();
        let executor = RecordingExecutor {
            calls: Mutex::new(BTreeSet::new()),
            fail: BTreeSet::new(),
        };
        let cancelled = AtomicBool::new(false);
        let summary = run(&manifest, &plan, &ApplyOptions::default(), &executor, &cancelled).unwrap();

        assert!(summary.all_healthy());
        assert!(executor.calls.lock().unwrap().is_empty());
    }
}
