//! `meta health`: runs the preflight checks standalone, and
//! optionally a build/test pass per component via its package manager.

use std::time::Duration;

use meta_core::context::Context;
use meta_core::error::Result;
use meta_core::manifest::Component;
use meta_core::{health, packagemanager, process};

use crate::probe;

fn run_script(component: &Component, dir: &std::path::Path, verb: &str, args: &[&str]) -> health::CheckResult {
    let Some(manager) = packagemanager::detect_package_manager(dir) else {
        return health::CheckResult {
            name: format!("{}:{verb}", component.name),
            passed: true,
            detail: "no recognized package manager files, skipped".to_string(),
        };
    };
    let mut cmd = std::process::Command::new(manager.program());
    cmd.args(args).current_dir(dir);
    match process::run_command_with_timeout(cmd, Duration::from_secs(600)) {
        Ok(output) if output.success() => health::CheckResult {
            name: format!("{}:{verb}", component.name),
            passed: true,
            detail: "ok".to_string(),
        },
        Ok(output) => health::CheckResult {
            name: format!("{}:{verb}", component.name),
            passed: false,
            detail: output.stderr.trim().to_string(),
        },
        Err(e) => health::CheckResult {
            name: format!("{}:{verb}", component.name),
            passed: false,
            detail: e.to_string(),
        },
    }
}

pub fn run(ctx: &mut Context, component: Option<&str>, all: bool, build: bool, tests: bool) -> Result<()> {
    let manifest = crate::load_workspace_manifest(ctx)?;

    let preflight = health::run_preflight(&manifest, true, ctx.reporter);
    print_report("preflight", &preflight);

    if !build && !tests {
        return if preflight.is_healthy() {
            Ok(())
        } else {
            Err(meta_core::error::Error::manifest("preflight checks failed"))
        };
    }

    let targets: Vec<&Component> = manifest
        .components
        .values()
        .filter(|c| all || component == Some(c.name.as_str()))
        .collect();

    let mut checks = Vec::new();
    for c in targets {
        let dir = ctx.component_dir(&c.name);
        if !matches!(probe::on_disk_state(ctx, &manifest, &c.name, &c.version), meta_core::apply::OnDiskState::PresentMatching { .. } | meta_core::apply::OnDiskState::PresentMismatched { .. }) {
            checks.push(health::CheckResult {
                name: c.name.clone(),
                passed: false,
                detail: "not present on disk".to_string(),
            });
            continue;
        }
        if build {
            checks.push(run_script(c, &dir, "build", &["build"]));
        }
        if tests {
            checks.push(run_script(c, &dir, "test", &["test"]));
        }
    }

    let failed = checks.iter().filter(|c| !c.passed).count();
    let status = if failed == 0 {
        health::Status::Healthy
    } else if failed < checks.len() {
        health::Status::Degraded
    } else {
        health::Status::Unhealthy
    };
    let report = health::HealthReport { status, checks };
    print_report("build/test", &report);

    if preflight.is_healthy() && report.is_healthy() {
        Ok(())
    } else {
        Err(meta_core::error::Error::manifest("health checks failed"))
    }
}

fn print_report(label: &str, report: &health::HealthReport) {
    println!("{label}: {:?}", report.status);
    for check in &report.checks {
        println!("  {} [{}]: {}", check.name, if check.passed { "ok" } else { "fail" }, check.detail);
    }
}
