//! `meta plan` and `meta apply`: `plan` is `apply`'s pure
//! half, printed without ever touching the workspace; `apply` takes the
//! workspace lock, builds the same plan, and hands it to
//! [`meta_core::apply::run`] with a [`crate::executor::CliExecutor`].

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;

use meta_core::apply::{self, ApplyOptions, Plan};
use meta_core::context::Context;
use meta_core::error::Result;
use meta_core::manifest::Manifest;
use meta_core::wslock::WorkspaceLock;
use meta_core::{health, lockfile};

use crate::executor::CliExecutor;
use crate::probe;

fn build(manifest: &Manifest, ctx: &Context, env: &str, locked: bool) -> Result<Plan> {
    if locked {
        let lock = lockfile::read(ctx.workspace_root(), env)?;
        let pins: BTreeMap<String, String> = lock
            .entries
            .iter()
            .map(|(name, entry)| {
                let pin = match entry {
                    lockfile::LockEntry::Reference { commit_sha, .. } => commit_sha.clone(),
                    lockfile::LockEntry::Vendored { version, .. } => version.clone(),
                };
                (name.clone(), pin)
            })
            .collect();
        apply::build_plan_from_pins(manifest, env, &pins, |name| {
            probe::on_disk_state(ctx, manifest, name, pins.get(name).map(|s| s.as_str()).unwrap_or(""))
        })
    } else {
        apply::build_plan(manifest, env, |name| {
            let pin = manifest.environments[env].get(name).map(|s| s.as_str()).unwrap_or("");
            probe::on_disk_state(ctx, manifest, name, pin)
        })
    }
}

fn print_plan(plan: &Plan, only_component: Option<&str>) {
    println!("plan ({}):", plan.environment);
    for entry in &plan.entries {
        if let Some(only) = only_component {
            if entry.component != only {
                continue;
            }
        }
        let before = entry.before_pin.as_deref().unwrap_or("-");
        println!(
            "  {}: {:?} ({before} -> {})",
            entry.component, entry.action, entry.after_pin
        );
    }
}

pub fn run(ctx: &mut Context, env: Option<&str>, component: Option<&str>) -> Result<()> {
    let manifest = crate::load_workspace_manifest(ctx)?;
    let target_env = ctx.env_or_default(env).to_string();
    let plan = build(&manifest, ctx, &target_env, false)?;
    print_plan(&plan, component);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn run_apply(
    ctx: &mut Context,
    env: Option<&str>,
    locked: bool,
    jobs: Option<usize>,
    continue_on_error: bool,
    retry: Option<u32>,
    skip_packages: bool,
) -> Result<()> {
    let manifest = crate::load_workspace_manifest(ctx)?;
    let target_env = ctx.env_or_default(env).to_string();

    let lock = WorkspaceLock::acquire(&ctx.state_dir(), "apply")?;

    let preflight = health::run_preflight(&manifest, true, ctx.reporter);
    if !preflight.is_healthy() {
        ctx.reporter.error("preflight checks failed, aborting apply");
        for check in &preflight.checks {
            if !check.passed {
                ctx.reporter.error(&format!("  {}: {}", check.name, check.detail));
            }
        }
        return Err(meta_core::error::Error::manifest("preflight checks failed"));
    }

    let plan = build(&manifest, ctx, &target_env, locked)?;
    let pins: BTreeMap<String, String> = plan
        .entries
        .iter()
        .map(|e| (e.component.clone(), e.after_pin.clone()))
        .collect();

    let executor = CliExecutor {
        workspace_root: ctx.workspace_root().to_path_buf(),
        components_dir: ctx.components_dir(),
        mode: manifest.mode,
        components: manifest.components.clone(),
        pins,
        skip_packages,
    };

    let options = ApplyOptions {
        parallel_jobs: jobs.unwrap_or(ctx.options.parallel_jobs),
        continue_on_error,
        retry: retry.unwrap_or(1),
        skip_packages,
    };

    let cancelled = AtomicBool::new(false);
    let summary = apply::run(&manifest, &plan, &options, &executor, &cancelled)?;

    for outcome in &summary.outcomes {
        println!("  {}: {:?} -> {:?}", outcome.component, outcome.action, outcome.status);
    }

    let postcheck = health::run_postcheck(&summary.outcomes, ctx.reporter);
    lock.release();

    if !postcheck.is_healthy() || !summary.all_healthy() {
        return Err(meta_core::error::Error::manifest(format!(
            "apply completed with failures for {target_env}"
        )));
    }

    println!("apply: ok ({target_env})");
    Ok(())
}
