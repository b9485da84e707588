//! `meta lock` and its `promote`/`compare` subcommands.

use meta_core::context::Context;
use meta_core::error::{Error, Result};
use meta_core::manifest::Mode;
use meta_core::{git, lockfile};

use crate::cli::LockAction;

fn resolve_sha_from_checkout(ctx: &Context, component: &str, pin: &str) -> Result<String> {
    let dir = ctx.component_dir(component);
    if !dir.exists() {
        return Err(Error::dependency(
            component,
            "component must be cloned before its lock entry can be generated; run `meta apply` first",
        ));
    }
    git::resolve_sha(component, &dir, pin)
}

pub fn run(
    ctx: &mut Context,
    env: Option<&str>,
    changeset: Option<&str>,
    validate: bool,
    action: Option<LockAction>,
) -> Result<()> {
    if let Some(action) = action {
        return run_action(ctx, action);
    }

    let manifest = crate::load_workspace_manifest(ctx)?;
    let target_env = ctx.env_or_default(env).to_string();

    if validate {
        let lock = lockfile::read(ctx.workspace_root(), &target_env)?;
        let report = lockfile::validate(&manifest, &lock);
        if !report.ok() {
            return Err(Error::LockMismatch {
                component: target_env,
                discrepancy: format!("{:?}", report.discrepancies),
            });
        }
        println!("lock: ok ({target_env})");
        return Ok(());
    }

    let lock = lockfile::generate(&manifest, &target_env, |repo, pin| {
        let component = manifest
            .components
            .values()
            .find(|c| c.repo == repo)
            .map(|c| c.name.clone())
            .unwrap_or_else(|| repo.to_string());
        resolve_sha_from_checkout(ctx, &component, pin)
    })?;
    lockfile::write(ctx.workspace_root(), &lock)?;

    if let Some(changeset_id) = changeset {
        ctx.reporter.info(&format!(
            "lock file for {target_env} generated under changeset {changeset_id}"
        ));
    }

    println!(
        "lock: generated {} entries for {target_env}{}",
        lock.entries.len(),
        if manifest.mode == Mode::Vendored { " (vendored)" } else { "" }
    );
    Ok(())
}

fn run_action(ctx: &mut Context, action: LockAction) -> Result<()> {
    let manifest = crate::load_workspace_manifest(ctx)?;
    match action {
        LockAction::Promote { src, dst } => {
            let src_lock = lockfile::read(ctx.workspace_root(), &src)?;
            let promoted = lockfile::promote(&manifest, &src_lock, &dst)?;
            lockfile::write(ctx.workspace_root(), &promoted)?;
            println!("lock: promoted {src} -> {dst} ({} entries)", promoted.entries.len());
            Ok(())
        }
        LockAction::Compare { a, b } => {
            let lock_a = lockfile::read(ctx.workspace_root(), &a)?;
            let lock_b = lockfile::read(ctx.workspace_root(), &b)?;
            let report = lockfile::compare(&lock_a, &lock_b);
            println!("lock compare ({a} vs {b}):");
            for name in &report.only_in_a {
                println!("  only in {a}: {name}");
            }
            for name in &report.only_in_b {
                println!("  only in {b}: {name}");
            }
            for diff in &report.field_diffs {
                println!("  {}: {} differs ({} vs {})", diff.component, diff.field, diff.a, diff.b);
            }
            Ok(())
        }
    }
}
