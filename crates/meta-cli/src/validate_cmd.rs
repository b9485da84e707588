//! `meta validate`: manifest, resolver, lock-validate, feature
//! checks. Exits non-zero iff any check fails.

use meta_core::context::Context;
use meta_core::error::{Error, Result};
use meta_core::{lockfile, manifest, resolver};

pub fn run(ctx: &mut Context, env: Option<&str>) -> Result<()> {
    let workspace_manifest = crate::load_workspace_manifest(ctx)?;
    ctx.reporter.info("manifest loaded and structurally valid");

    manifest::validate(&workspace_manifest)?;

    resolver::topo_order(&workspace_manifest.components)?;
    ctx.reporter.info("dependency graph is acyclic");

    let conflicts = resolver::find_conflicts(&workspace_manifest);
    if !conflicts.is_empty() {
        let (name, ranges) = conflicts.into_iter().next().unwrap();
        return Err(Error::Conflict {
            name,
            conflicting_ranges: ranges,
        });
    }

    let target_env = ctx.env_or_default(env).to_string();
    if workspace_manifest.environments.contains_key(&target_env) {
        let lock_path = lockfile::lock_path(ctx.workspace_root(), &target_env);
        if lock_path.exists() {
            let lock = lockfile::read(ctx.workspace_root(), &target_env)?;
            let report = lockfile::validate(&workspace_manifest, &lock);
            if !report.ok() {
                return Err(Error::LockMismatch {
                    component: target_env,
                    discrepancy: format!("{:?}", report.discrepancies),
                });
            }
            ctx.reporter.info(&format!("lock file for {target_env} validates"));
        }
    }

    println!("validate: ok ({target_env})");
    Ok(())
}
