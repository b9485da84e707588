//! `meta rollback`: resolves a rollback target into a pin
//! map and replays it through the same apply machinery a forward apply uses,
//! so a rollback can never drift from how components are actually
//! materialized.

use std::collections::BTreeMap;
use std::sync::atomic::AtomicBool;

use meta_core::apply::{self, ApplyOptions};
use meta_core::context::Context;
use meta_core::error::Result;
use meta_core::rollback::{self, RollbackTarget};
use meta_core::wslock::WorkspaceLock;

use crate::cli::RollbackAction;
use crate::executor::CliExecutor;
use crate::probe;

pub fn run(ctx: &mut Context, target: RollbackAction) -> Result<()> {
    let manifest = crate::load_workspace_manifest(ctx)?;

    let (label, resolved_target) = match target {
        RollbackAction::Component { name, pin } => {
            let mut pins = BTreeMap::new();
            pins.insert(name.clone(), pin);
            (format!("component {name}"), RollbackTarget::Pins(pins))
        }
        RollbackAction::Lock { env } => (format!("lock {env}"), RollbackTarget::LockFile(env)),
        RollbackAction::Store { component, hash } => (
            format!("store {component}@{hash}"),
            RollbackTarget::StoreHash { component, hash },
        ),
        RollbackAction::Snapshot { id } => (format!("snapshot {id}"), RollbackTarget::Snapshot(id)),
        RollbackAction::Changeset { id } => (format!("changeset {id}"), RollbackTarget::Changeset(id)),
    };

    let pins = rollback::resolve_pins(ctx.workspace_root(), &manifest, &resolved_target)?;

    let lock = WorkspaceLock::acquire(&ctx.state_dir(), "rollback")?;

    let plan = apply::build_plan_from_pins(&manifest, &label, &pins, |name| {
        probe::on_disk_state(ctx, &manifest, name, pins.get(name).map(|s| s.as_str()).unwrap_or(""))
    })?;

    let executor = CliExecutor {
        workspace_root: ctx.workspace_root().to_path_buf(),
        components_dir: ctx.components_dir(),
        mode: manifest.mode,
        components: manifest.components.clone(),
        pins,
        skip_packages: false,
    };

    let options = ApplyOptions {
        parallel_jobs: ctx.options.parallel_jobs,
        continue_on_error: false,
        retry: 1,
        skip_packages: false,
    };

    let cancelled = AtomicBool::new(false);
    let summary = apply::run(&manifest, &plan, &options, &executor, &cancelled)?;
    lock.release();

    for outcome in &summary.outcomes {
        println!("  {}: {:?} -> {:?}", outcome.component, outcome.action, outcome.status);
    }

    if !summary.all_healthy() {
        return Err(meta_core::error::Error::manifest(format!(
            "rollback to {label} completed with failures"
        )));
    }

    println!("rollback: ok ({label})");
    Ok(())
}
