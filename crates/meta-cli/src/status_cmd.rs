//! `meta status`: per-component desired/actual/status report,
//! reusing the same on-disk probe and `classify` the planner uses so status
//! and plan never disagree about what "out of date" means.

use meta_core::apply::classify;
use meta_core::context::Context;
use meta_core::error::Result;

use crate::probe;

pub fn run(ctx: &mut Context, env: Option<&str>) -> Result<()> {
    let manifest = crate::load_workspace_manifest(ctx)?;
    let target_env = ctx.env_or_default(env).to_string();

    let pins = manifest
        .environments
        .get(&target_env)
        .ok_or_else(|| meta_core::error::Error::manifest(format!("unknown environment {target_env}")))?;

    println!("status ({target_env}):");
    for (name, pin) in pins {
        let state = probe::on_disk_state(ctx, &manifest, name, pin);
        let action = classify(manifest.mode, &state, pin);
        let detail = match &state {
            meta_core::apply::OnDiskState::Absent => "absent".to_string(),
            meta_core::apply::OnDiskState::PresentMismatched { pin: actual } => {
                format!("present @ {actual}, desired {pin}")
            }
            meta_core::apply::OnDiskState::PresentMatching { deps_satisfied } => {
                format!("present @ {pin}, deps_satisfied={deps_satisfied}")
            }
        };
        println!("  {name}: {detail} -> {action:?}");
    }

    Ok(())
}
