//! `meta config`: read or write the project or global
//! configuration layer directly, independent of the per-invocation
//! resolution `main.rs` already performs for every other command.

use meta_core::config::{self, MetaConfig};
use meta_core::context::Context;
use meta_core::error::Result;

use crate::cli::ConfigAction;

fn load(ctx: &Context, global: bool) -> Result<MetaConfig> {
    if global {
        config::load_global_config()
    } else {
        config::load_project_config(ctx.workspace_root())
    }
}

fn save(ctx: &Context, global: bool, cfg: &MetaConfig) -> Result<()> {
    if global {
        config::write_global_config(cfg)
    } else {
        config::write_project_config(ctx.workspace_root(), cfg)
    }
}

pub fn run(ctx: &mut Context, global: bool, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let cfg = load(ctx, global)?;
            match config::get_key(&cfg, &key) {
                Some(value) => println!("{key} = {value}"),
                None => println!("{key} is unset"),
            }
            Ok(())
        }
        ConfigAction::Set { key, value } => {
            let mut cfg = load(ctx, global)?;
            config::set_key(&mut cfg, &key, &value)?;
            save(ctx, global, &cfg)?;
            println!("config: set {key} = {value}");
            Ok(())
        }
        ConfigAction::Unset { key } => {
            let mut cfg = load(ctx, global)?;
            config::unset_key(&mut cfg, &key)?;
            save(ctx, global, &cfg)?;
            println!("config: unset {key}");
            Ok(())
        }
        ConfigAction::Init => {
            let cfg = MetaConfig::default();
            save(ctx, global, &cfg)?;
            println!(
                "config: wrote defaults to {}",
                if global { "the global config" } else { "the project config" }
            );
            Ok(())
        }
    }
}
