//! `meta cache`: inspect and invalidate build-cache entries.

use meta_core::cache::Cache;
use meta_core::context::Context;
use meta_core::error::Result;

use crate::cli::CacheAction;

pub fn run(ctx: &mut Context, action: CacheAction) -> Result<()> {
    let cache = Cache::new(ctx.cache_dir());
    match action {
        CacheAction::List => {
            println!("cache entries:");
            for entry in cache.all_entries() {
                println!("  {} -> {} ({})", entry.key, entry.store_hash, entry.created_at);
            }
        }
        CacheAction::Invalidate { key } => {
            cache.invalidate(&key)?;
            println!("cache: invalidated {key}");
        }
        CacheAction::InvalidateComponent { component } => {
            cache.invalidate_component(&component)?;
            println!("cache: invalidated all entries for {component}");
        }
    }
    Ok(())
}
