//! `meta gc`: garbage-collects store entries no longer
//! reachable from any present lock file, snapshot, or live changeset.

use std::collections::BTreeSet;

use meta_core::cache::Cache;
use meta_core::changeset::{self, ChangesetStatus};
use meta_core::context::Context;
use meta_core::error::Result;
use meta_core::store::Store;
use meta_core::{lockfile, manifest};

/// Component names currently referenced by a present lock file (any
/// environment), a snapshot, or an in-progress/committed changeset.
fn live_components(ctx: &Context) -> BTreeSet<String> {
    let mut live = BTreeSet::new();

    if let Ok(m) = manifest::load_workspace(&ctx.manifests_dir()) {
        for env in m.environments.keys() {
            if let Ok(lock) = lockfile::read(ctx.workspace_root(), env) {
                live.extend(lock.entries.into_keys());
            }
        }
    }

    if let Ok(entries) = std::fs::read_dir(ctx.state_dir().join("snapshots")) {
        for entry in entries.flatten() {
            if let Some(id) = entry.file_name().to_str() {
                if let Ok(snapshot) = meta_core::rollback::load_snapshot(ctx.workspace_root(), id) {
                    live.extend(snapshot.pins.into_keys());
                }
            }
        }
    }

    if let Ok(index) = changeset::load_index(ctx.workspace_root()) {
        for id in &index.ids {
            if let Ok(cs) = changeset::load(ctx.workspace_root(), id) {
                if matches!(cs.status, ChangesetStatus::InProgress | ChangesetStatus::Committed) {
                    live.extend(cs.repos.into_iter().map(|r| r.name));
                }
            }
        }
    }

    live
}

fn rooted_hashes(cache: &Cache, live: &BTreeSet<String>) -> BTreeSet<String> {
    cache
        .all_entries()
        .into_iter()
        .filter(|entry| live.iter().any(|c| entry.key.starts_with(&format!("{c}:"))))
        .map(|entry| entry.store_hash)
        .collect()
}

pub fn run(ctx: &mut Context) -> Result<()> {
    let store = Store::new(ctx.store_dir());
    let cache = Cache::new(ctx.cache_dir());

    let live = live_components(ctx);
    let roots = rooted_hashes(&cache, &live);

    let report = meta_core::gc::collect(&store, &cache, &roots, || {
        rooted_hashes(&cache, &live_components(ctx))
    })?;

    println!(
        "gc: retained {} entries, removed {} entries",
        report.retained.len(),
        report.removed.len()
    );
    for hash in &report.removed {
        println!("  removed {hash}");
    }
    Ok(())
}
