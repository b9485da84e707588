//! Mark-and-sweep garbage collection over the store and cache. Roots: all lock files currently present, all snapshots, and all
//! `in-progress`/`committed` changesets.
//!
//! Safe to run concurrently with reads: an entry is deleted only after its
//! hash is recorded in a pending-delete list and a root-reference check is
//! re-run against it, so a reference that appears between the mark phase
//! and the delete never gets swept.

use std::collections::BTreeSet;

use crate::cache::Cache;
use crate::error::Result;
use crate::store::Store;

#[derive(Debug, Default)]
pub struct GcReport {
    pub retained: Vec<String>,
    pub removed: Vec<String>,
}

/// Computes the root set from the data the caller has already loaded: the
/// commit shas / vendored versions pinned across every present lock file,
/// plus any further hashes the caller knows are rooted by a snapshot or a
/// live changeset.
pub fn compute_roots<'a>(rooted_hashes: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
    rooted_hashes.into_iter().map(|s| s.to_string()).collect()
}

/// Single-pass mark-and-sweep: everything in `store` not in `roots` is
/// provisionally marked for deletion, then re-checked against a caller
/// supplied `current_roots` closure (which re-reads live root state) before
/// actually deleting — this is what keeps GC safe under concurrent reads
/// that might add a new reference mid-sweep.
pub fn collect(
    store: &Store,
    cache: &Cache,
    roots: &BTreeSet<String>,
    mut current_roots: impl FnMut() -> BTreeSet<String>,
) -> Result<GcReport> {
    let mut report = GcReport::default();
    let all = store.all_hashes();

    let mut pending_delete = Vec::new();
    for hash in &all {
        if roots.contains(hash) {
            report.retained.push(hash.clone());
        } else {
            pending_delete.push(hash.clone());
        }
    }

    let reverified_roots = current_roots();
    for hash in pending_delete {
        if reverified_roots.contains(&hash) {
            report.retained.push(hash);
            continue;
        }
        store.remove(&hash)?;
        report.removed.push(hash);
    }

    for entry in cache.all_entries() {
        if !store.exists(&entry.store_hash) {
            cache.invalidate(&entry.key)?;
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn removes_unreferenced_entries_and_keeps_referenced_ones() {
        let store_dir = tempdir().unwrap();
        let cache_dir = tempdir().unwrap();
        let store = Store::new(store_dir.path());
        let cache = Cache::new(cache_dir.path());

        let mut hashes = Vec::new();
        for i in 0..3 {
            let src = tempdir().unwrap();
            fs::write(src.path().join("f"), format!("content-{i}")).unwrap();
            hashes.push(store.add(src.path(), "c", &format!("v{i}")).unwrap());
        }

        let roots: BTreeSet<String> = hashes[..2].iter().cloned().collect();
        let report = collect(&store, &cache, &roots, || roots.clone()).unwrap();

        assert_eq!(report.retained.len(), 2);
        assert_eq!(report.removed.len(), 1);
        assert!(!store.exists(&hashes[2]));
        assert!(store.exists(&hashes[0]));
    }

    #[test]
    fn revote_during_sweep_saves_a_hash_from_deletion() {
        let store_dir = tempdir().unwrap();
        let cache_dir = tempdir().unwrap();
        let store = Store::new(store_dir.path());
        let cache = Cache::new(cache_dir.path());

        let src = tempdir().unwrap();
        fs::write(src.path().join("f"), "content").unwrap();
        let hash = store.add(src.path(), "c", "v1").unwrap();

        let empty_roots: BTreeSet<String> = BTreeSet::new();
        let newly_rooted: BTreeSet<String> = std::iter::once(hash.clone()).collect();

        let report = collect(&store, &cache, &empty_roots, || newly_rooted.clone()).unwrap();
        assert!(report.removed.is_empty());
        assert!(store.exists(&hash));
    }

    #[test]
    fn gc_invalidates_cache_entries_pointing_at_removed_store_hashes() {
        let store_dir = tempdir().unwrap();
        let cache_dir = tempdir().unwrap();
        let store = Store::new(store_dir.path());
        let cache = Cache::new(cache_dir.path());

        let src = tempdir().unwrap();
        fs::write(src.path().join("f"), "content").unwrap();
        let hash = store.add(src.path(), "c", "v1").unwrap();
        cache.put("c:key", &hash).unwrap();

        let empty_roots: BTreeSet<String> = BTreeSet::new();
        collect(&store, &cache, &empty_roots, BTreeSet::new).unwrap();

        assert!(cache.lookup("c:key").is_err());
        let _ = BTreeMap::<String, String>::new();
    }
}
