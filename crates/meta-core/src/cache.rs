//! Build cache: maps a canonical cache key — component
//! version, build target, transitive dependency pins, and source tree hash —
//! to a store hash.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hashing::{atomic_write_json, hash_bytes};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub store_hash: String,
    pub created_at: DateTime<Utc>,
}

pub struct Cache {
    root: PathBuf,
}

impl Cache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }

    pub fn put(&self, key: &str, store_hash: &str) -> Result<()> {
        let entry = CacheEntry {
            key: key.to_string(),
            store_hash: store_hash.to_string(),
            created_at: Utc::now(),
        };
        atomic_write_json(&self.entry_path(key), &entry)
    }

    pub fn lookup(&self, key: &str) -> Result<String> {
        let path = self.entry_path(key);
        let raw = fs::read_to_string(&path).map_err(|_| Error::CacheMiss {
            key: key.to_string(),
        })?;
        let entry: CacheEntry = serde_json::from_str(&raw).map_err(|_| Error::CacheMiss {
            key: key.to_string(),
        })?;
        Ok(entry.store_hash)
    }

    pub fn invalidate(&self, key: &str) -> Result<()> {
        let path = self.entry_path(key);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| Error::io(&path, e))?;
        }
        Ok(())
    }

    /// Invalidates every cache entry whose key was built for `component`
    /// (the component name is baked into the key by [`cache_key`]).
    pub fn invalidate_component(&self, component: &str) -> Result<()> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Ok(());
        };
        for entry in entries.flatten() {
            let Ok(raw) = fs::read_to_string(entry.path()) else {
                continue;
            };
            if let Ok(cache_entry) = serde_json::from_str::<CacheEntry>(&raw) {
                if cache_entry.key.starts_with(&format!("{component}:")) {
                    let _ = fs::remove_file(entry.path());
                }
            }
        }
        Ok(())
    }

    pub fn all_entries(&self) -> Vec<CacheEntry> {
        let Ok(entries) = fs::read_dir(&self.root) else {
            return Vec::new();
        };
        entries
            .flatten()
            .filter_map(|e| fs::read_to_string(e.path()).ok())
            .filter_map(|raw| serde_json::from_str(&raw).ok())
            .collect()
    }
}

/// `cacheKey(component, target, dep_hashes, source_hash) -> key`. Dependency
/// hashes are sorted so two semantically identical dependency sets hash to
/// the same key regardless of input ordering.
pub fn cache_key(
    component: &str,
    build_target: Option<&str>,
    dep_hashes: &BTreeMap<String, String>,
    source_hash: &str,
) -> String {
    let mut canonical = format!("{component}:{}\n", build_target.unwrap_or(""));
    for (dep, hash) in dep_hashes {
        canonical.push_str(&format!("{dep}={hash}\n"));
    }
    canonical.push_str(source_hash);
    format!("{component}:{}", hash_bytes(canonical.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_then_lookup_round_trips() {
        let dir = tempdir().unwrap();
        let cache = Cache::new(dir.path());
        let key = cache_key("a", Some("bin"), &BTreeMap::new(), "src-hash");
        cache.put(&key, "store-hash-1").unwrap();
        assert_eq!(cache.lookup(&key).unwrap(), "store-hash-1");
    }

    #[test]
    fn lookup_miss_returns_cache_miss_error() {
        let dir = tempdir().unwrap();
        let cache = Cache::new(dir.path());
        let err = cache.lookup("never-put").unwrap_err();
        assert_eq!(err.kind_tag(), "CacheMiss");
    }

    #[test]
    fn cache_key_is_independent_of_dep_hash_insertion_order() {
        let mut deps_a = BTreeMap::new();
        deps_a.insert("x".to_string(), "1".to_string());
        deps_a.insert("y".to_string(), "2".to_string());

        let mut deps_b = BTreeMap::new();
        deps_b.insert("y".to_string(), "2".to_string());
        deps_b.insert("x".to_string(), "1".to_string());

        let key_a = cache_key("c", None, &deps_a, "src");
        let key_b = cache_key("c", None, &deps_b, "src");
        assert_eq!(key_a, key_b);
    }

    #[test]
    fn invalidate_component_removes_only_that_components_entries() {
        let dir = tempdir().unwrap();
        let cache = Cache::new(dir.path());
        let key_a = cache_key("a", None, &BTreeMap::new(), "src");
        let key_b = cache_key("b", None, &BTreeMap::new(), "src");
        cache.put(&key_a, "h1").unwrap();
        cache.put(&key_b, "h2").unwrap();

        cache.invalidate_component("a").unwrap();

        assert!(cache.lookup(&key_a).is_err());
        assert!(cache.lookup(&key_b).is_ok());
    }
}
