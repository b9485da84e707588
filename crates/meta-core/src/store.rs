//! Content-addressed artifact store.
//!
//! `add` computes a canonical hash over a source tree plus an
//! `inputs_digest` the caller supplies, and stores an immutable copy under
//! `<store_root>/<hash_prefix>/<hash>/` with a sibling
//! `<hash>.metadata.json`. Re-adding identical content is a no-op.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hashing::{atomic_write_json, copy_tree, hash_tree, sharded_store_path};

pub const CURRENT_STORE_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub store_version: u32,
    pub hash: String,
    pub component: String,
    pub inputs_digest: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub references: BTreeSet<String>,
}

pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn metadata_path(&self, hash: &str) -> PathBuf {
        sharded_store_path(&self.root, hash).with_extension("metadata.json")
    }

    fn entry_dir(&self, hash: &str) -> PathBuf {
        sharded_store_path(&self.root, hash)
    }

    /// Computes the tree hash and, if no entry already exists for it, copies
    /// `source_path` into the store and writes its metadata. Returns the
    /// hash either way.
    pub fn add(&self, source_path: &Path, component: &str, inputs_digest: &str) -> Result<String> {
        let hash = hash_tree(source_path, inputs_digest)?;
        let dir = self.entry_dir(&hash);
        if !dir.exists() {
            copy_tree(source_path, &dir, false)?;
            let metadata = StoreMetadata {
                store_version: CURRENT_STORE_VERSION,
                hash: hash.clone(),
                component: component.to_string(),
                inputs_digest: inputs_digest.to_string(),
                created_at: Utc::now(),
                references: BTreeSet::new(),
            };
            atomic_write_json(&self.metadata_path(&hash), &metadata)?;
        }
        Ok(hash)
    }

    /// Atomically restores the directory tree for `hash` into `target`.
    pub fn get(&self, hash: &str, target: &Path) -> Result<()> {
        let dir = self.entry_dir(hash);
        if !dir.exists() {
            return Err(Error::CacheMiss {
                key: hash.to_string(),
            });
        }
        let tmp = target.with_extension("tmp-restore");
        if tmp.exists() {
            fs::remove_dir_all(&tmp).map_err(|e| Error::io(&tmp, e))?;
        }
        copy_tree(&dir, &tmp, false)?;
        if target.exists() {
            fs::remove_dir_all(target).map_err(|e| Error::io(target, e))?;
        }
        fs::rename(&tmp, target).map_err(|e| Error::io(target, e))?;
        Ok(())
    }

    pub fn query(&self, hash: &str) -> Option<StoreMetadata> {
        let raw = fs::read_to_string(self.metadata_path(hash)).ok()?;
        serde_json::from_str(&raw).ok()
    }

    pub fn exists(&self, hash: &str) -> bool {
        self.entry_dir(hash).exists()
    }

    /// Adds `reference` (e.g. a lock file path, a snapshot id) to the
    /// entry's reference set so GC knows it is still rooted.
    pub fn add_reference(&self, hash: &str, reference: &str) -> Result<()> {
        let mut metadata = self
            .query(hash)
            .ok_or_else(|| Error::CacheMiss { key: hash.to_string() })?;
        metadata.references.insert(reference.to_string());
        atomic_write_json(&self.metadata_path(hash), &metadata)
    }

    pub fn remove(&self, hash: &str) -> Result<()> {
        let dir = self.entry_dir(hash);
        if dir.exists() {
            fs::remove_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;
        }
        let meta = self.metadata_path(hash);
        if meta.exists() {
            fs::remove_file(&meta).map_err(|e| Error::io(&meta, e))?;
        }
        Ok(())
    }

    /// Enumerates every hash currently present in the store.
    pub fn all_hashes(&self) -> Vec<String> {
        let mut hashes = Vec::new();
        let Ok(prefixes) = fs::read_dir(&self.root) else {
            return hashes;
        };
        for prefix in prefixes.flatten() {
            let Ok(entries) = fs::read_dir(prefix.path()) else {
                continue;
            };
            for entry in entries.flatten() {
                if entry.path().is_dir() {
                    if let Some(name) = entry.file_name().to_str() {
                        hashes.push(name.to_string());
                    }
                }
            }
        }
        hashes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn add_then_get_round_trips_content() {
        let store_dir = tempdir().unwrap();
        let store = Store::new(store_dir.path());

        let src = tempdir().unwrap();
        fs::write(src.path().join("file.txt"), b"hello").unwrap();

        let hash = store.add(src.path(), "a", "v1.0.0").unwrap();
        assert!(store.exists(&hash));

        let restore = tempdir().unwrap();
        let target = restore.path().join("out");
        store.get(&hash, &target).unwrap();
        assert_eq!(fs::read(target.join("file.txt")).unwrap(), b"hello");
    }

    #[test]
    fn adding_identical_content_twice_is_a_noop() {
        let store_dir = tempdir().unwrap();
        let store = Store::new(store_dir.path());

        let src = tempdir().unwrap();
        fs::write(src.path().join("file.txt"), b"hello").unwrap();

        let h1 = store.add(src.path(), "a", "v1.0.0").unwrap();
        let h2 = store.add(src.path(), "a", "v1.0.0").unwrap();
        assert_eq!(h1, h2);
    }

    #[test]
    fn get_on_missing_hash_is_cache_miss() {
        let store_dir = tempdir().unwrap();
        let store = Store::new(store_dir.path());
        let err = store.get("nonexistent", &store_dir.path().join("x")).unwrap_err();
        assert_eq!(err.kind_tag(), "CacheMiss");
    }

    #[test]
    fn remove_deletes_entry_and_metadata() {
        let store_dir = tempdir().unwrap();
        let store = Store::new(store_dir.path());
        let src = tempdir().unwrap();
        fs::write(src.path().join("file.txt"), b"hello").unwrap();
        let hash = store.add(src.path(), "a", "v1.0.0").unwrap();

        store.remove(&hash).unwrap();
        assert!(!store.exists(&hash));
        assert!(store.query(&hash).is_none());
    }
}
