//! Rollback: resolves a rollback target — an explicit pin
//! map, a lock file, a content-store hash, a snapshot, or a changeset — into
//! a concrete pin map, then hands it to [`crate::apply`] exactly like a
//! normal apply against a named environment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::changeset::{self, ChangesetStatus};
use crate::error::{Error, Result};
use crate::lockfile::{self, LockEntry};
use crate::manifest::Manifest;

pub const CURRENT_SNAPSHOT_VERSION: u32 = 1;

/// A point-in-time capture of an environment's resolved pins, taken before
/// an apply that might need undoing. Schema-versioned the same way the lock
/// file and store metadata are, so an older snapshot can still be read by a
/// newer binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub snapshot_version: u32,
    pub id: String,
    pub environment: String,
    pub created_at: DateTime<Utc>,
    pub pins: BTreeMap<String, String>,
}

fn snapshots_dir(workspace_root: &Path) -> PathBuf {
    workspace_root.join(".meta/snapshots")
}

pub fn snapshot_path(workspace_root: &Path, id: &str) -> PathBuf {
    snapshots_dir(workspace_root).join(id)
}

pub fn create_snapshot(
    workspace_root: &Path,
    id: &str,
    environment: &str,
    pins: BTreeMap<String, String>,
    now: DateTime<Utc>,
) -> Result<Snapshot> {
    let snapshot = Snapshot {
        snapshot_version: CURRENT_SNAPSHOT_VERSION,
        id: id.to_string(),
        environment: environment.to_string(),
        created_at: now,
        pins,
    };
    crate::hashing::atomic_write_json(&snapshot_path(workspace_root, id), &snapshot)?;
    Ok(snapshot)
}

pub fn load_snapshot(workspace_root: &Path, id: &str) -> Result<Snapshot> {
    let path = snapshot_path(workspace_root, id);
    let raw = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
    serde_json::from_str(&raw).map_err(|e| Error::manifest(format!("snapshot {id} corrupt: {e}")))
}

/// What the user asked to roll back to.
#[derive(Debug, Clone)]
pub enum RollbackTarget {
    /// An explicit `component -> version/sha` map, as typed on the CLI.
    Pins(BTreeMap<String, String>),
    /// The on-disk lock file for the named environment.
    LockFile(String),
    /// A single component pinned to a specific content-store hash.
    StoreHash { component: String, hash: String },
    Snapshot(String),
    Changeset(String),
}

/// Resolves `target` into a `component -> pin` map. Does not touch the
/// filesystem beyond reading whatever record the target names.
pub fn resolve_pins(
    workspace_root: &Path,
    manifest: &Manifest,
    target: &RollbackTarget,
) -> Result<BTreeMap<String, String>> {
    let pins = match target {
        RollbackTarget::Pins(pins) => pins.clone(),
        RollbackTarget::LockFile(env) => {
            let lock = lockfile::read(workspace_root, env)?;
            lock.entries
                .iter()
                .map(|(name, entry)| {
                    let pin = match entry {
                        LockEntry::Reference { commit_sha, .. } => commit_sha.clone(),
                        LockEntry::Vendored { version, .. } => version.clone(),
                    };
                    (name.clone(), pin)
                })
                .collect()
        }
        RollbackTarget::StoreHash { component, hash } => {
            let mut pins = BTreeMap::new();
            pins.insert(component.clone(), hash.clone());
            pins
        }
        RollbackTarget::Snapshot(id) => load_snapshot(workspace_root, id)?.pins,
        RollbackTarget::Changeset(id) => {
            let changeset = changeset::load(workspace_root, id)?;
            if !matches!(
                changeset.status,
                ChangesetStatus::Committed | ChangesetStatus::RolledBack
            ) {
                return Err(Error::manifest(format!(
                    "changeset {id} was never committed; nothing to roll back to"
                )));
            }
            changeset
                .repos
                .into_iter()
                .map(|commit| (commit.name, commit.commit))
                .collect()
        }
    };

    for component in pins.keys() {
        if !manifest.components.contains_key(component) {
            return Err(Error::manifest(format!(
                "rollback target pins unknown component {component}"
            )));
        }
    }

    Ok(pins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::changeset::RepoCommit;
    use crate::manifest::{BuildKind, Component, Isolation, Mode};
    use tempfile::tempdir;

    fn manifest() -> Manifest {
        let mut components = BTreeMap::new();
        components.insert(
            "a".to_string(),
            Component {
                name: "a".into(),
                repo: "repo-a".into(),
                version: "v1.0.0".into(),
                build_kind: BuildKind::Generic,
                build_target: None,
                depends_on: vec![],
                isolation: Isolation::None,
            },
        );
        Manifest {
            mode: Mode::Reference,
            components,
            environments: BTreeMap::new(),
            features: BTreeMap::new(),
        }
    }

    #[test]
    fn resolves_explicit_pins_directly() {
        let manifest = manifest();
        let mut pins = BTreeMap::new();
        pins.insert("a".to_string(), "v0.9.0".to_string());
        let target = RollbackTarget::Pins(pins.clone());
        let dir = tempdir().unwrap();
        let resolved = resolve_pins(dir.path(), &manifest, &target).unwrap();
        assert_eq!(resolved, pins);
    }

    #[test]
    fn rejects_pins_naming_an_unknown_component() {
        let manifest = manifest();
        let mut pins = BTreeMap::new();
        pins.insert("ghost".to_string(), "v1.0.0".to_string());
        let target = RollbackTarget::Pins(pins);
        let dir = tempdir().unwrap();
        let err = resolve_pins(dir.path(), &manifest, &target).unwrap_err();
        assert_eq!(err.kind_tag(), "ManifestError");
    }

    #[test]
    fn resolves_from_a_snapshot() {
        let manifest = manifest();
        let dir = tempdir().unwrap();
        let mut pins = BTreeMap::new();
        pins.insert("a".to_string(), "v1.0.0".to_string());
        create_snapshot(dir.path(), "snap-1", "dev", pins.clone(), Utc::now()).unwrap();

        let target = RollbackTarget::Snapshot("snap-1".to_string());
        let resolved = resolve_pins(dir.path(), &manifest, &target).unwrap();
        assert_eq!(resolved, pins);
    }

    #[test]
    fn resolves_from_a_committed_changeset() {
        let manifest = manifest();
        let dir = tempdir().unwrap();
        let created = changeset::create(dir.path(), "alice", "ship it", Utc::now()).unwrap();
        changeset::record_commit(
            dir.path(),
            &created.id,
            RepoCommit {
                name: "a".into(),
                repo: "repo-a".into(),
                commit: "deadbeef".into(),
                branch: "main".into(),
                message: "m".into(),
            },
        )
        .unwrap();
        changeset::finalize(dir.path(), &created.id).unwrap();

        let target = RollbackTarget::Changeset(created.id);
        let resolved = resolve_pins(dir.path(), &manifest, &target).unwrap();
        assert_eq!(resolved.get("a"), Some(&"deadbeef".to_string()));
    }

    #[test]
    fn refuses_to_roll_back_to_an_in_progress_changeset() {
        let manifest = manifest();
        let dir = tempdir().unwrap();
        let created = changeset::create(dir.path(), "alice", "wip", Utc::now()).unwrap();

        let target = RollbackTarget::Changeset(created.id);
        let err = resolve_pins(dir.path(), &manifest, &target).unwrap_err();
        assert_eq!(err.kind_tag(), "ManifestError");
    }
}
