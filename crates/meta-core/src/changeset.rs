//! Changeset log: append-only records grouping commits across
//! multiple component repositories into one atomic logical transaction, with
//! a status machine and a bisect driver.
//!
//! ```text
//! in-progress --finalize--> committed --rollback--> rolled-back
//!      |
//!      +--fail--> failed
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hashing::{atomic_write_json, hash_bytes};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangesetStatus {
    InProgress,
    Committed,
    Failed,
    RolledBack,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoCommit {
    pub name: String,
    pub repo: String,
    pub commit: String,
    pub branch: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Changeset {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    pub description: String,
    pub status: ChangesetStatus,
    pub repos: Vec<RepoCommit>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangesetIndex {
    pub ids: Vec<String>,
    pub in_progress: Option<String>,
}

fn changesets_dir(workspace_root: &Path) -> PathBuf {
    workspace_root.join(".meta/changesets")
}

fn index_path(workspace_root: &Path) -> PathBuf {
    changesets_dir(workspace_root).join("index")
}

fn changeset_path(workspace_root: &Path, id: &str) -> PathBuf {
    changesets_dir(workspace_root).join(id)
}

pub fn generate_id(author: &str, description: &str, timestamp: DateTime<Utc>) -> String {
    hash_bytes(format!("{author}\n{description}\n{timestamp}").as_bytes())[..12].to_string()
}

pub fn load_index(workspace_root: &Path) -> Result<ChangesetIndex> {
    let path = index_path(workspace_root);
    match fs::read_to_string(&path) {
        Ok(raw) => serde_json::from_str(&raw)
            .map_err(|e| Error::manifest(format!("changeset index corrupt: {e}"))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ChangesetIndex::default()),
        Err(e) => Err(Error::io(&path, e)),
    }
}

fn write_index(workspace_root: &Path, index: &ChangesetIndex) -> Result<()> {
    atomic_write_json(&index_path(workspace_root), index)
}

/// Creates a new `in-progress` changeset. Fails if another is already
/// `in-progress` — the index file enforces "at most one in-progress
/// changeset per workspace at a time".
pub fn create(
    workspace_root: &Path,
    author: &str,
    description: &str,
    now: DateTime<Utc>,
) -> Result<Changeset> {
    let mut index = load_index(workspace_root)?;
    if let Some(existing) = &index.in_progress {
        return Err(Error::manifest(format!(
            "changeset {existing} is already in-progress; finalize or fail it first"
        )));
    }

    let id = generate_id(author, description, now);
    let changeset = Changeset {
        id: id.clone(),
        timestamp: now,
        author: author.to_string(),
        description: description.to_string(),
        status: ChangesetStatus::InProgress,
        repos: Vec::new(),
        metadata: BTreeMap::new(),
    };

    atomic_write_json(&changeset_path(workspace_root, &id), &changeset)?;
    index.ids.push(id.clone());
    index.in_progress = Some(id);
    write_index(workspace_root, &index)?;

    Ok(changeset)
}

pub fn load(workspace_root: &Path, id: &str) -> Result<Changeset> {
    let path = changeset_path(workspace_root, id);
    let raw = fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
    serde_json::from_str(&raw).map_err(|e| Error::manifest(format!("changeset {id} corrupt: {e}")))
}

fn save(workspace_root: &Path, changeset: &Changeset) -> Result<()> {
    atomic_write_json(&changeset_path(workspace_root, &changeset.id), changeset)
}

pub fn record_commit(workspace_root: &Path, id: &str, commit: RepoCommit) -> Result<Changeset> {
    let mut changeset = load(workspace_root, id)?;
    if changeset.status != ChangesetStatus::InProgress {
        return Err(Error::manifest(format!(
            "changeset {id} is not in-progress; cannot record commits"
        )));
    }
    changeset.repos.push(commit);
    save(workspace_root, &changeset)?;
    Ok(changeset)
}

pub fn finalize(workspace_root: &Path, id: &str) -> Result<Changeset> {
    let mut changeset = load(workspace_root, id)?;
    changeset.status = ChangesetStatus::Committed;
    save(workspace_root, &changeset)?;

    let mut index = load_index(workspace_root)?;
    if index.in_progress.as_deref() == Some(id) {
        index.in_progress = None;
    }
    write_index(workspace_root, &index)?;
    Ok(changeset)
}

pub fn fail(workspace_root: &Path, id: &str) -> Result<Changeset> {
    let mut changeset = load(workspace_root, id)?;
    changeset.status = ChangesetStatus::Failed;
    save(workspace_root, &changeset)?;

    let mut index = load_index(workspace_root)?;
    if index.in_progress.as_deref() == Some(id) {
        index.in_progress = None;
    }
    write_index(workspace_root, &index)?;
    Ok(changeset)
}

/// Replays the changeset's recorded commits in reverse dependency order
/// (the order they were recorded, reversed — callers record in dependency
/// order already). `revert_commit(repo, commit) -> new_revert_commit_sha`
/// is injected so the driver stays decoupled from a concrete git
/// implementation. If any revert fails, the changeset is marked `failed`
/// and previously successful reverts are left in place — the user decides
/// what to do next, nothing is auto-undone.
pub fn rollback(
    workspace_root: &Path,
    id: &str,
    mut revert_commit: impl FnMut(&str, &str) -> Result<String>,
) -> Result<Changeset> {
    let mut changeset = load(workspace_root, id)?;
    if changeset.status != ChangesetStatus::Committed {
        return Err(Error::manifest(format!(
            "changeset {id} must be committed before it can be rolled back"
        )));
    }

    for repo_commit in changeset.repos.iter().rev() {
        if let Err(err) = revert_commit(&repo_commit.repo, &repo_commit.commit) {
            changeset.status = ChangesetStatus::Failed;
            save(workspace_root, &changeset)?;
            return Err(err);
        }
    }

    changeset.status = ChangesetStatus::RolledBack;
    save(workspace_root, &changeset)?;
    Ok(changeset)
}

/// Parses a `[changeset:<id>]` trailer out of a commit message, if present.
pub fn parse_trailer(message: &str) -> Option<String> {
    message
        .lines()
        .rev()
        .find_map(|line| {
            let line = line.trim();
            line.strip_prefix("[changeset:")
                .and_then(|rest| rest.strip_suffix(']'))
                .map(|id| id.to_string())
        })
}

/// Binary-searches over the sequence of `committed` changesets between
/// `start_id` and `end_id` (inclusive), narrowing to exactly one culprit.
/// `test` returns `true` if the candidate state passes.
pub fn bisect(
    sequence: &[String],
    mut materialize_and_test: impl FnMut(&str) -> Result<bool>,
) -> Result<Option<String>> {
    if sequence.is_empty() {
        return Ok(None);
    }
    let mut lo = 0usize;
    let mut hi = sequence.len() - 1;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if materialize_and_test(&sequence[mid])? {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    Ok(Some(sequence[lo].clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_then_finalize_round_trips() {
        let dir = tempdir().unwrap();
        let created = create(dir.path(), "alice", "ship it", Utc::now()).unwrap();
        assert_eq!(created.status, ChangesetStatus::InProgress);

        let finalized = finalize(dir.path(), &created.id).unwrap();
        assert_eq!(finalized.status, ChangesetStatus::Committed);

        let index = load_index(dir.path()).unwrap();
        assert!(index.in_progress.is_none());
    }

    #[test]
    fn only_one_in_progress_changeset_at_a_time() {
        let dir = tempdir().unwrap();
        create(dir.path(), "alice", "first", Utc::now()).unwrap();
        let err = create(dir.path(), "bob", "second", Utc::now()).unwrap_err();
        assert_eq!(err.kind_tag(), "ManifestError");
    }

    #[test]
    fn rollback_reverts_commits_in_reverse_order() {
        let dir = tempdir().unwrap();
        let created = create(dir.path(), "alice", "ship it", Utc::now()).unwrap();
        record_commit(
            dir.path(),
            &created.id,
            RepoCommit {
                name: "a".into(),
                repo: "repo-a".into(),
                commit: "sha1".into(),
                branch: "main".into(),
                message: "first".into(),
            },
        )
        .unwrap();
        record_commit(
            dir.path(),
            &created.id,
            RepoCommit {
                name: "b".into(),
                repo: "repo-b".into(),
                commit: "sha2".into(),
                branch: "main".into(),
                message: "second".into(),
            },
        )
        .unwrap();
        finalize(dir.path(), &created.id).unwrap();

        let mut order = Vec::new();
        let rolled_back = rollback(dir.path(), &created.id, |repo, commit| {
            order.push((repo.to_string(), commit.to_string()));
            Ok(format!("revert-of-{commit}"))
        })
        .unwrap();

        assert_eq!(rolled_back.status, ChangesetStatus::RolledBack);
        assert_eq!(
            order,
            vec![
                ("repo-b".to_string(), "sha2".to_string()),
                ("repo-a".to_string(), "sha1".to_string()),
            ]
        );
    }

    #[test]
    fn rollback_marks_failed_and_stops_on_first_error_without_auto_undo() {
        let dir = tempdir().unwrap();
        let created = create(dir.path(), "alice", "ship it", Utc::now()).unwrap();
        record_commit(
            dir.path(),
            &created.id,
            RepoCommit {
                name: "a".into(),
                repo: "repo-a".into(),
                commit: "sha1".into(),
                branch: "main".into(),
                message: "m".into(),
            },
        )
        .unwrap();
        finalize(dir.path(), &created.id).unwrap();

        let err = rollback(dir.path(), &created.id, |_repo, _commit| {
            Err(Error::manifest("revert failed"))
        })
        .unwrap_err();
        assert_eq!(err.kind_tag(), "ManifestError");

        let reloaded = load(dir.path(), &created.id).unwrap();
        assert_eq!(reloaded.status, ChangesetStatus::Failed);
    }

    #[test]
    fn parses_changeset_trailer() {
        let msg = "fix bug\n\n[changeset:abc123]";
        assert_eq!(parse_trailer(msg), Some("abc123".to_string()));
        assert_eq!(parse_trailer("no trailer here"), None);
    }

    #[test]
    fn bisect_narrows_to_a_single_culprit() {
        let sequence: Vec<String> = (0..8).map(|i| format!("cs-{i}")).collect();
        // Passes (true) until index 4, then fails from 4 onward.
        let culprit = bisect(&sequence, |id| {
            let idx: usize = id.trim_start_matches("cs-").parse().unwrap();
            Ok(idx < 4)
        })
        .unwrap();
        assert_eq!(culprit, Some("cs-4".to_string()));
    }
}
