//! Content hashing, atomic file writes, and gitignore-aware tree copy.
//!
//! Every persisted artifact in the workspace layout (lock files, store
//! entries, changesets, checkpoints, config) is written through
//! [`atomic_write`] so a crash never leaves a partial file visible at its
//! final path.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Writes `contents` to `path` via a sibling temp file plus rename, so
/// concurrent readers only ever observe the old or the new content.
pub fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

    let tmp_name = format!(
        ".{}.tmp-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("out"),
        std::process::id()
    );
    let tmp_path = dir.join(tmp_name);

    {
        let mut f = fs::File::create(&tmp_path).map_err(|e| Error::io(&tmp_path, e))?;
        f.write_all(contents).map_err(|e| Error::io(&tmp_path, e))?;
        f.sync_all().map_err(|e| Error::io(&tmp_path, e))?;
    }

    fs::rename(&tmp_path, path).map_err(|e| Error::io(path, e))?;
    Ok(())
}

pub fn atomic_write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let body = serde_json::to_vec_pretty(value)
        .map_err(|e| Error::manifest(format!("failed to serialize {}: {e}", path.display())))?;
    atomic_write(path, &body)
}

/// One canonicalized entry in a tree hash: relative path (forward-slash,
/// sorted), unix mode bits relevant to reproducibility, and the sha256 of
/// the file's bytes.
#[derive(Debug, Clone)]
struct TreeEntry {
    rel_path: String,
    executable: bool,
    content_hash: [u8; 32],
}

fn collect_tree_entries(root: &Path) -> Result<Vec<TreeEntry>> {
    let mut entries = Vec::new();
    collect_tree_entries_into(root, root, &mut entries)?;
    entries.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    Ok(entries)
}

fn collect_tree_entries_into(root: &Path, dir: &Path, out: &mut Vec<TreeEntry>) -> Result<()> {
    let read_dir = fs::read_dir(dir).map_err(|e| Error::io(dir, e))?;
    for entry in read_dir {
        let entry = entry.map_err(|e| Error::io(dir, e))?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| Error::io(&path, e))?;
        if file_type.is_dir() {
            collect_tree_entries_into(root, &path, out)?;
        } else if file_type.is_file() {
            let bytes = fs::read(&path).map_err(|e| Error::io(&path, e))?;
            let mut hasher = Sha256::new();
            hasher.update(&bytes);
            let content_hash: [u8; 32] = hasher.finalize().into();

            #[cfg(unix)]
            let executable = {
                use std::os::unix::fs::PermissionsExt;
                entry
                    .metadata()
                    .map(|m| m.permissions().mode() & 0o111 != 0)
                    .unwrap_or(false)
            };
            #[cfg(not(unix))]
            let executable = false;

            let rel_path = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .to_string_lossy()
                .replace('\\', "/");

            out.push(TreeEntry {
                rel_path,
                executable,
                content_hash,
            });
        }
        // Symlinks are skipped: they never occur in a reference checkout or
        // vendored tree this system writes itself.
    }
    Ok(())
}

/// Canonical content hash over a directory tree: sorted `(path, mode,
/// content_hash)` triples plus a caller-supplied `inputs_digest` (component
/// name, version, dependency hashes — anything that is not literally part of
/// the tree bytes but must still distinguish two otherwise-identical trees).
pub fn hash_tree(root: &Path, inputs_digest: &str) -> Result<String> {
    let entries = collect_tree_entries(root)?;
    let mut hasher = Sha256::new();
    hasher.update(inputs_digest.as_bytes());
    hasher.update(b"\0");
    for entry in &entries {
        hasher.update(entry.rel_path.as_bytes());
        hasher.update(if entry.executable { b"\x01" } else { b"\x00" });
        hasher.update(entry.content_hash);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hashes an arbitrary byte string (used for cache keys, plan ids, changeset
/// ids).
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Copies `src` into `dst`, honoring the upstream `.gitignore` (and other
/// standard ignore files) when `respect_gitignore` is set. Never copies VCS
/// metadata directories (`.git`, `.hg`, `.svn`) regardless of ignore rules,
/// since vendored trees must carry no VCS history in place.
pub fn copy_tree(src: &Path, dst: &Path, respect_gitignore: bool) -> Result<usize> {
    fs::create_dir_all(dst).map_err(|e| Error::io(dst, e))?;
    let mut copied = 0usize;

    let mut builder = ignore::WalkBuilder::new(src);
    builder
        .hidden(false)
        .git_ignore(respect_gitignore)
        .git_global(false)
        .git_exclude(false)
        .parents(false);

    for entry in builder.build() {
        let entry = entry.map_err(|e| Error::manifest(format!("walk error: {e}")))?;
        let path = entry.path();
        if is_vcs_metadata(src, path) {
            continue;
        }
        let rel = path.strip_prefix(src).unwrap_or(path);
        if rel.as_os_str().is_empty() {
            continue;
        }
        let target = dst.join(rel);
        let file_type = entry.file_type();
        if file_type.map(|t| t.is_dir()).unwrap_or(false) {
            fs::create_dir_all(&target).map_err(|e| Error::io(&target, e))?;
        } else if file_type.map(|t| t.is_file()).unwrap_or(false) {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
            }
            fs::copy(path, &target).map_err(|e| Error::io(&target, e))?;
            copied += 1;
        }
    }
    Ok(copied)
}

fn is_vcs_metadata(root: &Path, path: &Path) -> bool {
    path.strip_prefix(root)
        .ok()
        .and_then(|rel| rel.components().next())
        .map(|first| {
            matches!(
                first.as_os_str().to_str(),
                Some(".git") | Some(".hg") | Some(".svn")
            )
        })
        .unwrap_or(false)
}

/// Resolves `<store_root>/<hash>` into its sharded `<prefix>/<hash>` path.
pub fn sharded_store_path(store_root: &Path, hash: &str) -> PathBuf {
    let prefix = &hash[..hash.len().min(2)];
    store_root.join(prefix).join(hash)
}
