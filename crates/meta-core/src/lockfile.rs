//! Per-environment lock subsystem: generate/validate/
//! promote/compare. Distinct from [`crate::wslock`], which guards concurrent
//! invocations rather than pinning component versions.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hashing::atomic_write_json;
use crate::manifest::{Manifest, Mode};

pub const CURRENT_LOCK_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum LockEntry {
    Reference {
        version: String,
        commit_sha: String,
        repo: String,
        #[serde(rename = "type")]
        build_kind: String,
        build_target: Option<String>,
        depends_on: Vec<String>,
    },
    Vendored {
        version: String,
        vendored_at: DateTime<Utc>,
        repo: String,
        #[serde(rename = "type")]
        build_kind: String,
        build_target: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockFile {
    pub lock_version: u32,
    pub environment: String,
    pub mode: Mode,
    pub generated_at: DateTime<Utc>,
    pub entries: BTreeMap<String, LockEntry>,
}

pub fn lock_path(workspace_root: &Path, env: &str) -> std::path::PathBuf {
    workspace_root.join(format!("components.lock.{env}"))
}

/// Resolves each manifest component's pin to an immortal identifier: a
/// commit sha in reference mode (via `resolve_sha`), or the validated semver
/// itself in vendored mode. `resolve_sha` is injected so generation can be
/// tested without a real git repository.
pub fn generate(
    manifest: &Manifest,
    env: &str,
    mut resolve_sha: impl FnMut(&str, &str) -> Result<String>,
) -> Result<LockFile> {
    let pins = manifest
        .environments
        .get(env)
        .ok_or_else(|| Error::manifest(format!("unknown environment {env}")))?;

    let mut entries = BTreeMap::new();
    for (name, pin) in pins {
        let component = manifest
            .components
            .get(name)
            .ok_or_else(|| Error::manifest(format!("lock: unknown component {name}")))?;

        let entry = match manifest.mode {
            Mode::Reference => {
                let commit_sha = resolve_sha(&component.repo, pin)?;
                LockEntry::Reference {
                    version: pin.clone(),
                    commit_sha,
                    repo: component.repo.clone(),
                    build_kind: format!("{:?}", component.build_kind).to_lowercase(),
                    build_target: component.build_target.clone(),
                    depends_on: component.depends_on.clone(),
                }
            }
            Mode::Vendored => LockEntry::Vendored {
                version: pin.clone(),
                vendored_at: Utc::now(),
                repo: component.repo.clone(),
                build_kind: format!("{:?}", component.build_kind).to_lowercase(),
                build_target: component.build_target.clone(),
            },
        };
        entries.insert(name.clone(), entry);
    }

    Ok(LockFile {
        lock_version: CURRENT_LOCK_VERSION,
        environment: env.to_string(),
        mode: manifest.mode,
        generated_at: Utc::now(),
        entries,
    })
}

pub fn write(workspace_root: &Path, lock: &LockFile) -> Result<()> {
    atomic_write_json(&lock_path(workspace_root, &lock.environment), lock)
}

pub fn read(workspace_root: &Path, env: &str) -> Result<LockFile> {
    let path = lock_path(workspace_root, env);
    let raw = std::fs::read_to_string(&path).map_err(|e| Error::io(&path, e))?;
    serde_json::from_str(&raw).map_err(|e| Error::LockMismatch {
        component: env.to_string(),
        discrepancy: format!("failed to parse lock file: {e}"),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discrepancy {
    Missing(String),
    Extra(String),
    ShaMismatch(String),
    ModeMismatch(String),
}

#[derive(Debug, Default)]
pub struct ValidationReport {
    pub discrepancies: Vec<Discrepancy>,
}

impl ValidationReport {
    pub fn ok(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

pub fn validate(manifest: &Manifest, lock: &LockFile) -> ValidationReport {
    let mut report = ValidationReport::default();

    if manifest.mode != lock.mode {
        report
            .discrepancies
            .push(Discrepancy::ModeMismatch(lock.environment.clone()));
    }

    let pins = manifest.environments.get(&lock.environment);
    let expected: BTreeMap<&String, &String> = pins.map(|p| p.iter().collect()).unwrap_or_default();

    for name in expected.keys() {
        if !lock.entries.contains_key(*name) {
            report.discrepancies.push(Discrepancy::Missing((*name).clone()));
        }
    }
    for name in lock.entries.keys() {
        if !expected.contains_key(name) {
            report.discrepancies.push(Discrepancy::Extra(name.clone()));
        }
    }
    for (name, entry) in &lock.entries {
        if let (Some(expected_pin), LockEntry::Reference { version, .. }) = (expected.get(name), entry) {
            if *expected_pin != version {
                report
                    .discrepancies
                    .push(Discrepancy::ShaMismatch(name.clone()));
            }
        }
    }

    report
}

/// Copies lock entries from `src` to `dst`, rewriting the embedded
/// environment name. Fails if any component is absent from `dst`'s
/// manifest.
pub fn promote(manifest: &Manifest, src: &LockFile, dst_env: &str) -> Result<LockFile> {
    for name in src.entries.keys() {
        if !manifest.components.contains_key(name) {
            return Err(Error::manifest(format!(
                "promote: component {name} absent from destination manifest"
            )));
        }
    }
    Ok(LockFile {
        lock_version: src.lock_version,
        environment: dst_env.to_string(),
        mode: src.mode,
        generated_at: Utc::now(),
        entries: src.entries.clone(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDiff {
    pub component: String,
    pub field: String,
    pub a: String,
    pub b: String,
}

#[derive(Debug, Default)]
pub struct CompareReport {
    pub only_in_a: Vec<String>,
    pub only_in_b: Vec<String>,
    pub field_diffs: Vec<FieldDiff>,
}

fn entry_version(entry: &LockEntry) -> &str {
    match entry {
        LockEntry::Reference { version, .. } => version,
        LockEntry::Vendored { version, .. } => version,
    }
}

pub fn compare(a: &LockFile, b: &LockFile) -> CompareReport {
    let mut report = CompareReport::default();
    for name in a.entries.keys() {
        if !b.entries.contains_key(name) {
            report.only_in_a.push(name.clone());
        }
    }
    for name in b.entries.keys() {
        if !a.entries.contains_key(name) {
            report.only_in_b.push(name.clone());
        }
    }
    for (name, entry_a) in &a.entries {
        if let Some(entry_b) = b.entries.get(name) {
            let va = entry_version(entry_a);
            let vb = entry_version(entry_b);
            if va != vb {
                report.field_diffs.push(FieldDiff {
                    component: name.clone(),
                    field: "version".to_string(),
                    a: va.to_string(),
                    b: vb.to_string(),
                });
            }
        }
    }
    report
}
